//! The daemon scheduler (§4.4): one cooperative poll loop tracking two
//! independent next-due instants (sync, maintain). Whichever is due runs;
//! sync runs first on a tie. A stop token interrupts the sleep between
//! ticks; an in-flight cycle always finishes its current claim before the
//! loop re-checks the stop signal.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use lerim_core::Result;

use crate::maintain::{run_maintain, MaintainDeps, MaintainOptions};
use crate::sync::{run_sync, SyncDeps, SyncOptions};

/// Runs one sync cycle followed by one maintain cycle, then returns. Used
/// by `lerim sync && lerim maintain`-style one-shot invocations and by
/// tests that want deterministic single-pass behavior.
pub async fn run_once(sync_deps: &SyncDeps, maintain_deps: &MaintainDeps) -> Result<()> {
    run_sync(sync_deps, SyncOptions { trigger: Some("daemon_once".to_string()), ..SyncOptions::with_defaults() }).await?;
    run_maintain(maintain_deps, MaintainOptions { trigger: Some("daemon_once".to_string()), ..Default::default() }).await?;
    Ok(())
}

/// Runs sync/maintain cycles forever, gated by their own interval, until
/// `stop` is cancelled. Checked once per tick of the shorter interval's
/// remaining duration so the loop never busy-spins.
pub async fn run_forever(
    sync_deps: &SyncDeps,
    maintain_deps: &MaintainDeps,
    sync_interval: Duration,
    maintain_interval: Duration,
    stop: CancellationToken,
) {
    let mut next_sync = Instant::now();
    let mut next_maintain = Instant::now();

    loop {
        if stop.is_cancelled() {
            break;
        }

        let now = Instant::now();
        let sync_due = now >= next_sync;
        let maintain_due = now >= next_maintain;

        if sync_due {
            if let Err(err) = run_sync(sync_deps, SyncOptions { trigger: Some("daemon".to_string()), ..SyncOptions::with_defaults() }).await {
                tracing::error!(error = %err, "scheduled sync cycle failed");
            }
            next_sync = Instant::now() + sync_interval;
        } else if maintain_due {
            if let Err(err) = run_maintain(maintain_deps, MaintainOptions { trigger: Some("daemon".to_string()), ..Default::default() }).await {
                tracing::error!(error = %err, "scheduled maintain cycle failed");
            }
            next_maintain = Instant::now() + maintain_interval;
        }

        let wake_at = next_sync.min(next_maintain);
        let sleep_for = wake_at.saturating_duration_since(Instant::now()).max(Duration::from_millis(1));

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_runs_first_on_a_tie() {
        let now = Instant::now();
        let next_sync = now;
        let next_maintain = now;
        assert!(now >= next_sync);
        let sync_due = now >= next_sync;
        let maintain_due = now >= next_maintain;
        assert!(sync_due && maintain_due);
    }
}
