//! Dispatches a parsed [`Cli`] to the durable engine crates and prints
//! either a human-readable one-line summary or (with `--json`) the full
//! structured payload, per §6 and §7.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use lerim_adapters::{parse_timestamp, PlatformRegistry, KNOWN_PLATFORMS};
use lerim_api::ApiServer;
use lerim_catalog::{AccessTracker, AuditLog, JobQueue, SessionCatalog};
use lerim_core::paths::ensure_memory_paths;
use lerim_core::project_scope::{git_root_for, ProjectRegistry};
use lerim_core::{Config, LerimError, Result, Runtime};
use lerim_memory::{LearningKind, MemoryPrimitive, MemoryRepo, PrimitiveType};
use lerim_pipelines::{build_pipeline_handles, run_forever, run_maintain, run_once, run_sync, MaintainOptions, SyncOptions};
use lerim_runtime::{LlmClient, StubLlmClient};

use super::{Cli, Command, ConnectAction, MemoryAction, ProjectAction};
use super::{EXIT_FATAL, EXIT_LOCK_BUSY, EXIT_OK, EXIT_PARTIAL, EXIT_USAGE};

/// Runs the whole CLI and returns the process exit code. The only thing
/// `main` does with the result is `std::process::exit`.
pub async fn run(cli: Cli) -> i32 {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("error: could not determine current directory: {err}");
            return EXIT_FATAL;
        }
    };

    let runtime = match Runtime::bootstrap(&cwd) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: {err}");
            return err.exit_code();
        }
    };

    match dispatch(&runtime, cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code()
        }
    }
}

fn llm_client() -> Arc<dyn LlmClient> {
    // No production LLM provider is wired here; the sync/maintain
    // pipelines treat the model as a pluggable collaborator (§4.8) reached
    // through this trait object. Swap in a real provider client here.
    Arc::new(StubLlmClient::new())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("error: failed to render JSON: {err}"),
    }
}

async fn dispatch(runtime: &Runtime, cli: Cli) -> Result<i32> {
    let config = (*runtime.config).clone();
    let json_out = cli.json;

    match cli.command {
        Command::Init => cmd_init(&config, json_out),
        Command::Connect { action } => cmd_connect(&config, action, json_out),
        Command::Project { action } => cmd_project(&config, action, json_out),
        Command::Sync {
            run_id,
            agent,
            window,
            since,
            until,
            max_sessions,
            no_extract,
            force,
            dry_run,
            ignore_lock,
        } => {
            cmd_sync(
                &config,
                run_id,
                agent,
                window,
                since,
                until,
                max_sessions,
                no_extract,
                force,
                dry_run,
                ignore_lock,
                json_out,
            )
            .await
        }
        Command::Maintain { force, dry_run } => cmd_maintain(&config, force, dry_run, json_out).await,
        Command::Daemon { once, poll_seconds } => cmd_daemon(&config, once, poll_seconds).await,
        Command::Memory { action } => cmd_memory(&config, action, json_out),
        Command::Chat { question, limit } => cmd_chat(&config, question, limit).await,
        Command::Status => cmd_status(&config, json_out),
        Command::Serve { host, port } => cmd_serve(&config, host, port).await,
        Command::Up { host, port } => cmd_up(&config, host, port),
        Command::Down => cmd_down(&config),
        Command::Logs { follow } => cmd_logs(&config, follow),
        Command::Dashboard => cmd_dashboard(&config),
    }
}

// ---------------------------------------------------------------------
// init / connect / project
// ---------------------------------------------------------------------

fn cmd_init(config: &Config, json_out: bool) -> Result<i32> {
    let config_path = config.global_data_dir.join("config.toml");
    if config_path.exists() {
        if json_out {
            print_json(&json!({"status": "already_initialized", "path": config_path.display().to_string()}));
        } else {
            println!("already initialized: {}", config_path.display());
        }
        return Ok(EXIT_OK);
    }

    std::fs::create_dir_all(&config.global_data_dir)?;
    let default_toml = "# Lerim user configuration.\n\
         # Uncommented sections below show the built-in defaults; edit any\n\
         # value to override it. Project-level config.toml (under a git\n\
         # root's .lerim/) layers on top of this file; LERIM_CONFIG layers\n\
         # on top of both. API keys are read only from the environment\n\
         # (ANTHROPIC_API_KEY, OPENAI_API_KEY, ZAI_API_KEY,\n\
         # OPENROUTER_API_KEY) and must never be written here.\n\
         \n\
         [memory]\n\
         scope = \"project_fallback_global\"\n\
         \n\
         [server]\n\
         host = \"127.0.0.1\"\n\
         port = 8765\n\
         \n\
         [daemon]\n\
         sync_interval_minutes = 15\n\
         maintain_interval_minutes = 60\n\
         \n\
         [decay]\n\
         days = 30\n\
         min_confidence_floor = 0.1\n\
         archive_threshold = 0.2\n\
         recent_access_grace_days = 3\n";
    std::fs::write(&config_path, default_toml)?;
    ensure_memory_paths(&config.global_data_dir)?;

    let registry = PlatformRegistry::new(config.platforms_path.clone());
    registry.auto_seed()?;

    if json_out {
        print_json(&json!({"status": "initialized", "path": config_path.display().to_string()}));
    } else {
        println!("wrote {}", config_path.display());
    }
    Ok(EXIT_OK)
}

fn cmd_connect(config: &Config, action: Option<ConnectAction>, json_out: bool) -> Result<i32> {
    let registry = PlatformRegistry::new(config.platforms_path.clone());
    registry.auto_seed()?;

    match action.unwrap_or(ConnectAction::List) {
        ConnectAction::List => {
            let statuses = registry.list(true);
            if json_out {
                print_json(&statuses);
            } else if statuses.is_empty() {
                println!("no platforms connected");
            } else {
                for status in statuses {
                    println!(
                        "{:<10} {:>6} sessions  {}  {}",
                        status.name,
                        status.session_count,
                        if status.exists { "ok" } else { "missing" },
                        status.path
                    );
                }
            }
            Ok(EXIT_OK)
        }
        ConnectAction::Auto => {
            let mut results = Vec::new();
            for name in KNOWN_PLATFORMS {
                results.push(registry.connect(name, None)?);
            }
            if json_out {
                print_json(&results);
            } else {
                for result in &results {
                    println!("{}: {}", result.name, result.status);
                }
            }
            Ok(EXIT_OK)
        }
        ConnectAction::Remove { name } => {
            let removed = registry.remove(&name)?;
            if json_out {
                print_json(&json!({"name": name, "removed": removed}));
            } else if removed {
                println!("disconnected {name}");
            } else {
                println!("{name} was not connected");
            }
            Ok(EXIT_OK)
        }
        ConnectAction::Platform(args) => {
            let Some(name) = args.first().cloned() else {
                eprintln!("usage: lerim connect <platform> [--path P]");
                return Ok(EXIT_USAGE);
            };
            let mut path = None;
            let mut iter = args.iter().skip(1);
            while let Some(arg) = iter.next() {
                if arg == "--path" {
                    path = iter.next().cloned();
                }
            }
            let result = registry.connect(&name, path.as_deref())?;
            if json_out {
                print_json(&result);
            } else {
                println!("{}: {}", result.name, result.status);
            }
            Ok(EXIT_OK)
        }
    }
}

fn cmd_project(config: &Config, action: ProjectAction, json_out: bool) -> Result<i32> {
    let registry = ProjectRegistry::new(lerim_core::paths::projects_path(&config.global_data_dir));
    match action {
        ProjectAction::Add { path } => {
            let project = registry.add(&path)?;
            if json_out {
                print_json(&project);
            } else {
                println!("tracking {} at {}", project.name, project.path);
            }
            Ok(EXIT_OK)
        }
        ProjectAction::List => {
            let projects = registry.list();
            if json_out {
                print_json(&projects);
            } else if projects.is_empty() {
                println!("no tracked projects");
            } else {
                for project in projects {
                    println!("{}  {}", project.name, project.path);
                }
            }
            Ok(EXIT_OK)
        }
        ProjectAction::Remove { name } => {
            let removed = registry.remove(&name)?;
            if json_out {
                print_json(&json!({"name": name, "removed": removed}));
            } else if removed {
                println!("removed {name}");
            } else {
                println!("{name} was not tracked");
            }
            Ok(EXIT_OK)
        }
    }
}

// ---------------------------------------------------------------------
// sync / maintain / daemon
// ---------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn cmd_sync(
    config: &Config,
    run_id: Option<String>,
    agent: Vec<String>,
    window: Option<String>,
    since: Option<String>,
    until: Option<String>,
    max_sessions: Option<usize>,
    no_extract: bool,
    force: bool,
    dry_run: bool,
    ignore_lock: bool,
    json_out: bool,
) -> Result<i32> {
    let since = since
        .map(|raw| parse_timestamp(&raw).ok_or_else(|| LerimError::Other(format!("invalid --since timestamp '{raw}'"))))
        .transpose()?;
    let until = until
        .map(|raw| parse_timestamp(&raw).ok_or_else(|| LerimError::Other(format!("invalid --until timestamp '{raw}'"))))
        .transpose()?;

    let llm = llm_client();
    let handles = build_pipeline_handles(config, llm)?;

    let opts = SyncOptions {
        target_run_id: run_id,
        agent_types: agent,
        window,
        since,
        until,
        max_sessions: max_sessions.unwrap_or(20),
        no_extract,
        force,
        dry_run,
        ignore_lock,
        trigger: Some("cli".to_string()),
    };

    let summary = run_sync(&handles.sync_deps, opts).await?;
    let exit_code = summary.exit_code;

    if json_out {
        print_json(&summary);
    } else {
        println!(
            "sync: indexed={} extracted={} skipped={} failed={} learnings(new={} updated={})",
            summary.indexed_sessions,
            summary.extracted_sessions,
            summary.skipped_sessions,
            summary.failed_sessions,
            summary.learnings_new,
            summary.learnings_updated,
        );
    }

    Ok(exit_code)
}

async fn cmd_maintain(config: &Config, _force: bool, dry_run: bool, json_out: bool) -> Result<i32> {
    let llm = llm_client();
    let handles = build_pipeline_handles(config, llm)?;

    let opts = MaintainOptions {
        dry_run,
        trigger: Some("cli".to_string()),
    };
    let summary = run_maintain(&handles.maintain_deps, opts).await?;
    let exit_code = summary.exit_code;

    if json_out {
        print_json(&summary);
    } else {
        println!(
            "maintain: merged={} archived={} consolidated={} decayed={} unchanged={}",
            summary.merged, summary.archived, summary.consolidated, summary.decayed, summary.unchanged,
        );
    }

    Ok(exit_code)
}

async fn cmd_daemon(config: &Config, once: bool, poll_seconds: Option<u64>) -> Result<i32> {
    let llm = llm_client();
    let handles = build_pipeline_handles(config, llm)?;

    if once {
        run_once(&handles.sync_deps, &handles.maintain_deps).await?;
        return Ok(EXIT_OK);
    }

    if let Some(poll_seconds) = poll_seconds {
        tracing::debug!(poll_seconds, "daemon wakes at the next due cycle, not on a fixed poll; flag is advisory only");
    }

    let stop = CancellationToken::new();
    let sync_interval = std::time::Duration::from_secs(config.sync_interval_minutes as u64 * 60);
    let maintain_interval = std::time::Duration::from_secs(config.maintain_interval_minutes as u64 * 60);

    let ctrl_c = {
        let stop = stop.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            stop.cancel();
        }
    };

    tokio::select! {
        _ = run_forever(&handles.sync_deps, &handles.maintain_deps, sync_interval, maintain_interval, stop.clone()) => {}
        _ = ctrl_c => {}
    }

    Ok(EXIT_OK)
}

// ---------------------------------------------------------------------
// memory
// ---------------------------------------------------------------------

fn parse_primitive_type(raw: &str) -> Result<PrimitiveType> {
    match raw {
        "decision" | "decisions" => Ok(PrimitiveType::Decision),
        "learning" | "learnings" => Ok(PrimitiveType::Learning),
        other => Err(LerimError::Other(format!("unknown --primitive '{other}', expected decision or learning"))),
    }
}

fn parse_learning_kind(raw: &str) -> Result<LearningKind> {
    match raw {
        "insight" => Ok(LearningKind::Insight),
        "procedure" => Ok(LearningKind::Procedure),
        "friction" => Ok(LearningKind::Friction),
        "pitfall" => Ok(LearningKind::Pitfall),
        "preference" => Ok(LearningKind::Preference),
        other => Err(LerimError::Other(format!("unknown --kind '{other}'"))),
    }
}

fn cmd_memory(config: &Config, action: MemoryAction, json_out: bool) -> Result<i32> {
    let memory_paths = ensure_memory_paths(&config.data_dir)?;
    let repo = MemoryRepo::new(memory_paths);

    match action {
        MemoryAction::Search { query, limit } => {
            let limit = limit.unwrap_or(20);
            let mut hits = Vec::new();
            let needle = query.to_lowercase();
            for primitive_type in [PrimitiveType::Decision, PrimitiveType::Learning] {
                for entry in repo.list(primitive_type)? {
                    let filename = entry.relative_path.rsplit('/').next().unwrap_or(&entry.relative_path);
                    let Ok(primitive) = repo.read_primitive(primitive_type, filename) else { continue };
                    let haystack = format!("{} {}", primitive.frontmatter.title, primitive.body).to_lowercase();
                    if haystack.contains(&needle) {
                        hits.push(json!({
                            "relative_path": entry.relative_path,
                            "title": primitive.frontmatter.title,
                            "confidence": primitive.frontmatter.confidence,
                            "tags": primitive.frontmatter.tags,
                        }));
                    }
                    if hits.len() >= limit {
                        break;
                    }
                }
            }
            if json_out {
                print_json(&hits);
            } else if hits.is_empty() {
                println!("no matches for '{query}'");
            } else {
                for hit in &hits {
                    println!("{}  {}", hit["relative_path"].as_str().unwrap_or_default(), hit["title"].as_str().unwrap_or_default());
                }
            }
            Ok(EXIT_OK)
        }
        MemoryAction::List { limit } => {
            let limit = limit.unwrap_or(50);
            let mut rows = Vec::new();
            for primitive_type in [PrimitiveType::Decision, PrimitiveType::Learning, PrimitiveType::Summary] {
                for entry in repo.list(primitive_type)? {
                    rows.push(entry.relative_path);
                    if rows.len() >= limit {
                        break;
                    }
                }
            }
            if json_out {
                print_json(&rows);
            } else if rows.is_empty() {
                println!("no memory primitives yet");
            } else {
                for row in &rows {
                    println!("{row}");
                }
            }
            Ok(EXIT_OK)
        }
        MemoryAction::Add {
            title,
            body,
            primitive,
            kind,
            confidence,
            tags,
        } => {
            let primitive_type = parse_primitive_type(&primitive)?;
            let kind = kind.map(|k| parse_learning_kind(&k)).transpose()?;
            let record = MemoryPrimitive::new(primitive_type, &title, "cli", confidence, tags, &body, kind)?;
            let relative = repo.write_primitive(&record)?;
            if json_out {
                print_json(&json!({"relative_path": relative}));
            } else {
                println!("wrote {relative}");
            }
            Ok(EXIT_OK)
        }
        MemoryAction::Export { format, output } => {
            let mut out = String::new();
            let mut entries_json = Vec::new();
            for primitive_type in [PrimitiveType::Decision, PrimitiveType::Learning] {
                for entry in repo.list(primitive_type)? {
                    let filename = entry.relative_path.rsplit('/').next().unwrap_or(&entry.relative_path);
                    let Ok(primitive) = repo.read_primitive(primitive_type, filename) else { continue };
                    match format.as_str() {
                        "markdown" => {
                            out.push_str(&primitive.to_file_contents()?);
                            out.push_str("\n\n---\n\n");
                        }
                        _ => entries_json.push(json!({
                            "relative_path": entry.relative_path,
                            "frontmatter": primitive.frontmatter,
                            "body": primitive.body,
                        })),
                    }
                }
            }
            let rendered = if format == "markdown" { out } else { serde_json::to_string_pretty(&entries_json)? };

            match output {
                Some(path) => {
                    std::fs::write(&path, &rendered)?;
                    if json_out {
                        print_json(&json!({"status": "exported", "path": path}));
                    } else {
                        println!("exported to {path}");
                    }
                }
                None => println!("{rendered}"),
            }
            Ok(EXIT_OK)
        }
        MemoryAction::Reset { scope, yes } => {
            if !yes {
                eprintln!("refusing to reset memory without --yes");
                return Ok(EXIT_USAGE);
            }
            let mut reset_roots = Vec::new();
            let project_root = git_root_for(&config.data_dir).map(|root| root.join(&config.memory_project_dir_name));
            match scope.as_str() {
                "project" => {
                    let Some(root) = project_root else {
                        return Err(LerimError::Other("no project root discoverable from the current directory".to_string()));
                    };
                    reset_roots.push(root);
                }
                "global" => reset_roots.push(config.global_data_dir.clone()),
                "both" => {
                    if let Some(root) = project_root {
                        reset_roots.push(root);
                    }
                    reset_roots.push(config.global_data_dir.clone());
                }
                other => return Err(LerimError::Other(format!("unknown --scope '{other}', expected project, global, or both"))),
            }

            for root in &reset_roots {
                reset_memory_tree(root)?;
            }

            if json_out {
                print_json(&json!({"status": "reset", "roots": reset_roots.iter().map(|r| r.display().to_string()).collect::<Vec<_>>()}));
            } else {
                println!("reset memory under: {}", reset_roots.iter().map(|r| r.display().to_string()).collect::<Vec<_>>().join(", "));
            }
            Ok(EXIT_OK)
        }
    }
}

/// Clears a data root's `memory/` tree and recreates the empty skeleton.
/// Unlike [`lerim_core::paths::reset_memory_root`] (test-only, wipes the
/// whole data root including the index databases), this leaves the
/// catalog and access-tracker SQLite files untouched.
fn reset_memory_tree(root: &Path) -> Result<()> {
    let memory_dir = root.join("memory");
    if memory_dir.exists() {
        std::fs::remove_dir_all(&memory_dir)?;
    }
    ensure_memory_paths(root)?;
    Ok(())
}

// ---------------------------------------------------------------------
// chat / status
// ---------------------------------------------------------------------

async fn cmd_chat(config: &Config, question: String, limit: Option<usize>) -> Result<i32> {
    let url = format!("http://{}:{}/api/chat", config.server_host, config.server_port);
    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .json(&json!({"question": question, "limit": limit.unwrap_or(10)}))
        .send()
        .await
        .map_err(|err| LerimError::Other(format!("could not reach lerim server at {url}: {err} (is `lerim serve`/`lerim up` running?)")))?;

    if !response.status().is_success() {
        return Err(LerimError::Other(format!("chat request failed: HTTP {}", response.status())));
    }
    let body: serde_json::Value = response.json().await.map_err(LerimError::from)?;
    println!("{}", body.get("answer").and_then(|v| v.as_str()).unwrap_or(""));
    Ok(EXIT_OK)
}

fn cmd_status(config: &Config, json_out: bool) -> Result<i32> {
    let memory_paths = ensure_memory_paths(&config.data_dir)?;
    let memory_repo = MemoryRepo::new(memory_paths);
    let registry = PlatformRegistry::new(config.platforms_path.clone());
    registry.auto_seed()?;

    let session_catalog = SessionCatalog::open(&config.sessions_db_path)?;
    let job_queue = JobQueue::open(&config.sessions_db_path)?;
    let audit_log = AuditLog::open(&config.sessions_db_path)?;

    let mut memory_count = 0u64;
    for primitive_type in [PrimitiveType::Decision, PrimitiveType::Learning, PrimitiveType::Summary] {
        memory_count += memory_repo.list(primitive_type)?.len() as u64;
    }

    let connected_agents = registry.connected_agents()?;
    let platforms = registry.list(false);
    let sessions_indexed_count = session_catalog.stats()?.total_sessions;
    let queue_counts = job_queue.count_by_status()?;
    let latest_sync = audit_log.latest("sync")?;
    let latest_maintain = audit_log.latest("maintain")?;

    let payload = json!({
        "connected_agents": connected_agents,
        "platforms": platforms,
        "memory_count": memory_count,
        "sessions_indexed_count": sessions_indexed_count,
        "queue_counts": queue_counts,
        "latest_sync": latest_sync,
        "latest_maintain": latest_maintain,
        "timestamp": Utc::now(),
    });

    if json_out {
        print_json(&payload);
    } else {
        println!(
            "agents={} platforms={} memory={} sessions_indexed={} queue={:?}",
            connected_agents.len(),
            platforms.len(),
            memory_count,
            sessions_indexed_count,
            queue_counts,
        );
        if let Some(run) = &latest_sync {
            println!("last sync: {} ({})", run.status, run.started_at);
        }
        if let Some(run) = &latest_maintain {
            println!("last maintain: {} ({})", run.status, run.started_at);
        }
    }

    Ok(EXIT_OK)
}

// ---------------------------------------------------------------------
// serve / up / down / logs / dashboard
// ---------------------------------------------------------------------

fn apply_host_port(mut config: Config, host: Option<String>, port: Option<u16>) -> Config {
    if let Some(host) = host {
        config.server_host = host;
    }
    if let Some(port) = port {
        config.server_port = port;
    }
    config
}

async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.ok() };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Runs the combined HTTP API + daemon scheduler in the foreground until
/// SIGTERM/SIGINT, per §4.4's "combined server" shutdown sequence.
async fn cmd_serve(config: &Config, host: Option<String>, port: Option<u16>) -> Result<i32> {
    let config = apply_host_port(config.clone(), host, port);

    let llm = llm_client();
    let server = ApiServer::new(config.clone(), llm.clone())?;
    let handles = build_pipeline_handles(&config, llm)?;

    let stop = CancellationToken::new();
    let sync_interval = std::time::Duration::from_secs(config.sync_interval_minutes as u64 * 60);
    let maintain_interval = std::time::Duration::from_secs(config.maintain_interval_minutes as u64 * 60);

    let daemon_stop = stop.clone();
    let daemon_handle = tokio::spawn(async move {
        run_forever(&handles.sync_deps, &handles.maintain_deps, sync_interval, maintain_interval, daemon_stop).await;
    });

    let app = server.router();
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "lerim serving HTTP API + daemon");

    let serve_stop = stop.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            serve_stop.cancel();
        })
        .await?;

    stop.cancel();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(30), daemon_handle).await;

    Ok(EXIT_OK)
}

fn pid_file(config: &Config) -> PathBuf {
    config.global_data_dir.join("lerim.pid")
}

fn log_file(config: &Config) -> PathBuf {
    config.global_data_dir.join("logs").join("lerim.log")
}

fn cmd_up(config: &Config, host: Option<String>, port: Option<u16>) -> Result<i32> {
    let pid_path = pid_file(config);
    if let Some(existing_pid) = std::fs::read_to_string(&pid_path).ok().and_then(|s| s.trim().parse::<u32>().ok()) {
        if process_alive(existing_pid) {
            println!("already running (pid {existing_pid})");
            return Ok(EXIT_OK);
        }
    }

    let log_path = log_file(config);
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_handle = std::fs::OpenOptions::new().create(true).append(true).open(&log_path)?;
    let log_handle_err = log_handle.try_clone()?;

    let exe = std::env::current_exe()?;
    let mut command = std::process::Command::new(exe);
    command.arg("serve");
    if let Some(host) = &host {
        command.arg("--host").arg(host);
    }
    if let Some(port) = port {
        command.arg("--port").arg(port.to_string());
    }
    command.stdout(std::process::Stdio::from(log_handle));
    command.stderr(std::process::Stdio::from(log_handle_err));
    command.stdin(std::process::Stdio::null());

    let child = command.spawn()?;
    std::fs::write(&pid_path, child.id().to_string())?;
    println!("started lerim serve (pid {}), logs at {}", child.id(), log_path.display());
    Ok(EXIT_OK)
}

fn cmd_down(config: &Config) -> Result<i32> {
    let pid_path = pid_file(config);
    let Some(pid) = std::fs::read_to_string(&pid_path).ok().and_then(|s| s.trim().parse::<u32>().ok()) else {
        println!("no running server recorded");
        return Ok(EXIT_OK);
    };

    if !process_alive(pid) {
        let _ = std::fs::remove_file(&pid_path);
        println!("server (pid {pid}) was not running");
        return Ok(EXIT_OK);
    }

    #[cfg(unix)]
    {
        let status = std::process::Command::new("kill").arg("-TERM").arg(pid.to_string()).status();
        if let Err(err) = status {
            return Err(LerimError::Other(format!("failed to signal pid {pid}: {err}")));
        }
    }
    #[cfg(not(unix))]
    {
        return Err(LerimError::Other("stopping a background server is only supported on unix hosts".to_string()));
    }

    let _ = std::fs::remove_file(&pid_path);
    println!("stopped (pid {pid})");
    Ok(EXIT_OK)
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

fn cmd_logs(config: &Config, follow: bool) -> Result<i32> {
    let log_path = log_file(config);
    if !log_path.exists() {
        println!("no log file yet at {}", log_path.display());
        return Ok(EXIT_OK);
    }

    let mut file = std::fs::File::open(&log_path)?;
    std::io::copy(&mut file, &mut std::io::stdout())?;

    if follow {
        use std::io::{Read, Seek, SeekFrom};
        let mut position = file.seek(SeekFrom::End(0))?;
        loop {
            std::thread::sleep(std::time::Duration::from_millis(500));
            let metadata = std::fs::metadata(&log_path)?;
            if metadata.len() < position {
                position = 0;
            }
            if metadata.len() > position {
                let mut file = std::fs::File::open(&log_path)?;
                file.seek(SeekFrom::Start(position))?;
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                std::io::stdout().write_all(&buf)?;
                position = metadata.len();
            }
        }
    }

    Ok(EXIT_OK)
}

fn cmd_dashboard(config: &Config) -> Result<i32> {
    // The dashboard's static assets are an external collaborator (§1); this
    // core engine only knows the URL they would be served from.
    println!("http://{}:{}/", config.server_host, config.server_port);
    Ok(EXIT_OK)
}
