//! Prompt templates for the three runtime-agent modes (§4.8). These are
//! plain string builders consumed by a real `LlmClient` implementation; the
//! in-tree `StubLlmClient` ignores the rendered text and performs the
//! deterministic fixture behavior directly, but still builds the prompt so
//! its `agent.log` artifact looks like a real run's.

use crate::contracts::PromptVars;

const CHAT_SYSTEM_PROMPT: &str = "\
You are the Lerim memory assistant. Answer the operator's question using \
only the read, glob, grep, and explore tools. You may not write or edit \
any file in this mode.";

const SYNC_SYSTEM_PROMPT: &str = "\
You are the Lerim sync lead agent. Read the session trace at the given \
path, delegate exploration to read-only subagents as needed, then: extract \
candidate decisions/learnings via the extract_pipeline tool, write a \
summary via the summarize_pipeline tool, decide add/update/no_op for each \
candidate against the existing memory tree, and write every required \
artifact (extract.json, summary.json, memory_actions.json, subagents.log) \
into your run folder before finishing.";

const MAINTAIN_SYSTEM_PROMPT: &str = "\
You are the Lerim maintain lead agent. Using the supplied access \
statistics and decay policy, merge near-duplicate memories, archive stale \
ones, and consolidate where it reduces redundancy. Write \
maintain_actions.json into your run folder summarizing every action taken.";

/// Renders `{{key}}` placeholders in `template` against `vars`, leaving any
/// placeholder with no matching key untouched (it is inspectable in the
/// agent log rather than silently dropped).
fn render(template: &str, vars: &PromptVars) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

pub fn build_chat_prompt(question: &str, vars: &PromptVars) -> String {
    format!(
        "{CHAT_SYSTEM_PROMPT}\n\nQuestion: {}\n\n{}",
        question,
        render("Context: {{memory_root}}", vars)
    )
}

pub fn build_sync_prompt(session_path: &str, run_id: &str, vars: &PromptVars) -> String {
    format!(
        "{SYNC_SYSTEM_PROMPT}\n\nSession trace: {session_path}\nRun id: {run_id}\n\n{}",
        render(
            "Memory root: {{memory_root}}\nWorkspace root: {{workspace_root}}\nRun folder: {{run_folder}}",
            vars
        )
    )
}

pub fn build_maintain_prompt(vars: &PromptVars) -> String {
    format!(
        "{MAINTAIN_SYSTEM_PROMPT}\n\n{}",
        render(
            "Memory root: {{memory_root}}\nDecay days: {{decay_days}}\nMin confidence floor: {{min_confidence_floor}}\nGrace period days: {{grace_period_days}}",
            vars
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_known_keys_and_leaves_unknown_ones() {
        let mut vars = PromptVars::new();
        vars.insert("memory_root".to_string(), "/data/memory".to_string());
        let rendered = render("root={{memory_root}} other={{missing}}", &vars);
        assert_eq!(rendered, "root=/data/memory other={{missing}}");
    }

    #[test]
    fn build_sync_prompt_embeds_session_path_and_run_id() {
        let vars = PromptVars::new();
        let prompt = build_sync_prompt("/trace.jsonl", "sync-1", &vars);
        assert!(prompt.contains("/trace.jsonl"));
        assert!(prompt.contains("sync-1"));
    }
}
