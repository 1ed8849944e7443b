//! The memory primitive: a YAML-frontmatter markdown file stored under
//! `memory/{decisions,learnings,summaries}/`. Filenames and the
//! server-defaulted frontmatter fields (`id`, `created`, `updated`,
//! `source`) are always derived here, never trusted from caller input.
//! Summaries carry a distinct frontmatter shape (no confidence/decay —
//! they are never archived) and are modeled separately.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{LerimError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    Decision,
    Learning,
    Summary,
}

impl PrimitiveType {
    pub fn folder(self) -> &'static str {
        match self {
            PrimitiveType::Decision => "decisions",
            PrimitiveType::Learning => "learnings",
            PrimitiveType::Summary => "summaries",
        }
    }

    /// Detects the primitive type from a folder name. Strict: unknown
    /// folder names are rejected rather than guessed at.
    pub fn from_folder(folder: &str) -> Result<Self> {
        match folder {
            "decisions" => Ok(PrimitiveType::Decision),
            "learnings" => Ok(PrimitiveType::Learning),
            "summaries" => Ok(PrimitiveType::Summary),
            other => Err(LerimError::ArtifactInvalid(format!(
                "'{other}' is not a recognized memory primitive folder"
            ))),
        }
    }

    /// Whether this primitive type can be moved into `archived/`.
    pub fn archivable(self) -> bool {
        matches!(self, PrimitiveType::Decision | PrimitiveType::Learning)
    }
}

/// The learning subtype. Required on every learning primitive; decisions
/// never carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningKind {
    Insight,
    Procedure,
    Friction,
    Pitfall,
    Preference,
}

impl Default for LearningKind {
    fn default() -> Self {
        LearningKind::Insight
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frontmatter {
    pub id: String,
    pub title: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub source: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Only present (and required) on learning primitives.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<LearningKind>,
}

fn default_confidence() -> f64 {
    0.7
}

#[derive(Debug, Clone)]
pub struct MemoryPrimitive {
    pub primitive_type: PrimitiveType,
    pub frontmatter: Frontmatter,
    pub body: String,
    /// The `{YYYYMMDD}` the filename is stamped with. Derived from the
    /// originating run id, not from `frontmatter.created` — re-processing
    /// an older session must still file under that session's date.
    filename_date: NaiveDate,
}

impl MemoryPrimitive {
    /// Constructs a new decision or learning primitive, stamping
    /// `id`/`created`/`updated` and `source` server-side. `kind` is
    /// required for learnings and ignored for decisions.
    pub fn new(
        primitive_type: PrimitiveType,
        title: &str,
        source: &str,
        confidence: f64,
        tags: Vec<String>,
        body: &str,
        kind: Option<LearningKind>,
    ) -> Result<Self> {
        if primitive_type == PrimitiveType::Summary {
            return Err(LerimError::ArtifactInvalid(
                "summaries are constructed via SummaryRecord, not MemoryPrimitive::new".into(),
            ));
        }
        let now = Utc::now();
        let slug = slugify(title);
        let kind = match primitive_type {
            PrimitiveType::Learning => Some(kind.unwrap_or_default()),
            _ => None,
        };
        Ok(MemoryPrimitive {
            primitive_type,
            frontmatter: Frontmatter {
                id: slug,
                title: title.to_string(),
                created: now,
                updated: now,
                source: source.to_string(),
                confidence,
                tags,
                kind,
            },
            body: body.to_string(),
            filename_date: date_from_run_id(source),
        })
    }

    /// Canonical filename: `{YYYYMMDD}-{slug}.md`, the date coming from
    /// the originating run id (see [`date_from_run_id`]), not from
    /// `created`.
    pub fn filename(&self) -> String {
        format!(
            "{}-{}.md",
            self.filename_date.format("%Y%m%d"),
            self.frontmatter.id
        )
    }

    pub fn to_file_contents(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(&self.frontmatter)
            .map_err(|e| LerimError::ArtifactInvalid(format!("frontmatter encode failed: {e}")))?;
        Ok(format!("---\n{yaml}---\n\n{}", self.body.trim_end()))
    }

    /// Parses a stored file's contents. `primitive_type` comes from the
    /// containing folder, never from the file itself.
    pub fn from_file_contents(primitive_type: PrimitiveType, text: &str) -> Result<Self> {
        let (frontmatter, body) = parse_frontmatter(text)?;
        let frontmatter: Frontmatter = serde_yaml::from_str(&frontmatter)
            .map_err(|e| LerimError::ArtifactInvalid(format!("frontmatter decode failed: {e}")))?;
        if primitive_type == PrimitiveType::Learning && frontmatter.kind.is_none() {
            return Err(LerimError::ArtifactInvalid(
                "learning primitive is missing required 'kind' field".into(),
            ));
        }
        let filename_date = date_from_run_id(&frontmatter.source);
        Ok(MemoryPrimitive {
            primitive_type,
            frontmatter,
            body,
            filename_date,
        })
    }
}

/// Summary-specific frontmatter. Summaries are written only by the
/// summarization pipeline, never edited in place, and carry no confidence
/// or decay bookkeeping since they are never archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryFrontmatter {
    pub id: String,
    pub title: String,
    pub created: DateTime<Utc>,
    pub source: String,
    pub description: String,
    pub user_intent: String,
    pub session_narrative: String,
    pub date: String,
    pub time: String,
    pub coding_agent: String,
    pub raw_trace_path: String,
    pub run_id: String,
    pub repo_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SummaryRecord {
    pub frontmatter: SummaryFrontmatter,
    pub body: String,
}

impl SummaryRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        title: &str,
        run_id: &str,
        coding_agent: &str,
        raw_trace_path: &str,
        repo_name: Option<String>,
        description: &str,
        user_intent: &str,
        session_narrative: &str,
        tags: Vec<String>,
        body: &str,
    ) -> Self {
        let now = Utc::now();
        SummaryRecord {
            frontmatter: SummaryFrontmatter {
                id: slugify(title),
                title: title.to_string(),
                created: now,
                source: run_id.to_string(),
                description: description.to_string(),
                user_intent: user_intent.to_string(),
                session_narrative: session_narrative.to_string(),
                date: now.format("%Y-%m-%d").to_string(),
                time: now.format("%H:%M:%S").to_string(),
                coding_agent: coding_agent.to_string(),
                raw_trace_path: raw_trace_path.to_string(),
                run_id: run_id.to_string(),
                repo_name,
                tags,
            },
            body: body.to_string(),
        }
    }

    /// Summaries nest under `summaries/YYYYMMDD/HHMMSS/{slug}.md`.
    pub fn relative_path(&self) -> String {
        format!(
            "{}/{}/{}.md",
            self.frontmatter.created.format("%Y%m%d"),
            self.frontmatter.created.format("%H%M%S"),
            self.frontmatter.id
        )
    }

    pub fn to_file_contents(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(&self.frontmatter)
            .map_err(|e| LerimError::ArtifactInvalid(format!("frontmatter encode failed: {e}")))?;
        Ok(format!("---\n{yaml}---\n\n{}", self.body.trim_end()))
    }

    pub fn from_file_contents(text: &str) -> Result<Self> {
        let (frontmatter, body) = parse_frontmatter(text)?;
        let frontmatter: SummaryFrontmatter = serde_yaml::from_str(&frontmatter)
            .map_err(|e| LerimError::ArtifactInvalid(format!("frontmatter decode failed: {e}")))?;
        Ok(SummaryRecord { frontmatter, body })
    }
}

fn parse_frontmatter(text: &str) -> Result<(String, String)> {
    let rest = text
        .strip_prefix("---\n")
        .ok_or_else(|| LerimError::ArtifactInvalid("missing frontmatter delimiter".into()))?;
    let (yaml, body) = rest
        .split_once("\n---\n")
        .ok_or_else(|| LerimError::ArtifactInvalid("unterminated frontmatter".into()))?;
    Ok((yaml.to_string(), body.trim_start_matches('\n').to_string()))
}

/// Lowercases, strips non-alphanumerics to single hyphens, and truncates to
/// a reasonable filename length.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut last_was_hyphen = false;
    for ch in title.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_was_hyphen = false;
        } else if !last_was_hyphen && !slug.is_empty() {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug.truncate(80);
    if slug.is_empty() {
        slug.push_str("untitled");
    }
    slug
}

/// Parses the `{YYYYMMDD}` prefix a catalog filename is expected to carry.
pub fn parse_date_prefix(filename: &str) -> Option<NaiveDate> {
    let prefix = filename.get(0..8)?;
    NaiveDate::parse_from_str(prefix, "%Y%m%d").ok()
}

/// Derives the filename date from a run id such as
/// `sync-20260220-120000-abc123`: the first `-`-separated segment that is
/// an 8-digit `YYYYMMDD`. Falls back to today (UTC) when the run id
/// carries no such segment.
pub fn date_from_run_id(run_id: &str) -> NaiveDate {
    run_id
        .split('-')
        .find(|segment| segment.len() == 8 && segment.chars().all(|c| c.is_ascii_digit()))
        .and_then(|segment| NaiveDate::parse_from_str(segment, "%Y%m%d").ok())
        .unwrap_or_else(|| Utc::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_handles_punctuation_and_case() {
        assert_eq!(slugify("Use Axum For The API!"), "use-axum-for-the-api");
        assert_eq!(slugify("  leading/trailing  "), "leading-trailing");
    }

    #[test]
    fn slugify_empty_title_falls_back() {
        assert_eq!(slugify("!!!"), "untitled");
    }

    #[test]
    fn filename_uses_created_date_and_slug() {
        let primitive = MemoryPrimitive::new(
            PrimitiveType::Decision,
            "Adopt rusqlite over sqlx",
            "sync",
            0.8,
            vec![],
            "body text",
            None,
        )
        .unwrap();
        let name = primitive.filename();
        assert!(name.ends_with("-adopt-rusqlite-over-sqlx.md"));
        assert_eq!(name.len(), "YYYYMMDD-adopt-rusqlite-over-sqlx.md".len());
    }

    #[test]
    fn filename_derives_date_from_run_id_not_creation_time() {
        let primitive = MemoryPrimitive::new(
            PrimitiveType::Decision,
            "My Title",
            "sync-20260220-120000-abc123",
            0.8,
            vec![],
            "body",
            None,
        )
        .unwrap();
        assert_eq!(primitive.filename(), "20260220-my-title.md");
    }

    #[test]
    fn filename_falls_back_to_today_when_run_id_has_no_date() {
        let primitive = MemoryPrimitive::new(
            PrimitiveType::Decision,
            "My Title",
            "manual-entry",
            0.8,
            vec![],
            "body",
            None,
        )
        .unwrap();
        let today = Utc::now().format("%Y%m%d").to_string();
        assert!(primitive.filename().starts_with(&today));
    }

    #[test]
    fn learning_defaults_kind_to_insight() {
        let primitive = MemoryPrimitive::new(
            PrimitiveType::Learning,
            "FTS5 external content needs triggers",
            "maintain",
            0.6,
            vec!["sqlite".to_string()],
            "Forgetting the triggers leaves the index stale.",
            None,
        )
        .unwrap();
        assert_eq!(primitive.frontmatter.kind, Some(LearningKind::Insight));
    }

    #[test]
    fn decision_construction_rejects_summary_type() {
        let result = MemoryPrimitive::new(
            PrimitiveType::Summary,
            "x",
            "sync",
            0.5,
            vec![],
            "body",
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn round_trips_through_file_contents() {
        let primitive = MemoryPrimitive::new(
            PrimitiveType::Learning,
            "FTS5 external content needs triggers",
            "maintain",
            0.6,
            vec!["sqlite".to_string()],
            "Forgetting the triggers leaves the index stale.",
            Some(LearningKind::Pitfall),
        )
        .unwrap();
        let text = primitive.to_file_contents().unwrap();
        let parsed = MemoryPrimitive::from_file_contents(PrimitiveType::Learning, &text).unwrap();
        assert_eq!(parsed.frontmatter.title, primitive.frontmatter.title);
        assert_eq!(parsed.frontmatter.tags, vec!["sqlite".to_string()]);
        assert_eq!(parsed.frontmatter.kind, Some(LearningKind::Pitfall));
        assert!(parsed.body.contains("Forgetting the triggers"));
    }

    #[test]
    fn learning_without_kind_in_file_is_rejected() {
        let text = "---\nid: foo\ntitle: Foo\ncreated: 2026-01-01T00:00:00Z\nupdated: 2026-01-01T00:00:00Z\nsource: sync\nconfidence: 0.5\ntags: []\n---\n\nbody";
        let result = MemoryPrimitive::from_file_contents(PrimitiveType::Learning, text);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_file_missing_frontmatter_delimiter() {
        let result = MemoryPrimitive::from_file_contents(PrimitiveType::Decision, "just text");
        assert!(result.is_err());
    }

    #[test]
    fn from_folder_rejects_unknown_names() {
        assert!(PrimitiveType::from_folder("archived").is_err());
        assert!(PrimitiveType::from_folder("decisions").is_ok());
    }

    #[test]
    fn summary_record_round_trips_and_nests_by_date_time() {
        let summary = SummaryRecord::new(
            "Refactored the job queue",
            "sync-20260220-120000-abc",
            "claude",
            "/data/sessions/run-1.jsonl",
            Some("lerim".to_string()),
            "Rewrote the queue to support bulk claim.",
            "Make the job queue support bulk claiming with stale reclaim.",
            "Explored catalog.py, ported the claim transaction, added tests.",
            vec!["queue".to_string()],
            "Full narrative body.",
        );
        let path = summary.relative_path();
        assert!(path.ends_with("-refactored-the-job-queue.md"));

        let text = summary.to_file_contents().unwrap();
        let parsed = SummaryRecord::from_file_contents(&text).unwrap();
        assert_eq!(parsed.frontmatter.run_id, "sync-20260220-120000-abc");
        assert_eq!(parsed.frontmatter.coding_agent, "claude");
        assert!(parsed.body.contains("Full narrative body."));
    }
}
