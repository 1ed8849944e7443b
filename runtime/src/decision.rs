//! The deterministic add/update/no_op decision the sync agent is instructed
//! to follow when reconciling an extracted candidate against an existing
//! memory primitive (§4.8). Kept separate from the LLM surface so it can be
//! unit-tested without a stub agent in the loop.

/// One candidate's resolution against whatever memory file (if any) it
/// matches by primitive type and title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAction {
    NoOp,
    Update,
    Add,
}

impl DecisionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionAction::NoOp => "no_op",
            DecisionAction::Update => "update",
            DecisionAction::Add => "add",
        }
    }
}

/// Jaccard overlap of the two bodies' lowercased word sets. Empty-vs-empty
/// is defined as a perfect match (1.0) so two blank candidates collapse to
/// `no_op` rather than `add`.
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let tokens = |s: &str| -> std::collections::HashSet<String> {
        s.to_lowercase()
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|t| !t.is_empty())
            .collect()
    };
    let set_a = tokens(a);
    let set_b = tokens(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Applies the decision policy: `no_op` when primitive, title, and body are
/// identical to `existing`; `update` when the primitive type matches and
/// body-token-overlap is `>= 0.72`; `add` otherwise (no match, or primitive
/// type differs, or overlap falls below the threshold).
pub fn decide(
    existing: Option<(&str, &str, &str)>, // (primitive_type, title, body) of the best match, if any
    candidate_primitive_type: &str,
    candidate_title: &str,
    candidate_body: &str,
) -> DecisionAction {
    let Some((existing_type, existing_title, existing_body)) = existing else {
        return DecisionAction::Add;
    };
    if existing_type != candidate_primitive_type {
        return DecisionAction::Add;
    }
    if existing_title == candidate_title && existing_body == candidate_body {
        return DecisionAction::NoOp;
    }
    if token_overlap(existing_body, candidate_body) >= 0.72 {
        return DecisionAction::Update;
    }
    DecisionAction::Add
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_primitive_title_body_is_no_op() {
        let action = decide(
            Some(("learning", "Stale lock reclamation", "Body text here.")),
            "learning",
            "Stale lock reclamation",
            "Body text here.",
        );
        assert_eq!(action, DecisionAction::NoOp);
    }

    #[test]
    fn high_overlap_different_body_is_update() {
        let existing_body = "The writer lock reclaims a stale heartbeat after sixty seconds of silence.";
        let candidate_body = "The writer lock reclaims a stale heartbeat after sixty seconds without a ping.";
        assert!(token_overlap(existing_body, candidate_body) >= 0.72);
        let action = decide(
            Some(("learning", "Stale lock reclamation", existing_body)),
            "learning",
            "Stale lock reclamation, revised",
            candidate_body,
        );
        assert_eq!(action, DecisionAction::Update);
    }

    #[test]
    fn low_overlap_is_add() {
        let action = decide(
            Some(("learning", "Stale lock reclamation", "Completely unrelated content about SQLite triggers.")),
            "learning",
            "Unrelated new candidate",
            "FTS5 external content tables need AFTER triggers to stay consistent.",
        );
        assert_eq!(action, DecisionAction::Add);
    }

    #[test]
    fn mismatched_primitive_type_is_add_even_with_identical_body() {
        let action = decide(
            Some(("decision", "x", "same body")),
            "learning",
            "x",
            "same body",
        );
        assert_eq!(action, DecisionAction::Add);
    }

    #[test]
    fn no_existing_match_is_add() {
        assert_eq!(decide(None, "learning", "x", "y"), DecisionAction::Add);
    }

    #[test]
    fn token_overlap_is_symmetric_and_bounded() {
        let score = token_overlap("rust sqlite queue", "queue rust tokio");
        assert!((0.0..=1.0).contains(&score));
        assert_eq!(token_overlap("", ""), 1.0);
        assert_eq!(token_overlap("a b", ""), 0.0);
    }
}
