use serde::{Deserialize, Serialize};

/// Ranked runbook text supplied by the external retrieval subsystem.
/// Advisory only: it may suggest candidate actions but never crosses the
/// trust boundary into policy evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdvisorySnippet {
    pub text: String,
    pub score: f64,
}

/// Outbound interface to the knowledge-base collaborator.
pub trait KnowledgeBase: Send + Sync {
    fn retrieve(&self, query: &str, top_k: usize) -> Vec<AdvisorySnippet>;
}

/// Default when no retrieval subsystem is wired in.
#[derive(Default)]
pub struct NullKnowledgeBase;

impl KnowledgeBase for NullKnowledgeBase {
    fn retrieve(&self, _query: &str, _top_k: usize) -> Vec<AdvisorySnippet> {
        Vec::new()
    }
}

/// Drop snippets below the configured relevance floor.
pub fn above_floor(snippets: Vec<AdvisorySnippet>, min_score: f64) -> Vec<AdvisorySnippet> {
    snippets
        .into_iter()
        .filter(|s| s.score >= min_score)
        .collect()
}
