use serde::{Deserialize, Serialize};

use crate::SearchHit;

/// One page of a paginated search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkedSearchResponse {
    pub query: String,
    pub chunk_number: u32,
    pub results: Vec<SearchHit>,
    pub count: u64,
    pub offset: u64,
    pub has_more: bool,
    #[serde(default)]
    pub total_estimate: Option<u64>,
    #[serde(default)]
    pub next_chunk: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSummary {
    pub species_count: u64,
    pub gene_count: u64,
    #[serde(default)]
    pub estimated_load_time_ms: Option<u64>,
}

/// Fast first answer for a tree request.
///
/// When `loading` is true the inline tree is absent or simplified and the full
/// data has to be streamed from `stream_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreePreview {
    pub summary: TreeSummary,
    #[serde(default)]
    pub simplified_tree: Option<String>,
    pub loading: bool,
    #[serde(default)]
    pub stream_url: Option<String>,
}

impl TreePreview {
    /// True when a second, streamed phase is required to obtain the full tree.
    pub fn needs_stream(&self) -> bool {
        self.loading
    }
}
