use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A message type that can travel over an event stream.
///
/// The decoder validates the `type` tag against [`StreamMessage::TAGS`] before
/// interpreting any other field; records with a tag outside that list are
/// skipped so newer servers can add message kinds.
pub trait StreamMessage: DeserializeOwned + fmt::Debug + Send + 'static {
    /// Wire tags understood by this message family.
    const TAGS: &'static [&'static str];

    /// True for messages that end a stream (completion or server error).
    fn is_terminal(&self) -> bool;

    /// Wire tag of this message.
    fn tag(&self) -> &'static str;
}

/// One search hit. Fields beyond the two identifiers are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub gene_id: String,
    #[serde(default)]
    pub orthogroup_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Messages of the search event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkMessage {
    Metadata {
        #[serde(default)]
        query: String,
        #[serde(default)]
        chunk_size: Option<u32>,
        #[serde(default)]
        max_total: Option<u64>,
        #[serde(default)]
        timestamp: Option<f64>,
    },
    Chunk {
        chunk_number: u32,
        results: Vec<SearchHit>,
        count: u64,
        offset: u64,
        total_sent: u64,
    },
    Complete {
        total_sent: u64,
        chunks_sent: u32,
        #[serde(default)]
        query: Option<String>,
    },
    Error {
        message: String,
    },
}

impl StreamMessage for ChunkMessage {
    const TAGS: &'static [&'static str] = &["metadata", "chunk", "complete", "error"];

    fn is_terminal(&self) -> bool {
        matches!(self, ChunkMessage::Complete { .. } | ChunkMessage::Error { .. })
    }

    fn tag(&self) -> &'static str {
        match self {
            ChunkMessage::Metadata { .. } => "metadata",
            ChunkMessage::Chunk { .. } => "chunk",
            ChunkMessage::Complete { .. } => "complete",
            ChunkMessage::Error { .. } => "error",
        }
    }
}

/// Species identifiers arrive either as taxon numbers or as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpeciesId {
    Taxon(u64),
    Name(String),
}

impl fmt::Display for SpeciesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeciesId::Taxon(id) => write!(f, "{id}"),
            SpeciesId::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    pub name: String,
    pub id: SpeciesId,
    #[serde(default)]
    pub count: u64,
}

/// Messages of the phylogenetic tree event stream.
///
/// `TreeComplete` carries no progress field; it implies progress 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeChunkMessage {
    Metadata {
        #[serde(default)]
        tree_id: Option<String>,
        #[serde(default)]
        total_species: Option<u64>,
        #[serde(default)]
        chunk_size: Option<u32>,
        #[serde(default)]
        timestamp: Option<f64>,
    },
    SpeciesChunk {
        #[serde(default)]
        chunk_number: Option<u32>,
        species: Vec<Species>,
        progress: f64,
    },
    TreeComplete {
        tree: String,
        total_species: u64,
    },
    Error {
        message: String,
    },
}

impl StreamMessage for TreeChunkMessage {
    const TAGS: &'static [&'static str] =
        &["metadata", "species_chunk", "tree_complete", "error"];

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            TreeChunkMessage::TreeComplete { .. } | TreeChunkMessage::Error { .. }
        )
    }

    fn tag(&self) -> &'static str {
        match self {
            TreeChunkMessage::Metadata { .. } => "metadata",
            TreeChunkMessage::SpeciesChunk { .. } => "species_chunk",
            TreeChunkMessage::TreeComplete { .. } => "tree_complete",
            TreeChunkMessage::Error { .. } => "error",
        }
    }
}
