//! Orthostream core: wire model, event-stream decoding and stream accounting.
//!
//! Nothing in this crate performs IO. Bytes go in, typed messages come out.
mod decoder;
mod error;
mod ledger;
mod message;
mod progress;
mod response;

pub use decoder::{DecodeStats, EventStreamDecoder, DEFAULT_MAX_RECORD_LEN};
pub use error::ProtocolError;
pub use ledger::{AccountingViolation, ChunkLedger};
pub use message::{
    ChunkMessage, SearchHit, Species, SpeciesId, StreamMessage, TreeChunkMessage,
};
pub use progress::{ProgressViolation, TreeProgress};
pub use response::{ChunkedSearchResponse, TreePreview, TreeSummary};
