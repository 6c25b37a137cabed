//! Orthostream engine: resilient requests and incremental delivery of search and tree data.
mod config;
mod engine;
mod error;
mod executor;
mod search;
mod stream;
mod transport;
mod tree;
mod types;

pub use config::{ClientSettings, RequestOptions, SearchSettings, TreeSettings, DEFAULT_BASE_URL};
pub use engine::{EngineConfig, EngineHandle, EngineStartError};
pub use error::RequestError;
pub use executor::{OpenedStream, RequestExecutor, RequestScope};
pub use search::{Pager, SearchClient, SearchOutcome};
pub use stream::{MessageStream, Observe, SearchStream, StreamState, TreeStream};
pub use transport::{ByteStream, ReqwestTransport, Transport, TransportResponse};
pub use tree::{Clock, FullTree, MonotonicClock, PreviewOutcome, TreeClient};
pub use types::{EngineEvent, JobId, JobOutcome, SearchMode};

pub use tokio_util::sync::CancellationToken;
