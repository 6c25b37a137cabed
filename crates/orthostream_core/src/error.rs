use thiserror::Error;

/// Why a single event-stream record could not be decoded.
///
/// These never abort a stream; the decoder drops the record and counts it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("record is not valid json: {0}")]
    InvalidJson(String),
    #[error("record has no string `type` tag")]
    MissingTag,
    #[error("`{tag}` record has an invalid payload: {message}")]
    InvalidPayload { tag: String, message: String },
}
