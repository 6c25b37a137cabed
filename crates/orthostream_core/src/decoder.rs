use std::marker::PhantomData;

use orthostream_logging::{ortho_debug, ortho_trace, ortho_warn};
use serde_json::Value;

use crate::{ProtocolError, StreamMessage};

const DATA_FIELD: &[u8] = b"data:";

/// Longest line kept while waiting for its newline. A full tree in one
/// `tree_complete` record has to fit.
pub const DEFAULT_MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Counters describing what a decoder has seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Records turned into messages.
    pub decoded: usize,
    /// Records dropped because they did not decode.
    pub malformed: usize,
    /// Well-formed records whose tag this message family does not know.
    pub unknown: usize,
}

/// Incremental decoder for `data: <json>` event-stream framing.
///
/// Bytes may be fed in fragments of any size, including fragments that split
/// a UTF-8 sequence. Only complete, newline-terminated lines are decoded; the
/// remainder stays buffered until the next `feed` or `finish`.
#[derive(Debug)]
pub struct EventStreamDecoder<M> {
    buffer: Vec<u8>,
    max_record_len: usize,
    /// Skipping the rest of an oversized line up to its newline.
    discarding: bool,
    stats: DecodeStats,
    _message: PhantomData<fn() -> M>,
}

impl<M> Default for EventStreamDecoder<M> {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            discarding: false,
            stats: DecodeStats::default(),
            _message: PhantomData,
        }
    }
}

impl<M: StreamMessage> EventStreamDecoder<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the bytes buffered for one unfinished line. Longer records are
    /// dropped as malformed.
    pub fn with_max_record_len(mut self, max_record_len: usize) -> Self {
        self.max_record_len = max_record_len;
        self
    }

    /// Append `bytes` and return every message completed by them, in order.
    pub fn feed(&mut self, mut bytes: &[u8]) -> Vec<M> {
        if self.discarding {
            let Some(newline) = bytes.iter().position(|b| *b == b'\n') else {
                return Vec::new();
            };
            self.discarding = false;
            bytes = &bytes[newline + 1..];
        }

        self.buffer.extend_from_slice(bytes);
        let messages = match self.buffer.iter().rposition(|b| *b == b'\n') {
            Some(last_newline) => {
                let complete: Vec<u8> = self.buffer.drain(..=last_newline).collect();
                complete
                    .split(|b| *b == b'\n')
                    .filter_map(|line| self.decode_line(line))
                    .collect()
            }
            None => Vec::new(),
        };

        if self.buffer.len() > self.max_record_len {
            ortho_warn!(
                "Dropping record longer than {} bytes without a newline",
                self.max_record_len
            );
            self.stats.malformed += 1;
            self.buffer = Vec::new();
            self.discarding = true;
        }
        messages
    }

    /// Flush whatever is left after the body ended.
    ///
    /// A trailing record without its newline is only accepted if it parses on
    /// its own; anything else is discarded.
    pub fn finish(&mut self) -> Option<M> {
        self.discarding = false;
        let rest = std::mem::take(&mut self.buffer);
        let trimmed = rest.trim_ascii();
        if trimmed.is_empty() {
            return None;
        }
        let payload = trimmed
            .strip_prefix(DATA_FIELD)
            .map(<[u8]>::trim_ascii_start)
            .unwrap_or(trimmed);

        match decode_payload::<M>(payload) {
            Ok(Some(message)) => {
                self.stats.decoded += 1;
                Some(message)
            }
            Ok(None) => {
                self.stats.unknown += 1;
                None
            }
            Err(err) => {
                self.stats.malformed += 1;
                ortho_debug!("Discarding {} trailing bytes: {}", rest.len(), err);
                None
            }
        }
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Number of bytes waiting for a line terminator.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<M> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() || line.starts_with(b":") {
            return None;
        }
        let Some(payload) = line.strip_prefix(DATA_FIELD) else {
            ortho_trace!(
                "Ignoring non-data field {:?}",
                String::from_utf8_lossy(line)
            );
            return None;
        };
        let payload = payload.strip_prefix(b" ").unwrap_or(payload);

        match decode_payload::<M>(payload) {
            Ok(Some(message)) => {
                self.stats.decoded += 1;
                Some(message)
            }
            Ok(None) => {
                self.stats.unknown += 1;
                None
            }
            Err(err) => {
                self.stats.malformed += 1;
                ortho_warn!("Dropping malformed record: {}", err);
                None
            }
        }
    }
}

/// Validate the tag first, then interpret the tag-specific fields.
///
/// `Ok(None)` means a well-formed record with a tag this family ignores.
fn decode_payload<M: StreamMessage>(payload: &[u8]) -> Result<Option<M>, ProtocolError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|err| ProtocolError::InvalidJson(err.to_string()))?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingTag)?;
    if !M::TAGS.contains(&tag) {
        ortho_debug!("Skipping record with unrecognised tag {:?}", tag);
        return Ok(None);
    }
    let tag = tag.to_string();
    serde_json::from_value(value)
        .map(Some)
        .map_err(|err| ProtocolError::InvalidPayload {
            tag,
            message: err.to_string(),
        })
}
