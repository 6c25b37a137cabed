use orthostream_logging::ortho_warn;
use thiserror::Error;

use crate::{ChunkMessage, StreamMessage};

/// A server-side accounting defect observed on a search stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccountingViolation {
    #[error("chunk {current} arrived after chunk {previous}")]
    ChunkNumberNotIncreasing { previous: u32, current: u32 },
    #[error("chunk {chunk_number} reports total_sent {reported}, running sum is {expected}")]
    RunningTotalMismatch {
        chunk_number: u32,
        reported: u64,
        expected: u64,
    },
    #[error("chunk {chunk_number} count {count} overflows the running sum")]
    RunningTotalOverflow { chunk_number: u32, count: u64 },
    #[error("completion reports total_sent {reported}, running sum is {expected}")]
    CompletionTotalMismatch { reported: u64, expected: u64 },
    #[error("completion reports {reported} chunks, {observed} were received")]
    ChunkCountMismatch { reported: u32, observed: u32 },
    #[error("`{tag}` message after the stream terminated")]
    MessageAfterTerminal { tag: &'static str },
}

/// Running account of a search stream.
///
/// Violations are recorded and logged but never repaired: a gap in chunk
/// numbers is reported only through the totals, not filled in.
#[derive(Debug, Clone, Default)]
pub struct ChunkLedger {
    last_chunk: Option<u32>,
    chunks_seen: u32,
    running_total: u64,
    terminated: bool,
    violations: Vec<AccountingViolation>,
}

impl ChunkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one message; returns the violations it introduced.
    pub fn observe(&mut self, message: &ChunkMessage) -> Vec<AccountingViolation> {
        let mut found = Vec::new();
        if self.terminated {
            found.push(AccountingViolation::MessageAfterTerminal { tag: message.tag() });
        }

        match message {
            ChunkMessage::Metadata { .. } => {}
            ChunkMessage::Chunk {
                chunk_number,
                count,
                total_sent,
                ..
            } => {
                if let Some(previous) = self.last_chunk {
                    if *chunk_number <= previous {
                        found.push(AccountingViolation::ChunkNumberNotIncreasing {
                            previous,
                            current: *chunk_number,
                        });
                    }
                }
                self.last_chunk = Some(*chunk_number);
                self.chunks_seen = self.chunks_seen.saturating_add(1);
                match self.running_total.checked_add(*count) {
                    Some(total) => {
                        self.running_total = total;
                        if *total_sent != total {
                            found.push(AccountingViolation::RunningTotalMismatch {
                                chunk_number: *chunk_number,
                                reported: *total_sent,
                                expected: total,
                            });
                        }
                    }
                    None => {
                        // Pinned at the maximum; later totals are compared against it.
                        self.running_total = u64::MAX;
                        found.push(AccountingViolation::RunningTotalOverflow {
                            chunk_number: *chunk_number,
                            count: *count,
                        });
                    }
                }
            }
            ChunkMessage::Complete {
                total_sent,
                chunks_sent,
                ..
            } => {
                self.terminated = true;
                if *total_sent != self.running_total {
                    found.push(AccountingViolation::CompletionTotalMismatch {
                        reported: *total_sent,
                        expected: self.running_total,
                    });
                }
                if *chunks_sent != self.chunks_seen {
                    found.push(AccountingViolation::ChunkCountMismatch {
                        reported: *chunks_sent,
                        observed: self.chunks_seen,
                    });
                }
            }
            ChunkMessage::Error { .. } => self.terminated = true,
        }

        for violation in &found {
            ortho_warn!("Search stream accounting: {}", violation);
        }
        self.violations.extend(found.iter().cloned());
        found
    }

    pub fn running_total(&self) -> u64 {
        self.running_total
    }

    pub fn chunks_seen(&self) -> u32 {
        self.chunks_seen
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn violations(&self) -> &[AccountingViolation] {
        &self.violations
    }

    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}
