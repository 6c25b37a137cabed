use std::time::Duration;

use orthostream_core::{ChunkMessage, ChunkedSearchResponse, TreeChunkMessage, TreePreview};

use crate::RequestError;

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// One event-stream connection.
    Push,
    /// Paginated requests for chunk 1, 2, ...
    Pull,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    SearchMessage {
        job_id: JobId,
        message: ChunkMessage,
    },
    SearchPage {
        job_id: JobId,
        page: ChunkedSearchResponse,
    },
    TreePreview {
        job_id: JobId,
        preview: TreePreview,
        elapsed: Duration,
    },
    TreeMessage {
        job_id: JobId,
        message: TreeChunkMessage,
    },
    JobCompleted {
        job_id: JobId,
        result: Result<JobOutcome, RequestError>,
    },
    /// The id belongs to a job that has not completed; nothing was started.
    JobRejected {
        job_id: JobId,
    },
}

impl EngineEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            EngineEvent::SearchMessage { job_id, .. }
            | EngineEvent::SearchPage { job_id, .. }
            | EngineEvent::TreePreview { job_id, .. }
            | EngineEvent::TreeMessage { job_id, .. }
            | EngineEvent::JobCompleted { job_id, .. }
            | EngineEvent::JobRejected { job_id } => *job_id,
        }
    }
}

/// Summary of a job that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobOutcome {
    /// Messages or pages delivered as events.
    pub delivered: usize,
    /// Accounting or progress defects observed on the way.
    pub violations: usize,
}
