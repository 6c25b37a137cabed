use std::sync::Arc;
use std::time::{Duration, Instant};

use orthostream_core::{Species, TreeChunkMessage, TreePreview, TreeProgress};
use orthostream_logging::{ortho_info, ortho_warn};
use tokio_util::sync::CancellationToken;

use crate::stream::{MessageStream, TreeStream};
use crate::{RequestError, RequestExecutor, RequestOptions, TreeSettings};

/// Source of elapsed time for latency measurements.
pub trait Clock: Send + Sync {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewOutcome {
    pub preview: TreePreview,
    pub elapsed: Duration,
    pub budget: Duration,
}

impl PreviewOutcome {
    pub fn within_budget(&self) -> bool {
        self.elapsed <= self.budget
    }
}

/// The complete tree, from the inline preview or from the streamed phase.
#[derive(Debug, Clone, PartialEq)]
pub struct FullTree {
    pub tree: String,
    pub species: Vec<Species>,
    pub total_species: u64,
    pub streamed: bool,
}

/// Two-phase tree delivery: a fast preview, then an optional stream.
#[derive(Clone)]
pub struct TreeClient {
    executor: Arc<RequestExecutor>,
    settings: TreeSettings,
    clock: Arc<dyn Clock>,
}

impl TreeClient {
    pub fn new(executor: Arc<RequestExecutor>, settings: TreeSettings) -> Self {
        Self {
            executor,
            settings,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &TreeSettings {
        &self.settings
    }

    /// Phase one. The preview is a single JSON response, never streamed.
    pub async fn preview(
        &self,
        tree_id: &str,
        cancel: CancellationToken,
    ) -> Result<PreviewOutcome, RequestError> {
        let path = self.preview_path(tree_id)?;
        let started = self.clock.now();
        let preview: TreePreview = self
            .executor
            .execute_as(&path, RequestOptions::new().with_cancel(cancel))
            .await?;
        let outcome = PreviewOutcome {
            preview,
            elapsed: self.clock.now().saturating_sub(started),
            budget: self.settings.latency_budget,
        };
        if !outcome.within_budget() {
            ortho_warn!(
                "Tree preview {} took {:?}, budget {:?}",
                tree_id,
                outcome.elapsed,
                outcome.budget
            );
        }
        Ok(outcome)
    }

    /// Phase two, if the preview says it is needed.
    pub async fn stream(
        &self,
        preview: &TreePreview,
        cancel: CancellationToken,
    ) -> Result<Option<TreeStream>, RequestError> {
        if !preview.needs_stream() {
            return Ok(None);
        }
        let url = preview.stream_url.as_deref().ok_or_else(|| {
            RequestError::Protocol("preview is loading but has no stream_url".to_string())
        })?;
        self.open_stream(url, cancel).await.map(Some)
    }

    pub async fn open_stream(
        &self,
        stream_url: &str,
        cancel: CancellationToken,
    ) -> Result<TreeStream, RequestError> {
        let opened = self
            .executor
            .open(stream_url, RequestOptions::new().with_cancel(cancel))
            .await?;
        Ok(MessageStream::new(opened, TreeProgress::new()))
    }

    /// Preview, then stream the rest when the preview is incomplete.
    pub async fn load_full(
        &self,
        tree_id: &str,
        cancel: CancellationToken,
    ) -> Result<FullTree, RequestError> {
        let outcome = self.preview(tree_id, cancel.clone()).await?;
        let Some(mut stream) = self.stream(&outcome.preview, cancel).await? else {
            let tree = outcome.preview.simplified_tree.ok_or_else(|| {
                RequestError::Protocol("preview has neither a tree nor a stream".to_string())
            })?;
            return Ok(FullTree {
                tree,
                species: Vec::new(),
                total_species: outcome.preview.summary.species_count,
                streamed: false,
            });
        };

        let mut species = Vec::new();
        while let Some(message) = stream.next().await {
            match message? {
                TreeChunkMessage::Metadata { .. } => {}
                TreeChunkMessage::SpeciesChunk { species: batch, .. } => species.extend(batch),
                TreeChunkMessage::TreeComplete {
                    tree,
                    total_species,
                } => {
                    ortho_info!(
                        "Tree {} streamed with {} species",
                        tree_id,
                        total_species
                    );
                    return Ok(FullTree {
                        tree,
                        species,
                        total_species,
                        streamed: true,
                    });
                }
                TreeChunkMessage::Error { message } => return Err(RequestError::Server(message)),
            }
        }
        Err(RequestError::StreamTerminatedEarly {
            received: stream.messages_yielded(),
        })
    }

    fn preview_path(&self, tree_id: &str) -> Result<String, RequestError> {
        if tree_id.is_empty() || tree_id.contains(['/', '?', '#']) {
            return Err(RequestError::InvalidUrl(format!(
                "tree id {tree_id:?} is not a single path segment"
            )));
        }
        Ok(self.settings.preview_path.replace("{id}", tree_id))
    }
}
