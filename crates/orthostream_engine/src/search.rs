use std::sync::Arc;

use orthostream_core::{
    AccountingViolation, ChunkLedger, ChunkMessage, ChunkedSearchResponse, SearchHit,
};
use orthostream_logging::{ortho_info, ortho_warn};
use tokio_util::sync::CancellationToken;

use crate::stream::{MessageStream, SearchStream};
use crate::{RequestError, RequestExecutor, RequestOptions, SearchSettings};

/// Aggregated result of a whole search, in either mode.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchOutcome {
    pub query: String,
    pub hits: Vec<SearchHit>,
    pub chunks: u32,
    pub total_sent: u64,
    /// Pull mode stopped at the chunk bound while the server still had more.
    pub truncated: bool,
    pub violations: Vec<AccountingViolation>,
}

/// Search results as an ordered sequence of chunks.
///
/// Push mode ([`SearchClient::stream`]) reads one event-stream response.
/// Pull mode ([`SearchClient::pages`]) requests chunk 1, 2, ... until the
/// server reports no more or `max_chunks` pages were fetched.
#[derive(Clone)]
pub struct SearchClient {
    executor: Arc<RequestExecutor>,
    settings: SearchSettings,
}

impl SearchClient {
    pub fn new(executor: Arc<RequestExecutor>, settings: SearchSettings) -> Self {
        Self { executor, settings }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Open a push-mode stream for `query`.
    pub async fn stream(
        &self,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<SearchStream, RequestError> {
        let mut options = RequestOptions::new()
            .with_query("query", query)
            .with_query("chunk_size", self.settings.chunk_size)
            .with_cancel(cancel);
        if let Some(total) = self.settings.total_estimate {
            options = options.with_query("max_total", total);
        }
        let opened = self.executor.open(&self.settings.stream_path, options).await?;
        Ok(MessageStream::new(opened, ChunkLedger::new()))
    }

    /// Fetch one page in pull mode.
    pub async fn fetch_chunk(
        &self,
        query: &str,
        chunk_number: u32,
        cancel: CancellationToken,
    ) -> Result<ChunkedSearchResponse, RequestError> {
        let mut options = RequestOptions::new()
            .with_query("query", query)
            .with_query("chunk_number", chunk_number)
            .with_query("chunk_size", self.settings.chunk_size)
            .with_cancel(cancel);
        if let Some(total) = self.settings.total_estimate {
            options = options.with_query("total_estimate", total);
        }
        self.executor
            .execute_as(&self.settings.chunk_path, options)
            .await
    }

    /// Lazy pager over chunk 1..=max_chunks.
    pub fn pages(&self, query: &str, cancel: CancellationToken) -> Pager {
        Pager {
            client: self.clone(),
            query: query.to_string(),
            cancel,
            next_chunk: 1,
            finished: false,
            truncated: false,
        }
    }

    /// Read a push-mode stream to its end.
    pub async fn collect_stream(
        &self,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<SearchOutcome, RequestError> {
        let mut stream = self.stream(query, cancel).await?;
        let mut outcome = SearchOutcome {
            query: query.to_string(),
            ..SearchOutcome::default()
        };
        while let Some(message) = stream.next().await {
            match message? {
                ChunkMessage::Metadata { .. } => {}
                ChunkMessage::Chunk { results, .. } => {
                    outcome.chunks += 1;
                    outcome.hits.extend(results);
                }
                ChunkMessage::Complete { total_sent, .. } => outcome.total_sent = total_sent,
                ChunkMessage::Error { message } => return Err(RequestError::Server(message)),
            }
        }
        outcome.violations = stream.tracker().violations().to_vec();
        ortho_info!(
            "Search {:?} streamed {} hits in {} chunks",
            query,
            outcome.hits.len(),
            outcome.chunks
        );
        Ok(outcome)
    }

    /// Fetch every page in pull mode.
    pub async fn collect_pages(
        &self,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<SearchOutcome, RequestError> {
        let mut pager = self.pages(query, cancel);
        let mut outcome = SearchOutcome {
            query: query.to_string(),
            ..SearchOutcome::default()
        };
        while let Some(page) = pager.next().await {
            let page = page?;
            outcome.chunks += 1;
            outcome.total_sent += page.count;
            outcome.hits.extend(page.results);
        }
        outcome.truncated = pager.truncated();
        Ok(outcome)
    }
}

/// Pull-mode iterator. Chunk numbers requested are exactly 1..=K.
pub struct Pager {
    client: SearchClient,
    query: String,
    cancel: CancellationToken,
    next_chunk: u32,
    finished: bool,
    truncated: bool,
}

impl Pager {
    pub async fn next(&mut self) -> Option<Result<ChunkedSearchResponse, RequestError>> {
        let chunk_number = self.next_chunk;
        let max_chunks = self.client.settings.max_chunks;
        if self.finished || chunk_number > max_chunks {
            return None;
        }

        let page = match self
            .client
            .fetch_chunk(&self.query, chunk_number, self.cancel.clone())
            .await
        {
            Ok(page) => page,
            Err(err) => {
                self.finished = true;
                return Some(Err(err));
            }
        };

        if page.chunk_number != chunk_number {
            ortho_warn!(
                "Requested chunk {} of {:?}, server labelled it {}",
                chunk_number,
                self.query,
                page.chunk_number
            );
        }
        self.next_chunk += 1;
        if !page.has_more {
            self.finished = true;
        } else if chunk_number >= max_chunks {
            ortho_warn!(
                "Search {:?} still reports more after {} chunks; stopping",
                self.query,
                max_chunks
            );
            self.finished = true;
            self.truncated = true;
        }
        Some(Ok(page))
    }

    /// Pages fetched successfully so far.
    pub fn pages_fetched(&self) -> u32 {
        self.next_chunk - 1
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }
}
