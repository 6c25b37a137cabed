use std::collections::VecDeque;

use futures_util::{Stream, StreamExt};
use orthostream_core::{
    ChunkLedger, ChunkMessage, DecodeStats, EventStreamDecoder, StreamMessage, TreeChunkMessage,
    TreeProgress,
};
use orthostream_logging::{ortho_debug, ortho_trace};
use tokio::sync::mpsc;
use url::Url;

use crate::executor::{OpenedStream, RequestScope};
use crate::transport::ByteStream;
use crate::RequestError;

/// Bookkeeping applied to every message a stream yields.
pub trait Observe<M>: Send + 'static {
    fn observe(&mut self, message: &M);
}

impl<M> Observe<M> for () {
    fn observe(&mut self, _message: &M) {}
}

impl Observe<ChunkMessage> for ChunkLedger {
    fn observe(&mut self, message: &ChunkMessage) {
        ChunkLedger::observe(self, message);
    }
}

impl Observe<TreeChunkMessage> for TreeProgress {
    fn observe(&mut self, message: &TreeChunkMessage) {
        TreeProgress::observe(self, message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Waiting for more bytes from the body.
    Reading,
    /// The body ended; decoded messages are still queued.
    Draining,
    /// A terminal message was yielded.
    Done,
    /// The stream ended with an error.
    Failed,
}

pub type SearchStream = MessageStream<ChunkMessage, ChunkLedger>;
pub type TreeStream = MessageStream<TreeChunkMessage, TreeProgress>;

/// Pull-based iterator over the typed messages of one streaming response.
///
/// Single pass: once it returns `None` the only way to see the data again is
/// to open a new stream. The body reader is released as soon as the stream
/// reaches `Done` or `Failed`, not when the value is dropped.
pub struct MessageStream<M, T = ()> {
    url: Url,
    body: Option<ByteStream>,
    decoder: EventStreamDecoder<M>,
    pending: VecDeque<M>,
    state: StreamState,
    scope: RequestScope,
    tracker: T,
    yielded: usize,
}

impl<M: StreamMessage, T: Observe<M>> MessageStream<M, T> {
    pub fn new(opened: OpenedStream, tracker: T) -> Self {
        Self {
            url: opened.url,
            body: Some(opened.body),
            decoder: EventStreamDecoder::new(),
            pending: VecDeque::new(),
            state: StreamState::Reading,
            scope: opened.scope,
            tracker,
            yielded: 0,
        }
    }

    /// Next message in server order, an error, or `None` once finished.
    pub async fn next(&mut self) -> Option<Result<M, RequestError>> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                self.yielded += 1;
                self.tracker.observe(&message);
                if message.is_terminal() {
                    ortho_debug!(
                        "{} terminated by `{}` after {} messages",
                        self.url,
                        message.tag(),
                        self.yielded
                    );
                    self.release(StreamState::Done);
                }
                return Some(Ok(message));
            }

            match self.state {
                StreamState::Done | StreamState::Failed => return None,
                StreamState::Draining => {
                    self.release(StreamState::Failed);
                    return Some(Err(RequestError::StreamTerminatedEarly {
                        received: self.yielded,
                    }));
                }
                StreamState::Reading => {}
            }

            if let Err(err) = self.read_more().await {
                self.release(StreamState::Failed);
                return Some(Err(err));
            }
        }
    }

    async fn read_more(&mut self) -> Result<(), RequestError> {
        let Some(body) = self.body.as_mut() else {
            self.state = StreamState::Draining;
            return Ok(());
        };

        match self.scope.guard(body.next()).await? {
            Some(chunk) => {
                let messages = self.decoder.feed(&chunk?);
                if !messages.is_empty() && self.scope.has_deadline() {
                    // A valid record arrived; the stream may now run as long as the server needs.
                    self.scope.disarm_deadline();
                }
                self.pending.extend(messages);
            }
            None => {
                self.body = None;
                self.pending.extend(self.decoder.finish());
                self.state = StreamState::Draining;
            }
        }
        Ok(())
    }

    fn release(&mut self, state: StreamState) {
        if !self.pending.is_empty() {
            ortho_trace!(
                "{} discarding {} messages after terminal",
                self.url,
                self.pending.len()
            );
        }
        self.body = None;
        self.pending.clear();
        self.state = state;
    }

    /// Cancel the stream and release its reader now.
    pub fn close(&mut self) {
        self.scope.cancel_token().cancel();
        if !matches!(self.state, StreamState::Done) {
            self.release(StreamState::Failed);
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_reader_open(&self) -> bool {
        self.body.is_some()
    }

    pub fn messages_yielded(&self) -> usize {
        self.yielded
    }

    pub fn decode_stats(&self) -> DecodeStats {
        self.decoder.stats()
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Adapt into a `futures` stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<M, RequestError>> + Send
    where
        T: Send,
    {
        futures_util::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|item| (item, stream))
        })
    }

    /// Drive the stream on its own task, delivering through a bounded channel.
    ///
    /// Dropping the receiver stops the task and releases the reader.
    pub fn spawn(mut self, capacity: usize) -> mpsc::Receiver<Result<M, RequestError>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = tx.closed() => break,
                    item = self.next() => item,
                };
                let Some(item) = item else { break };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}
