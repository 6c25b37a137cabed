#![allow(dead_code)]

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use orthostream_engine::{ByteStream, Clock, RequestError, Transport, TransportResponse};
use serde_json::Value;
use url::Url;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(orthostream_logging::initialize_for_tests);
}

pub fn record(value: Value) -> String {
    format!("data: {value}\n\n")
}

/// Logical clock advanced explicitly by tests and fakes.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }
}

#[derive(Debug, Clone)]
pub struct FakeRoute {
    pub status: u16,
    pub chunks: Vec<Bytes>,
    /// Keep the body open after the last chunk instead of ending it.
    pub hold_open: bool,
}

impl FakeRoute {
    pub fn body(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            chunks: vec![Bytes::from(body.into())],
            hold_open: false,
        }
    }

    pub fn held_open(chunks: Vec<String>) -> Self {
        Self {
            status: 200,
            chunks: chunks.into_iter().map(Bytes::from).collect(),
            hold_open: true,
        }
    }
}

/// In-process transport: routes by path, counts calls and open body readers.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, FakeRoute>>,
    calls: AtomicUsize,
    open_readers: Arc<AtomicUsize>,
    clock: Option<(Arc<ManualClock>, Duration)>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request advances `clock` by `latency`.
    pub fn with_clock(mut self, clock: Arc<ManualClock>, latency: Duration) -> Self {
        self.clock = Some((clock, latency));
        self
    }

    pub fn route(self, path: &str, route: FakeRoute) -> Self {
        self.routes.lock().unwrap().insert(path.to_string(), route);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &Url) -> Result<TransportResponse, RequestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((clock, latency)) = &self.clock {
            clock.advance(*latency);
        }
        let route = self.routes.lock().unwrap().get(url.path()).cloned();
        let Some(route) = route else {
            return Ok(TransportResponse {
                status: 404,
                body: Box::pin(stream::empty::<Result<Bytes, RequestError>>()),
            });
        };

        let chunks = stream::iter(route.chunks.into_iter().map(Ok::<Bytes, RequestError>));
        let inner: ByteStream = if route.hold_open {
            Box::pin(chunks.chain(stream::pending()))
        } else {
            Box::pin(chunks)
        };
        Ok(TransportResponse {
            status: route.status,
            body: Box::pin(TrackedBody::new(inner, self.open_readers.clone())),
        })
    }
}

/// Body stream that counts itself as an open reader until dropped.
struct TrackedBody {
    inner: ByteStream,
    open: Arc<AtomicUsize>,
}

impl TrackedBody {
    fn new(inner: ByteStream, open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self { inner, open }
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Stream for TrackedBody {
    type Item = Result<Bytes, RequestError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}
