mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{record, FakeRoute, FakeTransport, ManualClock};
use orthostream_core::{Species, SpeciesId, TreeChunkMessage};
use orthostream_engine::{
    CancellationToken, ClientSettings, RequestError, RequestExecutor, TreeClient, TreeSettings,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(base_url: String) -> ClientSettings {
    ClientSettings {
        base_url,
        request_timeout: Duration::from_secs(5),
        backoff_unit: Duration::from_millis(10),
        ..ClientSettings::default()
    }
}

fn client_for(server: &MockServer) -> TreeClient {
    let executor = RequestExecutor::new(settings(server.uri())).expect("executor");
    TreeClient::new(Arc::new(executor), TreeSettings::default())
}

fn fake_client(transport: FakeTransport, clock: Arc<ManualClock>) -> TreeClient {
    let executor = RequestExecutor::with_transport(
        settings("http://trees.test/".to_string()),
        Arc::new(transport),
    )
    .expect("executor");
    TreeClient::new(Arc::new(executor), TreeSettings::default()).with_clock(clock)
}

fn loading_preview(stream_url: Option<&str>) -> Value {
    json!({
        "summary": {"species_count": 3, "gene_count": 4200, "estimated_load_time_ms": 900},
        "simplified_tree": "((A,B),C);",
        "loading": true,
        "stream_url": stream_url
    })
}

fn inline_preview() -> Value {
    json!({
        "summary": {"species_count": 2, "gene_count": 12},
        "simplified_tree": "(Hs,Mm);",
        "loading": false
    })
}

fn tree_stream_body() -> String {
    [
        record(json!({"type": "metadata", "tree_id": "OG0001", "total_species": 3, "chunk_size": 2})),
        record(json!({
            "type": "species_chunk",
            "chunk_number": 1,
            "species": [
                {"name": "Homo sapiens", "id": 9606, "count": 3},
                {"name": "Mus musculus", "id": 10090, "count": 2}
            ],
            "progress": 0.66
        })),
        record(json!({
            "type": "species_chunk",
            "chunk_number": 2,
            "species": [{"name": "Danio rerio", "id": "zebrafish", "count": 1}],
            "progress": 1.0
        })),
        record(json!({"type": "tree_complete", "tree": "((Hs,Mm),Dr);", "total_species": 3})),
    ]
    .concat()
}

#[tokio::test]
async fn fast_preview_is_within_budget() {
    common::init_logging();
    let clock = Arc::new(ManualClock::default());
    let transport = FakeTransport::new()
        .with_clock(clock.clone(), Duration::from_millis(5))
        .route(
            "/api/tree/OG0001/preview",
            FakeRoute::body(200, inline_preview().to_string()),
        );
    let client = fake_client(transport, clock);

    let outcome = client
        .preview("OG0001", CancellationToken::new())
        .await
        .expect("preview");

    assert_eq!(outcome.elapsed, Duration::from_millis(5));
    assert_eq!(outcome.budget, Duration::from_millis(50));
    assert!(outcome.within_budget());
    assert!(!outcome.preview.needs_stream());
}

#[tokio::test]
async fn slow_preview_is_reported_over_budget() {
    common::init_logging();
    let clock = Arc::new(ManualClock::default());
    let transport = FakeTransport::new()
        .with_clock(clock.clone(), Duration::from_millis(80))
        .route(
            "/api/tree/OG0001/preview",
            FakeRoute::body(200, inline_preview().to_string()),
        );
    let client = fake_client(transport, clock);

    let outcome = client
        .preview("OG0001", CancellationToken::new())
        .await
        .expect("a slow preview still succeeds");

    assert_eq!(outcome.elapsed, Duration::from_millis(80));
    assert!(!outcome.within_budget());
}

#[tokio::test]
async fn loading_preview_streams_the_remaining_species() {
    common::init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tree/OG0001/preview"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(loading_preview(Some("/api/tree/OG0001/stream"))),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tree/OG0001/stream"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(tree_stream_body(), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let full = client
        .load_full("OG0001", CancellationToken::new())
        .await
        .expect("full tree");

    assert!(full.streamed);
    assert_eq!(full.tree, "((Hs,Mm),Dr);");
    assert_eq!(full.total_species, 3);
    assert_eq!(
        full.species[2],
        Species {
            name: "Danio rerio".into(),
            id: SpeciesId::Name("zebrafish".into()),
            count: 1
        }
    );
    assert_eq!(full.species.len(), 3);
}

#[tokio::test]
async fn streamed_progress_reaches_completion() {
    common::init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tree/OG0001/preview"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(loading_preview(Some("/api/tree/OG0001/stream"))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tree/OG0001/stream"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(tree_stream_body(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = client.preview("OG0001", CancellationToken::new()).await.unwrap();
    let mut stream = client
        .stream(&outcome.preview, CancellationToken::new())
        .await
        .unwrap()
        .expect("loading preview needs a stream");

    let mut fractions = Vec::new();
    while let Some(message) = stream.next().await {
        message.unwrap();
        fractions.push(stream.tracker().fraction());
    }

    assert_eq!(fractions, vec![0.0, 0.66, 1.0, 1.0]);
    assert!(stream.tracker().is_complete());
    assert_eq!(stream.tracker().species_delivered(), 3);
    assert_eq!(stream.tracker().total_species(), Some(3));
    assert!(stream.tracker().violations().is_empty());
}

#[tokio::test]
async fn complete_preview_never_opens_a_stream() {
    common::init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tree/OG0002/preview"))
        .respond_with(ResponseTemplate::new(200).set_body_json(inline_preview()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tree/OG0002/stream"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let full = client
        .load_full("OG0002", CancellationToken::new())
        .await
        .unwrap();

    assert!(!full.streamed);
    assert_eq!(full.tree, "(Hs,Mm);");
    assert_eq!(full.total_species, 2);
}

#[tokio::test]
async fn loading_preview_without_stream_url_is_a_protocol_error() {
    common::init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tree/OG0003/preview"))
        .respond_with(ResponseTemplate::new(200).set_body_json(loading_preview(None)))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .load_full("OG0003", CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RequestError::Protocol(_)), "{err:?}");
}

#[tokio::test]
async fn server_error_during_stream_fails_the_load() {
    common::init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tree/OG0004/preview"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(loading_preview(Some("/api/tree/OG0004/stream"))),
        )
        .mount(&server)
        .await;
    let body = [
        record(json!({"type": "metadata", "total_species": 3})),
        record(json!({"type": "error", "message": "tree too large"})),
    ]
    .concat();
    Mock::given(method("GET"))
        .and(path("/api/tree/OG0004/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .load_full("OG0004", CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err, RequestError::Server("tree too large".into()));
}

#[tokio::test]
async fn unknown_tree_surfaces_the_status() {
    common::init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tree/missing/preview"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .preview("missing", CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err, RequestError::Http { status: 404 });
}

#[tokio::test]
async fn tree_id_must_be_one_path_segment() {
    common::init_logging();
    let clock = Arc::new(ManualClock::default());
    let transport = FakeTransport::new();
    let client = fake_client(transport, clock);

    for id in ["", "a/b", "x?y=1", "frag#1"] {
        let err = client
            .preview(id, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::InvalidUrl(_)), "{id:?}: {err:?}");
    }
}

#[tokio::test]
async fn stream_messages_arrive_in_server_order() {
    common::init_logging();
    let clock = Arc::new(ManualClock::default());
    let transport = FakeTransport::new().route(
        "/api/tree/OG0001/stream",
        FakeRoute::body(200, tree_stream_body()),
    );
    let client = fake_client(transport, clock);

    let mut stream = client
        .open_stream("api/tree/OG0001/stream", CancellationToken::new())
        .await
        .unwrap();
    let mut tags = Vec::new();
    while let Some(message) = stream.next().await {
        tags.push(match message.unwrap() {
            TreeChunkMessage::Metadata { .. } => "metadata",
            TreeChunkMessage::SpeciesChunk { .. } => "species_chunk",
            TreeChunkMessage::TreeComplete { .. } => "tree_complete",
            TreeChunkMessage::Error { .. } => "error",
        });
    }

    assert_eq!(
        tags,
        vec!["metadata", "species_chunk", "species_chunk", "tree_complete"]
    );
}
