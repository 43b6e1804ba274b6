use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use multiget::core::engine::Engine;
use multiget::core::error::{DownloadError, FetchErrorKind};
use multiget::core::model::DownloadPlan;
use multiget::plugins::http::driver::{HttpDriver, HttpDriverError};
use multiget::plugins::registry::DriverContext;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

const LETTERS: &[u8] = b"ABCDEFGHIJ";

#[derive(Clone, Copy)]
enum Mode {
    Ranges,
    IgnoreRanges,
    NotFound,
    Stall,
}

#[derive(Clone)]
struct Served {
    body: Arc<Vec<u8>>,
    mode: Mode,
}

fn parse_range(v: &str) -> Option<(u64, u64)> {
    let (a, b) = v.strip_prefix("bytes=")?.split_once('-')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

async fn serve(State(s): State<Served>, headers: HeaderMap) -> Response {
    match s.mode {
        Mode::NotFound => return (StatusCode::NOT_FOUND, "no such file").into_response(),
        Mode::IgnoreRanges => return (StatusCode::OK, s.body.to_vec()).into_response(),
        Mode::Stall => tokio::time::sleep(Duration::from_secs(30)).await,
        Mode::Ranges => {}
    }

    let len = s.body.len() as u64;
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range);
    let Some((start, end)) = range else {
        return (StatusCode::OK, s.body.to_vec()).into_response();
    };
    if start >= len {
        return (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{len}"))],
        )
            .into_response();
    }

    let end = end.min(len - 1);
    (
        StatusCode::PARTIAL_CONTENT,
        [(header::CONTENT_RANGE, format!("bytes {start}-{end}/{len}"))],
        s.body[start as usize..=end as usize].to_vec(),
    )
        .into_response()
}

async fn spawn_server(body: &[u8], mode: Mode) -> Url {
    let state = Served { body: Arc::new(body.to_vec()), mode };
    let app = Router::new().route("/letters.txt", get(serve)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/letters.txt")).unwrap()
}

fn engine_with(ctx: DriverContext) -> Engine {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    Engine::new(Arc::new(HttpDriver::with_client(client)), ctx)
}

fn engine() -> Engine {
    engine_with(DriverContext::default())
}

async fn fetch(url: &Url, chunks: usize, size: u64, parallel: bool) -> Result<bytes::Bytes, DownloadError> {
    let plan = DownloadPlan::new(url.clone(), chunks, size, parallel).unwrap();
    engine().run(&plan).await
}

#[tokio::test]
async fn two_chunks_reassemble_in_order() {
    let url = spawn_server(LETTERS, Mode::Ranges).await;
    for parallel in [false, true] {
        let data = fetch(&url, 2, 5, parallel).await.unwrap();
        assert_eq!(&data[..], LETTERS);
    }
}

#[tokio::test]
async fn server_truncated_tail_needs_no_padding() {
    let url = spawn_server(LETTERS, Mode::Ranges).await;
    for parallel in [false, true] {
        let data = fetch(&url, 3, 4, parallel).await.unwrap();
        assert_eq!(&data[..], LETTERS);
    }
}

#[tokio::test]
async fn range_wholly_past_end_is_an_empty_tail() {
    let url = spawn_server(LETTERS, Mode::Ranges).await;
    // ranges 0-3, 4-7, 8-11, 12-15; the last one is answered with 416
    let data = fetch(&url, 4, 4, true).await.unwrap();
    assert_eq!(&data[..], LETTERS);
}

#[tokio::test]
async fn output_is_independent_of_split_and_mode() {
    let body: Vec<u8> = (0..100_000u32).map(|i| (i * 31 % 251) as u8).collect();
    let url = spawn_server(&body, Mode::Ranges).await;

    let whole = fetch(&url, 1, 200_000, false).await.unwrap();
    assert_eq!(&whole[..], &body[..]);

    for (chunks, size) in [(7, 15_000), (4, 25_000), (10, 10_000)] {
        let seq = fetch(&url, chunks, size, false).await.unwrap();
        let par = fetch(&url, chunks, size, true).await.unwrap();
        assert_eq!(seq, whole);
        assert_eq!(par, whole);
    }
}

#[tokio::test]
async fn refused_connection_fails_without_output() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let url = Url::parse(&format!("http://{addr}/letters.txt")).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("letters.txt");
    let plan = DownloadPlan::new(url, 3, 4, true).unwrap();

    let err = engine()
        .download_to_file(&plan, &path, CancellationToken::new())
        .await
        .unwrap_err();

    match err.downcast_ref::<DownloadError>() {
        Some(DownloadError::PartialFailure { completed, total, cause }) => {
            assert_eq!((*completed, *total), (0, 3));
            assert_eq!(cause.kind, FetchErrorKind::Connection);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!path.exists());
}

#[tokio::test]
async fn error_status_is_not_segment_data() {
    let url = spawn_server(LETTERS, Mode::NotFound).await;
    let err = fetch(&url, 2, 5, false).await.unwrap_err();

    let DownloadError::PartialFailure { completed, cause, .. } = err else {
        panic!("expected partial failure");
    };
    assert_eq!(completed, 0);
    assert_eq!(cause.kind, FetchErrorKind::Protocol);
    assert!(matches!(
        cause.cause.downcast_ref::<HttpDriverError>(),
        Some(HttpDriverError::Status(s)) if s.as_u16() == 404
    ));
}

#[tokio::test]
async fn ignored_range_past_zero_is_rejected() {
    let url = spawn_server(LETTERS, Mode::IgnoreRanges).await;
    let err = fetch(&url, 2, 5, false).await.unwrap_err();

    let DownloadError::PartialFailure { completed, total, cause } = err else {
        panic!("expected partial failure");
    };
    assert_eq!((completed, total), (1, 2));
    assert_eq!(cause.index, 1);
    assert!(matches!(
        cause.cause.downcast_ref::<HttpDriverError>(),
        Some(HttpDriverError::RangeIgnored { start: 5 })
    ));
}

#[tokio::test]
async fn ignored_range_from_zero_keeps_requested_prefix() {
    let url = spawn_server(LETTERS, Mode::IgnoreRanges).await;

    let whole = fetch(&url, 1, 1024, false).await.unwrap();
    assert_eq!(&whole[..], LETTERS);

    let prefix = fetch(&url, 1, 4, false).await.unwrap();
    assert_eq!(&prefix[..], b"ABCD");
}

#[tokio::test]
async fn fetch_timeout_is_a_connection_failure() {
    let url = spawn_server(LETTERS, Mode::Stall).await;
    let ctx = DriverContext { timeout_secs: Some(1), ..Default::default() };
    let plan = DownloadPlan::new(url, 2, 5, true).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(10), engine_with(ctx).run(&plan))
        .await
        .expect("timeout should fire well before the stall ends")
        .unwrap_err();

    assert!(matches!(
        err,
        DownloadError::PartialFailure { ref cause, .. } if cause.kind == FetchErrorKind::Connection
    ));
}

#[tokio::test]
async fn cancelling_stops_stalled_requests() {
    let url = spawn_server(LETTERS, Mode::Stall).await;
    let plan = DownloadPlan::new(url, 2, 5, true).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(10), engine().run_with_cancel(&plan, cancel))
        .await
        .expect("cancellation should end the download")
        .unwrap_err();
    assert!(matches!(err, DownloadError::Cancelled { completed: 0, total: 2 }));
}

#[tokio::test]
async fn user_range_header_is_refused_instead_of_corrupting_output() {
    let url = spawn_server(LETTERS, Mode::Ranges).await;
    let ctx = DriverContext {
        headers: vec![("Range".to_string(), "bytes=0-4".to_string())],
        ..Default::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("letters.txt");

    for parallel in [false, true] {
        let plan = DownloadPlan::new(url.clone(), 2, 5, parallel).unwrap();
        let err = engine_with(ctx.clone())
            .download_to_file(&plan, &path, CancellationToken::new())
            .await
            .unwrap_err();

        match err.downcast_ref::<DownloadError>() {
            Some(DownloadError::PartialFailure { completed, cause, .. }) => {
                assert_eq!(*completed, 0);
                assert_eq!(cause.kind, FetchErrorKind::Protocol);
                assert!(matches!(
                    cause.cause.downcast_ref::<HttpDriverError>(),
                    Some(HttpDriverError::ReservedHeader(name)) if name == "Range"
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!path.exists());
    }
}
