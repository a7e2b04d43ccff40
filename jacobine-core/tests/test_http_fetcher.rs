use std::time::Duration;

use jacobine_core::infrastructure::checksum;
use jacobine_core::infrastructure::http::{FetchError, HttpFetcher};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn buffered_get_returns_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"6.2":{"releases":[]}}"#),
        )
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new().unwrap();
    let fetched = fetcher
        .get(&format!("{}/json", server.uri()), Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(fetched.status, 200);
    assert_eq!(
        fetched.headers.get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(fetched.body, br#"{"6.2":{"releases":[]}}"#);
}

#[tokio::test]
async fn buffered_get_rejects_non_ok_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new().unwrap();
    let err = fetcher
        .get(&format!("{}/missing", server.uri()), Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Status { status: 404, .. }));
}

#[tokio::test]
async fn buffered_get_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new().unwrap();
    let err = fetcher
        .get(&format!("{}/slow", server.uri()), Duration::from_millis(200))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Timeout { .. }));
}

#[tokio::test]
async fn download_streams_body_to_disk() {
    let server = MockServer::start().await;
    let payload = vec![0xabu8; 256 * 1024];
    Mock::given(method("GET"))
        .and(path("/archive.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("archive.tar.gz");

    let fetcher = HttpFetcher::new().unwrap();
    let written = fetcher
        .download(
            &format!("{}/archive.tar.gz", server.uri()),
            &dest,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert_eq!(written, payload.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), payload);
}

#[tokio::test]
async fn download_checksums_match_streamed_content() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/t.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("t.tar.gz");

    let fetcher = HttpFetcher::new().unwrap();
    fetcher
        .download(
            &format!("{}/t.tar.gz", server.uri()),
            &dest,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert_eq!(
        checksum::md5_hex(&dest).await.unwrap(),
        "900150983cd24fb0d6963f7d28e17f72"
    );
    assert_eq!(
        checksum::sha1_hex(&dest).await.unwrap(),
        "a9993e364706816aba3e25717850c26c9cd0d89d"
    );
}

#[tokio::test]
async fn download_of_non_ok_status_leaves_no_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.tar.gz"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("gone.tar.gz");

    let fetcher = HttpFetcher::new().unwrap();
    let err = fetcher
        .download(
            &format!("{}/gone.tar.gz", server.uri()),
            &dest,
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Status { status: 500, .. }));
    assert!(!dest.exists());
}
