use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use davsync::remote::{
    PutOptions, PutOutcome, RemoteError, RemoteStore, UploadBody, WebDavClient, WebDavSettings,
};
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> WebDavClient {
    WebDavClient::new(&WebDavSettings {
        url: format!("{}/dav/", server.uri()),
        username: "u".into(),
        password: "p".into(),
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
    })
    .expect("valid url")
}

fn put_options(len: u64) -> PutOptions {
    PutOptions {
        overwrite: true,
        content_length: len,
        on_progress: None,
    }
}

#[tokio::test]
async fn exists_maps_head_status() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/dav/present.txt"))
        .and(header("authorization", "Basic dTpw"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/dav/missing.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/dav/broken.txt"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let c = client(&server);
    assert!(c.exists("/present.txt").await.unwrap());
    assert!(!c.exists("/missing.txt").await.unwrap());
    let err = c.exists("/broken.txt").await.unwrap_err();
    assert!(matches!(err, RemoteError::Http { status: 503, .. }));
}

#[tokio::test]
async fn mkcol_treats_existing_collection_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("MKCOL"))
        .and(path("/dav/new"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("MKCOL"))
        .and(path("/dav/old"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("MKCOL"))
        .and(path("/dav/orphan/child"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let c = client(&server);
    c.create_directory("/new").await.unwrap();
    c.create_directory("/old").await.unwrap();
    assert!(matches!(
        c.create_directory("/orphan/child").await,
        Err(RemoteError::Http { status: 409, .. })
    ));
}

#[tokio::test]
async fn put_sends_overwrite_header_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/dav/a%20b.txt"))
        .and(header("Overwrite", "T"))
        .and(body_bytes(b"hello".to_vec()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let c = client(&server);
    let out = c
        .put_file_contents("/a b.txt", UploadBody::Bytes(b"hello".to_vec()), put_options(5))
        .await
        .unwrap();
    assert_eq!(out, PutOutcome::Stored);
}

#[tokio::test]
async fn put_streams_file_and_reports_progress() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/dav/dir/blob.bin"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("blob.bin");
    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&local, &data).unwrap();

    let sent = Arc::new(AtomicU64::new(0));
    let seen = sent.clone();
    let mut options = put_options(data.len() as u64);
    options.on_progress = Some(Arc::new(move |n: u64, total: u64| {
        assert_eq!(total, 200_000);
        seen.store(n, Ordering::Relaxed);
    }));

    let file = tokio::fs::File::open(&local).await.unwrap();
    let c = client(&server);
    let out = c
        .put_file_contents("/dir/blob.bin", UploadBody::File(file), options)
        .await
        .unwrap();
    assert_eq!(out, PutOutcome::Stored);
    assert_eq!(sent.load(Ordering::Relaxed), 200_000);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, data);
}

#[tokio::test]
async fn put_distinguishes_not_stored_from_errors() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/dav/kept.txt"))
        .and(header("Overwrite", "F"))
        .respond_with(ResponseTemplate::new(412))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/dav/fail.txt"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let c = client(&server);
    let mut keep = put_options(1);
    keep.overwrite = false;
    let out = c
        .put_file_contents("/kept.txt", UploadBody::Bytes(vec![1]), keep)
        .await
        .unwrap();
    assert_eq!(out, PutOutcome::NotStored);

    let err = c
        .put_file_contents("/fail.txt", UploadBody::Bytes(vec![1]), put_options(1))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Http { status: 500, .. }));
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let c = WebDavClient::new(&WebDavSettings {
        url: "http://127.0.0.1:9/".into(),
        username: "u".into(),
        password: "p".into(),
        connect_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_millis(500),
    })
    .unwrap();
    assert!(matches!(
        c.exists("/x").await,
        Err(RemoteError::Transport { .. })
    ));
}
