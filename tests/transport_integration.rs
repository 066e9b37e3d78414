//! End-to-end pipeline tests against a local mock server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use wiretap::client::{FollowMode, RedirectAction};
use wiretap::error::Error;
use wiretap::request::Request;
use wiretap::security::{Credentials, TrustPolicy};
use wiretap::Client;

fn client_for(server: &mockito::ServerGuard) -> Client {
    Client::builder()
        .base_url(&server.url())
        .unwrap()
        .build()
        .unwrap()
}

#[tokio::test]
async fn get_sends_query_and_default_headers() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/search")
        .match_query(mockito::Matcher::UrlEncoded("q".into(), "red shoes".into()))
        .match_header("accept-encoding", mockito::Matcher::Any)
        .match_header("user-agent", mockito::Matcher::Regex("^wiretap/".into()))
        .with_status(200)
        .with_body("found")
        .create_async()
        .await;

    let client = client_for(&server);
    let response = client
        .execute(&Request::get("/v1/search").param("q", "red shoes").build())
        .await;

    assert!(!response.is_error(), "{:?}", response.error);
    assert_eq!(response.text().unwrap(), "found");
    mock.assert_async().await;
}

#[tokio::test]
async fn post_json_body_reaches_the_wire() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/items")
        .match_header("content-type", "application/json; charset=utf-8")
        .match_body(mockito::Matcher::JsonString(r#"{"a":1,"b":true}"#.into()))
        .with_status(201)
        .with_body("{\"id\":7}")
        .create_async()
        .await;

    let client = client_for(&server);
    let request = Request::post("/v1/items")
        .json(&serde_json::json!({"a": 1, "b": true}))
        .unwrap()
        .build();
    let response = client.execute(&request).await;

    assert_eq!(response.status_code(), Some(201));
    let decoded: serde_json::Value = response.decode().unwrap();
    assert_eq!(decoded["id"], 7);
    mock.assert_async().await;
}

#[tokio::test]
async fn redirects_follow_and_count() {
    let mut server = mockito::Server::new_async().await;
    let _old = server
        .mock("GET", "/old")
        .with_status(301)
        .with_header("location", "/new")
        .create_async()
        .await;
    let _new = server
        .mock("GET", "/new")
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;

    let client = Client::builder()
        .base_url(&server.url())
        .unwrap()
        .follow_mode(FollowMode::FollowCopy)
        .build()
        .unwrap();
    let response = client.execute(&Request::get("/old").build()).await;

    assert_eq!(response.status_code(), Some(200));
    assert_eq!(response.text().unwrap(), "ok");
    assert_eq!(response.redirect_count(), 1);
    assert_eq!(response.metrics.transactions.len(), 2);
}

#[tokio::test]
async fn redirect_delegate_can_refuse() {
    let mut server = mockito::Server::new_async().await;
    let _old = server
        .mock("GET", "/old")
        .with_status(302)
        .with_header("location", "/new")
        .with_body("moved")
        .create_async()
        .await;

    let refused = Arc::new(AtomicU32::new(0));
    let count = refused.clone();
    let client = Client::builder()
        .base_url(&server.url())
        .unwrap()
        .redirect_delegate(move |_wire, _status, _target| {
            count.fetch_add(1, Ordering::SeqCst);
            RedirectAction::Refuse
        })
        .build()
        .unwrap();

    let response = client.execute(&Request::get("/old").build()).await;
    assert_eq!(response.status_code(), Some(302));
    assert_eq!(response.redirect_count(), 0);
    assert_eq!(refused.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cookies_set_by_the_server_replay_on_the_next_request() {
    let mut server = mockito::Server::new_async().await;
    let _login = server
        .mock("GET", "/login")
        .with_status(200)
        .with_header("set-cookie", "session=xyz; Path=/")
        .with_body("hello")
        .create_async()
        .await;
    let area = server
        .mock("GET", "/area")
        .match_header("cookie", "session=xyz")
        .with_status(200)
        .with_body("inside")
        .create_async()
        .await;

    let client = client_for(&server);
    let login = client.execute(&Request::get("/login").build()).await;
    assert!(!login.is_error());

    let response = client.execute(&Request::get("/area").build()).await;
    assert_eq!(response.text().unwrap(), "inside");
    area.assert_async().await;
}

#[tokio::test]
async fn large_data_mode_spools_to_destination() {
    let mut server = mockito::Server::new_async().await;
    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let _m = server
        .mock("GET", "/blob")
        .with_status(200)
        .with_body(payload.clone())
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("blob.bin");
    let client = client_for(&server);
    let response = client
        .execute(&Request::get("/blob").spool_to(&destination).build())
        .await;

    assert!(!response.is_error(), "{:?}", response.error);
    match &response.body {
        wiretap::response::BodyLocation::Spool(path) => assert_eq!(path, &destination),
        other => panic!("expected spooled body, got {other:?}"),
    }
    assert_eq!(std::fs::read(&destination).unwrap(), payload);
}

#[tokio::test]
async fn download_progress_reports_totals() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/sized")
        .with_status(200)
        .with_header("content-length", "5")
        .with_body("12345")
        .create_async()
        .await;

    let client = client_for(&server);
    let request = Request::get("/sized").build();
    let fractions = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = fractions.clone();
    request.on_progress(move |progress| {
        sink.lock().unwrap().push(progress.fraction());
    });

    let response = client.execute(&request).await;
    assert!(!response.is_error());
    let fractions = fractions.lock().unwrap();
    assert_eq!(fractions.last().cloned().flatten(), Some(1.0));
}

#[tokio::test]
async fn credentials_policy_answers_basic_challenges() {
    let mut server = mockito::Server::new_async().await;
    let _challenge = server
        .mock("GET", "/guarded")
        .match_header("authorization", mockito::Matcher::Missing)
        .with_status(401)
        .with_header("www-authenticate", "Basic realm=\"vault\"")
        .create_async()
        .await;
    // base64("user:pass") == dXNlcjpwYXNz
    let granted = server
        .mock("GET", "/guarded")
        .match_header("authorization", "Basic dXNlcjpwYXNz")
        .with_status(200)
        .with_body("granted")
        .create_async()
        .await;

    let client = Client::builder()
        .base_url(&server.url())
        .unwrap()
        .security(TrustPolicy::credentials(|_host, realm| {
            assert_eq!(realm, Some("vault"));
            Some(Credentials {
                username: "user".into(),
                password: "pass".into(),
            })
        }))
        .build()
        .unwrap();

    let response = client.execute(&Request::get("/guarded").build()).await;
    assert_eq!(response.status_code(), Some(200));
    assert_eq!(response.text().unwrap(), "granted");
    // Both the challenge and the authorized exchange are metered.
    assert_eq!(response.metrics.transactions.len(), 2);
    granted.assert_async().await;
}

#[tokio::test]
async fn hard_http_errors_pass_through_without_retry() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/teapot")
        .with_status(418)
        .with_body("short and stout")
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let response = client
        .execute(&Request::get("/teapot").max_retries(3).build())
        .await;

    // Status codes are not failures by themselves.
    assert!(!response.is_error());
    assert_eq!(response.status_code(), Some(418));
    mock.assert_async().await;
}

#[tokio::test]
async fn too_many_redirects_is_reported() {
    let mut server = mockito::Server::new_async().await;
    let _loop_a = server
        .mock("GET", "/a")
        .with_status(302)
        .with_header("location", "/b")
        .expect_at_least(1)
        .create_async()
        .await;
    let _loop_b = server
        .mock("GET", "/b")
        .with_status(302)
        .with_header("location", "/a")
        .expect_at_least(1)
        .create_async()
        .await;

    let client = Client::builder()
        .base_url(&server.url())
        .unwrap()
        .max_redirects(3)
        .build()
        .unwrap();
    let response = client.execute(&Request::get("/a").build()).await;
    assert!(matches!(response.error, Some(Error::TooManyRedirects)));
}
