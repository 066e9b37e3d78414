//! Stub engine scenarios: interception, redirects, cookies, opt-out,
//! delays, and cancellation.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use reqwest::Method;
use wiretap::client::FollowMode;
use wiretap::error::Error;
use wiretap::metrics::FetchType;
use wiretap::request::Request;
use wiretap::stub::{
    CustomMatcher, EchoResponder, StubEngine, StubResponse, StubRule, UnhandledMode, UrlMatcher,
};
use wiretap::Client;

fn stubbed_client(engine: Arc<StubEngine>, follow_mode: FollowMode) -> Client {
    engine.enable();
    Client::builder()
        .base_url("https://stub.test")
        .unwrap()
        .follow_mode(follow_mode)
        .stubber(engine)
        .build()
        .unwrap()
}

#[tokio::test]
async fn matched_request_never_reaches_the_network() {
    let engine = Arc::new(StubEngine::new());
    engine.add_rule(
        StubRule::when(UrlMatcher::exact("https://stub.test/v1/user").unwrap())
            .reply(Method::GET, StubResponse::json(serde_json::json!({"name": "alice"}))),
    );
    // No transport override: a pass-through would hit a non-resolvable
    // host and fail loudly.
    let client = stubbed_client(engine, FollowMode::Follow);

    let response = client.execute(&Request::get("/v1/user").build()).await;
    assert!(!response.is_error(), "{:?}", response.error);
    assert_eq!(response.status_code(), Some(200));
    let decoded: serde_json::Value = response.decode().unwrap();
    assert_eq!(decoded["name"], "alice");
    // Stubbed transactions never touch the wire.
    assert_eq!(
        response.metrics.transactions[0].fetch_type,
        FetchType::LocalCache
    );
}

#[tokio::test]
async fn stub_redirect_chain_is_followed_with_copy() {
    let engine = Arc::new(StubEngine::new());
    engine.add_rule(
        StubRule::when(UrlMatcher::exact("https://stub.test/old").unwrap())
            .reply(Method::GET, StubResponse::redirect("/new")),
    );
    engine.add_rule(
        StubRule::when(UrlMatcher::exact("https://stub.test/new").unwrap())
            .reply(Method::GET, StubResponse::text("ok")),
    );
    let client = stubbed_client(engine, FollowMode::FollowCopy);

    let request = Request::get("/old").build();
    let observed = Arc::new(AtomicU32::new(0));
    let seen = observed.clone();
    request.on_response(move |response| {
        assert_eq!(response.status_code(), Some(200));
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let response = client.execute(&request).await;
    assert_eq!(response.status_code(), Some(200));
    assert_eq!(response.text().unwrap(), "ok");
    assert_eq!(response.redirect_count(), 1);
    assert_eq!(response.metrics.transactions.len(), 2);
    assert_eq!(observed.load(Ordering::SeqCst), 1);
    assert_eq!(
        response.final_url.as_ref().map(|u| u.as_str()),
        Some("https://stub.test/new")
    );
}

#[tokio::test]
async fn status_304_and_305_are_never_redirects() {
    for status in [304u16, 305] {
        let engine = Arc::new(StubEngine::new());
        engine.add_rule(
            StubRule::when(UrlMatcher::exact("https://stub.test/pinned").unwrap()).reply(
                Method::GET,
                StubResponse::with_status(reqwest::StatusCode::from_u16(status).unwrap())
                    .header("Location", "/elsewhere"),
            ),
        );
        let client = stubbed_client(engine, FollowMode::Follow);

        let response = client.execute(&Request::get("/pinned").build()).await;
        assert_eq!(response.status_code(), Some(status));
        assert_eq!(response.redirect_count(), 0);
    }
}

#[tokio::test]
async fn opt_out_unmatched_request_fails_like_a_transport_error() {
    let engine = Arc::new(StubEngine::new());
    engine.set_unhandled_mode(UnhandledMode::OptOut);
    let client = stubbed_client(engine, FollowMode::Follow);

    let response = client.execute(&Request::get("/nothing-here").build()).await;
    assert!(response.status.is_none());
    assert!(matches!(response.error, Some(Error::StubNotFound(_))));
    // The failed dispatch still shows up in metrics.
    assert_eq!(response.metrics.transactions.len(), 1);
}

#[tokio::test]
async fn stub_cookies_install_and_replay() {
    let engine = Arc::new(StubEngine::new());
    engine.add_rule(
        StubRule::when(UrlMatcher::exact("https://stub.test/login").unwrap()).reply(
            Method::GET,
            StubResponse::text("welcome").header("Set-Cookie", "session=abc; Path=/"),
        ),
    );
    engine.add_rule(
        StubRule::when(UrlMatcher::exact("https://stub.test/area").unwrap())
            .and(CustomMatcher::new(|wire| {
                wire.header("cookie") == Some("session=abc")
            }))
            .reply(Method::GET, StubResponse::text("inside")),
    );
    engine.set_unhandled_mode(UnhandledMode::OptOut);
    let client = stubbed_client(engine, FollowMode::Follow);

    let login = client.execute(&Request::get("/login").build()).await;
    assert!(!login.is_error());

    let area = client.execute(&Request::get("/area").build()).await;
    assert!(!area.is_error(), "{:?}", area.error);
    assert_eq!(area.text().unwrap(), "inside");
}

#[tokio::test]
async fn echo_responder_specializes_per_request() {
    let engine = Arc::new(StubEngine::new());
    engine.add_rule(
        StubRule::when(UrlMatcher::exact("https://stub.test/echo").unwrap())
            .reply(Method::POST, EchoResponder),
    );
    let client = stubbed_client(engine, FollowMode::Follow);

    let request = Request::post("/echo")
        .json(&serde_json::json!({"ping": 1}))
        .unwrap()
        .build();
    let response = client.execute(&request).await;
    assert_eq!(response.headers.get("x-echo-method"), Some("POST"));
    assert_eq!(response.bytes().unwrap().as_ref(), br#"{"ping":1}"#);
}

#[tokio::test]
async fn delayed_stub_delivers_after_the_interval() {
    let engine = Arc::new(StubEngine::new());
    engine.add_rule(
        StubRule::when(UrlMatcher::exact("https://stub.test/slow").unwrap()).reply(
            Method::GET,
            StubResponse::text("late").delay(Duration::from_millis(50)),
        ),
    );
    let client = stubbed_client(engine, FollowMode::Follow);

    let started = std::time::Instant::now();
    let response = client.execute(&Request::get("/slow").build()).await;
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(response.text().unwrap(), "late");
}

#[tokio::test]
async fn cancellation_during_stub_delay_never_delivers_the_body() {
    let engine = Arc::new(StubEngine::new());
    engine.add_rule(
        StubRule::when(UrlMatcher::exact("https://stub.test/slow").unwrap()).reply(
            Method::GET,
            StubResponse::text("late").delay(Duration::from_secs(60)),
        ),
    );
    let client = stubbed_client(engine, FollowMode::Follow);

    let request = Request::get("/slow").build();
    let handle = request.cancel_handle();
    let task = {
        let client = client.clone();
        let request = request.clone();
        tokio::spawn(async move { client.execute(&request).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();

    let response = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("cancellation should unwind the delay")
        .unwrap();
    assert!(matches!(response.error, Some(Error::Cancelled)));
    assert!(response.bytes().unwrap().is_empty());
}

#[tokio::test]
async fn empty_stub_body_fails_when_empty_responses_disallowed() {
    let engine = Arc::new(StubEngine::new());
    engine.add_rule(
        StubRule::when(UrlMatcher::exact("https://stub.test/empty").unwrap())
            .reply(Method::GET, StubResponse::ok()),
    );
    let client = stubbed_client(engine, FollowMode::Follow);

    let request = Request::get("/empty").allow_empty_response(false).build();
    let response = client.execute(&request).await;
    assert!(matches!(response.error, Some(Error::EmptyResponse)));

    // The same stub passes when empty bodies are allowed.
    let request = Request::get("/empty").build();
    let response = client.execute(&request).await;
    assert!(!response.is_error());
}

#[tokio::test]
async fn disabled_engine_passes_through_to_the_transport() {
    let engine = Arc::new(StubEngine::new());
    engine.add_rule(StubRule::any().reply(Method::GET, StubResponse::text("stubbed")));
    engine.enable();
    engine.disable();

    let transport = support::FlakyTransport::new(0, "from transport");
    let client = Client::builder()
        .base_url("https://stub.test")
        .unwrap()
        .stubber(engine)
        .transport(transport)
        .build()
        .unwrap();

    let response = client.execute(&Request::get("/x").build()).await;
    assert_eq!(response.text().unwrap(), "from transport");
}
