use std::sync::Arc;

use axum::http::StatusCode;
use http_body_util::BodyExt;
use tagwatch_core::engine::Engine;
use tagwatch_core::store::StateStore;
use tagwatch_core::testing::{DeployMode, FakeDeploy, FakeRegistry, FakeTransport};
use tagwatch_core::types::{DeployTarget, TagFilter, WatchedRepository};
use tagwatch_server::AppState;
use tempfile::TempDir;
use tower::ServiceExt;

const REPO: &str = "acme/api";
const CHAT: i64 = 777;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    _dir: TempDir,
    state: AppState,
    registry: Arc<FakeRegistry>,
    transport: Arc<FakeTransport>,
    deploy: Arc<FakeDeploy>,
}

impl Harness {
    fn new(secret: Option<&str>) -> Self {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(&dir.path().join("state.redb")).unwrap();
        let registry = Arc::new(FakeRegistry::default());
        let transport = Arc::new(FakeTransport::default());
        let deploy = Arc::new(FakeDeploy::default());
        let engine = Engine::new(
            store,
            vec![WatchedRepository::new(
                REPO,
                TagFilter::default(),
                DeployTarget::new("ops/api", "main"),
            )],
            CHAT,
            registry.clone(),
            transport.clone(),
            deploy.clone(),
        );
        let state = AppState::new(Arc::new(engine)).with_webhook_secret(secret.map(String::from));
        Self {
            _dir: dir,
            state,
            registry,
            transport,
            deploy,
        }
    }

    fn app(&self) -> axum::Router {
        tagwatch_server::build_router(self.state.clone())
    }

    /// Baseline an empty repository, publish `tag`, and return the button payload.
    async fn announce(&self, tag: &str) -> String {
        self.registry.set_tags(REPO, &[]);
        let (status, _) = post_json(self.app(), "/api/scan", serde_json::json!({}), None).await;
        assert_eq!(status, StatusCode::OK);
        self.registry.set_tags(REPO, &[tag]);
        let (status, report) =
            post_json(self.app(), "/api/scan", serde_json::json!({}), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["repositories"][0]["notified"][0], tag);
        self.transport.sent().last().unwrap().buttons[0]
            .callback_data
            .clone()
    }
}

fn press(update_id: i64, chat: i64, data: &str) -> serde_json::Value {
    serde_json::json!({
        "update_id": update_id,
        "callback_query": {
            "id": format!("cb-{update_id}"),
            "from": {"id": 1, "username": "ops"},
            "message": {"message_id": 10, "chat": {"id": chat}},
            "data": data,
        }
    })
}

fn text_message(update_id: i64, chat: i64, text: &str) -> serde_json::Value {
    serde_json::json!({
        "update_id": update_id,
        "message": {
            "message_id": 20,
            "chat": {"id": chat},
            "from": {"id": 1, "username": "ops"},
            "text": text,
        }
    })
}

/// Send a GET request via `oneshot` and return (status, parsed JSON body).
async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Send a POST request with a JSON body and an optional webhook secret header.
async fn post_json(
    app: axum::Router,
    uri: &str,
    body: serde_json::Value,
    secret: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let mut req = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        req = req.header("X-Telegram-Bot-Api-Secret-Token", secret);
    }
    let req = req
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn healthz_reports_watch_list() {
    let h = Harness::new(None);
    let (status, json) = get(h.app(), "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["repositories"], 1);
}

#[tokio::test]
async fn repositories_before_and_after_scan() {
    let h = Harness::new(None);
    let (_, before) = get(h.app(), "/api/repositories").await;
    assert_eq!(before[0]["repository"], REPO);
    assert_eq!(before[0]["scanned"], false);

    h.registry.set_tags(REPO, &["v0.9"]);
    let (status, report) = post_json(h.app(), "/api/scan", serde_json::json!({}), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["repositories"][0]["baselined"], true);

    let (_, after) = get(h.app(), "/api/repositories").await;
    assert_eq!(after[0]["scanned"], true);
    assert_eq!(after[0]["tags"][0]["name"], "v0.9");
    assert_eq!(after[0]["tags"][0]["state"], "baseline");
    assert_eq!(after[0]["deploy"]["ref"], "main");
}

#[tokio::test]
async fn scan_failure_is_reported_not_fatal() {
    let h = Harness::new(None);
    h.registry.set_unavailable(REPO);
    let (status, report) = post_json(h.app(), "/api/scan", serde_json::json!({}), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(report["repositories"][0]["error"]
        .as_str()
        .unwrap()
        .contains("simulated outage"));
}

#[tokio::test]
async fn webhook_press_deploys_exactly_once() {
    let h = Harness::new(None);
    let data = h.announce("v1.1").await;

    let (status, first) = post_json(h.app(), "/telegram/webhook", press(1, CHAT, &data), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"]["type"], "deployed");

    let (status, second) =
        post_json(h.app(), "/telegram/webhook", press(2, CHAT, &data), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["outcome"]["type"], "already_handled");

    assert_eq!(h.deploy.calls().len(), 1);
    assert_eq!(h.transport.acks().len(), 2);

    let (_, actions) = get(h.app(), "/api/actions").await;
    assert_eq!(actions[0]["consumed"], true);
    let (_, repos) = get(h.app(), "/api/repositories").await;
    assert_eq!(repos[0]["tags"][0]["state"], "action_completed");
}

#[tokio::test]
async fn webhook_reports_deploy_failure() {
    let h = Harness::new(None);
    h.deploy.set_mode(DeployMode::Unavailable);
    let data = h.announce("v1.2").await;

    let (status, json) = post_json(h.app(), "/telegram/webhook", press(1, CHAT, &data), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"]["type"], "deploy_failed");

    let (_, repos) = get(h.app(), "/api/repositories").await;
    assert_eq!(repos[0]["tags"][0]["state"], "action_pending");
}

#[tokio::test]
async fn webhook_rejects_wrong_secret() {
    let h = Harness::new(Some("s3cret"));
    let data = h.announce("v1.3").await;

    let (status, _) = post_json(
        h.app(),
        "/telegram/webhook",
        press(1, CHAT, &data),
        Some("wrong"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post_json(h.app(), "/telegram/webhook", press(1, CHAT, &data), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(h.deploy.calls().is_empty());

    let (status, json) = post_json(
        h.app(),
        "/telegram/webhook",
        press(1, CHAT, &data),
        Some("s3cret"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"]["type"], "deployed");
}

#[tokio::test]
async fn webhook_ignores_foreign_chat_and_plain_updates() {
    let h = Harness::new(None);
    let data = h.announce("v1.4").await;

    let (status, json) =
        post_json(h.app(), "/telegram/webhook", press(1, CHAT + 1, &data), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["outcome"].is_null());
    assert!(h.deploy.calls().is_empty());

    let (status, json) = post_json(
        h.app(),
        "/telegram/webhook",
        serde_json::json!({"update_id": 5}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["handled"], false);
}

#[tokio::test]
async fn webhook_with_unknown_action_is_acknowledged() {
    let h = Harness::new(None);
    let data = format!("deploy:{}", uuid_like());
    let (status, json) = post_json(h.app(), "/telegram/webhook", press(1, CHAT, &data), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["outcome"].is_null());
    let acks = h.transport.acks();
    assert_eq!(acks.len(), 1);
    assert!(acks[0].1.contains("expired"));
}

fn uuid_like() -> &'static str {
    "6f1c1f0e-2b7a-4c55-9d2e-0a9f3e4b5c6d"
}

#[tokio::test]
async fn webhook_answers_start_and_list() {
    let h = Harness::new(None);
    h.announce("v2.0").await;

    let (status, json) =
        post_json(h.app(), "/telegram/webhook", text_message(1, CHAT, "/start"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["handled"], true);
    assert_eq!(json["command"], "start");

    let (status, json) = post_json(
        h.app(),
        "/telegram/webhook",
        text_message(2, CHAT, "/list@tagwatch_bot"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["command"], "list");

    let replies = h.transport.replies();
    assert_eq!(replies.len(), 2);
    assert!(replies[0].1.contains("/list"));
    assert!(replies[1].1.contains(REPO));
    assert!(replies[1].1.contains("`v2.0` notified"));
}

#[tokio::test]
async fn webhook_ignores_commands_from_other_chats_and_chatter() {
    let h = Harness::new(None);

    let (status, json) =
        post_json(h.app(), "/telegram/webhook", text_message(1, CHAT + 1, "/list"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["handled"], false);

    let (status, json) =
        post_json(h.app(), "/telegram/webhook", text_message(2, CHAT, "thanks"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["handled"], false);
    assert!(h.transport.replies().is_empty());
}
