use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::broadcast;

use flagz_api::app::repo::InMemoryAdminRepo;
use flagz_api::app::state::AppState;
use flagz_store::InMemoryFlagStore;

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let store = Arc::new(InMemoryFlagStore::new());
        let admin_repo = Arc::new(InMemoryAdminRepo::new(store.clone()));
        let (change_tx, _) = broadcast::channel(16);
        let state = Arc::new(AppState::new(store, admin_repo, b"test-session-key".to_vec(), change_tx, false));
        let app = flagz_api::app::build_app(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{addr}");

        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await.unwrap();
        });

        let client = reqwest::Client::builder().cookie_store(true).redirect(reqwest::redirect::Policy::none()).build().unwrap();

        Self { base_url, client, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

const CSRF_COOKIE: &str = "flagz_csrf";
const ANTI_FORGERY_COOKIE: &str = "flagz_anti_forgery";

/// `/setup` and `/login`'s GET handlers return a placeholder body rather than
/// a rendered form (no templating; see `DESIGN.md`), so nothing actually sets
/// the double-submit cookie. Tests stand in for the browser that would:
/// mint a value and present it as both the cookie and the form field.
fn fabricate_double_submit_token() -> String {
    "test-double-submit-token".to_string()
}

async fn setup_first_admin(srv: &TestServer, username: &str, password: &str) {
    let token = fabricate_double_submit_token();
    let res = srv
        .client
        .post(format!("{}/setup", srv.base_url))
        .header("Cookie", format!("{CSRF_COOKIE}={token}"))
        .form(&[("username", username), ("password", password), ("confirm_password", password), ("csrf_token", &token)])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER, "setup should redirect to /login");
}

/// Logs in and returns the anti-forgery token read back from the readable
/// cookie `login_submit` sets alongside the `HttpOnly` session cookie.
async fn login(srv: &TestServer, username: &str, password: &str) -> String {
    let token = fabricate_double_submit_token();
    let res = srv
        .client
        .post(format!("{}/login", srv.base_url))
        .header("Cookie", format!("{CSRF_COOKIE}={token}"))
        .form(&[("username", username), ("password", password), ("csrf_token", &token)])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER, "login should redirect to /");
    res.cookies().find(|c| c.name() == ANTI_FORGERY_COOKIE).map(|c| c.value().to_string()).expect("login sets the anti-forgery cookie")
}

#[tokio::test]
async fn setup_then_login_establishes_a_session() {
    let srv = TestServer::spawn().await;
    setup_first_admin(&srv, "operator", "a-long-enough-password").await;
    let anti_forgery = login(&srv, "operator", "a-long-enough-password").await;
    assert!(!anti_forgery.is_empty());

    let res = srv.client.get(format!("{}/", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn a_second_setup_is_rejected_once_an_admin_exists() {
    let srv = TestServer::spawn().await;
    setup_first_admin(&srv, "operator", "a-long-enough-password").await;

    let token = fabricate_double_submit_token();
    let res = srv
        .client
        .post(format!("{}/setup", srv.base_url))
        .header("Cookie", format!("{CSRF_COOKIE}={token}"))
        .form(&[("username", "second-admin"), ("password", "a-long-enough-password"), ("confirm_password", "a-long-enough-password"), ("csrf_token", &token)])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn wrong_password_reports_a_generic_invalid_credentials_message() {
    let srv = TestServer::spawn().await;
    setup_first_admin(&srv, "operator", "a-long-enough-password").await;

    let token = fabricate_double_submit_token();
    let res = srv
        .client
        .post(format!("{}/login", srv.base_url))
        .header("Cookie", format!("{CSRF_COOKIE}={token}"))
        .form(&[("username", "operator"), ("password", "totally-wrong"), ("csrf_token", &token)])
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Invalid credentials");
}

#[tokio::test]
async fn login_without_a_matching_csrf_cookie_is_rejected() {
    let srv = TestServer::spawn().await;
    setup_first_admin(&srv, "operator", "a-long-enough-password").await;

    let res = srv
        .client
        .post(format!("{}/login", srv.base_url))
        .form(&[("username", "operator"), ("password", "a-long-enough-password"), ("csrf_token", "mismatched-value")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn repeated_failed_logins_are_eventually_rate_limited() {
    let srv = TestServer::spawn().await;
    setup_first_admin(&srv, "operator", "a-long-enough-password").await;

    let token = fabricate_double_submit_token();
    let mut last_status = StatusCode::OK;
    for _ in 0..6 {
        let res = srv
            .client
            .post(format!("{}/login", srv.base_url))
            .header("Cookie", format!("{CSRF_COOKIE}={token}"))
            .form(&[("username", "operator"), ("password", "wrong-every-time"), ("csrf_token", &token)])
            .send()
            .await
            .unwrap();
        last_status = res.status();
    }
    assert_eq!(last_status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn repeated_successful_logins_are_never_rate_limited() {
    let srv = TestServer::spawn().await;
    setup_first_admin(&srv, "operator", "a-long-enough-password").await;

    for _ in 0..6 {
        login(&srv, "operator", "a-long-enough-password").await;
    }
}

#[tokio::test]
async fn project_and_flag_lifecycle_via_the_admin_session() {
    let srv = TestServer::spawn().await;
    setup_first_admin(&srv, "operator", "a-long-enough-password").await;
    let anti_forgery = login(&srv, "operator", "a-long-enough-password").await;

    let res = srv
        .client
        .post(format!("{}/projects", srv.base_url))
        .header("X-CSRF-Token", &anti_forgery)
        .form(&[("name", "checkout"), ("description", "checkout flags")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let project: serde_json::Value = res.json().await.unwrap();
    let tenant_id = project["id"].as_str().unwrap().to_string();

    let res = srv
        .client
        .post(format!("{}/projects/{tenant_id}/flags", srv.base_url))
        .header("X-CSRF-Token", &anti_forgery)
        .form(&[("key", "dark-mode"), ("description", "dark theme"), ("enabled", "on")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let flag: serde_json::Value = res.json().await.unwrap();
    assert_eq!(flag["enabled"], true);

    let res = srv
        .client
        .post(format!("{}/projects/{tenant_id}/flags/dark-mode/toggle", srv.base_url))
        .header("X-CSRF-Token", &anti_forgery)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let toggled: serde_json::Value = res.json().await.unwrap();
    assert_eq!(toggled["enabled"], false);

    let res = srv
        .client
        .post(format!("{}/projects/{tenant_id}/flags/dark-mode/toggle", srv.base_url))
        .header("X-CSRF-Token", "the-wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv
        .client
        .delete(format!("{}/projects/{tenant_id}/flags/dark-mode", srv.base_url))
        .header("X-CSRF-Token", &anti_forgery)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn bearer_api_key_round_trips_flag_reads() {
    let srv = TestServer::spawn().await;
    setup_first_admin(&srv, "operator", "a-long-enough-password").await;
    let anti_forgery = login(&srv, "operator", "a-long-enough-password").await;

    let project: serde_json::Value = srv
        .client
        .post(format!("{}/projects", srv.base_url))
        .header("X-CSRF-Token", &anti_forgery)
        .form(&[("name", "checkout"), ("description", "")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let tenant_id = project["id"].as_str().unwrap().to_string();

    srv.client
        .post(format!("{}/projects/{tenant_id}/flags", srv.base_url))
        .header("X-CSRF-Token", &anti_forgery)
        .form(&[("key", "checkout-v2"), ("description", "d"), ("enabled", "on")])
        .send()
        .await
        .unwrap();

    let created_key: serde_json::Value = srv
        .client
        .post(format!("{}/api-keys/{tenant_id}", srv.base_url))
        .header("X-CSRF-Token", &anti_forgery)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let bearer_token = created_key["token"].as_str().unwrap();

    let res = srv
        .client
        .get(format!("{}/v1/flags/checkout-v2", srv.base_url))
        .bearer_auth(bearer_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let flag: serde_json::Value = res.json().await.unwrap();
    assert_eq!(flag["key"], "checkout-v2");
    assert_eq!(flag["enabled"], true);

    let res = srv.client.get(format!("{}/v1/flags/checkout-v2", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv.client.get(format!("{}/v1/flags", srv.base_url)).bearer_auth(bearer_token).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let flags: Vec<serde_json::Value> = res.json().await.unwrap();
    assert_eq!(flags.len(), 1);
}

#[tokio::test]
async fn a_revoked_api_key_can_no_longer_authenticate() {
    let srv = TestServer::spawn().await;
    setup_first_admin(&srv, "operator", "a-long-enough-password").await;
    let anti_forgery = login(&srv, "operator", "a-long-enough-password").await;

    let project: serde_json::Value =
        srv.client.post(format!("{}/projects", srv.base_url)).header("X-CSRF-Token", &anti_forgery).form(&[("name", "p"), ("description", "")]).send().await.unwrap().json().await.unwrap();
    let tenant_id = project["id"].as_str().unwrap().to_string();

    let created_key: serde_json::Value =
        srv.client.post(format!("{}/api-keys/{tenant_id}", srv.base_url)).header("X-CSRF-Token", &anti_forgery).send().await.unwrap().json().await.unwrap();
    let bearer_token = created_key["token"].as_str().unwrap().to_string();
    let key_id = created_key["key"]["id"].as_str().unwrap().to_string();

    let res = srv
        .client
        .post(format!("{}/api-keys/delete/{tenant_id}", srv.base_url))
        .header("X-CSRF-Token", &anti_forgery)
        .form(&[("key_id", key_id.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = srv.client.get(format!("{}/v1/flags", srv.base_url)).bearer_auth(&bearer_token).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn audit_log_records_admin_actions() {
    let srv = TestServer::spawn().await;
    setup_first_admin(&srv, "operator", "a-long-enough-password").await;
    let anti_forgery = login(&srv, "operator", "a-long-enough-password").await;

    let project: serde_json::Value =
        srv.client.post(format!("{}/projects", srv.base_url)).header("X-CSRF-Token", &anti_forgery).form(&[("name", "p"), ("description", "")]).send().await.unwrap().json().await.unwrap();
    let tenant_id = project["id"].as_str().unwrap().to_string();

    srv.client
        .post(format!("{}/projects/{tenant_id}/flags", srv.base_url))
        .header("X-CSRF-Token", &anti_forgery)
        .form(&[("key", "a-flag"), ("description", "d"), ("enabled", "on")])
        .send()
        .await
        .unwrap();

    // AuditSink::record fires the insert on a detached task; give it a beat.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let res = srv.client.get(format!("{}/audit-log/{tenant_id}", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let entries: Vec<serde_json::Value> = res.json().await.unwrap();
    assert!(entries.iter().any(|e| e["action"] == json!("flag_create")));
}

#[tokio::test]
async fn streaming_surfaces_the_backfilled_flag_event() {
    let srv = TestServer::spawn().await;
    setup_first_admin(&srv, "operator", "a-long-enough-password").await;
    let anti_forgery = login(&srv, "operator", "a-long-enough-password").await;

    let project: serde_json::Value =
        srv.client.post(format!("{}/projects", srv.base_url)).header("X-CSRF-Token", &anti_forgery).form(&[("name", "p"), ("description", "")]).send().await.unwrap().json().await.unwrap();
    let tenant_id = project["id"].as_str().unwrap().to_string();

    srv.client
        .post(format!("{}/projects/{tenant_id}/flags", srv.base_url))
        .header("X-CSRF-Token", &anti_forgery)
        .form(&[("key", "a-flag"), ("description", "d"), ("enabled", "on")])
        .send()
        .await
        .unwrap();

    let created_key: serde_json::Value =
        srv.client.post(format!("{}/api-keys/{tenant_id}", srv.base_url)).header("X-CSRF-Token", &anti_forgery).send().await.unwrap().json().await.unwrap();
    let bearer_token = created_key["token"].as_str().unwrap();

    let mut response = srv.client.get(format!("{}/v1/stream", srv.base_url)).bearer_auth(bearer_token).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "text/event-stream");

    // The subscription backfills, then live-tails indefinitely; only read
    // until the backfilled event shows up rather than awaiting the full body.
    let mut collected = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(500), response.chunk()).await {
            Ok(Ok(Some(bytes))) => {
                collected.extend_from_slice(&bytes);
                if String::from_utf8_lossy(&collected).contains("a-flag") {
                    break;
                }
            }
            _ => break,
        }
    }
    assert!(String::from_utf8_lossy(&collected).contains("a-flag"), "expected the backfilled event in the SSE stream");
}
