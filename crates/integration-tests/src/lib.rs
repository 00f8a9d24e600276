//! Integration tests for the salon client.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p salon-integration-tests
//! ```
//!
//! The tests run the real client (file store, `reqwest` transport) against
//! [`MockBackend`], an in-process axum server bound to `127.0.0.1:0` that
//! implements the backend's auth and selected-shop endpoints.

#![allow(clippy::expect_used, clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use salon_client::{ClientConfig, SalonClient};
use serde::Deserialize;
use serde_json::{Value, json};
use tempfile::TempDir;
use url::Url;

/// The only account the mock backend knows.
pub const EMAIL: &str = "owner@salon.example";
pub const PASSWORD: &str = "correct-horse";
pub const USER_ID: i64 = 1;

#[derive(Default)]
struct MockData {
    next_token: u64,
    /// Issued access tokens that are still valid.
    tokens: Vec<String>,
    shops: HashMap<i64, Value>,
    selected: Option<i64>,
    hits: HashMap<&'static str, usize>,
    logout_tokens: Vec<String>,
    /// Delay applied to `GET /shops/selected`
    shop_delay: Duration,
}

type Shared = Arc<Mutex<MockData>>;

/// In-process backend.
pub struct MockBackend {
    addr: SocketAddr,
    data: Shared,
}

impl MockBackend {
    /// Bind to an ephemeral port and start serving.
    pub async fn start() -> Self {
        let data: Shared = Arc::default();
        {
            let mut d = data.lock().expect("mock state poisoned");
            d.shops.insert(1, json!({"id": 1, "name": "Downtown", "timezone": "Europe/Lisbon"}));
            d.shops.insert(2, json!({"id": 2, "name": "Uptown", "timezone": "Europe/Lisbon"}));
        }

        let app = Router::new()
            .route("/api/auth/login", post(login))
            .route("/api/auth/me", get(me))
            .route("/api/auth/logout", post(logout))
            .route("/api/shops/selected", get(selected).post(select))
            .route("/api/appointments", get(appointments))
            .with_state(Arc::clone(&data));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock backend");
        let addr = listener.local_addr().expect("Failed to read local addr");
        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("Mock backend stopped");
        });

        Self { addr, data }
    }

    #[must_use]
    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}/api/", self.addr)).expect("valid mock URL")
    }

    /// Number of requests a route received (`"login"`, `"me"`, `"logout"`,
    /// `"selected"`, `"select"`, `"appointments"`).
    #[must_use]
    pub fn hits(&self, route: &str) -> usize {
        self.lock().hits.get(route).copied().unwrap_or(0)
    }

    /// Invalidate every issued token, as a server-side session expiry would.
    pub fn revoke_all_tokens(&self) {
        self.lock().tokens.clear();
    }

    /// Change the backend's selected shop behind the client's back.
    pub fn set_selected(&self, shop_id: Option<i64>) {
        self.lock().selected = shop_id;
    }

    pub fn set_shop_delay(&self, delay: Duration) {
        self.lock().shop_delay = delay;
    }

    /// Tokens the backend was asked to log out.
    #[must_use]
    pub fn logout_tokens(&self) -> Vec<String> {
        self.lock().logout_tokens.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockData> {
        self.data.lock().expect("mock state poisoned")
    }
}

/// A mock backend plus a data directory, from which any number of clients
/// (one per simulated process start) can be built.
pub struct TestContext {
    pub backend: MockBackend,
    pub dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        Self {
            backend: MockBackend::start().await,
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    /// Client configuration pointing at the mock backend and temp dir.
    #[must_use]
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.backend.base_url());
        config.data_dir = self.dir.path().to_path_buf();
        config.request_timeout = Duration::from_secs(5);
        config.logout_quiet_period = Duration::from_millis(200);
        config
    }

    /// A fresh client over the shared data directory.
    #[must_use]
    pub fn client(&self) -> SalonClient {
        SalonClient::from_config(self.config()).expect("Failed to build client")
    }

    /// Raw contents of the session store file (empty if absent).
    #[must_use]
    pub fn stored_keys(&self) -> Vec<String> {
        let path = self.config().store_path();
        std::fs::read(path).map_or_else(
            |_| Vec::new(),
            |bytes| {
                serde_json::from_slice::<HashMap<String, String>>(&bytes)
                    .map(|doc| doc.into_keys().collect())
                    .unwrap_or_default()
            },
        )
    }
}

// =============================================================================
// Handlers
// =============================================================================

fn hit<'a>(data: &'a Shared, route: &'static str) -> std::sync::MutexGuard<'a, MockData> {
    let mut d = data.lock().expect("mock state poisoned");
    *d.hits.entry(route).or_default() += 1;
    d
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn authorized(d: &MockData, headers: &HeaderMap) -> bool {
    bearer(headers).is_some_and(|token| d.tokens.contains(&token))
}

fn error(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({"code": code, "message": message}))).into_response()
}

fn user() -> Value {
    json!({"id": USER_ID, "email": EMAIL, "name": "Ana"})
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(State(data): State<Shared>, Json(body): Json<LoginBody>) -> Response {
    let mut d = hit(&data, "login");
    if body.email != EMAIL || body.password != PASSWORD {
        return error(StatusCode::UNAUTHORIZED, "invalid_credentials", "Wrong email or password");
    }

    d.next_token += 1;
    let token = format!("tok-{}", d.next_token);
    d.tokens.push(token.clone());
    Json(json!({
        "access_token": token,
        "refresh_token": format!("ref-{}", d.next_token),
        "user": user(),
    }))
    .into_response()
}

async fn me(State(data): State<Shared>, headers: HeaderMap) -> Response {
    let d = hit(&data, "me");
    if !authorized(&d, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(user()).into_response()
}

async fn logout(State(data): State<Shared>, headers: HeaderMap) -> Response {
    let mut d = hit(&data, "logout");
    if let Some(token) = bearer(&headers) {
        d.tokens.retain(|t| t != &token);
        d.logout_tokens.push(token);
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn selected(State(data): State<Shared>, headers: HeaderMap) -> Response {
    let delay = {
        let d = hit(&data, "selected");
        if !authorized(&d, &headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        d.shop_delay
    };
    tokio::time::sleep(delay).await;

    let d = data.lock().expect("mock state poisoned");
    match d.selected.and_then(|id| d.shops.get(&id)) {
        Some(shop) => Json(shop.clone()).into_response(),
        None => error(StatusCode::NOT_FOUND, "not_found", "No shop selected"),
    }
}

#[derive(Deserialize)]
struct SelectBody {
    shop_id: i64,
}

async fn select(
    State(data): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<SelectBody>,
) -> Response {
    let mut d = hit(&data, "select");
    if !authorized(&d, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Some(shop) = d.shops.get(&body.shop_id).cloned() else {
        return error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "unknown_shop",
            "No such shop",
        );
    };
    d.selected = Some(body.shop_id);
    Json(shop).into_response()
}

async fn appointments(State(data): State<Shared>, headers: HeaderMap) -> Response {
    let d = hit(&data, "appointments");
    if !authorized(&d, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if d.selected.is_none() {
        return error(
            StatusCode::CONFLICT,
            "shop_not_selected",
            "Select a shop before listing appointments",
        );
    }
    Json(json!([])).into_response()
}
