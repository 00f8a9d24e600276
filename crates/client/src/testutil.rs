//! Test doubles shared by the unit tests.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use secrecy::ExposeSecret;
use url::Url;

use crate::gateway::{GatewayConfig, GatewayError, HttpRequest, HttpResponse, Transport};
use crate::storage::{KeyValueStore, MemoryStore, StorageError};

pub fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        base_url: Url::parse("http://backend.test/api/").unwrap(),
        timeout: Duration::from_secs(12),
        context_required_code: "shop_not_selected".to_string(),
    }
}

/// What the scripted transport saw, with the bearer exposed for assertions.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub bearer: Option<String>,
    pub body: Option<serde_json::Value>,
}

#[derive(Clone)]
struct Scripted {
    delay: Option<Duration>,
    response: Result<HttpResponse, GatewayError>,
}

/// Transport answering from per-path queues.
///
/// Paths are matched as a suffix of the request URL's path. A queued response
/// is used once; when a path's queue is empty the `always` response (if any)
/// is used; anything else is a network error.
#[derive(Default)]
pub struct ScriptedTransport {
    queues: Mutex<HashMap<String, VecDeque<Scripted>>>,
    always: Mutex<HashMap<String, Scripted>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, path: &str, response: HttpResponse) {
        self.enqueue(path, None, Ok(response));
    }

    pub fn push_delayed(&self, path: &str, delay: Duration, response: HttpResponse) {
        self.enqueue(path, Some(delay), Ok(response));
    }

    pub fn push_error(&self, path: &str, error: GatewayError) {
        self.enqueue(path, None, Err(error));
    }

    pub fn always(&self, path: &str, response: HttpResponse) {
        self.always.lock().unwrap().insert(
            path.to_string(),
            Scripted {
                delay: None,
                response: Ok(response),
            },
        );
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests whose path ends with `path`.
    pub fn count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.path().ends_with(path))
            .count()
    }

    fn enqueue(
        &self,
        path: &str,
        delay: Option<Duration>,
        response: Result<HttpResponse, GatewayError>,
    ) {
        self.queues
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(Scripted { delay, response });
    }

    fn next_for(&self, url_path: &str) -> Option<Scripted> {
        let mut queues = self.queues.lock().unwrap();
        let queued = queues
            .iter_mut()
            .filter(|(path, _)| url_path.ends_with(path.as_str()))
            .find_map(|(_, queue)| queue.pop_front());
        if queued.is_some() {
            return queued;
        }
        drop(queues);

        self.always
            .lock()
            .unwrap()
            .iter()
            .find(|(path, _)| url_path.ends_with(path.as_str()))
            .map(|(_, scripted)| scripted.clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, GatewayError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            bearer: request
                .bearer
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
            body: request.body.clone(),
        });

        let Some(scripted) = self.next_for(request.url.path()) else {
            return Err(GatewayError::Network(format!(
                "no scripted response for {} {}",
                request.method,
                request.url.path()
            )));
        };

        if let Some(delay) = scripted.delay {
            tokio::time::sleep(delay).await;
        }
        scripted.response
    }
}

/// Memory store that can be switched off and counts clears.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    unavailable: AtomicBool,
    removals: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of successful `remove_all` calls.
    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError> {
        self.check()?;
        self.removals.fetch_add(1, Ordering::SeqCst);
        self.inner.remove_all(keys).await
    }
}
