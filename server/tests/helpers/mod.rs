//! Reusable test helpers for HTTP integration tests.
//!
//! Provides `TestApp` for building and sending requests through the full axum
//! router over the in-memory store, with a recording messenger and a manual
//! clock so purge confirmation can be driven deterministically.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{self, header, Method, Request, Response};
use axum::Router;
use chrono::{TimeZone, Utc};
use futures::future::BoxFuture;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;
use zperm_common::{EntityKind, PermissionGrant};
use zperm_server::admin::{BulkAdministrator, ManualClock};
use zperm_server::api::{create_router, AppState};
use zperm_server::config::Config;
use zperm_server::messaging::Messenger;
use zperm_server::storage::memory::MemoryTransactionStrategy;
use zperm_server::storage::{EntityStore, Storage, TransactionStrategy};

pub const ALICE_TOKEN: &str = "alice-token";
pub const BOB_TOKEN: &str = "bob-token";

// ============================================================================
// Recording messenger
// ============================================================================

/// Messenger that keeps every message for inspection.
#[derive(Default)]
pub struct RecordingMessenger {
    notes: Mutex<Vec<(String, String)>>,
    broadcasts: Mutex<Vec<String>>,
}

impl RecordingMessenger {
    pub fn notes(&self) -> Vec<(String, String)> {
        self.notes.lock().unwrap().clone()
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.broadcasts.lock().unwrap().clone()
    }
}

impl Messenger for RecordingMessenger {
    fn notify<'a>(&'a self, recipient: &'a str, message: &'a str) -> BoxFuture<'a, ()> {
        self.notes
            .lock()
            .unwrap()
            .push((recipient.to_string(), message.to_string()));
        Box::pin(async {})
    }

    fn broadcast_admin<'a>(&'a self, message: &'a str) -> BoxFuture<'a, ()> {
        self.broadcasts.lock().unwrap().push(message.to_string());
        Box::pin(async {})
    }
}

// ============================================================================
// Test App
// ============================================================================

/// The full router over a fresh in-memory store.
pub struct TestApp {
    pub router: Router,
    pub strategy: MemoryTransactionStrategy,
    pub messenger: Arc<RecordingMessenger>,
    pub clock: Arc<ManualClock>,
    pub config: Arc<Config>,
    /// Holds the dump directory's parent alive for the test's duration.
    pub dumps: TempDir,
}

impl TestApp {
    /// Create a new test app with its own store and dump directory.
    pub fn new() -> Self {
        let dumps = tempfile::tempdir().expect("Failed to create temp dir");
        let mut config = Config::default_for_test();
        config.dump_directory = dumps.path().join("dumps");

        let strategy = MemoryTransactionStrategy::new();
        let messenger = Arc::new(RecordingMessenger::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        ));

        let admin = BulkAdministrator::new(
            Storage::with_attempts(strategy.clone(), config.transaction_max_attempts),
            messenger.clone(),
            config.admin_settings(),
        )
        .with_clock(clock.clone());

        let router = create_router(AppState::new(admin, config.clone()));

        Self {
            router,
            strategy,
            messenger,
            clock,
            config: Arc::new(config),
            dumps,
        }
    }

    /// Build an HTTP request with the given method and URI.
    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }

    /// Authenticated GET.
    pub async fn get(&self, uri: &str, token: &str) -> Response<Body> {
        let request = Self::request(Method::GET, uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        self.oneshot(request).await
    }

    /// Authenticated POST with a JSON body.
    pub async fn post_json(
        &self,
        uri: &str,
        token: &str,
        body: serde_json::Value,
    ) -> Response<Body> {
        let request = Self::request(Method::POST, uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.oneshot(request).await
    }

    /// Two groups, two players and a grant.
    pub async fn seed(&self) {
        self.strategy
            .execute_without_result(|store| {
                Box::pin(async move {
                    store.add_member("Admins", "Alice", None).await?;
                    store.add_member("Builders", "Bob", None).await?;
                    store.set_priority("Admins", 10).await?;
                    store
                        .set_permission(
                            "Builders",
                            EntityKind::Group,
                            &PermissionGrant::global("build", true),
                        )
                        .await?;
                    Ok(())
                })
            })
            .await
            .expect("Failed to seed store");
    }

    /// Number of stored entities of `kind`.
    pub async fn count(&self, kind: EntityKind) -> usize {
        self.strategy
            .execute(|store| Box::pin(async move { store.list_names(kind).await }))
            .await
            .expect("Failed to list entities")
            .len()
    }
}

/// Collect a response body and parse it as JSON.
pub async fn body_to_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect response body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        let preview = String::from_utf8_lossy(&bytes);
        panic!("Failed to parse response as JSON: {e}\nBody: {preview}")
    })
}

/// Pull the confirmation code out of a purge response message.
pub fn issued_code(body: &serde_json::Value) -> u32 {
    let message = body["message"].as_str().expect("message missing");
    let (_, rest) = message
        .split_once("code issued: ")
        .unwrap_or_else(|| panic!("no code in {message:?}"));
    rest.chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .expect("code is not a number")
}
