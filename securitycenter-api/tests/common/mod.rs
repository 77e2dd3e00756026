//! Recording in-memory stand-in for the SecurityCenter REST API.

#![allow(dead_code)]

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use securitycenter_api::{
    ApiExecutor, ApiRequest, ApiResponse, HttpMethod, RawResponse, SecurityCenterError, Session,
    Throttle,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, SecurityCenterError> + Send + Sync>;
type RawHandler = Box<dyn Fn(&ApiRequest) -> Result<RawResponse, SecurityCenterError> + Send + Sync>;

/// One call as seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: ApiRequest,
    pub session: Option<Session>,
}

pub struct MockExecutor {
    handler: Handler,
    raw_handler: Option<RawHandler>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockExecutor {
    pub fn new(
        handler: impl Fn(&ApiRequest) -> Result<ApiResponse, SecurityCenterError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            raw_handler: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_raw(
        mut self,
        handler: impl Fn(&ApiRequest) -> Result<RawResponse, SecurityCenterError> + Send + Sync + 'static,
    ) -> Self {
        self.raw_handler = Some(Box::new(handler));
        self
    }

    fn record(&self, request: &ApiRequest, session: Option<&Session>) {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push(RecordedCall {
                request: request.clone(),
                session: session.cloned(),
            });
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    /// Calls other than GET, in order.
    pub fn submissions(&self) -> Vec<ApiRequest> {
        self.calls()
            .into_iter()
            .map(|call| call.request)
            .filter(|request| request.method != HttpMethod::Get)
            .collect()
    }
}

#[async_trait]
impl ApiExecutor for MockExecutor {
    async fn execute(
        &self,
        request: &ApiRequest,
        session: Option<&Session>,
    ) -> Result<ApiResponse, SecurityCenterError> {
        self.record(request, session);
        (self.handler)(request)
    }

    async fn execute_raw(
        &self,
        request: &ApiRequest,
        session: Option<&Session>,
    ) -> Result<RawResponse, SecurityCenterError> {
        self.record(request, session);
        match &self.raw_handler {
            Some(handler) => handler(request),
            None => Err(SecurityCenterError::Unsupported(format!(
                "no raw response for {}",
                request.path
            ))),
        }
    }
}

/// Throttle that only counts how often it was waited on.
#[derive(Clone, Default)]
pub struct CountingThrottle {
    pub waits: Arc<AtomicUsize>,
}

impl CountingThrottle {
    pub fn count(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Throttle for CountingThrottle {
    async fn wait(&mut self) {
        self.waits.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn response(status: u16, body: Value) -> ApiResponse {
    ApiResponse {
        status,
        url: "https://sc.example.org/rest/mock".to_string(),
        headers: HeaderMap::new(),
        body,
    }
}

/// HTTP 200 with `error_code` 0 around `payload`.
pub fn ok(payload: Value) -> ApiResponse {
    response(200, json!({"error_code": 0, "error_msg": "", "response": payload}))
}

/// Listings used by every import type.
pub fn lookup_listing(request: &ApiRequest) -> Option<ApiResponse> {
    if request.method != HttpMethod::Get {
        return None;
    }
    let payload = match request.path.as_str() {
        "group" => json!([{"id": "1", "name": "Ops"}, {"id": "2", "name": "Dev"}]),
        "role" => json!([{"id": "3", "name": "Auditor"}, {"id": "4", "name": "Scanner"}]),
        "repository" => json!([{"id": "5", "name": "Main"}, {"id": "6", "name": "Lab"}]),
        "asset" => json!({
            "manageable": [{"id": "10", "name": "Servers", "description": ""}],
            "usable": [{"id": "11", "name": "Desktops"}]
        }),
        "policy" => json!({"usable": [{"id": "20", "name": "Basic Network Scan"}]}),
        _ => return None,
    };
    Some(ok(payload))
}

pub fn session() -> Session {
    Session::new("cookie-value", "12345")
}

pub fn csv_table(text: &str) -> securitycenter_api::tabular::Table {
    securitycenter_api::tabular::read_table(text.as_bytes()).expect("test CSV should parse")
}
