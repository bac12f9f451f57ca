use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::config::{
    CSRF_PAGE_PATH, QUEUE_TEST_PATH, QUEUE_TEST_STATUS_PATH, QUEUE_WORKER_STATUS_PATH,
    REFRESH_ALL_PATH, REFRESH_STEP_PATH,
};
use crate::error::SetupError;
use crate::step::{StatusKind, StepName, StepStatus};

pub type StatusMap = BTreeMap<StepName, StepStatus>;

// --- Wire types ---

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueTestRequest {
    pub delay: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// State of a dispatched probe job as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
    #[serde(other)]
    Unknown,
}

impl JobState {
    /// Only these keep a poll session alive.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Processing)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobStatus {
    pub status: JobState,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Last queue worker test result remembered by the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CachedQueueWorker {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub test_completed_at: Option<String>,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl CachedQueueWorker {
    pub fn status_kind(&self) -> StatusKind {
        self.status
            .as_deref()
            .and_then(|s| serde_json::from_value(json!(s)).ok())
            .unwrap_or(StatusKind::NotTested)
    }
}

#[derive(Deserialize)]
struct SingleStepStatus {
    #[serde(default)]
    step_name: Option<StepName>,
    #[serde(flatten)]
    status: StepStatus,
}

// --- Backend seam ---

/// Everything the controller needs from the setup wizard.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusBackend: Send + Sync {
    async fn refresh_all(&self) -> Result<StatusMap, SetupError>;

    async fn refresh_step(&self, step: StepName) -> Result<StepStatus, SetupError>;

    /// Returns the id of the dispatched probe job.
    async fn dispatch_test_job(&self, request: QueueTestRequest) -> Result<String, SetupError>;

    async fn test_job_status(&self, job_id: &str) -> Result<JobStatus, SetupError>;

    async fn queue_worker_status(&self) -> Result<CachedQueueWorker, SetupError>;
}

// --- Response parsing ---

/// Reject a 2xx body that says `success: false`.
pub fn ensure_success(body: &Value) -> Result<(), SetupError> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let message = server_message(body).unwrap_or_else(|| "Request failed".to_string());
        return Err(SetupError::Server {
            status: 200,
            message,
        });
    }
    Ok(())
}

fn server_message(body: &Value) -> Option<String> {
    body.get("error")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Message for a non-2xx response: the server's own text if the body has one.
pub fn http_error_message(status: reqwest::StatusCode, body: &Value) -> String {
    server_message(body).unwrap_or_else(|| {
        format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown Status")
        )
    })
}

pub fn parse_bulk_statuses(body: &Value) -> Result<StatusMap, SetupError> {
    ensure_success(body)?;
    let statuses = body
        .pointer("/data/statuses")
        .and_then(Value::as_object)
        .ok_or_else(|| SetupError::Protocol("missing data.statuses".to_string()))?;

    let mut parsed = StatusMap::new();
    for (key, raw) in statuses {
        let Ok(step) = key.parse::<StepName>() else {
            debug!("Ignoring status for unknown step '{}'", key);
            continue;
        };
        match serde_json::from_value::<StepStatus>(raw.clone()) {
            Ok(status) => {
                parsed.insert(step, status);
            }
            Err(e) => {
                // Left out so the step renders as "No Data"
                warn!("Malformed status for step {}: {}", step, e);
            }
        }
    }
    Ok(parsed)
}

pub fn parse_step_status(body: &Value, requested: StepName) -> Result<StepStatus, SetupError> {
    ensure_success(body)?;
    let raw = body
        .pointer("/data/status")
        .ok_or_else(|| SetupError::Protocol("missing data.status".to_string()))?;
    let single: SingleStepStatus = serde_json::from_value(raw.clone())
        .map_err(|e| SetupError::Protocol(format!("invalid step status: {}", e)))?;

    if let Some(step_name) = single.step_name {
        if step_name != requested {
            warn!(
                "Asked for step {} but backend answered for {}",
                requested, step_name
            );
        }
    }
    Ok(single.status)
}

pub fn parse_dispatch(body: &Value) -> Result<String, SetupError> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let message = server_message(body).unwrap_or_else(|| "unknown reason".to_string());
        return Err(SetupError::Dispatch(message));
    }
    match body.get("test_job_id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(SetupError::Dispatch(
            "response did not include a test_job_id".to_string(),
        )),
    }
}

pub fn parse_job_status(body: &Value) -> Result<JobStatus, SetupError> {
    ensure_success(body)?;
    let raw = body
        .get("status")
        .ok_or_else(|| SetupError::Protocol("missing status".to_string()))?;
    serde_json::from_value(raw.clone())
        .map_err(|e| SetupError::Protocol(format!("invalid job status: {}", e)))
}

pub fn parse_queue_worker_status(body: &Value) -> Result<CachedQueueWorker, SetupError> {
    ensure_success(body)?;
    let raw = body
        .pointer("/data/queue_worker")
        .ok_or_else(|| SetupError::Protocol("missing data.queue_worker".to_string()))?;
    serde_json::from_value(raw.clone())
        .map_err(|e| SetupError::Protocol(format!("invalid queue worker status: {}", e)))
}

static CSRF_META_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+name=["']csrf-token["']\s+content=["']([^"']+)["']"#).unwrap()
});

pub fn extract_csrf_token(html: &str) -> Option<String> {
    CSRF_META_PATTERN
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

// --- HTTP implementation ---

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    csrf_token: RwLock<Option<String>>,
    request_timeout: Duration,
}

impl HttpBackend {
    pub fn new(
        base_url: &Url,
        csrf_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, SetupError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            csrf_token: RwLock::new(csrf_token),
            request_timeout,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Token from config, or scraped from the setup page's meta tag.
    ///
    /// Only a token actually found is cached; a failed or tokenless page is
    /// fetched again on the next request.
    async fn csrf_token(&self) -> Result<String, SetupError> {
        if let Some(token) = self.csrf_token.read().await.clone() {
            return Ok(token);
        }

        let url = self.endpoint(CSRF_PAGE_PATH);
        let html = self
            .with_deadline(async {
                let resp = self
                    .client
                    .get(&url)
                    .header(ACCEPT, "text/html")
                    .send()
                    .await?;

                let status = resp.status();
                if !status.is_success() {
                    return Err(SetupError::Server {
                        status: status.as_u16(),
                        message: http_error_message(status, &Value::Null),
                    });
                }
                Ok::<_, SetupError>(resp.text().await?)
            })
            .await?;

        match extract_csrf_token(&html) {
            Some(token) => {
                *self.csrf_token.write().await = Some(token.clone());
                Ok(token)
            }
            None => {
                warn!("No csrf-token meta tag found at {}", url);
                Ok(String::new())
            }
        }
    }

    async fn with_deadline<T, F>(&self, fut: F) -> Result<T, SetupError>
    where
        F: std::future::Future<Output = Result<T, SetupError>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SetupError::Timeout(self.request_timeout)),
        }
    }

    async fn send_json(&self, request: RequestBuilder) -> Result<Value, SetupError> {
        let token = self.csrf_token().await?;
        let request = request.header("X-CSRF-TOKEN", token);
        let request_timeout = self.request_timeout;

        self.with_deadline(async move {
            let resp = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    SetupError::Timeout(request_timeout)
                } else {
                    SetupError::from(e)
                }
            })?;

            let status = resp.status();
            if !status.is_success() {
                let body: Value = resp.json().await.unwrap_or_else(|_| json!({}));
                return Err(SetupError::Server {
                    status: status.as_u16(),
                    message: http_error_message(status, &body),
                });
            }

            resp.json::<Value>()
                .await
                .map_err(|e| SetupError::Protocol(format!("invalid JSON body: {}", e)))
        })
        .await
    }
}

#[async_trait]
impl StatusBackend for HttpBackend {
    async fn refresh_all(&self) -> Result<StatusMap, SetupError> {
        let body = self
            .send_json(self.client.post(self.endpoint(REFRESH_ALL_PATH)))
            .await?;
        parse_bulk_statuses(&body)
    }

    async fn refresh_step(&self, step: StepName) -> Result<StepStatus, SetupError> {
        let request = self
            .client
            .post(self.endpoint(REFRESH_STEP_PATH))
            .json(&json!({ "step": step }));
        let body = self.send_json(request).await?;
        parse_step_status(&body, step)
    }

    async fn dispatch_test_job(&self, request: QueueTestRequest) -> Result<String, SetupError> {
        let request = self.client.post(self.endpoint(QUEUE_TEST_PATH)).json(&request);
        let body = self.send_json(request).await.map_err(|e| match e {
            SetupError::Server { message, .. } => SetupError::Dispatch(message),
            other => other,
        })?;
        parse_dispatch(&body)
    }

    async fn test_job_status(&self, job_id: &str) -> Result<JobStatus, SetupError> {
        let request = self
            .client
            .get(self.endpoint(QUEUE_TEST_STATUS_PATH))
            .query(&[("test_job_id", job_id)]);
        let body = self.send_json(request).await?;
        parse_job_status(&body)
    }

    async fn queue_worker_status(&self) -> Result<CachedQueueWorker, SetupError> {
        let body = self
            .send_json(self.client.get(self.endpoint(QUEUE_WORKER_STATUS_PATH)))
            .await?;
        parse_queue_worker_status(&body)
    }
}
