#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use setup_status::backend::{CachedQueueWorker, JobStatus, QueueTestRequest, StatusBackend, StatusMap};
use setup_status::error::SetupError;
use setup_status::step::{StepName, StepStatus};
use setup_status::view::{
    ErrorScope, Notice, Notifier, QueueTestReport, StatusView, StepIndicator, Troubleshooting,
};

/// Records everything the controller draws.
#[derive(Default)]
pub struct RecordingView {
    pub steps: Mutex<BTreeMap<StepName, StepIndicator>>,
    pub reports: Mutex<Vec<QueueTestReport>>,
    pub troubleshooting: Mutex<Vec<(ErrorScope, Troubleshooting)>>,
    pub retry_actions: Mutex<Vec<ErrorScope>>,
    pub notices: Mutex<Vec<Notice>>,
    pub last_checked: Mutex<Option<DateTime<Utc>>>,
}

impl RecordingView {
    pub fn indicator(&self, step: StepName) -> Option<StepIndicator> {
        self.steps.lock().unwrap().get(&step).cloned()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn last_report(&self) -> Option<QueueTestReport> {
        self.reports.lock().unwrap().last().cloned()
    }
}

impl StatusView for RecordingView {
    fn set_step_loading(&self, _step: StepName, _loading: bool) {}

    fn render_step(&self, step: StepName, indicator: &StepIndicator) {
        self.steps.lock().unwrap().insert(step, indicator.clone());
    }

    fn set_last_checked(&self, at: DateTime<Utc>) {
        *self.last_checked.lock().unwrap() = Some(at);
    }

    fn set_refresh_busy(&self, _busy: bool) {}

    fn render_queue_test(&self, report: &QueueTestReport) {
        self.reports.lock().unwrap().push(report.clone());
    }

    fn show_troubleshooting(&self, scope: ErrorScope, help: &Troubleshooting) {
        self.troubleshooting
            .lock()
            .unwrap()
            .push((scope, help.clone()));
    }

    fn show_retry_action(&self, scope: ErrorScope) {
        self.retry_actions.lock().unwrap().push(scope);
    }

    fn clear_retry_action(&self, scope: ErrorScope) {
        self.retry_actions.lock().unwrap().retain(|s| *s != scope);
    }
}

impl Notifier for RecordingView {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// Backend that replays queued responses and counts calls.
///
/// An empty queue for `refresh_all` answers with an empty map; for the
/// job status queue it answers with a transport error.
#[derive(Default)]
pub struct ScriptedBackend {
    pub bulk: Mutex<VecDeque<Result<StatusMap, SetupError>>>,
    pub step: Mutex<VecDeque<Result<StepStatus, SetupError>>>,
    pub dispatch: Mutex<VecDeque<Result<String, SetupError>>>,
    pub job_status: Mutex<VecDeque<Result<JobStatus, SetupError>>>,
    pub cached: Mutex<Option<CachedQueueWorker>>,
    pub bulk_calls: AtomicUsize,
    pub step_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    /// When set, `refresh_all` waits for a notification before answering.
    pub gate: Option<Arc<Notify>>,
    /// Same for `refresh_step`.
    pub step_gate: Option<Arc<Notify>>,
}

impl ScriptedBackend {
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    pub fn step_calls(&self) -> usize {
        self.step_calls.load(Ordering::SeqCst)
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusBackend for ScriptedBackend {
    async fn refresh_all(&self) -> Result<StatusMap, SetupError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.bulk
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(StatusMap::new()))
    }

    async fn refresh_step(&self, _step: StepName) -> Result<StepStatus, SetupError> {
        self.step_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.step_gate {
            gate.notified().await;
        }
        self.step
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SetupError::Protocol("no scripted step response".into())))
    }

    async fn dispatch_test_job(&self, _request: QueueTestRequest) -> Result<String, SetupError> {
        self.dispatch
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("job-1".to_string()))
    }

    async fn test_job_status(&self, _job_id: &str) -> Result<JobStatus, SetupError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.job_status
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SetupError::Transport("no scripted job status".into())))
    }

    async fn queue_worker_status(&self) -> Result<CachedQueueWorker, SetupError> {
        self.cached
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SetupError::Transport("connection refused".into()))
    }
}
