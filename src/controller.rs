use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::backend::{JobState, QueueTestRequest, StatusBackend, StatusMap};
use crate::config::{Timing, ERROR_TOAST_MS, SUCCESS_TOAST_MS};
use crate::error::SetupError;
use crate::render;
use crate::step::{StatusKind, StepName, StepStatus};
use crate::view::{
    ErrorScope, Notice, NoticeVariant, Notifier, QueueTestPhase, QueueTestReport, StatusView,
};

pub type SharedController = Arc<StatusPollingController>;

pub struct ControllerState {
    pub refresh_in_progress: bool,
    pub queue_test_in_progress: bool,
    pub retry_attempts: u32,
    pub auto_refresh_enabled: bool,
    pub auto_refresh_handle: Option<JoinHandle<()>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub statuses: StatusMap,
    pub disposed: bool,
}

impl ControllerState {
    pub fn new() -> Self {
        Self {
            refresh_in_progress: false,
            queue_test_in_progress: false,
            retry_attempts: 0,
            auto_refresh_enabled: false,
            auto_refresh_handle: None,
            last_checked: None,
            statuses: StatusMap::new(),
            disposed: false,
        }
    }

    pub fn to_snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            refresh_in_progress: self.refresh_in_progress,
            queue_test_in_progress: self.queue_test_in_progress,
            retry_attempts: self.retry_attempts,
            auto_refresh_enabled: self.auto_refresh_enabled,
            auto_refresh_active: self.auto_refresh_handle.is_some(),
            last_checked: self.last_checked,
            statuses: self.statuses.clone(),
            disposed: self.disposed,
        }
    }
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new()
    }
}

// --- Read-only copy for callers ---

#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub refresh_in_progress: bool,
    pub queue_test_in_progress: bool,
    pub retry_attempts: u32,
    pub auto_refresh_enabled: bool,
    pub auto_refresh_active: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub statuses: StatusMap,
    pub disposed: bool,
}

impl ControllerSnapshot {
    /// Steps whose last known status is not healthy (or that were never checked).
    pub fn unhealthy_steps(&self) -> Vec<StepName> {
        StepName::ALL
            .into_iter()
            .filter(|step| {
                self.statuses
                    .get(step)
                    .map(|s| !s.status.is_healthy())
                    .unwrap_or(true)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    /// Another refresh was in flight, or the controller is disposed.
    Skipped,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueTestOutcome {
    Completed { processing_time: Option<f64> },
    Failed(String),
    TimedOut,
    /// Dispatch or status requests kept failing.
    Abandoned(String),
    /// Backend reported a state we don't know; session ended without a verdict.
    Inconclusive,
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

/// Bookkeeping for one dispatched probe job.
#[derive(Debug, Clone)]
pub struct PollSession {
    pub job_id: String,
    pub started_at: Instant,
    pub poll_count: u32,
    pub consecutive_network_errors: u32,
}

impl PollSession {
    pub fn new(job_id: String) -> Self {
        Self {
            job_id,
            started_at: Instant::now(),
            poll_count: 0,
            consecutive_network_errors: 0,
        }
    }

    /// Measured from the session start, not from the poll count.
    pub fn elapsed(&self) -> String {
        render::format_elapsed(self.started_at.elapsed())
    }
}

pub struct StatusPollingController {
    backend: Arc<dyn StatusBackend>,
    view: Arc<dyn StatusView>,
    notifier: Arc<dyn Notifier>,
    timing: Timing,
    state: RwLock<ControllerState>,
    shutdown_tx: watch::Sender<bool>,
}

impl StatusPollingController {
    pub fn new(
        backend: Arc<dyn StatusBackend>,
        view: Arc<dyn StatusView>,
        notifier: Arc<dyn Notifier>,
        timing: Timing,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            backend,
            view,
            notifier,
            timing,
            state: RwLock::new(ControllerState::new()),
            shutdown_tx,
        }
    }

    pub async fn snapshot(&self) -> ControllerSnapshot {
        self.state.read().await.to_snapshot()
    }

    pub async fn is_refresh_in_progress(&self) -> bool {
        self.state.read().await.refresh_in_progress
    }

    // --- Lifecycle ---

    /// Show the backend's remembered queue worker result and optionally start auto-refresh.
    pub async fn init(self: &Arc<Self>, auto_refresh: bool) {
        info!("Initializing setup status controller");
        self.load_cached_queue_worker_status().await;
        if auto_refresh {
            self.toggle_auto_refresh(true).await;
        }
    }

    /// Stop the auto-refresh timer and wake every suspended retry or poll so it exits.
    pub async fn dispose(&self) {
        self.shutdown_tx.send_replace(true);

        let mut state = self.state.write().await;
        state.disposed = true;
        state.auto_refresh_enabled = false;
        if let Some(handle) = state.auto_refresh_handle.take() {
            handle.abort();
        }
        drop(state);

        info!("Setup status controller disposed");
    }

    pub async fn load_cached_queue_worker_status(&self) -> Option<StepStatus> {
        match self.backend.queue_worker_status().await {
            Ok(cached) => {
                let status = render::cached_queue_worker_status(&cached);
                debug!("Cached queue worker status: {}", status.status);
                self.store_and_render(StepName::QueueWorker, status.clone())
                    .await;
                Some(status)
            }
            Err(e) => {
                warn!("Could not load cached queue worker status: {}", e);
                None
            }
        }
    }

    // --- Refresh ---

    /// Re-check every step. Failures back off and retry up to the configured ceiling.
    pub async fn refresh_all(&self) -> RefreshOutcome {
        if !self.begin_refresh().await {
            debug!("Refresh already in progress, ignoring request");
            return RefreshOutcome::Skipped;
        }

        loop {
            let error = match self.run_bulk_refresh().await {
                Ok(()) => return RefreshOutcome::Refreshed,
                Err(e) => e,
            };

            match self.handle_request_error(&error, ErrorScope::Bulk).await {
                ErrorAction::Retry { delay, .. } => {
                    if !self.pause(delay).await {
                        info!("Status refresh retry cancelled");
                        return RefreshOutcome::Cancelled;
                    }
                    if !self.begin_refresh().await {
                        debug!("Another refresh started during backoff, dropping retry");
                        self.abandon_bulk_retry().await;
                        return RefreshOutcome::Skipped;
                    }
                }
                ErrorAction::GiveUp => return RefreshOutcome::Failed,
            }
        }
    }

    /// The pending retry lost the flag to another refresh; end it like a give-up.
    async fn abandon_bulk_retry(&self) {
        let disposed = {
            let mut state = self.state.write().await;
            state.retry_attempts = 0;
            state.disposed
        };
        if !disposed {
            self.view.show_retry_action(ErrorScope::Bulk);
        }
    }

    async fn run_bulk_refresh(&self) -> Result<(), SetupError> {
        self.view.set_refresh_busy(true);
        for step in StepName::ALL {
            self.view.set_step_loading(step, true);
        }

        let result = match self.backend.refresh_all().await {
            Ok(statuses) => {
                self.apply_bulk_statuses(statuses).await;
                Ok(())
            }
            Err(e) => Err(e),
        };

        // Cleared whatever the outcome
        for step in StepName::ALL {
            self.view.set_step_loading(step, false);
        }
        self.view.set_refresh_busy(false);
        self.state.write().await.refresh_in_progress = false;

        result
    }

    async fn apply_bulk_statuses(&self, mut statuses: StatusMap) {
        let now = Utc::now();
        let mut rendered = Vec::with_capacity(StepName::ALL.len());

        {
            let mut state = self.state.write().await;
            state.retry_attempts = 0;
            state.last_checked = Some(now);
            for step in StepName::ALL {
                let status = match statuses.remove(&step) {
                    Some(status) => status,
                    // The bulk check never probes the worker; keep the last test result
                    None => match state.statuses.get(&step) {
                        Some(known) if step == StepName::QueueWorker => known.clone(),
                        _ => {
                            warn!("No status returned for step {}", step);
                            StepStatus::no_data()
                        }
                    },
                };
                state.statuses.insert(step, status.clone());
                rendered.push((step, status));
            }
        }

        for (step, status) in &rendered {
            self.view
                .render_step(*step, &render::step_indicator(*step, status));
        }
        self.view.set_last_checked(now);
        self.view.clear_retry_action(ErrorScope::Bulk);

        info!("Status refreshed for {} steps", rendered.len());
        self.notifier.notify(Notice {
            variant: NoticeVariant::Success,
            title: "Status refreshed".to_string(),
            message: "All setup steps were checked".to_string(),
            duration: Duration::from_millis(SUCCESS_TOAST_MS),
        });
    }

    /// Re-check one step. Failures are shown inline with a retry action, never retried automatically.
    pub async fn refresh_step(&self, step: StepName) -> RefreshOutcome {
        if !self.begin_refresh().await {
            debug!("Refresh already in progress, ignoring {} refresh", step);
            return RefreshOutcome::Skipped;
        }

        self.view.set_step_loading(step, true);
        let result = self.backend.refresh_step(step).await;
        self.view.set_step_loading(step, false);
        self.state.write().await.refresh_in_progress = false;

        match result {
            Ok(status) => {
                debug!("Step {} is {}", step, status.status);
                self.store_and_render(step, status).await;
                self.view.clear_retry_action(ErrorScope::Step(step));
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                self.handle_request_error(&e, ErrorScope::Step(step)).await;
                self.store_and_render(step, StepStatus::new(StatusKind::Error, e.to_string()))
                    .await;
                RefreshOutcome::Failed
            }
        }
    }

    async fn begin_refresh(&self) -> bool {
        let mut state = self.state.write().await;
        if state.disposed || state.refresh_in_progress {
            return false;
        }
        state.refresh_in_progress = true;
        true
    }

    // --- Error handling ---

    /// Classify a failure, show scope-specific help, and decide whether to retry.
    ///
    /// Only bulk refreshes retry. Each retry waits `attempt * base` and the
    /// counter resets once the ceiling is hit.
    pub async fn handle_request_error(&self, err: &SetupError, scope: ErrorScope) -> ErrorAction {
        let class = err.class();
        warn!("{} failed ({:?}): {}", scope, class, err);

        if scope == ErrorScope::Bulk {
            let attempt = {
                let mut state = self.state.write().await;
                if state.retry_attempts < self.timing.max_retry_attempts {
                    state.retry_attempts += 1;
                    Some(state.retry_attempts)
                } else {
                    state.retry_attempts = 0;
                    None
                }
            };

            if let Some(attempt) = attempt {
                let delay = self.timing.retry_delay(attempt);
                info!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    scope, delay, attempt, self.timing.max_retry_attempts
                );
                self.notifier.notify(Notice {
                    variant: NoticeVariant::Warning,
                    title: format!("Retrying {}", scope),
                    message: format!(
                        "{} Attempt {} of {} in {}s.",
                        err,
                        attempt,
                        self.timing.max_retry_attempts,
                        delay.as_secs_f64()
                    ),
                    duration: delay,
                });
                return ErrorAction::Retry { attempt, delay };
            }

            error!("{} failed after {} retries", scope, self.timing.max_retry_attempts);
            self.render_bulk_failure(err).await;
        }

        let help = render::troubleshooting(scope, class);
        self.view.show_troubleshooting(scope, &help);
        self.view.show_retry_action(scope);

        if !matches!(scope, ErrorScope::Step(_)) {
            self.notifier.notify(Notice {
                variant: NoticeVariant::Danger,
                title: help.title.clone(),
                message: err.to_string(),
                duration: Duration::from_millis(ERROR_TOAST_MS),
            });
        }

        ErrorAction::GiveUp
    }

    /// Steps with nothing better to show get an error indicator.
    async fn render_bulk_failure(&self, err: &SetupError) {
        let unknown: Vec<StepName> = {
            let state = self.state.read().await;
            StepName::ALL
                .into_iter()
                .filter(|step| !state.statuses.contains_key(step))
                .collect()
        };
        for step in unknown {
            let status = StepStatus::new(StatusKind::Error, format!("Unable to check: {}", err));
            self.view
                .render_step(step, &render::step_indicator(step, &status));
        }
    }

    /// Re-run the operation behind a retry action.
    pub async fn retry(&self, scope: ErrorScope) {
        self.view.clear_retry_action(scope);
        match scope {
            ErrorScope::Bulk => {
                self.refresh_all().await;
            }
            ErrorScope::Step(step) => {
                self.refresh_step(step).await;
            }
            ErrorScope::QueueTest => {
                self.test_queue_worker(QueueTestRequest {
                    delay: 0,
                    timeout: None,
                })
                .await;
            }
        }
    }

    // --- Queue worker test ---

    /// Dispatch a probe job and poll it until the worker finishes it or we give up.
    pub async fn test_queue_worker(&self, request: QueueTestRequest) -> QueueTestOutcome {
        {
            let mut state = self.state.write().await;
            if state.disposed || state.queue_test_in_progress {
                debug!("Queue test already in progress, ignoring request");
                return QueueTestOutcome::Skipped;
            }
            state.queue_test_in_progress = true;
        }

        self.view.clear_retry_action(ErrorScope::QueueTest);
        self.view.set_step_loading(StepName::QueueWorker, true);
        let outcome = self.run_queue_test(request).await;
        self.view.set_step_loading(StepName::QueueWorker, false);

        self.state.write().await.queue_test_in_progress = false;
        outcome
    }

    async fn run_queue_test(&self, request: QueueTestRequest) -> QueueTestOutcome {
        self.report(QueueTestPhase::Dispatching, "Dispatching test job...", None);

        let job_id = match self.backend.dispatch_test_job(request).await {
            Ok(id) => id,
            Err(e) => return self.fail_queue_test(e, None).await,
        };
        info!("Dispatched queue test job {}", job_id);

        self.poll_test_job(PollSession::new(job_id)).await
    }

    async fn poll_test_job(&self, mut session: PollSession) -> QueueTestOutcome {
        loop {
            if session.poll_count >= self.timing.max_poll_attempts {
                warn!(
                    "Queue test job {} still unfinished after {} polls",
                    session.job_id, session.poll_count
                );
                return self.fail_queue_test(SetupError::JobTimeout, Some(&session)).await;
            }
            session.poll_count += 1;

            let delay = match self.backend.test_job_status(&session.job_id).await {
                Ok(job) => {
                    session.consecutive_network_errors = 0;
                    let elapsed = session.elapsed();
                    debug!(
                        "Queue test job {} is {:?} (poll {}, {})",
                        session.job_id, job.status, session.poll_count, elapsed
                    );

                    match job.status {
                        JobState::Pending => self.report(
                            QueueTestPhase::Pending,
                            "Waiting for the queue worker to pick up the job...",
                            Some(elapsed),
                        ),
                        JobState::Processing => self.report(
                            QueueTestPhase::Processing,
                            "Queue worker is processing the job...",
                            Some(elapsed),
                        ),
                        JobState::Completed => {
                            return self.complete_queue_test(&session, job.processing_time).await
                        }
                        JobState::Failed => {
                            let message = job
                                .error_message
                                .unwrap_or_else(|| "no error message reported".to_string());
                            return self
                                .fail_queue_test(SetupError::JobFailure(message), Some(&session))
                                .await;
                        }
                        JobState::Timeout => {
                            return self
                                .fail_queue_test(SetupError::JobTimeout, Some(&session))
                                .await
                        }
                        JobState::Unknown => {
                            warn!(
                                "Queue test job {} reported an unknown state, ending session",
                                session.job_id
                            );
                            self.report(
                                QueueTestPhase::Pending,
                                "Waiting for the queue worker to pick up the job...",
                                Some(elapsed),
                            );
                            return QueueTestOutcome::Inconclusive;
                        }
                    }
                    self.timing.poll_interval
                }
                Err(e @ (SetupError::Transport(_) | SetupError::Timeout(_))) => {
                    session.consecutive_network_errors += 1;
                    if session.consecutive_network_errors > self.timing.poll_network_retry_limit {
                        error!(
                            "Giving up on queue test job {} after {} network errors",
                            session.job_id, session.consecutive_network_errors
                        );
                        return self.fail_queue_test(e, Some(&session)).await;
                    }
                    warn!(
                        "Polling queue test job {} failed ({}), retry {}/{}",
                        session.job_id,
                        e,
                        session.consecutive_network_errors,
                        self.timing.poll_network_retry_limit
                    );
                    self.timing.poll_network_retry_delay
                }
                Err(e) => return self.fail_queue_test(e, Some(&session)).await,
            };

            if !self.pause(delay).await {
                // The backend keeps running the job; we just stop asking.
                info!("Queue test polling for job {} cancelled", session.job_id);
                return QueueTestOutcome::Cancelled;
            }
        }
    }

    async fn complete_queue_test(
        &self,
        session: &PollSession,
        processing_time: Option<f64>,
    ) -> QueueTestOutcome {
        let message = match processing_time {
            Some(time) => format!(
                "Queue worker is functioning properly! Job completed in {}",
                render::format_processing_time(time)
            ),
            None => "Queue worker is functioning properly!".to_string(),
        };
        info!("Queue test job {} completed", session.job_id);

        self.report(QueueTestPhase::Completed, &message, Some(session.elapsed()));
        self.store_and_render(
            StepName::QueueWorker,
            StepStatus::new(StatusKind::Completed, message.clone()),
        )
        .await;
        self.notifier.notify(Notice {
            variant: NoticeVariant::Success,
            title: "Queue worker test passed".to_string(),
            message,
            duration: Duration::from_millis(SUCCESS_TOAST_MS),
        });

        QueueTestOutcome::Completed { processing_time }
    }

    async fn fail_queue_test(
        &self,
        err: SetupError,
        session: Option<&PollSession>,
    ) -> QueueTestOutcome {
        let elapsed = session.map(PollSession::elapsed);
        let (kind, phase, message) = match &err {
            SetupError::JobTimeout => (
                StatusKind::Timeout,
                QueueTestPhase::Timeout,
                format!(
                    "Queue worker did not process the test job in time ({})",
                    elapsed.as_deref().unwrap_or("0s")
                ),
            ),
            SetupError::JobFailure(_) => (StatusKind::Failed, QueueTestPhase::Failed, err.to_string()),
            _ => (StatusKind::Error, QueueTestPhase::Error, err.to_string()),
        };

        self.report(phase, &message, elapsed);
        self.store_and_render(StepName::QueueWorker, StepStatus::new(kind, message.clone()))
            .await;
        self.handle_request_error(&err, ErrorScope::QueueTest).await;

        match err {
            SetupError::JobTimeout => QueueTestOutcome::TimedOut,
            SetupError::JobFailure(message) => QueueTestOutcome::Failed(message),
            other => QueueTestOutcome::Abandoned(other.to_string()),
        }
    }

    fn report(&self, phase: QueueTestPhase, message: &str, elapsed: Option<String>) {
        self.view.render_queue_test(&QueueTestReport {
            phase,
            message: message.to_string(),
            elapsed,
        });
    }

    // --- Auto-refresh ---

    /// Start or stop the recurring bulk refresh. Never leaves more than one timer running.
    pub async fn toggle_auto_refresh(self: &Arc<Self>, enabled: bool) {
        let mut state = self.state.write().await;
        if let Some(handle) = state.auto_refresh_handle.take() {
            handle.abort();
        }

        state.auto_refresh_enabled = enabled && !state.disposed;
        if state.auto_refresh_enabled {
            let period = self.timing.auto_refresh_interval;
            state.auto_refresh_handle = Some(spawn_auto_refresh(Arc::downgrade(self), period));
            info!("Auto-refresh enabled every {:?}", period);
        } else {
            info!("Auto-refresh disabled");
        }
    }

    // --- Helpers ---

    async fn store_and_render(&self, step: StepName, status: StepStatus) {
        self.view
            .render_step(step, &render::step_indicator(step, &status));
        self.state.write().await.statuses.insert(step, status);
    }

    /// Sleep unless disposed first. Returns false when woken by dispose.
    async fn pause(&self, delay: Duration) -> bool {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return false;
        }
        tokio::select! {
            _ = sleep(delay) => true,
            _ = shutdown_rx.changed() => false,
        }
    }
}

/// The timer only holds a weak reference, so it never keeps a dropped controller alive.
fn spawn_auto_refresh(controller: Weak<StatusPollingController>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = IntervalStream::new(ticker);

        while ticks.next().await.is_some() {
            let Some(controller) = controller.upgrade() else {
                break;
            };
            if controller.is_refresh_in_progress().await {
                debug!("Auto-refresh tick skipped, refresh in progress");
                continue;
            }
            // Detached so disabling the timer never interrupts a refresh mid-flight
            tokio::spawn(async move {
                controller.refresh_all().await;
            });
        }
    })
}
