use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::error::FailureClass;
use crate::step::StepName;

/// What a single step indicator should show.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepIndicator {
    pub class: String,
    pub icon: &'static str,
    pub text: String,
    pub details: Option<String>,
}

/// Which operation a failure belongs to; also names what a retry re-runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", content = "step", rename_all = "snake_case")]
pub enum ErrorScope {
    Bulk,
    Step(StepName),
    QueueTest,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorScope::Bulk => f.write_str("status refresh"),
            ErrorScope::Step(step) => write!(f, "{} check", step.display_name()),
            ErrorScope::QueueTest => f.write_str("queue worker test"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Troubleshooting {
    pub class: FailureClass,
    pub title: String,
    pub tips: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueTestPhase {
    Dispatching,
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueTestReport {
    pub phase: QueueTestPhase,
    pub message: String,
    pub elapsed: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeVariant {
    Primary,
    Success,
    Warning,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub variant: NoticeVariant,
    pub title: String,
    pub message: String,
    pub duration: Duration,
}

/// Where the controller draws step state. Implementations own the layout.
pub trait StatusView: Send + Sync {
    fn set_step_loading(&self, step: StepName, loading: bool);

    fn render_step(&self, step: StepName, indicator: &StepIndicator);

    fn set_last_checked(&self, at: DateTime<Utc>);

    /// Busy state of the refresh-all control.
    fn set_refresh_busy(&self, busy: bool);

    fn render_queue_test(&self, report: &QueueTestReport);

    fn show_troubleshooting(&self, scope: ErrorScope, help: &Troubleshooting);

    /// Offer the user a way to re-run the operation behind `scope`.
    fn show_retry_action(&self, scope: ErrorScope);

    fn clear_retry_action(&self, scope: ErrorScope);
}

/// Transient toast notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}
