use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One installation prerequisite tracked by the wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Database,
    Mail,
    GoogleDrive,
    Migrations,
    AdminUser,
    QueueWorker,
}

impl StepName {
    pub const ALL: [StepName; 6] = [
        StepName::Database,
        StepName::Mail,
        StepName::GoogleDrive,
        StepName::Migrations,
        StepName::AdminUser,
        StepName::QueueWorker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Database => "database",
            StepName::Mail => "mail",
            StepName::GoogleDrive => "google_drive",
            StepName::Migrations => "migrations",
            StepName::AdminUser => "admin_user",
            StepName::QueueWorker => "queue_worker",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            StepName::Database => "Database",
            StepName::Mail => "Mail",
            StepName::GoogleDrive => "Google Drive",
            StepName::Migrations => "Migrations",
            StepName::AdminUser => "Admin User",
            StepName::QueueWorker => "Queue Worker",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown setup step: {0}")]
pub struct UnknownStep(pub String);

impl FromStr for StepName {
    type Err = UnknownStep;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        StepName::ALL
            .into_iter()
            .find(|step| step.as_str() == normalized)
            .ok_or_else(|| UnknownStep(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Completed,
    Working,
    Idle,
    Incomplete,
    Error,
    Failed,
    Timeout,
    Checking,
    CannotVerify,
    NeedsAttention,
    NotTested,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Completed => "completed",
            StatusKind::Working => "working",
            StatusKind::Idle => "idle",
            StatusKind::Incomplete => "incomplete",
            StatusKind::Error => "error",
            StatusKind::Failed => "failed",
            StatusKind::Timeout => "timeout",
            StatusKind::Checking => "checking",
            StatusKind::CannotVerify => "cannot_verify",
            StatusKind::NeedsAttention => "needs_attention",
            StatusKind::NotTested => "not_tested",
        }
    }

    /// Class name the indicator carries, e.g. `status-completed`.
    pub fn class_name(&self) -> String {
        format!("status-{}", self.as_str())
    }

    /// States that mean the step needs no further action.
    pub fn is_healthy(&self) -> bool {
        matches!(self, StatusKind::Completed | StatusKind::Working | StatusKind::Idle)
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic fields the backend attaches to some steps.
///
/// Only the fields the renderer understands are named; everything else is
/// kept in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_jobs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_jobs: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepDetails {
    Text(String),
    Structured(StructuredDetails),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStatus {
    pub status: StatusKind,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<StepDetails>,
}

impl StepStatus {
    pub fn new(status: StatusKind, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    /// Placeholder for a step the bulk response said nothing about.
    pub fn no_data() -> Self {
        Self::new(StatusKind::Error, "No Data")
    }

    pub fn with_details(mut self, details: StepDetails) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_step_names_leniently() {
        assert_eq!("database".parse::<StepName>(), Ok(StepName::Database));
        assert_eq!("Google-Drive".parse::<StepName>(), Ok(StepName::GoogleDrive));
        assert_eq!(" admin_user ".parse::<StepName>(), Ok(StepName::AdminUser));
        assert!("redis".parse::<StepName>().is_err());
    }

    #[test]
    fn step_names_match_wire_format() {
        for step in StepName::ALL {
            let encoded = serde_json::to_value(step).unwrap();
            assert_eq!(encoded, json!(step.as_str()));
        }
    }

    #[test]
    fn status_class_names() {
        assert_eq!(StatusKind::Completed.class_name(), "status-completed");
        assert_eq!(StatusKind::CannotVerify.class_name(), "status-cannot_verify");
        assert_eq!(StatusKind::NotTested.class_name(), "status-not_tested");
    }

    #[test]
    fn deserializes_text_details() {
        let status: StepStatus = serde_json::from_value(json!({
            "status": "incomplete",
            "message": "Mail not configured",
            "details": "MAIL_HOST is empty"
        }))
        .unwrap();

        assert_eq!(status.status, StatusKind::Incomplete);
        assert_eq!(
            status.details,
            Some(StepDetails::Text("MAIL_HOST is empty".to_string()))
        );
    }

    #[test]
    fn deserializes_structured_details_and_keeps_unknown_fields() {
        let status: StepStatus = serde_json::from_value(json!({
            "status": "error",
            "message": "Connection refused",
            "details": {
                "scenario": "connection_refused",
                "host": "db.internal",
                "port": 5432,
                "ssl": true
            }
        }))
        .unwrap();

        let Some(StepDetails::Structured(details)) = status.details else {
            panic!("expected structured details");
        };
        assert_eq!(details.scenario.as_deref(), Some("connection_refused"));
        assert_eq!(details.host.as_deref(), Some("db.internal"));
        assert_eq!(details.port, Some(json!(5432)));
        assert_eq!(details.extra.get("ssl"), Some(&json!(true)));
    }

    #[test]
    fn null_details_and_missing_message() {
        let status: StepStatus =
            serde_json::from_value(json!({"status": "checking", "details": null})).unwrap();
        assert_eq!(status.status, StatusKind::Checking);
        assert!(status.message.is_empty());
        assert!(status.details.is_none());
    }

    #[test]
    fn healthy_states() {
        assert!(StatusKind::Completed.is_healthy());
        assert!(StatusKind::Idle.is_healthy());
        assert!(!StatusKind::NeedsAttention.is_healthy());
        assert!(!StatusKind::Timeout.is_healthy());
    }
}
