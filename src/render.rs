use chrono::{DateTime, Local};
use std::time::Duration;

use crate::backend::CachedQueueWorker;
use crate::error::FailureClass;
use crate::step::{StatusKind, StepDetails, StepName, StepStatus, StructuredDetails};
use crate::view::{ErrorScope, StepIndicator, Troubleshooting};

pub fn status_icon(kind: StatusKind) -> &'static str {
    match kind {
        StatusKind::Completed | StatusKind::Working => "✔",
        StatusKind::Idle => "○",
        StatusKind::Incomplete | StatusKind::NotTested => "◌",
        StatusKind::Error | StatusKind::Failed => "✘",
        StatusKind::Timeout => "⌛",
        StatusKind::Checking => "…",
        StatusKind::CannotVerify => "?",
        StatusKind::NeedsAttention => "!",
    }
}

pub fn step_indicator(step: StepName, status: &StepStatus) -> StepIndicator {
    StepIndicator {
        class: status.status.class_name(),
        icon: status_icon(status.status),
        text: status.message.clone(),
        details: status
            .details
            .as_ref()
            .and_then(|details| details_text(step, details)),
    }
}

pub fn details_text(step: StepName, details: &StepDetails) -> Option<String> {
    match details {
        StepDetails::Text(text) if text.trim().is_empty() => None,
        StepDetails::Text(text) => Some(text.clone()),
        StepDetails::Structured(details) => {
            let text = match step {
                StepName::Database => database_details(details),
                StepName::QueueWorker => queue_details(details),
                _ => generic_details(details),
            };
            (!text.is_empty()).then_some(text)
        }
    }
}

/// Guidance for the database scenarios the wizard reports.
pub fn database_scenario_hint(scenario: &str) -> &'static str {
    match scenario {
        "connection_refused" | "connection_failed" => {
            "The database server refused the connection. Check that it is running and that DB_HOST and DB_PORT are correct."
        }
        "access_denied" | "authentication_failed" => {
            "The database rejected the credentials. Check DB_USERNAME and DB_PASSWORD."
        }
        "database_missing" | "unknown_database" => {
            "The server is reachable but the database does not exist. Create it or fix DB_DATABASE."
        }
        "tables_missing" | "empty_database" => {
            "Connected, but the schema is empty. Run the migrations step."
        }
        "driver_missing" => "The PHP extension for this database driver is not installed.",
        "connected" => "Connection established.",
        _ => "Review the database settings in your environment file.",
    }
}

fn database_details(details: &StructuredDetails) -> String {
    let mut lines = Vec::new();

    if let Some(scenario) = details.scenario.as_deref() {
        lines.push(database_scenario_hint(scenario).to_string());
    }

    let mut target = String::new();
    if let Some(driver) = details.driver.as_deref().or(details.connection.as_deref()) {
        target.push_str(driver);
        target.push_str("://");
    }
    if let Some(host) = details.host.as_deref() {
        target.push_str(host);
    }
    if let Some(port) = &details.port {
        match port {
            serde_json::Value::String(p) => target.push_str(&format!(":{}", p)),
            other => target.push_str(&format!(":{}", other)),
        }
    }
    if let Some(database) = details.database.as_deref() {
        target.push('/');
        target.push_str(database);
    }
    if !target.is_empty() {
        lines.push(format!("Target: {}", target));
    }
    if let Some(version) = details.version.as_deref() {
        lines.push(format!("Server version: {}", version));
    }
    if let Some(error) = details.error.as_deref() {
        lines.push(format!("Error: {}", error));
    }

    lines.join("\n")
}

fn queue_details(details: &StructuredDetails) -> String {
    let mut parts = Vec::new();
    if let Some(pending) = details.pending_jobs {
        parts.push(format!("{} pending", pending));
    }
    if let Some(failed) = details.failed_jobs {
        parts.push(format!("{} failed", failed));
    }
    let mut text = if parts.is_empty() {
        String::new()
    } else {
        format!("Jobs: {}", parts.join(", "))
    };
    if let Some(error) = details.error.as_deref() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!("Error: {}", error));
    }
    text
}

fn generic_details(details: &StructuredDetails) -> String {
    let mut lines: Vec<String> = details
        .error
        .iter()
        .map(|e| format!("Error: {}", e))
        .collect();
    for (key, value) in &details.extra {
        match value {
            serde_json::Value::Null => {}
            serde_json::Value::String(s) => lines.push(format!("{}: {}", key, s)),
            other => lines.push(format!("{}: {}", key, other)),
        }
    }
    lines.join("\n")
}

/// Wall-clock elapsed time, e.g. `7s` or `1m 05s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else {
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

pub fn format_processing_time(seconds: f64) -> String {
    format!("{:.2}s", seconds)
}

pub fn format_last_checked(at: DateTime<Local>) -> String {
    format!("Last checked: {}", at.format("%H:%M:%S"))
}

/// Render the backend's remembered queue worker result as a step status.
pub fn cached_queue_worker_status(cached: &CachedQueueWorker) -> StepStatus {
    let kind = cached.status_kind();
    let when = cached
        .test_completed_at
        .as_deref()
        .map(|raw| match DateTime::parse_from_rfc3339(raw) {
            Ok(at) => at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
            Err(_) => raw.to_string(),
        });

    let message = match kind {
        StatusKind::Completed | StatusKind::Working => {
            let mut message = "Queue worker is functioning properly".to_string();
            if let Some(time) = cached.processing_time {
                message.push_str(&format!(
                    " (job completed in {})",
                    format_processing_time(time)
                ));
            }
            message
        }
        StatusKind::Failed | StatusKind::Error => format!(
            "Last queue test failed: {}",
            cached
                .error_message
                .as_deref()
                .unwrap_or("no error message recorded")
        ),
        StatusKind::Timeout => "Last queue test timed out".to_string(),
        StatusKind::NotTested => "Queue worker has not been tested yet".to_string(),
        other => format!("Queue worker status: {}", other),
    };

    let status = StepStatus::new(kind, message);
    match when {
        Some(when) => status.with_details(StepDetails::Text(format!("Last tested: {}", when))),
        None => status,
    }
}

pub fn troubleshooting(scope: ErrorScope, class: FailureClass) -> Troubleshooting {
    let title = match class {
        FailureClass::DispatchError => "Could not dispatch the test job".to_string(),
        FailureClass::NetworkError => "Could not reach the server".to_string(),
        FailureClass::TimeoutError => format!("The {} timed out", scope),
        FailureClass::GenericError => format!("The {} failed", scope),
    };

    let mut tips: Vec<&'static str> = match class {
        FailureClass::DispatchError => vec![
            "Check QUEUE_CONNECTION in your environment file",
            "Make sure the jobs table exists (run the migrations step)",
        ],
        FailureClass::NetworkError => vec![
            "Check that the application server is running",
            "Verify the base URL and your network connection",
        ],
        FailureClass::TimeoutError => vec![
            "The server is responding slowly; try again in a moment",
            "Check the application logs for long-running requests",
        ],
        FailureClass::GenericError => vec!["Check the application logs for details"],
    };

    tips.extend(scope_tips(scope, class));
    Troubleshooting { class, title, tips }
}

fn scope_tips(scope: ErrorScope, class: FailureClass) -> Vec<&'static str> {
    match scope {
        ErrorScope::Bulk => vec!["Refresh the page session if the CSRF token has expired"],
        ErrorScope::QueueTest => match class {
            FailureClass::TimeoutError => vec![
                "Start a worker with `php artisan queue:work`",
                "Check that the worker is listening on the default queue",
            ],
            _ => vec!["Start a worker with `php artisan queue:work`"],
        },
        ErrorScope::Step(step) => match step {
            StepName::Database => vec!["Verify DB_HOST, DB_PORT, DB_DATABASE and credentials"],
            StepName::Mail => vec!["Verify MAIL_MAILER, MAIL_HOST and MAIL_PORT"],
            StepName::GoogleDrive => {
                vec!["Reconnect the Google account and check the OAuth client credentials"]
            }
            StepName::Migrations => vec!["Run `php artisan migrate --force`"],
            StepName::AdminUser => vec!["Create the administrator account from the wizard"],
            StepName::QueueWorker => vec!["Start a worker with `php artisan queue:work`"],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn indicator_uses_message_and_status_class() {
        let status = StepStatus::new(StatusKind::Completed, "Connected to mysql");
        let indicator = step_indicator(StepName::Database, &status);

        assert_eq!(indicator.class, "status-completed");
        assert_eq!(indicator.text, "Connected to mysql");
        assert_eq!(indicator.icon, "✔");
        assert!(indicator.details.is_none());
    }

    #[test]
    fn database_details_follow_scenario() {
        let details: StructuredDetails = serde_json::from_value(json!({
            "scenario": "access_denied",
            "driver": "mysql",
            "host": "127.0.0.1",
            "port": 3306,
            "database": "app"
        }))
        .unwrap();

        let text = details_text(StepName::Database, &StepDetails::Structured(details)).unwrap();
        assert!(text.contains("DB_USERNAME"));
        assert!(text.contains("Target: mysql://127.0.0.1:3306/app"));
    }

    #[test]
    fn queue_details_show_job_counts() {
        let details = StructuredDetails {
            pending_jobs: Some(4),
            failed_jobs: Some(1),
            ..Default::default()
        };
        let text = details_text(StepName::QueueWorker, &StepDetails::Structured(details));
        assert_eq!(text.as_deref(), Some("Jobs: 4 pending, 1 failed"));
    }

    #[test]
    fn empty_details_render_nothing() {
        assert!(details_text(StepName::Mail, &StepDetails::Text("  ".into())).is_none());
        assert!(details_text(
            StepName::Mail,
            &StepDetails::Structured(StructuredDetails::default())
        )
        .is_none());
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_millis(900)), "0s");
        assert_eq!(format_elapsed(Duration::from_secs(42)), "42s");
        assert_eq!(format_elapsed(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_processing_time(1.23), "1.23s");
        assert_eq!(format_processing_time(0.5), "0.50s");
    }

    #[test]
    fn cached_queue_worker_rendering() {
        let cached = CachedQueueWorker {
            status: Some("completed".into()),
            test_completed_at: Some("not a timestamp".into()),
            processing_time: Some(0.42),
            error_message: None,
        };
        let status = cached_queue_worker_status(&cached);
        assert_eq!(status.status, StatusKind::Completed);
        assert!(status.message.contains("0.42s"));
        assert_eq!(
            status.details,
            Some(StepDetails::Text("Last tested: not a timestamp".into()))
        );

        let never = CachedQueueWorker {
            status: Some("not_tested".into()),
            test_completed_at: None,
            processing_time: None,
            error_message: None,
        };
        let status = cached_queue_worker_status(&never);
        assert_eq!(status.status, StatusKind::NotTested);
        assert!(status.details.is_none());
    }

    #[test]
    fn troubleshooting_is_scope_specific() {
        let help = troubleshooting(ErrorScope::QueueTest, FailureClass::TimeoutError);
        assert_eq!(help.title, "The queue worker test timed out");
        assert!(help.tips.iter().any(|t| t.contains("queue:work")));

        let help = troubleshooting(ErrorScope::Step(StepName::Mail), FailureClass::NetworkError);
        assert_eq!(help.title, "Could not reach the server");
        assert!(help.tips.iter().any(|t| t.contains("MAIL_HOST")));
    }
}
