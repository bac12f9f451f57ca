use chrono::{DateTime, Local, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::render;
use crate::step::StepName;
use crate::view::{
    ErrorScope, Notice, NoticeVariant, Notifier, QueueTestReport, StatusView, StepIndicator,
    Troubleshooting,
};

/// Prints controller output to stdout and keeps the latest state for a summary table.
pub struct TerminalView {
    live: bool,
    board: Mutex<BTreeMap<StepName, StepIndicator>>,
    last_checked: Mutex<Option<DateTime<Utc>>>,
    pending_retries: Mutex<BTreeSet<RetryKey>>,
}

// ErrorScope has no ordering; keep retries in a stable order for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RetryKey {
    Bulk,
    Step(StepName),
    QueueTest,
}

impl From<ErrorScope> for RetryKey {
    fn from(scope: ErrorScope) -> Self {
        match scope {
            ErrorScope::Bulk => RetryKey::Bulk,
            ErrorScope::Step(step) => RetryKey::Step(step),
            ErrorScope::QueueTest => RetryKey::QueueTest,
        }
    }
}

impl From<RetryKey> for ErrorScope {
    fn from(key: RetryKey) -> Self {
        match key {
            RetryKey::Bulk => ErrorScope::Bulk,
            RetryKey::Step(step) => ErrorScope::Step(step),
            RetryKey::QueueTest => ErrorScope::QueueTest,
        }
    }
}

impl TerminalView {
    /// `live` prints every update as it happens; otherwise only `print_board` writes.
    pub fn new(live: bool) -> Self {
        Self {
            live,
            board: Mutex::new(BTreeMap::new()),
            last_checked: Mutex::new(None),
            pending_retries: Mutex::new(BTreeSet::new()),
        }
    }

    /// Operations the user can re-run with the retry command.
    pub fn pending_retries(&self) -> Vec<ErrorScope> {
        match self.pending_retries.lock() {
            Ok(set) => set.iter().copied().map(ErrorScope::from).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn print_board(&self) {
        println!("{}", self.board_text());
    }

    pub fn board_text(&self) -> String {
        let board = match self.board.lock() {
            Ok(board) => board.clone(),
            Err(_) => return String::new(),
        };

        let mut lines = Vec::new();
        for step in StepName::ALL {
            match board.get(&step) {
                Some(indicator) => {
                    lines.push(format_step_line(step, indicator));
                    if let Some(details) = &indicator.details {
                        for line in details.lines() {
                            lines.push(format!("      {}", line));
                        }
                    }
                }
                None => lines.push(format!("[ ] {:<14} not checked", step.display_name())),
            }
        }

        if let Ok(Some(at)) = self.last_checked.lock().map(|at| *at) {
            lines.push(render::format_last_checked(at.with_timezone(&Local)));
        }
        lines.join("\n")
    }

    fn print(&self, line: String) {
        if self.live {
            println!("{}", line);
        }
    }
}

fn format_step_line(step: StepName, indicator: &StepIndicator) -> String {
    format!(
        "[{}] {:<14} {} ({})",
        indicator.icon,
        step.display_name(),
        indicator.text,
        indicator.class
    )
}

impl StatusView for TerminalView {
    fn set_step_loading(&self, step: StepName, loading: bool) {
        if loading {
            self.print(format!("[…] {:<14} checking...", step.display_name()));
        }
    }

    fn render_step(&self, step: StepName, indicator: &StepIndicator) {
        if let Ok(mut board) = self.board.lock() {
            board.insert(step, indicator.clone());
        }
        self.print(format_step_line(step, indicator));
        if let Some(details) = &indicator.details {
            for line in details.lines() {
                self.print(format!("      {}", line));
            }
        }
    }

    fn set_last_checked(&self, at: DateTime<Utc>) {
        if let Ok(mut last) = self.last_checked.lock() {
            *last = Some(at);
        }
        self.print(render::format_last_checked(at.with_timezone(&Local)));
    }

    fn set_refresh_busy(&self, _busy: bool) {}

    fn render_queue_test(&self, report: &QueueTestReport) {
        match &report.elapsed {
            Some(elapsed) => self.print(format!("Queue test: {} [{}]", report.message, elapsed)),
            None => self.print(format!("Queue test: {}", report.message)),
        }
    }

    fn show_troubleshooting(&self, scope: ErrorScope, help: &Troubleshooting) {
        self.print(format!("Troubleshooting ({}): {}", scope, help.title));
        for tip in &help.tips {
            self.print(format!("  - {}", tip));
        }
    }

    fn show_retry_action(&self, scope: ErrorScope) {
        if let Ok(mut pending) = self.pending_retries.lock() {
            pending.insert(scope.into());
        }
        self.print(format!("Type 'y' to retry the {}", scope));
    }

    fn clear_retry_action(&self, scope: ErrorScope) {
        if let Ok(mut pending) = self.pending_retries.lock() {
            pending.remove(&scope.into());
        }
    }
}

impl Notifier for TerminalView {
    fn notify(&self, notice: Notice) {
        let tag = match notice.variant {
            NoticeVariant::Primary => "info",
            NoticeVariant::Success => "ok",
            NoticeVariant::Warning => "warn",
            NoticeVariant::Danger => "error",
        };
        self.print(format!("({}) {}: {}", tag, notice.title, notice.message));
    }
}

// --- Interactive commands ---

#[derive(Debug, Clone, PartialEq)]
pub enum WatchCommand {
    RefreshAll,
    RefreshStep(StepName),
    TestQueue,
    ToggleAutoRefresh,
    Retry,
    Board,
    Help,
    Quit,
}

pub const WATCH_HELP: &str = "Commands:
  r            refresh all steps
  s <step>     refresh one step (database, mail, google_drive, migrations, admin_user, queue_worker)
  t            test the queue worker
  a            toggle auto-refresh
  y            retry failed operations
  b            show the status board
  h            help
  q            quit";

pub fn parse_watch_command(line: &str) -> Result<WatchCommand, String> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default().to_ascii_lowercase();
    match command.as_str() {
        "r" | "refresh" => Ok(WatchCommand::RefreshAll),
        "s" | "step" => {
            let name = parts
                .next()
                .ok_or_else(|| "Usage: s <step>".to_string())?;
            name.parse::<StepName>()
                .map(WatchCommand::RefreshStep)
                .map_err(|e| e.to_string())
        }
        "t" | "test" => Ok(WatchCommand::TestQueue),
        "a" | "auto" => Ok(WatchCommand::ToggleAutoRefresh),
        "y" | "retry" => Ok(WatchCommand::Retry),
        "b" | "board" | "" => Ok(WatchCommand::Board),
        "h" | "help" | "?" => Ok(WatchCommand::Help),
        "q" | "quit" | "exit" => Ok(WatchCommand::Quit),
        other => Err(format!("Unknown command '{}', type h for help", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{StatusKind, StepStatus};

    #[test]
    fn parses_watch_commands() {
        assert_eq!(parse_watch_command("r"), Ok(WatchCommand::RefreshAll));
        assert_eq!(
            parse_watch_command("s google_drive"),
            Ok(WatchCommand::RefreshStep(StepName::GoogleDrive))
        );
        assert_eq!(parse_watch_command("  Q "), Ok(WatchCommand::Quit));
        assert_eq!(parse_watch_command(""), Ok(WatchCommand::Board));
        assert!(parse_watch_command("s").is_err());
        assert!(parse_watch_command("s redis").is_err());
        assert!(parse_watch_command("zzz").is_err());
    }

    #[test]
    fn board_lists_every_step() {
        let view = TerminalView::new(false);
        let status = StepStatus::new(StatusKind::Completed, "Connected");
        view.render_step(
            StepName::Database,
            &render::step_indicator(StepName::Database, &status),
        );

        let text = view.board_text();
        assert!(text.contains("Database"));
        assert!(text.contains("Connected (status-completed)"));
        assert!(text.contains("Queue Worker"));
        assert!(text.contains("not checked"));
    }

    #[test]
    fn retry_actions_are_tracked_until_cleared() {
        let view = TerminalView::new(false);
        view.show_retry_action(ErrorScope::QueueTest);
        view.show_retry_action(ErrorScope::Bulk);
        view.show_retry_action(ErrorScope::Bulk);

        assert_eq!(
            view.pending_retries(),
            vec![ErrorScope::Bulk, ErrorScope::QueueTest]
        );

        view.clear_retry_action(ErrorScope::Bulk);
        assert_eq!(view.pending_retries(), vec![ErrorScope::QueueTest]);
    }
}
