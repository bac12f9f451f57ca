use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Watch a setup wizard's installation steps from the terminal.
#[derive(Parser, Debug, Clone)]
#[command(name = "setup-status", version)]
pub struct CliArgs {
    /// Base URL of the application running the setup wizard
    #[arg(
        short = 'u',
        long = "base-url",
        env = "SETUP_STATUS_BASE_URL",
        default_value = DEFAULT_BASE_URL
    )]
    pub base_url: String,

    /// CSRF token to send with requests (discovered from the setup page when omitted)
    #[arg(long = "csrf-token", env = "SETUP_STATUS_CSRF_TOKEN")]
    pub csrf_token: Option<String>,

    /// Client-side deadline for every HTTP request
    #[arg(
        long = "timeout-secs",
        default_value_t = REQUEST_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout_secs: u64,

    /// Write logs to this file instead of stderr
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Override the location of the persisted settings file
    #[arg(long = "settings-file")]
    pub settings_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Refresh every step once and print the result
    Status,
    /// Refresh a single step
    Step {
        /// One of: database, mail, google_drive, migrations, admin_user, queue_worker
        name: String,
    },
    /// Dispatch a probe job and wait for the queue worker to process it
    TestQueue {
        /// Seconds the probe job should wait before running
        #[arg(long, default_value_t = 0)]
        delay: u64,
        /// Server-side timeout for the probe job, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Interactive mode with keyboard commands and optional auto-refresh
    Watch {
        /// Start with auto-refresh enabled
        #[arg(short = 'a', long = "auto-refresh")]
        auto_refresh: bool,
    },
}

pub struct MonitorConfig {
    pub base_url: Url,
    pub csrf_token: Option<String>,
    pub timing: Timing,
    pub auto_refresh: bool,
    pub log_file: Option<PathBuf>,
    pub settings_file: PathBuf,
}

// Backend constants
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const CSRF_PAGE_PATH: &str = "/setup";
pub const REFRESH_ALL_PATH: &str = "/setup/status/refresh";
pub const REFRESH_STEP_PATH: &str = "/setup/status/refresh-step";
pub const QUEUE_TEST_PATH: &str = "/setup/queue/test";
pub const QUEUE_TEST_STATUS_PATH: &str = "/setup/queue/test/status";
pub const QUEUE_WORKER_STATUS_PATH: &str = "/setup/queue-worker/status";

// Request constants
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
pub const RETRY_BASE_DELAY_MS: u64 = 2000;
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

// Queue test polling constants
pub const POLL_INTERVAL_MS: u64 = 1000;
pub const MAX_POLL_ATTEMPTS: u32 = 30; // ~30s wall clock
pub const POLL_NETWORK_RETRY_LIMIT: u32 = 3;
pub const POLL_NETWORK_RETRY_DELAY_MS: u64 = 2000;

// Auto-refresh constants
pub const AUTO_REFRESH_INTERVAL_SECS: u64 = 30;

// Notification constants
pub const SUCCESS_TOAST_MS: u64 = 3000;
pub const ERROR_TOAST_MS: u64 = 8000;

/// Every delay and ceiling the controller uses. Tests shrink these.
#[derive(Debug, Clone)]
pub struct Timing {
    pub request_timeout: Duration,
    pub retry_base_delay: Duration,
    pub max_retry_attempts: u32,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub poll_network_retry_limit: u32,
    pub poll_network_retry_delay: Duration,
    pub auto_refresh_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_retry_attempts: MAX_RETRY_ATTEMPTS,
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            max_poll_attempts: MAX_POLL_ATTEMPTS,
            poll_network_retry_limit: POLL_NETWORK_RETRY_LIMIT,
            poll_network_retry_delay: Duration::from_millis(POLL_NETWORK_RETRY_DELAY_MS),
            auto_refresh_interval: Duration::from_secs(AUTO_REFRESH_INTERVAL_SECS),
        }
    }
}

impl Timing {
    /// Backoff before retry number `attempt` (1-based): `attempt * base`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay * attempt
    }
}

impl MonitorConfig {
    pub fn from_args(args: &CliArgs, settings_file: PathBuf) -> Result<Self, url::ParseError> {
        let base_url = Url::parse(args.base_url.trim_end_matches('/'))?;
        let auto_refresh = matches!(args.command, Command::Watch { auto_refresh: true });

        let timing = Timing {
            request_timeout: Duration::from_secs(args.timeout_secs),
            ..Timing::default()
        };

        Ok(MonitorConfig {
            base_url,
            csrf_token: args.csrf_token.clone(),
            timing,
            auto_refresh,
            log_file: args.log_file.clone(),
            settings_file,
        })
    }
}
