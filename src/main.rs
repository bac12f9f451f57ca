use anyhow::{anyhow, Context};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use setup_status::backend::{HttpBackend, QueueTestRequest};
use setup_status::config::{CliArgs, Command, MonitorConfig};
use setup_status::controller::{
    QueueTestOutcome, RefreshOutcome, SharedController, StatusPollingController,
};
use setup_status::settings::{default_settings_path, load_settings, save_settings};
use setup_status::step::StepName;
use setup_status::terminal::{parse_watch_command, TerminalView, WatchCommand, WATCH_HELP};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let guard = init_tracing(args.log_file.as_deref())?;

    let settings_path = args
        .settings_file
        .clone()
        .unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    let config = MonitorConfig::from_args(&args, settings_path)
        .with_context(|| format!("Invalid base URL: {}", args.base_url))?;

    info!("Starting setup-status v{}", env!("CARGO_PKG_VERSION"));
    info!("Backend: {}", config.base_url);

    let backend = HttpBackend::new(
        &config.base_url,
        config.csrf_token.clone(),
        config.timing.request_timeout,
    )?;
    let live = !matches!(args.command, Command::Status);
    let view = Arc::new(TerminalView::new(live));
    let controller: SharedController = Arc::new(StatusPollingController::new(
        Arc::new(backend),
        view.clone(),
        view.clone(),
        config.timing.clone(),
    ));

    settings.base_url = Some(config.base_url.to_string());
    save_settings(&config.settings_file, &settings);

    let code = match args.command {
        Command::Watch { .. } => {
            let auto_refresh =
                config.auto_refresh || settings.auto_refresh_enabled.unwrap_or(false);
            run_watch(&controller, &view, &config, auto_refresh).await?
        }
        command => {
            tokio::select! {
                code = run_once(&controller, &view, command) => code?,
                _ = shutdown_signal() => 130,
            }
        }
    };

    controller.dispose().await;
    drop(guard);

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "setup_status=info".into());

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow!("Log file path has no file name: {:?}", path))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

/// One-shot commands. Returns the process exit code.
async fn run_once(
    controller: &SharedController,
    view: &TerminalView,
    command: Command,
) -> anyhow::Result<i32> {
    match command {
        Command::Status => {
            controller.init(false).await;
            let outcome = controller.refresh_all().await;
            view.print_board();

            let unhealthy = controller.snapshot().await.unhealthy_steps();
            if outcome != RefreshOutcome::Refreshed || !unhealthy.is_empty() {
                return Ok(1);
            }
            Ok(0)
        }
        Command::Step { name } => {
            let step: StepName = name.parse()?;
            let outcome = controller.refresh_step(step).await;
            view.print_board();
            let healthy = controller
                .snapshot()
                .await
                .statuses
                .get(&step)
                .map(|s| s.status.is_healthy())
                .unwrap_or(false);
            Ok(if outcome == RefreshOutcome::Refreshed && healthy {
                0
            } else {
                1
            })
        }
        Command::TestQueue { delay, timeout } => {
            let outcome = controller
                .test_queue_worker(QueueTestRequest { delay, timeout })
                .await;
            Ok(match outcome {
                QueueTestOutcome::Completed { .. } => 0,
                _ => 1,
            })
        }
        Command::Watch { .. } => Err(anyhow!("watch is interactive")),
    }
}

async fn run_watch(
    controller: &SharedController,
    view: &Arc<TerminalView>,
    config: &MonitorConfig,
    auto_refresh: bool,
) -> anyhow::Result<i32> {
    controller.init(auto_refresh).await;
    println!("{}", WATCH_HELP);

    let initial = controller.clone();
    tokio::spawn(async move {
        initial.refresh_all().await;
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown_signal() => break,
        };
        let Some(line) = line else {
            break;
        };

        let command = match parse_watch_command(&line) {
            Ok(command) => command,
            Err(msg) => {
                println!("{}", msg);
                continue;
            }
        };

        // Spawned so a slow request never blocks input
        let task_controller = controller.clone();
        match command {
            WatchCommand::RefreshAll => {
                tokio::spawn(async move {
                    if task_controller.refresh_all().await == RefreshOutcome::Skipped {
                        println!("A refresh is already running");
                    }
                });
            }
            WatchCommand::RefreshStep(step) => {
                tokio::spawn(async move {
                    if task_controller.refresh_step(step).await == RefreshOutcome::Skipped {
                        println!("A refresh is already running");
                    }
                });
            }
            WatchCommand::TestQueue => {
                tokio::spawn(async move {
                    let outcome = task_controller
                        .test_queue_worker(QueueTestRequest {
                            delay: 0,
                            timeout: None,
                        })
                        .await;
                    if outcome == QueueTestOutcome::Skipped {
                        println!("A queue test is already running");
                    }
                });
            }
            WatchCommand::ToggleAutoRefresh => {
                let enabled = !controller.snapshot().await.auto_refresh_enabled;
                controller.toggle_auto_refresh(enabled).await;
                println!(
                    "Auto-refresh {}",
                    if enabled { "enabled" } else { "disabled" }
                );

                let mut settings = load_settings(&config.settings_file);
                settings.auto_refresh_enabled = Some(enabled);
                save_settings(&config.settings_file, &settings);
            }
            WatchCommand::Retry => {
                let scopes = view.pending_retries();
                if scopes.is_empty() {
                    println!("Nothing to retry");
                }
                for scope in scopes {
                    let task_controller = controller.clone();
                    tokio::spawn(async move {
                        task_controller.retry(scope).await;
                    });
                }
            }
            WatchCommand::Board => view.print_board(),
            WatchCommand::Help => println!("{}", WATCH_HELP),
            WatchCommand::Quit => break,
        }
    }

    let unhealthy = controller.snapshot().await.unhealthy_steps();
    if !unhealthy.is_empty() {
        warn!("Exiting with {} steps not yet healthy", unhealthy.len());
    }
    Ok(0)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
