//! waitmux - keep AI assistant sessions in tmux going across rate limits

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use tracing::info;
use waitmux_config::resolve_config;
use waitmux_daemon::{
    daemon_status, detect_blocked_panes, stop_daemon, DaemonConfig, RateLimitDaemon,
    ShutdownSignal, TmuxPaneSource, WaitError,
};
use waitmux_telemetry::{init_file_subscriber, init_subscriber};

mod commands;
mod format;

use commands::{Cli, Commands, DaemonCommands};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// How long `daemon start` waits for the detached daemon to claim the state file.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
const STARTUP_POLL: Duration = Duration::from_millis(100);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult {
    let resolved = resolve_config(cli.config.as_deref())?;
    let telemetry = resolved.config.telemetry.clone().with_verbose(cli.verbose);
    let config = DaemonConfig::from(&resolved.config.daemon);

    match cli.command {
        Commands::Status { json } => {
            init_subscriber(&telemetry);
            run_status(&config, json)
        }
        Commands::Detect { json } => {
            init_subscriber(&telemetry);
            run_detect(&config, json).await
        }
        Commands::Daemon { command } => match command {
            DaemonCommands::Start { foreground: true } => {
                init_subscriber(&telemetry);
                run_daemon(config).await
            }
            DaemonCommands::Start { foreground: false } => {
                init_subscriber(&telemetry);
                start_detached(&config, resolved.path.as_deref(), cli.verbose).await
            }
            DaemonCommands::Run => {
                init_file_subscriber(&telemetry, &config.log_file_path)?;
                run_daemon(config).await
            }
            DaemonCommands::Stop => {
                init_subscriber(&telemetry);
                run_stop(&config).await
            }
        },
    }
}

fn run_status(config: &DaemonConfig, json: bool) -> CliResult {
    let report = daemon_status(config);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", format::status_text(&report, Utc::now()));
    }
    Ok(())
}

async fn run_detect(config: &DaemonConfig, json: bool) -> CliResult {
    let source = available_source(config).await?;
    let panes = detect_blocked_panes(config, &source).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&panes)?);
    } else {
        println!("{}", format::detect_text(&panes, Utc::now()));
    }
    Ok(())
}

async fn available_source(config: &DaemonConfig) -> Result<TmuxPaneSource, WaitError> {
    let source = TmuxPaneSource::from_config(config);
    if !source.is_available().await {
        return Err(WaitError::ToolUnavailable(format!(
            "could not run '{}'",
            config.tmux_bin
        )));
    }
    Ok(source)
}

/// Run the poll loop in this process until SIGTERM or Ctrl-C.
async fn run_daemon(config: DaemonConfig) -> CliResult {
    let source = available_source(&config).await?;
    let mut daemon = RateLimitDaemon::new(config, source);
    daemon.start()?;

    let shutdown = ShutdownSignal::new();
    shutdown.install_signal_handlers()?;

    let state = daemon.run(shutdown).await?;
    info!(
        resumed = state.successful_resumes,
        attempts = state.total_resume_attempts,
        "Daemon exited"
    );
    Ok(())
}

/// Re-exec ourselves as `daemon run` in the background and wait until the
/// child has claimed the state file.
async fn start_detached(
    config: &DaemonConfig,
    config_path: Option<&Path>,
    verbose: bool,
) -> CliResult {
    let report = daemon_status(config);
    if report.is_running() {
        return Err(WaitError::AlreadyRunning {
            pid: report.state.pid.unwrap_or_default(),
        }
        .into());
    }
    available_source(config).await?;

    let mut cmd = Command::new(std::env::current_exe()?);
    if let Some(path) = config_path {
        cmd.arg("--config").arg(path);
    }
    if verbose {
        cmd.arg("--verbose");
    }
    cmd.args(["daemon", "run"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // Own process group so the terminal's Ctrl-C does not reach the daemon.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn()?;
    let pid = child.id();

    let deadline = Instant::now() + STARTUP_TIMEOUT;
    loop {
        let report = daemon_status(config);
        if report.is_running() && report.state.pid == Some(pid) {
            println!(
                "{} {}",
                "Daemon started with PID".green(),
                pid.to_string().yellow()
            );
            println!("{}: {}", "Log".cyan(), config.log_file_path.display());
            return Ok(());
        }

        if let Some(status) = child.try_wait()? {
            return Err(format!(
                "daemon exited during startup ({}); see {}",
                status,
                config.log_file_path.display()
            )
            .into());
        }
        if Instant::now() >= deadline {
            return Err(format!(
                "daemon (PID {}) did not report running within {}s; see {}",
                pid,
                STARTUP_TIMEOUT.as_secs(),
                config.log_file_path.display()
            )
            .into());
        }
        tokio::time::sleep(STARTUP_POLL).await;
    }
}

async fn run_stop(config: &DaemonConfig) -> CliResult {
    let before = daemon_status(config);
    let state = stop_daemon(config).await?;

    if before.is_running() {
        println!(
            "{} {}",
            "Daemon stopped".green(),
            format!("(PID {})", state.pid.unwrap_or_default()).dimmed()
        );
    } else if before.stale {
        println!("{}", "Daemon was not running; cleared stale state".yellow());
    } else {
        println!("{}", "Daemon is not running".dimmed());
    }
    Ok(())
}
