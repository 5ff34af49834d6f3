use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use botprobe::auth::TerminalOperator;
use botprobe::cli::{Cli, Command, RunTarget};
use botprobe::config::{self, ProjectConfig};
use botprobe::orchestrator::{PlatformReport, ProbeRequest, ReportStatus, Runner};
use botprobe::paths;
use botprobe::session::SessionStore;
use botprobe::surface::webdriver::WebDriverFactory;
use botprobe::{server, shell_completion};

fn open_runner(config: ProjectConfig, state_dir: &Path) -> Result<Runner> {
    let factory = Arc::new(WebDriverFactory::new(config.webdriver.clone()));
    Runner::open(config, state_dir, factory)
        .with_context(|| format!("failed to open state directory {}", state_dir.display()))
}

fn print_report(report: &PlatformReport) {
    match &report.status {
        ReportStatus::Success { passed, failed } => println!(
            "[{}] Type {} : Passed: {passed}, Failed: {failed}",
            report.platform, report.response_type
        ),
        ReportStatus::Error { error, details, .. } => println!(
            "[{}] Type {} : {error} ({details})",
            report.platform, report.response_type
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_quiet_command = matches!(
        &cli.command,
        Command::Config { .. } | Command::Completions { .. }
    );

    let filter = match cli.verbose {
        0 if is_quiet_command => "botprobe=warn",
        0 => "botprobe=info",
        1 => "botprobe=debug",
        _ => "botprobe=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ProjectConfig::load(&cwd)?;

    match config_path {
        Some(ref p) => info!("loaded config from {}", p.display()),
        None => info!("no .botprobe/config.toml found, using defaults"),
    }

    let state_dir =
        paths::resolve_state_dir(&config.paths.state_dir, config_path.as_deref(), &cwd);

    match cli.command {
        Command::Run {
            platform,
            target,
            probe,
        } => {
            let runner = open_runner(config, &state_dir)?;
            let mut operator = TerminalOperator::new(runner.config().auth.answer_timeout());

            match RunTarget::parse(&target) {
                RunTarget::Login => {
                    runner
                        .login(platform, &mut operator)
                        .with_context(|| format!("login failed on {platform}"))?;
                    println!("Logged in, session saved");
                }
                RunTarget::Probe(response_type) => {
                    let stop = Arc::new(AtomicBool::new(false));
                    let stop_clone = stop.clone();
                    ctrlc::set_handler(move || {
                        stop_clone.store(true, Ordering::Relaxed);
                    })
                    .ok();

                    let mut request = ProbeRequest::new(platform, response_type);
                    request.probe_input = probe;
                    let result = runner
                        .probe(&request, &mut operator, &stop)
                        .with_context(|| {
                            format!("type {} run failed on {platform}", request.response_type)
                        })?;
                    println!(
                        "Passed: {}, Failed: {}",
                        result.success_count, result.failed_count
                    );
                }
            }
        }
        Command::Trigger {
            response_type,
            json,
        } => {
            let runner = open_runner(config, &state_dir)?;
            let timeout = runner.config().server.run_timeout();
            let reports = runner.fan_out(&response_type, timeout);

            if json {
                let payload = serde_json::json!({ "type": response_type, "results": &reports });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to serialize reports")?
                );
            } else {
                reports.iter().for_each(print_report);
            }

            let failed = reports.iter().filter(|r| !r.is_success()).count();
            if failed > 0 {
                anyhow::bail!("{failed} of {} platform runs failed", reports.len());
            }
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let runner = open_runner(config, &state_dir)?;
            server::serve(Arc::new(runner), &bind).await?;
        }
        Command::Logout { platform } => {
            let store = SessionStore::new(paths::sessions_dir(&state_dir));
            let removed = store
                .remove(platform)
                .with_context(|| format!("failed to remove session for {platform}"))?;
            if removed {
                println!("Removed saved session for {platform}");
            } else {
                println!("No saved session for {platform}");
            }
        }
        Command::Config { json } => {
            if json {
                println!("{}", config::render::json(&config, config_path.as_deref())?);
            } else {
                print!("{}", config::render::human(&config, config_path.as_deref()));
            }
        }
        Command::Completions { shell } => {
            shell_completion::print(shell)?;
        }
    }

    Ok(())
}
