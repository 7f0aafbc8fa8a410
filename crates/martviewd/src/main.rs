//! martviewd — the martview daemon and CLI.
//!
//! One binary for every entry point into the refresh layer:
//! - one-shot refreshes (the cron entry point)
//! - validation passes, exports and retention
//! - the JSON API with a built-in refresh schedule
//!
//! # Usage
//!
//! ```text
//! martviewd --config /etc/martview/martview.toml refresh --concurrent
//! martviewd refresh --module sales
//! martviewd serve --port 8480
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use martview_api::{build_router, ApiState};
use martview_core::{LogConfig, MartviewConfig};
use martview_refresh::{RefreshBatch, RefreshRequest, RefreshTrigger};
use martviewd::{export_snapshot, forward_shutdown, App, RefreshSchedule};

#[derive(Parser)]
#[command(name = "martviewd", about = "martview refresh daemon")]
struct Cli {
    /// Path to martview.toml. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON regardless of config.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the source schema and register the view catalog.
    InitDb {
        /// Also load the demonstration dataset.
        #[arg(long)]
        sample: bool,
    },

    /// Refresh views once. Exits 0 whenever the batch completes.
    Refresh {
        /// Refresh only this module's views.
        #[arg(long, conflicts_with = "view")]
        module: Option<String>,

        /// Refresh these views, in the order given.
        #[arg(long)]
        view: Vec<String>,

        /// Rebuild snapshots without locking out readers.
        #[arg(long)]
        concurrent: bool,

        /// Recorded as the batch's `triggered_by`.
        #[arg(long, default_value = "cli")]
        triggered_by: String,
    },

    /// Run the data-quality checks.
    Check,

    /// Show recent refresh outcomes.
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show one view's freshness.
    Freshness { view: String },

    /// List registered views.
    Views,

    /// Write catalog, recent refreshes and open issues to a JSON file.
    Export {
        #[arg(long)]
        out: PathBuf,
    },

    /// Delete quality issues and operation log entries past retention.
    Prune,

    /// Serve the API and run the refresh schedule.
    Serve {
        /// Overrides `api.port`.
        #[arg(long)]
        port: Option<u16>,

        /// Serve the API without the refresh schedule.
        #[arg(long)]
        no_schedule: bool,
    },

    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MartviewConfig::from_file(path)?,
        None => MartviewConfig::default(),
    };
    init_tracing(&config.log, cli.json_logs);

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::InitDb { sample } => {
            let app = App::open(config)?;
            if sample {
                app.source.load_sample()?;
            }
            println!(
                "initialised {} views in {} modules",
                app.orchestrator.registry().len(),
                app.orchestrator.registry().modules().len()
            );
            Ok(())
        }
        Command::Refresh {
            module,
            view,
            concurrent,
            triggered_by,
        } => {
            let app = App::open(config)?;
            let concurrent = concurrent || app.config.refresh.concurrent;
            let trigger = RefreshTrigger::manual(triggered_by);
            let orchestrator = &app.orchestrator;
            let batch = if let Some(module) = module {
                orchestrator.refresh_module(&module, concurrent, trigger).await?
            } else if !view.is_empty() {
                let request = RefreshRequest {
                    scope: "custom".to_string(),
                    concurrent,
                    trigger,
                };
                orchestrator.refresh(&view, &request).await?
            } else {
                orchestrator.refresh_all(concurrent, trigger).await?
            };
            print_batch(&batch);
            Ok(())
        }
        Command::Check => {
            let app = App::open(config)?;
            let pass = app.orchestrator.run_quality_checks().await?;
            println!(
                "{} checks run, {} open issues, {} resolved, {} pruned, {} failed",
                pass.checks_run,
                pass.issues.len(),
                pass.resolved,
                pass.pruned,
                pass.failures.len()
            );
            for issue in &pass.issues {
                println!(
                    "  [{:?}] {} ({}): {}",
                    issue.severity, issue.check_name, issue.source, issue.description
                );
            }
            for failure in &pass.failures {
                println!("  [error] {}: {}", failure.check_name, failure.message);
            }
            Ok(())
        }
        Command::History { limit } => {
            let app = App::open(config)?;
            let history = app.orchestrator.get_refresh_history(limit)?;
            println!("{}", serde_json::to_string_pretty(&history)?);
            Ok(())
        }
        Command::Freshness { view } => {
            let app = App::open(config)?;
            let freshness = app.orchestrator.get_view_freshness(&view)?;
            println!("{}", serde_json::to_string_pretty(&freshness)?);
            Ok(())
        }
        Command::Views => {
            let app = App::open(config)?;
            let views = app.orchestrator.store().list_views()?;
            println!("{}", serde_json::to_string_pretty(&views)?);
            Ok(())
        }
        Command::Export { out } => {
            let app = App::open(config)?;
            let export = export_snapshot(&app.orchestrator, &out)?;
            println!(
                "exported {} views, {} refreshes, {} open issues to {}",
                export.views.len(),
                export.recent_refreshes.len(),
                export.open_issues.len(),
                out.display()
            );
            Ok(())
        }
        Command::Prune => {
            let app = App::open(config)?;
            let report = app.prune()?;
            println!(
                "pruned {} quality issues, {} operation log entries",
                report.quality_issues, report.operation_log
            );
            Ok(())
        }
        Command::Serve { port, no_schedule } => {
            let app = App::open(config)?;
            serve(app, port, no_schedule).await
        }
    }
}

fn init_tracing(log: &LogConfig, json_override: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json || json_override {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_batch(batch: &RefreshBatch) {
    println!("batch {}: {}", batch.batch_id, batch.summary());
    for outcome in &batch.outcomes {
        let rows = match (outcome.rows_before, outcome.rows_after) {
            (Some(before), Some(after)) => format!("{before} -> {after} rows"),
            (None, Some(after)) => format!("{after} rows"),
            _ => "-".to_string(),
        };
        println!(
            "  {:<28} {:<8} {:>7}ms  {}",
            outcome.view_name,
            format!("{:?}", outcome.status).to_lowercase(),
            outcome.duration_ms,
            outcome.error.as_deref().unwrap_or(&rows)
        );
    }
}

async fn serve(app: App, port: Option<u16>, no_schedule: bool) -> anyhow::Result<()> {
    info!("martview daemon starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let schedule_handle = if no_schedule {
        None
    } else {
        let schedule = RefreshSchedule::from_config(app.orchestrator.clone(), &app.config)?;
        Some(tokio::spawn(async move {
            schedule.run(shutdown_rx).await;
        }))
    };

    let router = build_router(ApiState {
        orchestrator: app.orchestrator.clone(),
        concurrent_default: app.config.refresh.concurrent,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(app.config.api.port)));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx))
        .await?;

    if let Some(handle) = schedule_handle {
        let _ = handle.await;
    }

    info!("martview daemon stopped");
    Ok(())
}
