//! SSPM reconciler
//!
//! Operator entry point for the discovery engine: runs a reconciliation
//! pass against PostgreSQL, prints connector health, or applies migrations.

mod config;
mod logging;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use sspm_db::{run_migrations, DbPool, PgBindingAuditStore, PgConnectorRegistry, PgDiscoveryStore};
use sspm_discovery::{
    DiscoveryService, DiscoveryServiceDeps, HealthOverview, PassReport, PrometheusMetricsSink,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "sspm-reconciler", version, about = "SaaS discovery reconciliation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one reconciliation pass over every discovered app.
    Reconcile {
        /// Print the Prometheus text exposition after the pass.
        #[arg(long)]
        print_metrics: bool,
    },
    /// Evaluate and print connector health.
    Health {
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Apply pending database migrations.
    Migrate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.log_filter);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        failure_policy = ?config.discovery.failure_policy,
        repository_timeout_secs = config.discovery.repository_timeout_secs,
        "Starting sspm-reconciler"
    );

    if let Err(e) = run(cli.command, config).await {
        tracing::error!(error = %format!("{e:#}"), "sspm-reconciler failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    let pool = DbPool::connect_with(&config.database_url, config.pool)
        .await
        .context("Failed to connect to database")?;

    if matches!(command, Command::Migrate) {
        run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;
        info!("Migrations applied");
        return Ok(());
    }

    let metrics = Arc::new(PrometheusMetricsSink::new());
    let store = Arc::new(PgDiscoveryStore::new(pool.clone()));
    let service = DiscoveryService::new(
        DiscoveryServiceDeps {
            registry: Arc::new(PgConnectorRegistry::new(pool.clone())),
            repository: store.clone(),
            bindings: store,
            audit: Arc::new(PgBindingAuditStore::new(pool)),
            metrics: metrics.clone(),
        },
        config.discovery,
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    match command {
        Command::Reconcile { print_metrics } => {
            let report = service
                .recompute_posture(&cancel)
                .await
                .context("Reconciliation pass failed")?;
            print_pass_report(&report);
            if print_metrics {
                let text = metrics.encode().context("Failed to encode metrics")?;
                print!("{text}");
            }
        }
        Command::Health { json } => {
            let overview = service
                .connector_health(&cancel)
                .await
                .context("Failed to evaluate connector health")?;
            if json {
                let body = serde_json::to_string_pretty(&overview)
                    .context("Failed to serialize connector health")?;
                println!("{body}");
            } else {
                print_health_table(&overview);
            }
        }
        Command::Migrate => {}
    }

    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match signal::ctrl_c().await {
        Ok(()) => {
            warn!("Received Ctrl+C, cancelling");
            cancel.cancel();
        }
        Err(e) => tracing::error!("Failed to install Ctrl+C handler: {e}"),
    }
}

fn print_pass_report(report: &PassReport) {
    println!(
        "apps={} reconciled={} managed={} unmanaged={} high_risk={} failures={} elapsed={:?}",
        report.apps_total,
        report.apps_reconciled,
        report.managed,
        report.unmanaged,
        report.high_risk,
        report.failures.len(),
        report.elapsed,
    );
    for failure in &report.failures {
        println!("  failed {} ({}): {}", failure.app_id, failure.display_name, failure.error);
    }
}

fn print_health_table(overview: &HealthOverview) {
    println!(
        "{:<18} {:<24} {:<15} {:<12} {:<12} {:<8} {:<8}",
        "CONNECTOR", "SOURCE", "STATUS", "LAST OK", "LAST RUN", "SUCCESS", "AVG"
    );
    for report in &overview.reports {
        let health = &report.health;
        println!(
            "{:<18} {:<24} {:<15} {:<12} {:<12} {:<8} {:<8}",
            report.display_name,
            report.source_name,
            health.status.as_str(),
            health.last_success_label,
            health.last_run_label,
            health.success_rate_label,
            health.avg_duration_label,
        );
    }
    let summary = overview.summary;
    println!(
        "total={} enabled={} healthy={} needs_attention={}",
        summary.total, summary.enabled, summary.healthy, summary.needs_attention
    );
}
