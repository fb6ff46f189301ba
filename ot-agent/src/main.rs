//! OtterTune Agent
//!
//! Long-lived telemetry daemon: builds the driver configuration, registers
//! one scheduled job per enabled collection pipeline plus the health
//! heartbeat, and runs until SIGINT/SIGTERM.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use ot_agent::config::{Args, DriverConfig, DriverConfigBuilder, Overrides};
use ot_agent::heartbeat;
use ot_agent::scheduler::{Scheduler, register_jobs};
use ot_cloud::RdsClient;
use ot_collector::get_collector;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = format!("ot_agent={0},ot_collector={0},ot_sink={0},ot_cloud={0},ot_core={0}", args.log_verbosity.to_lowercase());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = ot_core::AGENT_VERSION, "starting OtterTune agent");

    let config = build_config(&args).await.context("startup validation failed")?;
    tracing::info!(
        db_identifier = %config.db_identifier,
        db_type = config.db_type.as_str(),
        db_version = %config.db_version,
        "driver configuration built"
    );

    report_collection_permissions(&config).await;

    let agent_starttime = Utc::now();
    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(shutdown.clone());
    register_jobs(&scheduler, &config).await?;
    let heartbeat_task =
        heartbeat::spawn_heartbeat_job(config.clone(), agent_starttime, shutdown.clone());

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, letting in-flight ticks finish");
    shutdown.cancel();
    scheduler.shutdown_and_wait().await;
    if let Err(err) = heartbeat_task.await {
        tracing::warn!(%err, "heartbeat task did not shut down cleanly");
    }

    heartbeat::send_heartbeat(&config, agent_starttime, true).await;
    tracing::info!("agent shutdown complete");
    Ok(())
}

/// Fuse the configuration layers in their fixed order:
/// file, RDS discovery, cloud-metrics catalog, CLI, environment, overrides.
async fn build_config(args: &Args) -> anyhow::Result<DriverConfig> {
    let sdk = ot_cloud::sdk_config(&args.aws_region).await;
    let rds = RdsClient::new(&sdk);
    let overrides = Overrides::from_args(args);

    let builder = DriverConfigBuilder::new()
        .from_file(&args.config)?
        .from_rds(&rds, &args.db_identifier)
        .await?
        .from_cloudwatch_metrics()?
        .from_command_line(args)
        .from_env()
        .from_overrides(&overrides);
    Ok(builder.get_config()?)
}

/// Run the permission probes once at startup and log the outcome. Denied
/// queries are reported with an example GRANT; they never stop the agent.
async fn report_collection_permissions(config: &DriverConfig) {
    let conn = match ot_agent::pipeline::connection_config(config).await {
        Ok(conn) => conn,
        Err(err) => {
            tracing::warn!(%err, "could not resolve connection credentials");
            return;
        }
    };
    match get_collector(&conn).await {
        Ok(mut collector) => {
            match collector.check_permission().await {
                Ok(check) if check.success => {
                    tracing::info!("all collector queries are permitted");
                }
                Ok(check) => {
                    tracing::warn!(
                        failed = check.results.len(),
                        "some collector queries are not permitted\n{}",
                        check.summary
                    );
                }
                Err(err) => tracing::warn!(%err, "permission check failed"),
            }
            if let Err(err) = collector.close().await {
                tracing::warn!(%err, "failed to release permission-check connection");
            }
        }
        Err(err) => tracing::warn!(%err, "could not open collector for permission check"),
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!(%err, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
