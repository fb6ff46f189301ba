//! Pipeline dispatcher.
//!
//! One invocation per scheduler tick: open a collector, stamp the
//! observation time, collect, and hand the observation to the configured
//! sink. Every error is caught here, converted to an error record, and
//! enqueued for the next heartbeat; a failed tick ends silently and the
//! next tick retries.

use crate::config::DriverConfig;
use crate::scheduler::JobId;
use chrono::Utc;
use ot_cloud::cloudwatch::{self, CloudWatchTarget};
use ot_collector::{Collector, ConnectionConfig, get_collector};
use ot_core::payload::{
    DbLevelObservation, LongRunningQueryObservation, QueryObservation, SchemaObservation, Summary,
    TableLevelObservation, TabularMap,
};
use ot_core::{Result, error_queue};
use ot_sink::{ComputeServerClient, ObservationKind, S3Client};
use serde_json::{Map, Value};

/// Run one tick of the pipeline identified by `job_id`, trapping every
/// failure into the error queue.
pub async fn driver_pipeline(config: DriverConfig, job_id: JobId) {
    tracing::info!(job = %job_id, "running driver pipeline");
    if let Err(err) = run_pipeline(&config, job_id).await {
        if err.is_network() {
            tracing::error!(job = %job_id, %err, "network error during driver pipeline");
        } else {
            tracing::error!(job = %job_id, %err, "unexpected error during driver pipeline");
        }
        error_queue::add_error(&err, &error_queue::capture_stacktrace());
    }
}

async fn run_pipeline(config: &DriverConfig, job_id: JobId) -> Result<()> {
    let server_client = ComputeServerClient::new(&config.server_url, &config.api_key);
    let s3_client = S3Client::new(
        config.enable_s3,
        &config.organization_id,
        &config.db_key,
        &config.api_key,
        &config.s3_bucket_name,
        &config.aws_region,
    );

    match job_id {
        JobId::DbLevelMonitor => {
            let observation = collect_db_level_observation(config).await?;
            if config.enable_s3 {
                s3_client
                    .post_observation(serde_json::to_value(&observation)?, ObservationKind::Db)
                    .await?;
            } else {
                server_client.post_db_level_observation(&observation).await?;
            }
        }
        JobId::TableLevelMonitor => {
            let observation = collect_table_level_observation(config).await?;
            if config.enable_s3 {
                s3_client
                    .post_observation(serde_json::to_value(&observation)?, ObservationKind::Table)
                    .await?;
            } else {
                server_client
                    .post_table_level_observation(&observation)
                    .await?;
            }
        }
        JobId::LongRunningQueryMonitor => {
            let observation = collect_long_running_query_observation(config).await?;
            if config.enable_s3 {
                s3_client
                    .post_observation(
                        serde_json::to_value(&observation)?,
                        ObservationKind::LongRunningQuery,
                    )
                    .await?;
            } else {
                server_client
                    .post_long_running_query_observation(&observation)
                    .await?;
            }
        }
        JobId::QueryMonitor => {
            let observation = collect_query_observation(config).await?;
            if config.enable_s3 {
                s3_client
                    .post_observation(serde_json::to_value(&observation)?, ObservationKind::Query)
                    .await?;
            } else {
                server_client.post_query_observation(&observation).await?;
            }
        }
        JobId::SchemaMonitor => {
            let observation = collect_schema_observation(config).await?;
            if config.enable_s3 {
                s3_client
                    .post_observation(serde_json::to_value(&observation)?, ObservationKind::Schema)
                    .await?;
            } else {
                server_client.post_schema_observation(&observation).await?;
            }
        }
    }
    Ok(())
}

/// Resolve connection parameters, minting a fresh IAM auth token when
/// enabled.
pub async fn connection_config(config: &DriverConfig) -> Result<ConnectionConfig> {
    let mut conn = config.connection_config();
    if config.enable_aws_iam_auth {
        let sdk = ot_cloud::sdk_config(&config.aws_region).await;
        conn.db_password =
            ot_cloud::rds::get_db_auth_token(&sdk, &conn.db_user, &conn.db_host, conn.db_port)
                .await?;
    }
    Ok(conn)
}

async fn open_collector(config: &DriverConfig) -> Result<Box<dyn Collector>> {
    let conn = connection_config(config).await?;
    get_collector(&conn).await
}

async fn close_collector(collector: &mut Box<dyn Collector>) {
    if let Err(err) = collector.close().await {
        tracing::warn!(%err, "failed to release collector connection");
    }
}

fn summary(version: String) -> Summary {
    Summary {
        version,
        observation_time: Utc::now().timestamp(),
    }
}

/// Knobs, metrics, and row stats, merged with the configured cloud metric
/// sources.
pub async fn collect_db_level_observation(config: &DriverConfig) -> Result<DbLevelObservation> {
    let mut collector = open_collector(config).await?;
    let result: Result<DbLevelObservation> = async {
        let summary = summary(collector.get_version().to_string());
        let knobs = collector.collect_knobs().await?;
        let metrics = collector.collect_metrics().await?;
        let row_num_stats = collector.collect_table_row_number_stats().await?;
        Ok(DbLevelObservation {
            knobs_data: knobs,
            metrics_data: metrics,
            row_num_stats,
            summary,
            db_key: config.db_key.clone(),
            organization_id: config.organization_id.clone(),
            non_default_knobs: config.db_non_default_parameters.clone(),
        })
    }
    .await;
    close_collector(&mut collector).await;
    let mut observation = result?;

    let metrics_from_sources = collect_data_from_metric_sources(config).await?;
    for (source_tag, metrics) in metrics_from_sources {
        observation.metrics_data["global"][source_tag] = metrics;
    }
    Ok(observation)
}

/// Metric maps from every configured cloud source, keyed by source tag.
async fn collect_data_from_metric_sources(
    config: &DriverConfig,
) -> Result<Map<String, Value>> {
    let mut metrics = Map::new();
    for source_tag in &config.metric_source {
        match source_tag.as_str() {
            "cloudwatch" => {
                let target = CloudWatchTarget {
                    db_identifier: config.db_identifier.clone(),
                    db_cluster_identifier: config.db_cluster_identifier.clone(),
                    instance_metrics: config
                        .metrics_to_retrieve_from_source
                        .get("cloudwatch")
                        .cloned()
                        .unwrap_or_default(),
                    cluster_metrics: config
                        .metrics_to_retrieve_from_source
                        .get("cloudwatch_cluster")
                        .cloned()
                        .unwrap_or_default(),
                };
                let sdk = ot_cloud::sdk_config(&config.aws_region).await;
                let values = cloudwatch::collect_metrics(&sdk, &target).await?;
                metrics.insert(source_tag.clone(), Value::Object(values));
            }
            other => {
                tracing::warn!(source = other, "unknown metric source");
            }
        }
    }
    Ok(metrics)
}

/// Table-level and index metrics for the selected target tables. The two
/// halves honor their disable flags independently; an index-collection
/// failure is recorded without discarding the table half.
pub async fn collect_table_level_observation(
    config: &DriverConfig,
) -> Result<TableLevelObservation> {
    let mut collector = open_collector(config).await?;
    let result: Result<TableLevelObservation> = async {
        let summary = summary(collector.get_version().to_string());
        let target_table_info = collector
            .get_target_table_info(config.num_table_to_collect_stats)
            .await?;
        let mut data = TabularMap::new();
        if !config.disable_table_level_stats {
            data.extend(collector.collect_table_level_metrics(&target_table_info).await?);
        }
        if !config.disable_index_stats {
            match collector
                .collect_index_metrics(&target_table_info, config.num_index_to_collect_stats)
                .await
            {
                Ok(index_data) => data.extend(index_data),
                Err(err) => {
                    tracing::error!(%err, "error raised during index stats collection");
                    error_queue::add_error(&err, &error_queue::capture_stacktrace());
                }
            }
        }
        Ok(TableLevelObservation {
            data,
            summary,
            db_key: config.db_key.clone(),
            organization_id: config.organization_id.clone(),
        })
    }
    .await;
    close_collector(&mut collector).await;
    result
}

pub async fn collect_long_running_query_observation(
    config: &DriverConfig,
) -> Result<LongRunningQueryObservation> {
    let mut collector = open_collector(config).await?;
    let result: Result<LongRunningQueryObservation> = async {
        let summary = summary(collector.get_version().to_string());
        let data = collector
            .collect_long_running_query(
                config.num_query_to_collect,
                config.lr_query_latency_threshold_min,
            )
            .await?;
        Ok(LongRunningQueryObservation {
            data,
            summary,
            db_key: config.db_key.clone(),
            organization_id: config.organization_id.clone(),
        })
    }
    .await;
    close_collector(&mut collector).await;
    result
}

pub async fn collect_query_observation(config: &DriverConfig) -> Result<QueryObservation> {
    let mut collector = open_collector(config).await?;
    let result: Result<QueryObservation> = async {
        let summary = summary(collector.get_version().to_string());
        let data = collector
            .collect_query_metrics(config.num_query_to_collect)
            .await?;
        Ok(QueryObservation {
            data,
            summary,
            db_key: config.db_key.clone(),
            organization_id: config.organization_id.clone(),
        })
    }
    .await;
    close_collector(&mut collector).await;
    result
}

pub async fn collect_schema_observation(config: &DriverConfig) -> Result<SchemaObservation> {
    let mut collector = open_collector(config).await?;
    let result: Result<SchemaObservation> = async {
        let summary = summary(collector.get_version().to_string());
        let data = collector.collect_schema().await?;
        Ok(SchemaObservation {
            data,
            summary,
            db_key: config.db_key.clone(),
            organization_id: config.organization_id.clone(),
        })
    }
    .await;
    close_collector(&mut collector).await;
    result
}
