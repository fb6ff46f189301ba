//! Agent health heartbeat.
//!
//! Fires on its own interval, drains the process-wide error queue, and
//! posts an `AgentHealthData` record over HTTPS. The heartbeat itself is
//! best-effort: a failed post is logged and never re-enqueued.

use crate::config::DriverConfig;
use chrono::{DateTime, Utc};
use ot_core::error_queue::{self, ErrorQueue};
use ot_core::payload::{AgentHealthData, AgentStatus};
use ot_core::AGENT_VERSION;
use ot_sink::ComputeServerClient;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

pub fn agent_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_default()
}

/// Drain the queue and assemble the health record. Status derives from the
/// drained list, so the read and the status decision are one atomic step.
pub fn build_health_data(
    config: &DriverConfig,
    agent_starttime: DateTime<Utc>,
    terminating: bool,
    queue: &ErrorQueue,
) -> AgentHealthData {
    let errors = queue.drain_all();
    AgentHealthData {
        organization_id: config.organization_id.clone(),
        db_key: config.db_key.clone(),
        agent_status: AgentStatus::from_state(terminating, errors.is_empty()),
        agent_starttime: agent_starttime.to_rfc3339(),
        heartbeat_time: Utc::now().to_rfc3339(),
        agent_version: AGENT_VERSION.to_string(),
        agent_hostname: agent_hostname(),
        errors,
    }
}

/// Send one heartbeat; always over HTTPS, regardless of the observation
/// sink.
pub async fn send_heartbeat(config: &DriverConfig, agent_starttime: DateTime<Utc>, terminating: bool) {
    let client = ComputeServerClient::new(&config.server_url, &config.api_key);
    let data = build_health_data(config, agent_starttime, terminating, error_queue::global());
    if let Err(err) = client.post_agent_health_heartbeat(&data).await {
        // best-effort: never enqueue heartbeat failures
        tracing::error!(%err, "failed to post agent health heartbeat");
    }
}

/// Periodic heartbeat job; first fire is one interval after registration.
pub fn spawn_heartbeat_job(
    config: DriverConfig,
    agent_starttime: DateTime<Utc>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(config.agent_health_report_interval.max(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    send_heartbeat(&config, agent_starttime, false).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ot_collector::DbType;
    use ot_core::Error;
    use std::collections::BTreeMap;

    fn test_config() -> DriverConfig {
        DriverConfig {
            server_url: "http://127.0.0.1:9".into(),
            db_identifier: "prod-db".into(),
            db_cluster_identifier: None,
            aws_region: "us-east-2".into(),
            db_type: DbType::Mock,
            db_host: "localhost".into(),
            db_port: 5432,
            db_version: "13_4".into(),
            db_user: "agent".into(),
            db_password: "secret".into(),
            enable_aws_iam_auth: false,
            db_name: None,
            postgres_db_list: None,
            api_key: "api".into(),
            db_key: "db".into(),
            organization_id: "org".into(),
            monitor_interval: 60,
            table_level_monitor_interval: 300,
            long_running_query_monitor_interval: 60,
            query_monitor_interval: 3600,
            schema_monitor_interval: 3600,
            agent_health_report_interval: 60,
            lr_query_latency_threshold_min: 5,
            metric_source: vec![],
            metrics_to_retrieve_from_source: BTreeMap::new(),
            disable_table_level_stats: false,
            num_table_to_collect_stats: 10,
            disable_index_stats: false,
            num_index_to_collect_stats: 100,
            disable_long_running_query_monitoring: false,
            disable_query_monitoring: false,
            num_query_to_collect: 1000,
            disable_schema_monitoring: false,
            db_non_default_parameters: vec![],
            enable_s3: false,
            s3_bucket_name: String::new(),
            db_enable_ssl: false,
            db_ssl_ca: None,
            db_ssl_cert: None,
            db_ssl_key: None,
        }
    }

    #[test]
    fn healthy_queue_reports_ok() {
        let queue = ErrorQueue::new();
        let data = build_health_data(&test_config(), Utc::now(), false, &queue);
        assert_eq!(data.agent_status, AgentStatus::Ok);
        assert!(data.errors.is_empty());
        assert_eq!(data.agent_version, AGENT_VERSION);
    }

    #[test]
    fn pending_errors_report_error_and_drain() {
        let queue = ErrorQueue::new();
        let err = Error::ComputeServerClient("Failed to post the observation".into());
        queue.push(err.kind_name(), &err.to_string(), "stack");

        let data = build_health_data(&test_config(), Utc::now(), false, &queue);
        assert_eq!(data.agent_status, AgentStatus::Error);
        assert_eq!(data.errors.len(), 1);
        assert_eq!(data.errors[0].data.name, "ComputeServerClientError");

        // the drain left the queue empty, so the next report is ok again
        let data = build_health_data(&test_config(), Utc::now(), false, &queue);
        assert_eq!(data.agent_status, AgentStatus::Ok);
    }

    #[test]
    fn terminating_states() {
        let queue = ErrorQueue::new();
        let data = build_health_data(&test_config(), Utc::now(), true, &queue);
        assert_eq!(data.agent_status, AgentStatus::TerminatingOk);

        queue.push("NetworkError", "refused", "");
        let data = build_health_data(&test_config(), Utc::now(), true, &queue);
        assert_eq!(data.agent_status, AgentStatus::TerminatingError);
    }
}
