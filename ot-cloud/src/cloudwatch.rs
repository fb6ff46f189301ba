//! CloudWatch metric source.
//!
//! One batch `GetMetricData` call per DB-level tick: a 10-minute backward
//! window ending now, 60 s sampling period, `Average` statistic, newest data
//! first. Metric ids carry an `id_` prefix so the response de-multiplexes by
//! stripping it.

use aws_sdk_cloudwatch::primitives::DateTime;
use aws_sdk_cloudwatch::types::{Dimension, Metric, MetricDataQuery, MetricDataResult, MetricStat, ScanBy};
use ot_core::{Error, Result};
use serde_json::{Map, Value};
use std::time::{Duration, SystemTime};

const NAMESPACE: &str = "AWS/RDS";
const QUERY_WINDOW: Duration = Duration::from_secs(600);
const SAMPLE_PERIOD_SECONDS: i32 = 60;
const METRIC_ID_PREFIX: &str = "id_";

/// What to pull for one tick: the instance-dimension metrics always, the
/// cluster-dimension metrics when a cluster identifier is configured.
#[derive(Debug, Clone)]
pub struct CloudWatchTarget {
    pub db_identifier: String,
    pub db_cluster_identifier: Option<String>,
    pub instance_metrics: Vec<String>,
    pub cluster_metrics: Vec<String>,
}

fn metric_query(metric: &str, dimension_name: &str, dimension_value: &str) -> MetricDataQuery {
    MetricDataQuery::builder()
        .id(format!("{METRIC_ID_PREFIX}{metric}"))
        .metric_stat(
            MetricStat::builder()
                .metric(
                    Metric::builder()
                        .namespace(NAMESPACE)
                        .metric_name(metric)
                        .dimensions(
                            Dimension::builder()
                                .name(dimension_name)
                                .value(dimension_value)
                                .build(),
                        )
                        .build(),
                )
                .period(SAMPLE_PERIOD_SECONDS)
                .stat("Average")
                .build(),
        )
        .build()
}

/// Batch query list for the target: one entry per metric name.
pub fn build_metric_queries(target: &CloudWatchTarget) -> Vec<MetricDataQuery> {
    let mut queries: Vec<MetricDataQuery> = target
        .instance_metrics
        .iter()
        .map(|metric| metric_query(metric, "DBInstanceIdentifier", &target.db_identifier))
        .collect();
    if let Some(cluster) = target
        .db_cluster_identifier
        .as_deref()
        .filter(|v| !v.is_empty())
    {
        queries.extend(
            target
                .cluster_metrics
                .iter()
                .map(|metric| metric_query(metric, "DBClusterIdentifier", cluster)),
        );
    }
    queries
}

/// The newest value per metric. Results are scanned newest-first, so the
/// first data point wins; metrics with no data points are logged and
/// omitted.
pub fn newest_values(results: &[MetricDataResult]) -> Map<String, Value> {
    let mut values = Map::new();
    for result in results {
        let Some(id) = result.id() else { continue };
        let metric_name = id.strip_prefix(METRIC_ID_PREFIX).unwrap_or(id);
        match result.values().first() {
            Some(value) => {
                let cell = serde_json::Number::from_f64(*value)
                    .map(Value::Number)
                    .unwrap_or(Value::Null);
                values.insert(metric_name.to_string(), cell);
            }
            None => {
                tracing::warn!(metric = metric_name, "unable to collect metric from cloudwatch");
            }
        }
    }
    values
}

/// Issue the batch query and return `metric_name -> newest value`.
pub async fn collect_metrics(
    config: &aws_config::SdkConfig,
    target: &CloudWatchTarget,
) -> Result<Map<String, Value>> {
    let client = aws_sdk_cloudwatch::Client::new(config);
    let now = SystemTime::now();
    let queries = build_metric_queries(target);
    let response = client
        .get_metric_data()
        .set_metric_data_queries(Some(queries))
        .start_time(DateTime::from(now - QUERY_WINDOW))
        .end_time(DateTime::from(now))
        .scan_by(ScanBy::TimestampDescending)
        .send()
        .await
        .map_err(|err| {
            Error::CloudWatch(format!(
                "failed to collect metrics from cloudwatch, metrics list={:?}: {err}",
                target.instance_metrics
            ))
        })?;
    Ok(newest_values(response.metric_data_results()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> CloudWatchTarget {
        CloudWatchTarget {
            db_identifier: "prod-db".into(),
            db_cluster_identifier: None,
            instance_metrics: vec!["CPUUtilization".into(), "FreeableMemory".into()],
            cluster_metrics: vec!["VolumeBytesUsed".into()],
        }
    }

    #[test]
    fn queries_carry_id_prefix_and_instance_dimension() {
        let queries = build_metric_queries(&target());
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].id(), Some("id_CPUUtilization"));
        let stat = queries[0].metric_stat().unwrap();
        assert_eq!(stat.period(), Some(60));
        assert_eq!(stat.stat(), Some("Average"));
        let dimensions = stat.metric().unwrap().dimensions();
        assert_eq!(dimensions[0].name(), Some("DBInstanceIdentifier"));
        assert_eq!(dimensions[0].value(), Some("prod-db"));
    }

    #[test]
    fn cluster_metrics_added_only_with_cluster_identifier() {
        let mut t = target();
        assert_eq!(build_metric_queries(&t).len(), 2);

        t.db_cluster_identifier = Some("prod-cluster".into());
        let queries = build_metric_queries(&t);
        assert_eq!(queries.len(), 3);
        let cluster_dimensions = queries[2]
            .metric_stat()
            .unwrap()
            .metric()
            .unwrap()
            .dimensions();
        assert_eq!(cluster_dimensions[0].name(), Some("DBClusterIdentifier"));
    }

    #[test]
    fn newest_value_wins_and_empty_metrics_are_omitted() {
        let results = vec![
            MetricDataResult::builder()
                .id("id_CPUUtilization")
                .values(12.5)
                .values(10.0)
                .build(),
            MetricDataResult::builder().id("id_FreeableMemory").build(),
        ];
        let values = newest_values(&results);
        assert_eq!(values.get("CPUUtilization"), Some(&serde_json::json!(12.5)));
        assert!(!values.contains_key("FreeableMemory"));
    }
}
