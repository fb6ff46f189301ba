//! End-to-end pipeline tests against the mock collector and a mock
//! ingestion server.

use ot_agent::config::DriverConfig;
use ot_agent::heartbeat::build_health_data;
use ot_agent::pipeline::driver_pipeline;
use ot_agent::scheduler::JobId;
use ot_collector::DbType;
use ot_core::error_queue;
use ot_core::payload::AgentStatus;
use std::collections::BTreeMap;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn config_for(server_url: &str) -> DriverConfig {
    DriverConfig {
        server_url: server_url.to_string(),
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
        api_key: "secret-key".into(),
        db_key: "test_key".into(),
        organization_id: "test_org".into(),
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
        db_non_default_parameters: vec!["shared_buffers".into()],
        enable_s3: false,
        s3_bucket_name: String::new(),
        db_enable_ssl: false,
        db_ssl_ca: None,
        db_ssl_cert: None,
        db_ssl_key: None,
    }
}

#[tokio::test]
async fn db_level_tick_posts_an_observation() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/observation/"))
        .and(header("ApiKey", "secret-key"))
        .and(header("organization_id", "test_org"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    driver_pipeline(config_for(&mock_server.uri()), JobId::DbLevelMonitor).await;

    let requests = mock_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["organization_id"], "test_org");
    assert_eq!(body["db_key"], "test_key");
    assert_eq!(body["summary"]["version"], "mock");
    assert_eq!(body["non_default_knobs"][0], "shared_buffers");
    assert!(body["metrics_data"]["global"].is_object());
    assert!(body["metrics_data"]["local"].is_null());
}

#[tokio::test]
async fn table_level_tick_posts_table_and_index_payloads() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/table_level_observation/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    driver_pipeline(config_for(&mock_server.uri()), JobId::TableLevelMonitor).await;

    let requests = mock_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let data = body["data"].as_object().unwrap();
    assert!(data.contains_key("pg_stat_user_tables_all_fields"));
    assert!(data.contains_key("table_bloat_ratios"));
    assert!(data.contains_key("indexes_size"));
    // every sub-payload is rectangular
    for payload in data.values() {
        let columns = payload["columns"].as_array().unwrap();
        for row in payload["rows"].as_array().unwrap() {
            assert_eq!(row.as_array().unwrap().len(), columns.len());
        }
    }
}

fn gunzip(body: &[u8]) -> Vec<u8> {
    use std::io::Read;
    let mut decoder = flate2::read::GzDecoder::new(body);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).unwrap();
    out
}

#[tokio::test]
async fn schema_tick_ships_gzipped_json() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/schema_observation/"))
        .and(header("Content-Encoding", "gzip"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    driver_pipeline(config_for(&mock_server.uri()), JobId::SchemaMonitor).await;

    let requests = mock_server.received_requests().await.unwrap();
    let request: &Request = &requests[0];
    let body: serde_json::Value = serde_json::from_slice(&gunzip(&request.body)).unwrap();
    let data = body["data"].as_object().unwrap();
    for field in [
        "columns",
        "indexes",
        "index_columns",
        "foreign_keys",
        "tables",
        "views",
    ] {
        assert!(data.contains_key(field), "missing schema payload {field}");
    }
}

#[tokio::test]
async fn failed_shipping_surfaces_in_the_next_heartbeat() {
    // the ingestion endpoint rejects everything with a non-retryable status
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/observation/"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let config = config_for(&mock_server.uri());
    error_queue::global().drain_all();

    driver_pipeline(config.clone(), JobId::DbLevelMonitor).await;

    let health = build_health_data(
        &config,
        chrono::Utc::now(),
        false,
        error_queue::global(),
    );
    assert_eq!(health.agent_status, AgentStatus::Error);
    assert_eq!(health.errors.len(), 1);
    assert_eq!(health.errors[0].data.name, "ComputeServerClientError");
    assert!(health.errors[0].data.message.contains("403"));

    // the drain left the queue empty; the next heartbeat reports ok
    let health = build_health_data(
        &config,
        chrono::Utc::now(),
        false,
        error_queue::global(),
    );
    assert_eq!(health.agent_status, AgentStatus::Ok);
}
