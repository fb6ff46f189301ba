//! HTTPS client for the compute service.
//!
//! Every post carries the `ApiKey`, `organization_id`, and `AgentVersion`
//! headers. Transient failures (408, 500, 502, 503, 504, and network
//! errors) are retried a bounded number of times; anything else fails the
//! post immediately.

use crate::ObservationKind;
use ot_core::payload::{
    AgentHealthData, DbLevelObservation, LongRunningQueryObservation, QueryObservation,
    SchemaObservation, TableLevelObservation,
};
use ot_core::{AGENT_VERSION, Error, Result};
use serde::Serialize;
use std::time::Duration;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

const RETRYABLE_HTTP_STATUS: [u16; 5] = [408, 500, 502, 503, 504];

pub struct ComputeServerClient {
    server_url: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl ComputeServerClient {
    pub fn new(server_url: &str, api_key: &str) -> Self {
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub async fn post_db_level_observation(&self, data: &DbLevelObservation) -> Result<()> {
        self.post_observation(ObservationKind::Db, data, &data.organization_id)
            .await
    }

    pub async fn post_table_level_observation(&self, data: &TableLevelObservation) -> Result<()> {
        self.post_observation(ObservationKind::Table, data, &data.organization_id)
            .await
    }

    pub async fn post_long_running_query_observation(
        &self,
        data: &LongRunningQueryObservation,
    ) -> Result<()> {
        self.post_observation(ObservationKind::LongRunningQuery, data, &data.organization_id)
            .await
    }

    pub async fn post_query_observation(&self, data: &QueryObservation) -> Result<()> {
        self.post_observation(ObservationKind::Query, data, &data.organization_id)
            .await
    }

    pub async fn post_schema_observation(&self, data: &SchemaObservation) -> Result<()> {
        self.post_observation(ObservationKind::Schema, data, &data.organization_id)
            .await
    }

    /// Ship one observation with the kind's framing and timeout.
    pub async fn post_observation<T: Serialize>(
        &self,
        kind: ObservationKind,
        data: &T,
        organization_id: &str,
    ) -> Result<()> {
        let url = format!("{}/{}/", self.server_url, kind.endpoint());
        let body = if kind.compressed() {
            crate::gzip_json(data)?
        } else {
            serde_json::to_vec(data)?
        };
        self.post_with_retry(&url, organization_id, body, kind.compressed(), kind.timeout())
            .await
            .map_err(|err| match err {
                Error::Network(_) => err,
                other => Error::ComputeServerClient(format!(
                    "Failed to post the {} to the server: {other}",
                    kind.description()
                )),
            })
    }

    /// The heartbeat is best-effort plain JSON; its failures are handled by
    /// the caller without re-enqueueing.
    pub async fn post_agent_health_heartbeat(&self, data: &AgentHealthData) -> Result<()> {
        let url = format!("{}/agent_health/", self.server_url);
        let body = serde_json::to_vec(data)?;
        self.post_with_retry(&url, &data.organization_id, body, false, HEARTBEAT_TIMEOUT)
            .await
            .map_err(|err| match err {
                Error::Network(_) => err,
                other => Error::ComputeServerClient(format!(
                    "Failed to post the agent health heartbeat to the server: {other}"
                )),
            })
    }

    async fn post_with_retry(
        &self,
        url: &str,
        organization_id: &str,
        body: Vec<u8>,
        compressed: bool,
        timeout: Duration,
    ) -> Result<()> {
        let mut attempts = 0;
        let mut last_error: Option<Error> = None;

        while attempts <= self.max_retries {
            if attempts > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }
            attempts += 1;

            let mut request = self
                .client
                .post(url)
                .timeout(timeout)
                .header("ApiKey", &self.api_key)
                .header("organization_id", organization_id)
                .header("AgentVersion", AGENT_VERSION)
                .header("Content-Type", "application/json; charset=utf-8");
            if compressed {
                request = request.header("Content-Encoding", "gzip");
            }

            match request.body(body.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    let error = Error::ComputeServerClient(format!("server returned {status}"));
                    if !RETRYABLE_HTTP_STATUS.contains(&status.as_u16()) {
                        return Err(error);
                    }
                    tracing::warn!(%url, %status, attempt = attempts, "retryable server status");
                    last_error = Some(error);
                }
                Err(err) => {
                    tracing::warn!(%url, %err, attempt = attempts, "network error during post");
                    last_error = Some(Error::Network(err.to_string()));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Network("unknown error".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ot_core::payload::{AgentStatus, Summary, TabularMap};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn db_observation() -> DbLevelObservation {
        DbLevelObservation {
            knobs_data: json!({"global": {"global": {}}, "local": null}),
            metrics_data: json!({"global": {"global": {}}, "local": null}),
            row_num_stats: json!({}),
            summary: Summary {
                version: "8.0.22".into(),
                observation_time: 1_700_000_000,
            },
            db_key: "test_key".into(),
            organization_id: "test_org".into(),
            non_default_knobs: vec![],
        }
    }

    fn query_observation() -> QueryObservation {
        QueryObservation {
            data: TabularMap::new(),
            summary: Summary {
                version: "13.4".into(),
                observation_time: 1_700_000_000,
            },
            db_key: "test_key".into(),
            organization_id: "test_org".into(),
        }
    }

    #[tokio::test]
    async fn posts_db_observation_with_agent_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/observation/"))
            .and(header("ApiKey", "secret-key"))
            .and(header("organization_id", "test_org"))
            .and(header("AgentVersion", AGENT_VERSION))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ComputeServerClient::new(&mock_server.uri(), "secret-key");
        client
            .post_db_level_observation(&db_observation())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn query_observation_is_gzipped() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query_observation/"))
            .and(header("Content-Encoding", "gzip"))
            .and(header("Content-Type", "application/json; charset=utf-8"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ComputeServerClient::new(&mock_server.uri(), "secret-key");
        client
            .post_query_observation(&query_observation())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retries_on_retryable_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/observation/"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/observation/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ComputeServerClient::new(&mock_server.uri(), "secret-key")
            .with_retry_policy(3, Duration::from_millis(10));
        client
            .post_db_level_observation(&db_observation())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/observation/"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ComputeServerClient::new(&mock_server.uri(), "secret-key")
            .with_retry_policy(3, Duration::from_millis(10));
        let err = client
            .post_db_level_observation(&db_observation())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/observation/"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = ComputeServerClient::new(&mock_server.uri(), "secret-key")
            .with_retry_policy(2, Duration::from_millis(10));
        let err = client
            .post_db_level_observation(&db_observation())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn heartbeat_posts_plain_json() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent_health/"))
            .and(header("organization_id", "test_org"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ComputeServerClient::new(&mock_server.uri(), "secret-key");
        let data = AgentHealthData {
            organization_id: "test_org".into(),
            db_key: "test_key".into(),
            agent_status: AgentStatus::Ok,
            agent_starttime: "2026-08-01T00:00:00+00:00".into(),
            heartbeat_time: "2026-08-01T00:01:00+00:00".into(),
            agent_version: AGENT_VERSION.into(),
            agent_hostname: "test-host".into(),
            errors: vec![],
        };
        client.post_agent_health_heartbeat(&data).await.unwrap();
    }
}
