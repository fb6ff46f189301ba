//! Object-store sink.
//!
//! Observations land under
//! `{organization_id}/{db_key}/{KIND}/{YYYYMMDD}/{HH}/data`, either as plain
//! JSON (DB, table) or gzipped JSON (the rest). The HTTPS headers are
//! embedded in-object under a `headers` field before serialization. Writes
//! to the OtterTune-owned bucket assume the cross-account sharing role; any
//! other bucket uses the default credentials chain for the agent's region.

use crate::ObservationKind;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use ot_cloud::sts;
use ot_core::{AGENT_VERSION, Error, Result};
use serde_json::{Value, json};

/// The OtterTune-owned observation bucket.
pub const OTTERTUNE_BUCKET: &str = "customer-database-observations";

pub struct S3Client {
    enable_s3: bool,
    organization_id: String,
    db_key: String,
    api_key: String,
    bucket_name: String,
    aws_region: String,
}

impl S3Client {
    pub fn new(
        enable_s3: bool,
        organization_id: &str,
        db_key: &str,
        api_key: &str,
        bucket_name: &str,
        aws_region: &str,
    ) -> Self {
        Self {
            enable_s3,
            organization_id: organization_id.to_string(),
            db_key: db_key.to_string(),
            api_key: api_key.to_string(),
            bucket_name: bucket_name.to_string(),
            aws_region: aws_region.to_string(),
        }
    }

    /// Object key for an observation taken at `time`.
    pub fn object_key(&self, kind: ObservationKind, time: DateTime<Utc>) -> String {
        format!(
            "{}/{}/{}/{}/data",
            self.organization_id,
            self.db_key,
            kind.key_segment(),
            time.format("%Y%m%d/%H"),
        )
    }

    /// The HTTPS headers, echoed verbatim inside the object body.
    fn generate_headers(&self) -> Value {
        json!({
            "ApiKey": self.api_key,
            "organization_id": self.organization_id,
            "AgentVersion": AGENT_VERSION,
        })
    }

    /// Serialize with embedded headers, applying the kind's compression.
    pub fn process_observation_data(&self, mut data: Value, kind: ObservationKind) -> Result<Vec<u8>> {
        data["headers"] = self.generate_headers();
        if kind.compressed() {
            crate::gzip_json(&data)
        } else {
            Ok(serde_json::to_vec(&data)?)
        }
    }

    /// Upload one observation. A disabled sink is a no-op. The S3 client is
    /// constructed lazily per call.
    pub async fn post_observation(&self, data: Value, kind: ObservationKind) -> Result<()> {
        if !self.enable_s3 {
            return Ok(());
        }

        let body = self.process_observation_data(data, kind)?;
        let object_key = self.object_key(kind, Utc::now());

        let config = ot_cloud::sdk_config(&self.aws_region).await;
        let client = if self.bucket_name == OTTERTUNE_BUCKET {
            let credentials = sts::bucket_sharing_credentials(&config).await?;
            let s3_config = aws_sdk_s3::config::Builder::from(&config)
                .credentials_provider(credentials)
                .build();
            aws_sdk_s3::Client::from_conf(s3_config)
        } else {
            aws_sdk_s3::Client::new(&config)
        };

        client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&object_key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| {
                Error::S3Client(format!(
                    "Failed to post the {} to S3 key {object_key}: {err}",
                    kind.description()
                ))
            })?;
        tracing::info!(key = %object_key, "posted observation to S3");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn client(enable_s3: bool) -> S3Client {
        S3Client::new(
            enable_s3,
            "test_org",
            "test_key",
            "secret-key",
            OTTERTUNE_BUCKET,
            "us-east-2",
        )
    }

    #[test]
    fn object_key_follows_template() {
        let time = Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).unwrap();
        assert_eq!(
            client(true).object_key(ObservationKind::Db, time),
            "test_org/test_key/DB/20260801/09/data"
        );
        assert_eq!(
            client(true).object_key(ObservationKind::LongRunningQuery, time),
            "test_org/test_key/LONG_RUNNING_QUERY/20260801/09/data"
        );
    }

    #[test]
    fn plain_kinds_embed_headers_uncompressed() {
        let body = client(true)
            .process_observation_data(json!({"db_key": "test_key"}), ObservationKind::Db)
            .unwrap();
        let decoded: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded["db_key"], json!("test_key"));
        assert_eq!(decoded["headers"]["ApiKey"], json!("secret-key"));
        assert_eq!(decoded["headers"]["organization_id"], json!("test_org"));
        assert_eq!(decoded["headers"]["AgentVersion"], json!(AGENT_VERSION));
    }

    #[test]
    fn compressed_kinds_gzip_the_body() {
        let body = client(true)
            .process_observation_data(json!({"db_key": "test_key"}), ObservationKind::Schema)
            .unwrap();
        let mut decoder = GzDecoder::new(body.as_slice());
        let mut decompressed = String::new();
        decoder.read_to_string(&mut decompressed).unwrap();
        let decoded: Value = serde_json::from_str(&decompressed).unwrap();
        assert_eq!(decoded["headers"]["organization_id"], json!("test_org"));
    }

    #[tokio::test]
    async fn disabled_sink_is_a_no_op() {
        client(false)
            .post_observation(json!({"db_key": "test_key"}), ObservationKind::Db)
            .await
            .unwrap();
    }
}
