//! Observation shipping layer.
//!
//! Two interchangeable sinks carry observations off-host: the HTTPS
//! compute-service client and the S3 object-store sink. Framing is shared:
//! long-running-query, query, and schema payloads travel gzipped, the rest
//! as plain JSON.

use flate2::Compression;
use flate2::write::GzEncoder;
use ot_core::Result;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;

pub mod s3;
pub mod server;

pub use s3::S3Client;
pub use server::ComputeServerClient;

/// The five observation kinds a sink can carry. The heartbeat is not a
/// kind: it always travels over HTTPS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    Db,
    Table,
    Schema,
    LongRunningQuery,
    Query,
}

impl ObservationKind {
    /// Path segment of the compute-service endpoint.
    pub fn endpoint(&self) -> &'static str {
        match self {
            ObservationKind::Db => "observation",
            ObservationKind::Table => "table_level_observation",
            ObservationKind::Schema => "schema_observation",
            ObservationKind::LongRunningQuery => "long_running_query_observation",
            ObservationKind::Query => "query_observation",
        }
    }

    /// Segment of the object-store key template.
    pub fn key_segment(&self) -> &'static str {
        match self {
            ObservationKind::Db => "DB",
            ObservationKind::Table => "TABLE",
            ObservationKind::Schema => "SCHEMA",
            ObservationKind::LongRunningQuery => "LONG_RUNNING_QUERY",
            ObservationKind::Query => "QUERY",
        }
    }

    /// Query, long-running-query, and schema payloads can be large and are
    /// shipped gzipped.
    pub fn compressed(&self) -> bool {
        matches!(
            self,
            ObservationKind::Schema | ObservationKind::LongRunningQuery | ObservationKind::Query
        )
    }

    /// Per-kind request timeout.
    pub fn timeout(&self) -> Duration {
        match self {
            ObservationKind::Db | ObservationKind::Table => Duration::from_secs(30),
            ObservationKind::LongRunningQuery => Duration::from_secs(60),
            ObservationKind::Schema | ObservationKind::Query => Duration::from_secs(90),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ObservationKind::Db => "observation",
            ObservationKind::Table => "table level observation",
            ObservationKind::Schema => "schema observation",
            ObservationKind::LongRunningQuery => "long running query observation",
            ObservationKind::Query => "query observation",
        }
    }
}

/// Serialize to JSON and gzip-compress.
pub fn gzip_json<T: Serialize>(data: &T) -> Result<Vec<u8>> {
    let serialized = serde_json::to_vec(data)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&serialized)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use serde_json::json;
    use std::io::Read;

    #[test]
    fn endpoints_match_ingestion_service() {
        assert_eq!(ObservationKind::Db.endpoint(), "observation");
        assert_eq!(ObservationKind::Table.endpoint(), "table_level_observation");
        assert_eq!(
            ObservationKind::LongRunningQuery.endpoint(),
            "long_running_query_observation"
        );
        assert_eq!(ObservationKind::Query.endpoint(), "query_observation");
        assert_eq!(ObservationKind::Schema.endpoint(), "schema_observation");
    }

    #[test]
    fn only_large_kinds_are_compressed() {
        assert!(!ObservationKind::Db.compressed());
        assert!(!ObservationKind::Table.compressed());
        assert!(ObservationKind::Schema.compressed());
        assert!(ObservationKind::LongRunningQuery.compressed());
        assert!(ObservationKind::Query.compressed());
    }

    #[test]
    fn per_kind_timeouts() {
        assert_eq!(ObservationKind::Db.timeout(), Duration::from_secs(30));
        assert_eq!(ObservationKind::Table.timeout(), Duration::from_secs(30));
        assert_eq!(
            ObservationKind::LongRunningQuery.timeout(),
            Duration::from_secs(60)
        );
        assert_eq!(ObservationKind::Query.timeout(), Duration::from_secs(90));
        assert_eq!(ObservationKind::Schema.timeout(), Duration::from_secs(90));
    }

    #[test]
    fn gzip_round_trips() {
        let payload = json!({"data": {"pg_stat_statements": {"columns": [], "rows": []}}});
        let compressed = gzip_json(&payload).unwrap();
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut decompressed = String::new();
        decoder.read_to_string(&mut decompressed).unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&decompressed).unwrap(),
            payload
        );
    }
}
