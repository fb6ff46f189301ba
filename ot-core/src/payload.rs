//! Observation payloads shipped to the ingestion service.
//!
//! Everything that is not a single key-value map uses the tabular shape
//! `{columns, rows}`. Cells are JSON scalars: timestamps are rendered
//! ISO-8601, decimals as floats, unknown values as null.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Canonical tabular shape: every row has exactly one cell per column.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TabularPayload {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TabularPayload {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    /// True when every row has one cell per column.
    pub fn is_rectangular(&self) -> bool {
        self.rows.iter().all(|row| row.len() == self.columns.len())
    }

    /// Append a trailing column with the same value on every row.
    pub fn append_constant_column(&mut self, name: &str, value: Value) {
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(value.clone());
        }
    }

    /// Concatenate another payload's rows. Columns must already agree.
    pub fn extend_rows(&mut self, other: TabularPayload) {
        debug_assert_eq!(self.columns, other.columns);
        self.rows.extend(other.rows);
    }
}

/// Sub-payloads keyed by view name, e.g. `pg_stat_user_tables_all_fields`.
pub type TabularMap = BTreeMap<String, TabularPayload>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub version: String,
    /// Agent wall clock at the start of the tick, unix seconds.
    pub observation_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbLevelObservation {
    pub knobs_data: Value,
    pub metrics_data: Value,
    pub row_num_stats: Value,
    pub summary: Summary,
    pub db_key: String,
    pub organization_id: String,
    pub non_default_knobs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableLevelObservation {
    pub data: TabularMap,
    pub summary: Summary,
    pub db_key: String,
    pub organization_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LongRunningQueryObservation {
    pub data: TabularMap,
    pub summary: Summary,
    pub db_key: String,
    pub organization_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryObservation {
    pub data: TabularMap,
    pub summary: Summary,
    pub db_key: String,
    pub organization_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaObservation {
    pub data: TabularMap,
    pub summary: Summary,
    pub db_key: String,
    pub organization_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Ok,
    Error,
    TerminatingOk,
    TerminatingError,
}

impl AgentStatus {
    pub fn from_state(terminating: bool, queue_empty: bool) -> Self {
        match (terminating, queue_empty) {
            (false, true) => AgentStatus::Ok,
            (false, false) => AgentStatus::Error,
            (true, true) => AgentStatus::TerminatingOk,
            (true, false) => AgentStatus::TerminatingError,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetail {
    pub name: String,
    pub message: String,
    pub stacktrace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEntry {
    pub data: ErrorDetail,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentHealthData {
    pub organization_id: String,
    pub db_key: String,
    pub agent_status: AgentStatus,
    /// ISO-8601 timestamp of process start.
    pub agent_starttime: String,
    /// ISO-8601 timestamp of this heartbeat.
    pub heartbeat_time: String,
    pub agent_version: String,
    pub agent_hostname: String,
    pub errors: Vec<ErrorEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tabular_payload_stays_rectangular() {
        let mut payload = TabularPayload::new(vec!["relid".into(), "bloat_ratio".into()]);
        payload.push_row(vec![json!(1234), json!(0.0976)]);
        payload.push_row(vec![json!(1235), Value::Null]);
        assert!(payload.is_rectangular());
    }

    #[test]
    fn append_constant_column_extends_every_row() {
        let mut payload = TabularPayload::new(vec!["relid".into()]);
        payload.push_row(vec![json!(1)]);
        payload.push_row(vec![json!(2)]);
        payload.append_constant_column("logical_database_name", json!("postgres"));
        assert_eq!(
            payload.columns,
            vec!["relid".to_string(), "logical_database_name".to_string()]
        );
        assert!(payload.is_rectangular());
        assert_eq!(payload.rows[1][1], json!("postgres"));
    }

    #[test]
    fn agent_status_matrix() {
        assert_eq!(AgentStatus::from_state(false, true), AgentStatus::Ok);
        assert_eq!(AgentStatus::from_state(false, false), AgentStatus::Error);
        assert_eq!(AgentStatus::from_state(true, true), AgentStatus::TerminatingOk);
        assert_eq!(
            AgentStatus::from_state(true, false),
            AgentStatus::TerminatingError
        );
    }

    #[test]
    fn agent_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AgentStatus::TerminatingError).unwrap(),
            "\"terminating_error\""
        );
        assert_eq!(serde_json::to_string(&AgentStatus::Ok).unwrap(), "\"ok\"");
    }

    #[test]
    fn observation_round_trips_through_json() {
        let observation = DbLevelObservation {
            knobs_data: json!({"global": {"global": {"innodb_buffer_pool_size": "134217728"}}, "local": null}),
            metrics_data: json!({"global": {"global": {}}, "local": null}),
            row_num_stats: json!({}),
            summary: Summary {
                version: "8.0.22".into(),
                observation_time: 1_700_000_000,
            },
            db_key: "test_key".into(),
            organization_id: "test_org".into(),
            non_default_knobs: vec!["innodb_buffer_pool_size".into()],
        };
        let encoded = serde_json::to_string(&observation).unwrap();
        let decoded: DbLevelObservation = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, observation);
    }
}
