//! Constant-shape collector for offline testing.
//!
//! Selected by `db_type = mock` or the `STUB_COLLECTOR` environment toggle;
//! returns fixed payloads with the same shapes the real collectors emit.

use crate::{Collector, PermissionCheck, TargetTableInfo};
use async_trait::async_trait;
use chrono::Utc;
use ot_core::Result;
use ot_core::payload::{TabularMap, TabularPayload};
use serde_json::{Value, json};

#[derive(Default)]
pub struct MockCollector;

impl MockCollector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Collector for MockCollector {
    async fn check_permission(&mut self) -> Result<PermissionCheck> {
        Ok(PermissionCheck {
            success: true,
            results: Vec::new(),
            summary: String::new(),
        })
    }

    async fn collect_knobs(&mut self) -> Result<Value> {
        Ok(json!({"global": {"global": {}}, "local": null}))
    }

    async fn collect_metrics(&mut self) -> Result<Value> {
        Ok(json!({
            "global": {
                "global": {},
                "innodb_metrics": {},
                "performance_schema": {},
                "engine": {},
                "derived": {},
            },
            "local": null,
        }))
    }

    async fn collect_table_row_number_stats(&mut self) -> Result<Value> {
        Ok(json!({}))
    }

    async fn get_target_table_info(
        &mut self,
        _num_table_to_collect_stats: usize,
    ) -> Result<TargetTableInfo> {
        Ok(TargetTableInfo::Empty)
    }

    async fn collect_table_level_metrics(
        &mut self,
        _target_table_info: &TargetTableInfo,
    ) -> Result<TabularMap> {
        let now = Utc::now().to_rfc3339();
        let mut data = TabularMap::new();
        data.insert(
            "pg_stat_user_tables_all_fields".to_string(),
            TabularPayload {
                columns: vec![
                    "relid".into(),
                    "schemaname".into(),
                    "relname".into(),
                    "seq_scan".into(),
                    "seq_tup_read".into(),
                    "idx_scan".into(),
                    "idx_tup_fetch".into(),
                    "n_tup_ins".into(),
                    "n_tup_upd".into(),
                    "n_tup_del".into(),
                    "n_tup_hot_upd".into(),
                    "n_live_tup".into(),
                    "n_dead_tup".into(),
                    "n_mod_since_analyze".into(),
                    "last_vacuum".into(),
                    "last_autovacuum".into(),
                    "last_analyze".into(),
                    "last_autoanalyze".into(),
                    "vacuum_count".into(),
                    "autovacuum_count".into(),
                    "analyze_count".into(),
                    "autoanalyze_count".into(),
                ],
                rows: vec![
                    vec![
                        json!(1),
                        json!("public"),
                        json!("table_1"),
                        json!(1),
                        json!(2),
                        json!(3),
                        json!(4),
                        json!(5),
                        json!(6),
                        json!(7),
                        json!(8),
                        json!(9),
                        json!(10),
                        json!(11),
                        Value::Null,
                        Value::Null,
                        json!(now),
                        json!(now),
                        json!(12),
                        json!(13),
                        json!(14),
                        json!(15),
                    ],
                    vec![
                        json!(2),
                        json!("public"),
                        json!("table_2"),
                        json!(11),
                        json!(12),
                        json!(13),
                        json!(14),
                        json!(15),
                        json!(16),
                        json!(17),
                        json!(18),
                        json!(19),
                        json!(20),
                        json!(21),
                        Value::Null,
                        Value::Null,
                        json!(now),
                        json!(now),
                        json!(22),
                        json!(23),
                        json!(24),
                        json!(25),
                    ],
                ],
            },
        );
        data.insert(
            "pg_statio_user_tables_all_fields".to_string(),
            TabularPayload {
                columns: vec![
                    "relid".into(),
                    "schemaname".into(),
                    "relname".into(),
                    "heap_blks_read".into(),
                    "heap_blks_hit".into(),
                    "idx_blks_read".into(),
                    "idx_blks_hit".into(),
                    "toast_blks_read".into(),
                    "toast_blks_hit".into(),
                    "tidx_blks_read".into(),
                    "tidx_blks_hit".into(),
                ],
                rows: vec![
                    vec![
                        json!(1),
                        json!("public"),
                        json!("table_1"),
                        json!(1),
                        json!(2),
                        json!(3),
                        json!(4),
                        json!(5),
                        json!(6),
                        json!(7),
                        json!(8),
                    ],
                    vec![
                        json!(2),
                        json!("public"),
                        json!("table_2"),
                        json!(11),
                        json!(12),
                        json!(13),
                        json!(14),
                        json!(15),
                        json!(16),
                        json!(17),
                        json!(18),
                    ],
                ],
            },
        );
        data.insert(
            "pg_stat_user_tables_table_sizes".to_string(),
            TabularPayload {
                columns: vec![
                    "relid".into(),
                    "indexes_size".into(),
                    "relation_size".into(),
                    "toast_size".into(),
                ],
                rows: vec![
                    vec![json!(1), json!(1), json!(2), json!(3)],
                    vec![json!(2), json!(11), json!(12), json!(13)],
                ],
            },
        );
        data.insert(
            "table_bloat_ratios".to_string(),
            TabularPayload {
                columns: vec!["relid".into(), "bloat_ratio".into()],
                rows: vec![
                    vec![json!(1), json!(0.1)],
                    vec![json!(2), json!(0.2)],
                ],
            },
        );
        Ok(data)
    }

    async fn collect_index_metrics(
        &mut self,
        _target_table_info: &TargetTableInfo,
        _num_index_to_collect_stats: usize,
    ) -> Result<TabularMap> {
        let mut data = TabularMap::new();
        data.insert(
            "indexes_size".to_string(),
            TabularPayload {
                columns: vec!["indexrelid".into(), "index_size".into()],
                rows: vec![vec![json!(24889), json!(16384)]],
            },
        );
        Ok(data)
    }

    async fn collect_query_metrics(&mut self, _num_query_to_collect: usize) -> Result<TabularMap> {
        let mut data = TabularMap::new();
        data.insert(
            "pg_stat_statements".to_string(),
            TabularPayload {
                columns: vec!["queryid".into(), "calls".into(), "avg_time_ms".into()],
                rows: vec![vec![json!("10_16384_123"), json!(10), json!(0.5)]],
            },
        );
        Ok(data)
    }

    async fn collect_long_running_query(
        &mut self,
        _num_query_to_collect: usize,
        _latency_threshold_min: u32,
    ) -> Result<TabularMap> {
        let mut data = TabularMap::new();
        data.insert(
            "pg_stat_activity".to_string(),
            TabularPayload {
                columns: vec!["pid".into(), "state".into(), "query_start".into()],
                rows: vec![],
            },
        );
        Ok(data)
    }

    async fn collect_schema(&mut self) -> Result<TabularMap> {
        let mut data = TabularMap::new();
        for field in [
            "columns",
            "indexes",
            "index_columns",
            "foreign_keys",
            "tables",
            "views",
        ] {
            data.insert(field.to_string(), TabularPayload::default());
        }
        Ok(data)
    }

    fn get_version(&self) -> &str {
        "mock"
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn payload_shapes_match_the_real_collectors() {
        let mut collector = MockCollector::new();

        let knobs = collector.collect_knobs().await.unwrap();
        assert!(knobs["global"]["global"].is_object());
        assert!(knobs["local"].is_null());

        let metrics = collector.collect_metrics().await.unwrap();
        assert!(metrics["global"].is_object());
        assert!(metrics["local"].is_null());

        let info = collector.get_target_table_info(10).await.unwrap();
        let tables = collector.collect_table_level_metrics(&info).await.unwrap();
        for payload in tables.values() {
            assert!(payload.is_rectangular());
        }

        let schema = collector.collect_schema().await.unwrap();
        assert_eq!(schema.len(), 6);
        assert!(schema.contains_key("index_columns"));
    }
}
