//! PostgreSQL collector with logical-database fan-out.
//!
//! One collector owns a connection per configured logical database. The
//! first entry is the main database and serves the cluster-wide views
//! (pg_stat_*, pg_stat_activity, pg_stat_statements); table, index, and
//! schema collection fan out over every logical database and tag rows with
//! a trailing `logical_database_name` column.

use crate::bloat::{AttributeInfo, BloatFactors, bloat_ratio, padding_size_for_table};
use crate::postgres_sql as sql;
use crate::value::{pg_row_map, pg_row_values};
use crate::{Collector, ConnectionConfig, PermissionCheck, PgTargetTables, TargetTableInfo};
use async_trait::async_trait;
use ot_core::payload::{TabularMap, TabularPayload};
use ot_core::{Error, Result};
use regex::Regex;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tokio_postgres::{Client, NoTls};

/// Capability flags resolved once from the server version. Collection code
/// consults these, never the version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgCapabilities {
    /// pg_stat_archiver exists from 9.4.
    pub has_archiver: bool,
    /// pg_stat_statements renamed mean_time to mean_exec_time in 13.
    pub uses_mean_exec_time: bool,
    /// pg_stat_activity exposes query_id from 14.
    pub has_query_id: bool,
    /// pg_attribute.attgenerated exists from 13.
    pub has_attgenerated: bool,
    /// pg_constraint.conparentid exists from 11.
    pub supports_conparentid: bool,
}

impl PgCapabilities {
    pub fn from_version(version: &str) -> Self {
        let version_num = parse_version_num(version);
        Self {
            has_archiver: version_num >= 9.4,
            uses_mean_exec_time: version_num >= 13.0,
            has_query_id: version_num >= 14.0,
            has_attgenerated: version_num >= 13.0,
            supports_conparentid: version_num >= 11.0,
        }
    }
}

/// `major.minor` as a float for capability gating.
pub(crate) fn parse_version_num(version: &str) -> f32 {
    let major_minor: Vec<&str> = version.split('.').take(2).collect();
    major_minor.join(".").parse::<f32>().unwrap_or(0.0)
}

/// Connect to one logical database of the target cluster.
pub(crate) async fn connect(conf: &ConnectionConfig, dbname: &str) -> Result<Client> {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&conf.db_host)
        .port(conf.db_port)
        .user(&conf.db_user)
        .password(&conf.db_password)
        .dbname(dbname);

    if conf.db_enable_ssl {
        let mut builder = native_tls::TlsConnector::builder();
        if let Some(ca) = conf.db_ssl_ca.as_deref().filter(|v| !v.is_empty()) {
            let pem = std::fs::read(ca)?;
            let certificate = native_tls::Certificate::from_pem(&pem)
                .map_err(|err| Error::PostgresCollector(format!("invalid SSL CA: {err}")))?;
            builder.add_root_certificate(certificate);
        }
        if let (Some(cert), Some(key)) = (
            conf.db_ssl_cert.as_deref().filter(|v| !v.is_empty()),
            conf.db_ssl_key.as_deref().filter(|v| !v.is_empty()),
        ) {
            let identity =
                native_tls::Identity::from_pkcs8(&std::fs::read(cert)?, &std::fs::read(key)?)
                    .map_err(|err| {
                        Error::PostgresCollector(format!("invalid SSL client identity: {err}"))
                    })?;
            builder.identity(identity);
        }
        let connector = builder.build().map_err(|err| {
            Error::PostgresCollector(format!("failed to build TLS connector: {err}"))
        })?;
        let tls = postgres_native_tls::MakeTlsConnector::new(connector);
        let (client, connection) = config.connect(tls).await.map_err(|err| {
            Error::PostgresCollector(format!("Failed to connect to Postgres: {err}"))
        })?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::warn!(%err, "postgres connection task ended with error");
            }
        });
        Ok(client)
    } else {
        let (client, connection) = config.connect(NoTls).await.map_err(|err| {
            Error::PostgresCollector(format!("Failed to connect to Postgres: {err}"))
        })?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::warn!(%err, "postgres connection task ended with error");
            }
        });
        Ok(client)
    }
}

/// Server version, e.g. `13.4` from `13.4 (Debian 13.4-1.pgdg100+1)`.
pub(crate) async fn server_version(client: &Client) -> Result<String> {
    let row = client
        .query_one(sql::VERSION_SQL, &[])
        .await
        .map_err(|err| Error::PostgresCollector(format!("Failed to get Postgres version: {err}")))?;
    let raw: String = row
        .try_get(0)
        .map_err(|err| Error::PostgresCollector(format!("Failed to get Postgres version: {err}")))?;
    Ok(raw.split_whitespace().next().unwrap_or(&raw).to_string())
}

async fn query_tabular(client: &Client, sql: &str) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
    let statement = client
        .prepare(sql)
        .await
        .map_err(|err| Error::PostgresCollector(format!("Failed to execute sql {sql}: {err}")))?;
    let columns: Vec<String> = statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let rows = client
        .query(&statement, &[])
        .await
        .map_err(|err| Error::PostgresCollector(format!("Failed to execute sql {sql}: {err}")))?;
    Ok((columns, rows.iter().map(pg_row_values).collect()))
}

/// Rows as `column -> value` maps with null cells omitted.
async fn query_maps(client: &Client, sql: &str) -> Result<Vec<Map<String, Value>>> {
    let rows = client
        .query(sql, &[])
        .await
        .map_err(|err| Error::PostgresCollector(format!("Failed to execute sql {sql}: {err}")))?;
    Ok(rows.iter().map(|row| pg_row_map(row, true)).collect())
}

fn relid_list_str(relids: &[u32]) -> String {
    if relids.is_empty() {
        "(0)".to_string()
    } else {
        let entries: Vec<String> = relids.iter().map(|id| id.to_string()).collect();
        format!("({})", entries.join(","))
    }
}

fn first_cells_as_oids(rows: &[Vec<Value>]) -> Vec<u32> {
    rows.iter()
        .filter_map(|row| row.first())
        .filter_map(|cell| cell.as_u64())
        .map(|oid| oid as u32)
        .collect()
}

fn merge_payload(map: &mut TabularMap, key: &str, payload: TabularPayload) {
    match map.get_mut(key) {
        Some(existing) => existing.extend_rows(payload),
        None => {
            map.insert(key.to_string(), payload);
        }
    }
}

fn map_f64(map: &Map<String, Value>, key: &str) -> f64 {
    map.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn map_i64(map: &Map<String, Value>, key: &str) -> i64 {
    map.get(key)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
}

fn map_bool(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn value_key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn vacuum_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)vacuum .*[^;]").expect("vacuum pattern is valid"))
}

/// Keep only the vacuum-relevant portion of a statement so no application
/// data leaves the host. Autovacuum worker rows pass through untouched;
/// explicit VACUUM statements are reduced to the matched text; anything else
/// loses its statement text.
fn anonymize_vacuum_query(row: &mut Map<String, Value>) {
    let Some(Value::String(raw)) = row.get("query").cloned() else {
        return;
    };
    if raw.contains("autovacuum:") {
        return;
    }
    let anonymized = vacuum_regex()
        .find(&raw)
        .map(|m| m.as_str().trim().to_lowercase())
        .unwrap_or_default();
    row.insert("query".to_string(), Value::String(anonymized));
}

/// Padding size per relid from the padding-helper rows, which arrive sorted
/// by `(oid, attnum)` so attributes of one table are consecutive.
fn padding_sizes(rows: &[Vec<Value>]) -> BTreeMap<u32, i64> {
    let mut sizes = BTreeMap::new();
    let mut current: Option<(u32, Vec<AttributeInfo>)> = None;
    for row in rows {
        if row.len() < 4 {
            continue;
        }
        let Some(relid) = row[0].as_u64().map(|v| v as u32) else {
            continue;
        };
        let attribute = AttributeInfo {
            attalign: row[2].as_str().unwrap_or("i").to_string(),
            avg_width: row[3].as_i64().unwrap_or(0),
        };
        match &mut current {
            Some((current_relid, attributes)) if *current_relid == relid => {
                attributes.push(attribute);
            }
            _ => {
                if let Some((finished_relid, attributes)) = current.take() {
                    sizes.insert(finished_relid, padding_size_for_table(&attributes));
                }
                current = Some((relid, vec![attribute]));
            }
        }
    }
    if let Some((finished_relid, attributes)) = current.take() {
        sizes.insert(finished_relid, padding_size_for_table(&attributes));
    }
    sizes
}

fn bloat_factors_from_maps(rows: Vec<Map<String, Value>>) -> BTreeMap<u32, BloatFactors> {
    let mut factors = BTreeMap::new();
    for row in rows {
        let Some(relid) = row.get("relid").and_then(Value::as_u64).map(|v| v as u32) else {
            continue;
        };
        factors.insert(
            relid,
            BloatFactors {
                is_na: map_bool(&row, "is_na"),
                tblpages: map_f64(&row, "tblpages"),
                reltuples: map_f64(&row, "reltuples"),
                bs: map_f64(&row, "bs"),
                page_hdr: map_f64(&row, "page_hdr"),
                fillfactor: map_f64(&row, "fillfactor"),
                tpl_data_size: map_f64(&row, "tpl_data_size"),
                tpl_hdr_size: map_f64(&row, "tpl_hdr_size"),
                ma: map_i64(&row, "ma"),
            },
        );
    }
    factors
}

const LOCAL_AGGREGATED_VIEWS: [(&str, &[&str]); 3] = [
    ("database", &["pg_stat_database", "pg_stat_database_conflicts"]),
    ("table", &["pg_stat_user_tables", "pg_statio_user_tables"]),
    ("index", &["pg_stat_user_indexes", "pg_statio_user_indexes"]),
];

const LOCAL_RAW_VIEWS: [(&str, &[&str]); 2] = [
    ("table", &["pg_stat_vacuum_tables"]),
    ("process", &["pg_stat_vacuum_activity", "pg_stat_progress_vacuum"]),
];

fn aggregated_sql(view: &str) -> &'static str {
    match view {
        "pg_stat_database" => sql::DATABASE_STAT,
        "pg_stat_database_conflicts" => sql::DATABASE_CONFLICTS_STAT,
        "pg_stat_user_tables" => sql::TABLE_STAT,
        "pg_statio_user_tables" => sql::TABLE_STATIO,
        "pg_stat_user_indexes" => sql::INDEX_STAT,
        _ => sql::INDEX_STATIO,
    }
}

fn raw_sql(view: &str) -> &'static str {
    match view {
        "pg_stat_progress_vacuum" => sql::VACUUM_PROGRESS_STAT,
        "pg_stat_vacuum_activity" => sql::VACUUM_ACTIVITY_STAT,
        _ => sql::VACUUM_USER_TABLES_STAT,
    }
}

fn raw_key(category: &str) -> &'static str {
    match category {
        "database" => "datid",
        "table" => "relid",
        "index" => "indexrelid",
        _ => "pid",
    }
}

pub struct PostgresCollector {
    /// `(logical_database_name, connection)` in configuration order.
    conns: Vec<(String, Client)>,
    main_db: String,
    version_str: String,
    caps: PgCapabilities,
}

impl PostgresCollector {
    pub fn new(conns: Vec<(String, Client)>, main_db: String, version: String) -> Self {
        let caps = PgCapabilities::from_version(&version);
        Self {
            conns,
            main_db,
            version_str: version,
            caps,
        }
    }

    pub fn capabilities(&self) -> PgCapabilities {
        self.caps
    }

    fn main_client(&self) -> Result<&Client> {
        self.conns
            .iter()
            .find(|(name, _)| name == &self.main_db)
            .map(|(_, client)| client)
            .ok_or_else(|| {
                Error::PostgresCollector(format!(
                    "connection to main database {} is missing",
                    self.main_db
                ))
            })
    }

    /// Create pg_stat_statements if absent. Failure to create the extension
    /// is logged and reported as false, never fatal.
    async fn load_stat_statements(&self) -> Result<bool> {
        let client = self.main_client()?;
        let row = client
            .query_one(sql::PG_STAT_STATEMENTS_MODULE_QUERY, &[])
            .await
            .map_err(|err| {
                Error::PostgresCollector(format!(
                    "Failed to execute sql {}: {err}",
                    sql::PG_STAT_STATEMENTS_MODULE_QUERY
                ))
            })?;
        let count: i64 = row.try_get(0).unwrap_or(0);
        if count == 1 {
            return Ok(true);
        }
        match client.execute(sql::CREATE_PG_STAT_STATEMENTS, &[]).await {
            Ok(_) => Ok(true),
            Err(err) => {
                tracing::error!(%err, "failed to load pg_stat_statements module");
                Ok(false)
            }
        }
    }

    async fn stat_statements(&self) -> Result<Vec<Map<String, Value>>> {
        if !self.load_stat_statements().await? {
            return Ok(Vec::new());
        }
        let client = self.main_client()?;
        match query_maps(client, &sql::stat_statements_sql(self.caps.uses_mean_exec_time)).await {
            Ok(rows) => Ok(rows),
            Err(err) => {
                tracing::error!(
                    %err,
                    "failed to read pg_stat_statements, you need to add pg_stat_statements \
                     in parameter shared_preload_libraries"
                );
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl Collector for PostgresCollector {
    async fn check_permission(&mut self) -> Result<PermissionCheck> {
        // the collector queries only read pg_catalog and statistics views,
        // which need no privileges beyond connect
        Ok(PermissionCheck {
            success: true,
            results: Vec::new(),
            summary: String::new(),
        })
    }

    async fn collect_knobs(&mut self) -> Result<Value> {
        let client = self.main_client()?;
        let (_, rows) = query_tabular(client, sql::KNOBS_SQL).await?;
        let mut knobs = Map::new();
        for row in rows {
            if row.len() < 2 {
                continue;
            }
            knobs.insert(value_key_string(&row[0]), row[1].clone());
        }
        Ok(json!({"global": {"global": knobs}, "local": null}))
    }

    async fn collect_metrics(&mut self) -> Result<Value> {
        let client = self.main_client()?;

        let mut global = Map::new();
        let views: &[&str] = if self.caps.has_archiver {
            &["pg_stat_archiver", "pg_stat_bgwriter"]
        } else {
            &["pg_stat_bgwriter"]
        };
        for view in views {
            let rows = query_maps(client, &format!("SELECT * FROM {view};")).await?;
            // a global view has exactly one row
            let row = rows.into_iter().next().ok_or_else(|| {
                Error::PostgresCollector(format!("expected a single row from {view}"))
            })?;
            global.insert(view.to_string(), Value::Object(row));
        }
        let statements = self.stat_statements().await?;
        global.insert(
            "pg_stat_statements".to_string(),
            json!({"statements": serde_json::to_string(&statements)?}),
        );

        let client = self.main_client()?;
        let mut local = json!({"database": {}, "table": {}, "index": {}, "process": {}});
        for (category, views) in LOCAL_AGGREGATED_VIEWS {
            for &view in views {
                let rows = query_maps(client, aggregated_sql(view)).await?;
                local[category][view] = match rows.into_iter().next() {
                    Some(aggregated) => json!({"aggregated": aggregated}),
                    None => json!({}),
                };
            }
        }
        for (category, views) in LOCAL_RAW_VIEWS {
            let key_name = raw_key(category);
            for &view in views {
                let rows = query_maps(client, raw_sql(view)).await?;
                let mut keyed = Map::new();
                for mut row in rows {
                    if view == "pg_stat_vacuum_activity" {
                        anonymize_vacuum_query(&mut row);
                    }
                    let key = row.get(key_name).map(value_key_string).unwrap_or_default();
                    keyed.insert(key, Value::Object(row));
                }
                local[category][view] = Value::Object(keyed);
            }
        }

        Ok(json!({"global": global, "local": local}))
    }

    async fn collect_table_row_number_stats(&mut self) -> Result<Value> {
        let client = self.main_client()?;
        let (columns, rows) = query_tabular(client, sql::ROW_NUM_STAT).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| Error::PostgresCollector("row stats query returned no rows".into()))?;
        let stats: Map<String, Value> = columns.into_iter().zip(row).collect();
        Ok(Value::Object(stats))
    }

    async fn get_target_table_info(
        &mut self,
        num_table_to_collect_stats: usize,
    ) -> Result<TargetTableInfo> {
        let mut targets = BTreeMap::new();
        for (db_name, client) in &self.conns {
            let (_, rows) =
                query_tabular(client, &sql::top_n_largest_tables_sql(num_table_to_collect_stats))
                    .await?;
            let target_tables = first_cells_as_oids(&rows);
            let target_tables_str = relid_list_str(&target_tables);
            targets.insert(
                db_name.clone(),
                PgTargetTables {
                    target_tables,
                    target_tables_str,
                },
            );
        }
        Ok(TargetTableInfo::Postgres(targets))
    }

    async fn collect_table_level_metrics(
        &mut self,
        target_table_info: &TargetTableInfo,
    ) -> Result<TabularMap> {
        let TargetTableInfo::Postgres(targets) = target_table_info else {
            return Err(Error::PostgresCollector(
                "target table info was not collected from Postgres".into(),
            ));
        };

        let mut metrics = TabularMap::new();
        for (db_name, client) in &self.conns {
            let Some(target) = targets.get(db_name) else {
                continue;
            };
            for (field, statement) in [
                (
                    "pg_stat_user_tables_all_fields",
                    sql::pg_stat_table_stats_sql(&target.target_tables_str),
                ),
                (
                    "pg_statio_user_tables_all_fields",
                    sql::pg_statio_table_stats_sql(&target.target_tables_str),
                ),
                (
                    "pg_stat_user_tables_table_sizes",
                    sql::table_size_table_stats_sql(&target.target_tables_str),
                ),
            ] {
                let (columns, rows) = query_tabular(client, &statement).await?;
                let mut payload = TabularPayload { columns, rows };
                payload.append_constant_column("logical_database_name", json!(db_name));
                merge_payload(&mut metrics, field, payload);
            }

            let mut bloat = TabularPayload::new(vec!["relid".into(), "bloat_ratio".into()]);
            if !target.target_tables.is_empty() {
                let (_, padding_rows) =
                    query_tabular(client, &sql::padding_helper_sql(&target.target_tables_str))
                        .await?;
                let paddings = padding_sizes(&padding_rows);
                let factor_rows = query_maps(
                    client,
                    &sql::table_bloat_ratio_factor_sql(&target.target_tables_str),
                )
                .await?;
                for (relid, factors) in bloat_factors_from_maps(factor_rows) {
                    let padding = paddings.get(&relid).copied().unwrap_or(0);
                    let ratio = bloat_ratio(padding, &factors)
                        .map(|r| json!(r))
                        .unwrap_or(Value::Null);
                    bloat.push_row(vec![json!(relid), ratio]);
                }
            }
            bloat.append_constant_column("logical_database_name", json!(db_name));
            merge_payload(&mut metrics, "table_bloat_ratios", bloat);
        }
        Ok(metrics)
    }

    async fn collect_index_metrics(
        &mut self,
        target_table_info: &TargetTableInfo,
        num_index_to_collect_stats: usize,
    ) -> Result<TabularMap> {
        let TargetTableInfo::Postgres(targets) = target_table_info else {
            return Err(Error::PostgresCollector(
                "target table info was not collected from Postgres".into(),
            ));
        };

        let mut metrics = TabularMap::new();
        for (db_name, client) in &self.conns {
            let Some(target) = targets.get(db_name) else {
                continue;
            };
            let (_, index_rows) = query_tabular(
                client,
                &sql::top_n_largest_indexes_sql(
                    &target.target_tables_str,
                    num_index_to_collect_stats,
                ),
            )
            .await?;
            let target_indexes = first_cells_as_oids(&index_rows);
            let index_list = relid_list_str(&target_indexes);

            for (field, statement) in [
                (
                    "pg_stat_user_indexes_all_fields",
                    sql::pg_stat_user_indexes_sql(&index_list),
                ),
                (
                    "pg_statio_user_indexes_all_fields",
                    sql::pg_statio_user_indexes_sql(&index_list),
                ),
                ("pg_index_all_fields", sql::pg_index_sql(&index_list)),
            ] {
                let (columns, rows) = query_tabular(client, &statement).await?;
                let mut payload = TabularPayload { columns, rows };
                payload.append_constant_column("logical_database_name", json!(db_name));
                merge_payload(&mut metrics, field, payload);
            }

            let mut sizes =
                TabularPayload::new(vec!["indexrelid".into(), "index_size".into()]);
            if !target_indexes.is_empty() {
                for row in &index_rows {
                    if row.len() >= 2 {
                        sizes.push_row(vec![row[0].clone(), row[1].clone()]);
                    }
                }
            }
            sizes.append_constant_column("logical_database_name", json!(db_name));
            merge_payload(&mut metrics, "indexes_size", sizes);
        }
        Ok(metrics)
    }

    async fn collect_query_metrics(&mut self, num_query_to_collect: usize) -> Result<TabularMap> {
        let client = self.main_client()?;
        let payload = match query_tabular(client, &sql::query_stats_sql(num_query_to_collect)).await
        {
            Ok((columns, rows)) => TabularPayload { columns, rows },
            Err(err) => {
                tracing::error!(
                    %err,
                    "failed to read pg_stat_statements, you need to add pg_stat_statements \
                     in parameter shared_preload_libraries"
                );
                TabularPayload::default()
            }
        };
        let mut metrics = TabularMap::new();
        metrics.insert("pg_stat_statements".to_string(), payload);
        Ok(metrics)
    }

    async fn collect_long_running_query(
        &mut self,
        num_query_to_collect: usize,
        latency_threshold_min: u32,
    ) -> Result<TabularMap> {
        let client = self.main_client()?;
        let (columns, rows) = query_tabular(
            client,
            &sql::long_running_query_sql(
                self.caps.has_query_id,
                latency_threshold_min,
                num_query_to_collect,
            ),
        )
        .await?;
        let mut metrics = TabularMap::new();
        metrics.insert(
            "pg_stat_activity".to_string(),
            TabularPayload { columns, rows },
        );
        Ok(metrics)
    }

    async fn collect_schema(&mut self) -> Result<TabularMap> {
        let mut schema = TabularMap::new();
        for (db_name, client) in &self.conns {
            for (field, statement) in [
                ("columns", sql::columns_schema_sql(self.caps.has_attgenerated)),
                ("indexes", sql::INDEX_SCHEMA_SQL.to_string()),
                ("index_columns", sql::INDEX_COLUMNS_SCHEMA_SQL.to_string()),
                (
                    "foreign_keys",
                    sql::foreign_key_schema_sql(self.caps.supports_conparentid),
                ),
                ("tables", sql::TABLE_SCHEMA_SQL.to_string()),
                ("views", sql::VIEW_SCHEMA_SQL.to_string()),
            ] {
                let (columns, rows) = query_tabular(client, &statement).await?;
                let mut payload = TabularPayload { columns, rows };
                payload.append_constant_column("logical_database_name", json!(db_name));
                merge_payload(&mut schema, field, payload);
            }
        }
        Ok(schema)
    }

    fn get_version(&self) -> &str {
        &self.version_str
    }

    async fn close(&mut self) -> Result<()> {
        // dropping the clients ends their connection tasks
        self.conns.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_for_old_version() {
        let caps = PgCapabilities::from_version("9.3.1");
        assert!(!caps.has_archiver);
        assert!(!caps.uses_mean_exec_time);
        assert!(!caps.has_query_id);
        assert!(!caps.supports_conparentid);
    }

    #[test]
    fn capabilities_for_9_6() {
        let caps = PgCapabilities::from_version("9.6.3");
        assert!(caps.has_archiver);
        assert!(!caps.uses_mean_exec_time);
    }

    #[test]
    fn capabilities_for_12() {
        let caps = PgCapabilities::from_version("12.4");
        assert!(caps.has_archiver);
        assert!(caps.supports_conparentid);
        assert!(!caps.uses_mean_exec_time);
        assert!(!caps.has_query_id);
        assert!(!caps.has_attgenerated);
    }

    #[test]
    fn capabilities_for_13_and_14() {
        let caps = PgCapabilities::from_version("13.4");
        assert!(caps.uses_mean_exec_time);
        assert!(caps.has_attgenerated);
        assert!(!caps.has_query_id);

        let caps = PgCapabilities::from_version("14.2");
        assert!(caps.has_query_id);
    }

    #[test]
    fn relid_list_formats() {
        assert_eq!(relid_list_str(&[]), "(0)");
        assert_eq!(relid_list_str(&[1544350]), "(1544350)");
        assert_eq!(relid_list_str(&[1, 2, 3]), "(1,2,3)");
    }

    fn vacuum_row(query: &str) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("pid".to_string(), json!(7123));
        row.insert("query".to_string(), json!(query));
        row
    }

    #[test]
    fn anonymize_keeps_autovacuum_rows() {
        let mut row = vacuum_row("autovacuum: VACUUM ANALYZE public.customers");
        anonymize_vacuum_query(&mut row);
        assert_eq!(
            row["query"],
            json!("autovacuum: VACUUM ANALYZE public.customers")
        );
    }

    #[test]
    fn anonymize_reduces_explicit_vacuum() {
        let mut row = vacuum_row("-- comment\n VACUUM TPCC.OORDER\t;");
        anonymize_vacuum_query(&mut row);
        assert_eq!(row["query"], json!("vacuum tpcc.oorder"));
    }

    #[test]
    fn anonymize_drops_other_statement_text() {
        let mut row = vacuum_row("SELECT * FROM vacuum_log;");
        anonymize_vacuum_query(&mut row);
        assert_eq!(row["query"], json!(""));
    }

    #[test]
    fn padding_sizes_group_consecutive_relids() {
        let rows = vec![
            vec![json!(1234), json!("id"), json!("i"), json!(4)],
            vec![json!(1234), json!("value"), json!("d"), json!(8)],
            vec![json!(1234), json!("fixture_id"), json!("i"), json!(4)],
            vec![json!(5678), json!("name"), json!("c"), json!(1)],
        ];
        let sizes = padding_sizes(&rows);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[&1234], 4);
        assert_eq!(sizes[&5678], 3);
    }

    #[test]
    fn bloat_factors_parse_from_maps() {
        let mut row = Map::new();
        row.insert("relid".to_string(), json!(1234));
        row.insert("tblpages".to_string(), json!(303699.0));
        row.insert("reltuples".to_string(), json!(15243454.0));
        row.insert("bs".to_string(), json!(8192.0));
        row.insert("page_hdr".to_string(), json!(24));
        row.insert("fillfactor".to_string(), json!(100));
        row.insert("is_na".to_string(), json!(false));
        row.insert("tpl_data_size".to_string(), json!(147.0));
        row.insert("tpl_hdr_size".to_string(), json!(24.0));
        row.insert("ma".to_string(), json!(8));
        let factors = bloat_factors_from_maps(vec![row]);
        assert!(!factors[&1234].is_na);
        assert_eq!(factors[&1234].ma, 8);
        assert_eq!(factors[&1234].bs, 8192.0);
    }

    #[test]
    fn merge_payload_concatenates_rows_per_database() {
        let mut map = TabularMap::new();
        let mut a = TabularPayload::new(vec!["relid".into()]);
        a.push_row(vec![json!(1)]);
        a.append_constant_column("logical_database_name", json!("a"));
        merge_payload(&mut map, "pg_stat_user_tables_all_fields", a);

        let mut b = TabularPayload::new(vec!["relid".into()]);
        b.push_row(vec![json!(2)]);
        b.append_constant_column("logical_database_name", json!("b"));
        merge_payload(&mut map, "pg_stat_user_tables_all_fields", b);

        let merged = &map["pg_stat_user_tables_all_fields"];
        assert_eq!(
            merged.columns.last().map(String::as_str),
            Some("logical_database_name")
        );
        assert_eq!(merged.rows.len(), 2);
        assert_eq!(merged.rows[0][1], json!("a"));
        assert_eq!(merged.rows[1][1], json!("b"));
    }
}
