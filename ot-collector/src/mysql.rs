//! MySQL collector: executes version-specific SQL against one MySQL or
//! Aurora-MySQL instance and returns knob/metric/table/query payloads.
//!
//! Version gating happens once at construction: the parsed `major.minor`
//! decides the replica-status verb and whether the statement latency
//! histogram exists (both from 8.0).

use crate::value::mysql_row_values;
use crate::{
    Collector, ConnectionConfig, DEFAULT_MYSQL_DB, MysqlTargetTables, PermissionCheck,
    PermissionInfo, TargetTableInfo,
};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, SslOpts};
use ot_core::payload::{TabularMap, TabularPayload};
use ot_core::{Error, Result};
use serde_json::{Map, Value, json};

const VERSION_SQL: &str = "SELECT VERSION();";
const KNOBS_SQL: &str = "SHOW GLOBAL VARIABLES;";
const METRICS_SQL: &str = "SHOW GLOBAL STATUS;";
const METRICS_INNODB_SQL: &str = "SELECT name, count FROM information_schema.innodb_metrics \
     WHERE subsystem = 'transaction';";

// timer columns are converted from ps to ms
const METRICS_LATENCY_HIST_SQL: &str =
    "SELECT bucket_number, bucket_timer_low / 1000000000 as bucket_timer_low, \
     bucket_timer_high / 1000000000 as bucket_timer_high, count_bucket, \
     count_bucket_and_lower, bucket_quantile FROM \
     performance_schema.events_statements_histogram_global;";

const QUERY_DIGEST_TIME_SQL: &str =
    "SELECT CONCAT(IFNULL(schema_name, 'NULL'), '_', digest) as queryid, \
     count_star as calls, \
     round(avg_timer_wait/1000000000, 6) as avg_time_ms \
     FROM performance_schema.events_statements_summary_by_digest;";

const ENGINE_INNODB_SQL: &str = "SHOW ENGINE INNODB STATUS;";
const ENGINE_MASTER_SQL: &str = "SHOW MASTER STATUS;";
const ENGINE_REPLICA_SQL: &str = "SHOW REPLICA STATUS;";
const ENGINE_SLAVE_SQL: &str = "SHOW SLAVE STATUS;";

const EXCLUDED_SCHEMAS: &str = "('information_schema', 'performance_schema', 'mysql', 'sys')";

fn table_level_stats_sql(n: usize) -> String {
    format!(
        "SELECT \
           TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE, \
           ENGINE, ROW_FORMAT, TABLE_ROWS, \
           AVG_ROW_LENGTH, DATA_LENGTH, INDEX_LENGTH, \
           DATA_FREE \
         FROM information_schema.TABLES \
         WHERE TABLE_SCHEMA NOT IN {EXCLUDED_SCHEMAS} \
         AND TABLE_ROWS > 0 \
         ORDER BY TABLE_ROWS DESC \
         LIMIT {n};"
    )
}

fn index_size_sql(schema_table_list: &str, n: usize) -> String {
    format!(
        "SELECT \
           DATABASE_NAME, TABLE_NAME, INDEX_NAME, STAT_VALUE, \
           STAT_VALUE * @@innodb_page_size AS SIZE_IN_BYTE \
         FROM mysql.innodb_index_stats \
         WHERE stat_name='size' \
         AND (DATABASE_NAME,TABLE_NAME) IN {schema_table_list} \
         ORDER BY SIZE_IN_BYTE DESC \
         LIMIT {n};"
    )
}

fn index_stats_sql(schema_table_index_list: &str) -> String {
    format!(
        "SELECT \
           TABLE_SCHEMA,TABLE_NAME,NON_UNIQUE, \
           INDEX_SCHEMA,INDEX_NAME,SEQ_IN_INDEX,COLUMN_NAME, \
           COLLATION,CARDINALITY,SUB_PART,NULLABLE,INDEX_TYPE \
         FROM information_schema.STATISTICS \
         WHERE (TABLE_SCHEMA,TABLE_NAME,INDEX_NAME) IN {schema_table_index_list};"
    )
}

fn index_usage_sql(schema_table_index_list: &str) -> String {
    format!(
        "SELECT \
           OBJECT_TYPE,OBJECT_SCHEMA,OBJECT_NAME,INDEX_NAME,COUNT_STAR, \
           SUM_TIMER_WAIT,COUNT_READ,SUM_TIMER_READ,COUNT_WRITE,SUM_TIMER_WRITE, \
           COUNT_FETCH,SUM_TIMER_FETCH,COUNT_INSERT,SUM_TIMER_INSERT, \
           COUNT_UPDATE,SUM_TIMER_UPDATE,COUNT_DELETE,SUM_TIMER_DELETE \
         FROM performance_schema.table_io_waits_summary_by_index_usage \
         WHERE OBJECT_TYPE='TABLE' \
         AND (OBJECT_SCHEMA,OBJECT_NAME,INDEX_NAME) IN {schema_table_index_list};"
    )
}

fn query_stats_sql(n: usize) -> String {
    format!(
        "SELECT * FROM performance_schema.events_statements_summary_by_digest \
         ORDER BY COUNT_STAR DESC LIMIT {n};"
    )
}

fn long_running_query_sql(timer_wait_ps: u64, n: usize) -> String {
    format!(
        "SELECT THREAD_ID, EVENT_ID, EVENT_NAME, TIMER_START, TIMER_END, TIMER_WAIT, LOCK_TIME, \
           DIGEST, DIGEST_TEXT, ROWS_AFFECTED, ROWS_SENT, ROWS_EXAMINED, CREATED_TMP_DISK_TABLES, \
           CREATED_TMP_TABLES, SELECT_FULL_JOIN, SELECT_FULL_RANGE_JOIN, SELECT_RANGE, \
           SELECT_RANGE_CHECK, SELECT_SCAN, SORT_MERGE_PASSES, SORT_RANGE, SORT_ROWS, SORT_SCAN, \
           NO_INDEX_USED, NO_GOOD_INDEX_USED \
         FROM performance_schema.events_statements_current \
         WHERE DIGEST IS NOT NULL \
         AND TIMER_WAIT > {timer_wait_ps} \
         LIMIT {n};"
    )
}

fn columns_schema_sql() -> String {
    format!(
        "SELECT \
           TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, ORDINAL_POSITION, COLUMN_DEFAULT, \
           IS_NULLABLE, DATA_TYPE, COLLATION_NAME, COLUMN_COMMENT \
         FROM information_schema.columns \
         WHERE table_schema NOT IN {EXCLUDED_SCHEMAS} \
         ORDER BY table_schema, table_name, column_name;"
    )
}

fn index_schema_sql() -> String {
    format!(
        "SELECT \
           TABLE_SCHEMA, TABLE_NAME, INDEX_NAME, NON_UNIQUE, \
           COLUMN_NAME, COLLATION, SUB_PART, INDEX_TYPE, \
           NULLABLE, PACKED \
         FROM information_schema.statistics \
         WHERE table_schema NOT IN {EXCLUDED_SCHEMAS} \
         ORDER BY table_schema, table_name, index_name;"
    )
}

fn index_columns_schema_sql() -> String {
    format!(
        "SELECT \
           TABLE_SCHEMA, TABLE_NAME, INDEX_NAME, \
           GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX SEPARATOR ',') AS COLUMN_NAMES \
         FROM information_schema.statistics \
         WHERE table_schema NOT IN {EXCLUDED_SCHEMAS} \
         GROUP BY table_schema, table_name, index_name \
         ORDER BY table_schema, table_name, index_name;"
    )
}

fn foreign_key_schema_sql() -> String {
    format!(
        "SELECT \
           CONSTRAINT_SCHEMA, TABLE_NAME, CONSTRAINT_NAME, UNIQUE_CONSTRAINT_SCHEMA, \
           UNIQUE_CONSTRAINT_NAME, UPDATE_RULE, DELETE_RULE, REFERENCED_TABLE_NAME \
         FROM information_schema.referential_constraints \
         WHERE constraint_schema NOT IN {EXCLUDED_SCHEMAS} \
         ORDER BY constraint_schema, table_name, constraint_name;"
    )
}

fn table_schema_sql() -> String {
    format!(
        "SELECT \
           TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE, ENGINE, VERSION, ROW_FORMAT, \
           TABLE_ROWS, MAX_DATA_LENGTH, TABLE_COLLATION, CREATE_OPTIONS, \
           TABLE_COMMENT \
         FROM information_schema.tables \
         WHERE table_schema NOT IN {EXCLUDED_SCHEMAS} \
         ORDER BY table_schema, table_name;"
    )
}

fn view_schema_sql() -> String {
    format!(
        "SELECT TABLE_SCHEMA, TABLE_NAME, VIEW_DEFINITION, IS_UPDATABLE, CHECK_OPTION, \
           SECURITY_TYPE \
         FROM information_schema.views \
         WHERE table_schema NOT IN {EXCLUDED_SCHEMAS} \
         ORDER BY table_schema, table_name, view_definition;"
    )
}

// MySQL server error codes surfaced by permission probes
const ER_ACCESS_DENIED_ERROR: u16 = 1045;
const ER_TABLEACCESS_DENIED_ERROR: u16 = 1142;
const ER_SPECIFIC_ACCESS_DENIED_ERROR: u16 = 1227;

/// Open the collection connection with autocommit enabled.
pub(crate) async fn connect(conf: &ConnectionConfig) -> Result<Conn> {
    let db_name = conf
        .db_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MYSQL_DB.to_string());
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(conf.db_host.clone())
        .tcp_port(conf.db_port)
        .user(Some(conf.db_user.clone()))
        .pass(Some(conf.db_password.clone()))
        .db_name(Some(db_name))
        .init(vec!["SET autocommit=1".to_string()]);
    if conf.db_enable_ssl {
        let mut ssl_opts = SslOpts::default();
        if let Some(ca) = conf.db_ssl_ca.as_deref().filter(|v| !v.is_empty()) {
            ssl_opts = ssl_opts.with_root_certs(vec![std::path::PathBuf::from(ca).into()]);
        }
        builder = builder.ssl_opts(Some(ssl_opts));
    }
    Conn::new(Opts::from(builder))
        .await
        .map_err(|err| Error::MysqlCollector(format!("Failed to connect to MySQL: {err}")))
}

/// Fetch the server version, e.g. `8.0.22` from `8.0.22-log`.
pub(crate) async fn server_version(mut conn: Conn) -> Result<(Conn, String)> {
    let raw: Option<String> = conn
        .query_first(VERSION_SQL)
        .await
        .map_err(|err| Error::MysqlCollector(format!("Failed to get MySQL version: {err}")))?;
    let raw = raw.ok_or_else(|| Error::MysqlCollector("Failed to get MySQL version".into()))?;
    let version = raw.split('-').next().unwrap_or(raw.as_str()).to_string();
    Ok((conn, version))
}

/// `major.minor` as a float for capability gating.
pub(crate) fn parse_version_num(version: &str) -> f32 {
    let major_minor: Vec<&str> = version.split('.').take(2).collect();
    major_minor.join(".").parse::<f32>().unwrap_or(0.0)
}

pub struct MysqlCollector {
    conn: Option<Conn>,
    version_str: String,
    uses_replica_verb: bool,
    has_histogram: bool,
    global_status: Map<String, Value>,
    innodb_status: String,
}

impl MysqlCollector {
    pub fn new(conn: Conn, version: String) -> Self {
        let version_num = parse_version_num(&version);
        Self {
            conn: Some(conn),
            version_str: version,
            uses_replica_verb: version_num >= 8.0,
            has_histogram: version_num >= 8.0,
            global_status: Map::new(),
            innodb_status: String::new(),
        }
    }

    fn replica_sql(&self) -> &'static str {
        if self.uses_replica_verb {
            ENGINE_REPLICA_SQL
        } else {
            ENGINE_SLAVE_SQL
        }
    }

    fn conn_mut(&mut self) -> Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::MysqlCollector("connection already closed".into()))
    }

    /// Run one query and fetch column names plus all rows as JSON cells.
    async fn query_tabular(&mut self, sql: &str) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let conn = self.conn_mut()?;
        let mut result = conn
            .query_iter(sql)
            .await
            .map_err(|err| Error::MysqlCollector(format!("Failed to execute sql {sql}: {err}")))?;
        let columns: Vec<String> = result
            .columns()
            .map(|cols| cols.iter().map(|c| c.name_str().to_string()).collect())
            .unwrap_or_default();
        let rows: Vec<mysql_async::Row> = result
            .collect()
            .await
            .map_err(|err| Error::MysqlCollector(format!("Failed to execute sql {sql}: {err}")))?;
        let rows = rows.iter().map(mysql_row_values).collect();
        Ok((columns, rows))
    }

    /// Two-column result as a `name -> value` map.
    async fn query_kv(&mut self, sql: &str, lowercase_keys: bool) -> Result<Map<String, Value>> {
        let (_, rows) = self.query_tabular(sql).await?;
        let mut map = Map::new();
        for row in rows {
            if row.len() < 2 {
                continue;
            }
            let mut key = cell_to_string(&row[0]);
            if lowercase_keys {
                key = key.to_lowercase();
            }
            map.insert(key, row[1].clone());
        }
        Ok(map)
    }

    /// One-row result JSON-encoded as a dictionary, empty string if absent.
    async fn query_status_json(&mut self, sql: &str) -> Result<Value> {
        let (columns, rows) = self.query_tabular(sql).await?;
        match rows.first() {
            Some(row) => {
                let map: Map<String, Value> = columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                Ok(Value::String(serde_json::to_string(&Value::Object(map))?))
            }
            None => Ok(Value::String(String::new())),
        }
    }

    fn status_int(&self, key: &str) -> i64 {
        match self.global_status.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
            Some(Value::String(s)) => s.parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Metrics derived from the base counters: buffer pool miss ratio and
    /// the read/write statement ratio.
    fn collect_derived_metrics(&self) -> Value {
        let reads = self.status_int("innodb_buffer_pool_reads");
        let read_requests = self.status_int("innodb_buffer_pool_read_requests");
        let buffer_miss_ratio = if read_requests == 0 {
            0.0
        } else {
            round4(reads as f64 / read_requests as f64) * 100.0
        };

        let mut read_counts = self.status_int("com_select");
        let mut write_counts = self.status_int("com_insert")
            + self.status_int("com_update")
            + self.status_int("com_delete")
            + self.status_int("com_replace");
        if read_counts == 0 {
            read_counts = 1;
        }
        if write_counts == 0 {
            write_counts = 1;
        }
        let read_write_ratio = round4(read_counts as f64 / write_counts as f64);

        json!({
            "buffer_miss_ratio": buffer_miss_ratio,
            "read_write_ratio": read_write_ratio,
        })
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Rows as a list of `column -> value` dictionaries for JSON encoding.
fn make_list(columns: &[String], rows: &[Vec<Value>]) -> Vec<Map<String, Value>> {
    rows.iter()
        .map(|row| {
            columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect::<Map<String, Value>>()
        })
        .collect()
}

fn find_columns(
    columns: &[String],
    rows: &[Vec<Value>],
    target_columns: &[&str],
) -> Vec<Vec<String>> {
    let indices: Vec<usize> = target_columns
        .iter()
        .filter_map(|target| columns.iter().position(|c| c == target))
        .collect();
    if indices.len() != target_columns.len() {
        return Vec::new();
    }
    rows.iter()
        .map(|row| indices.iter().map(|&idx| cell_to_string(&row[idx])).collect())
        .collect()
}

/// Keep the first 50 and last 100 lines when the status text is longer than
/// 150 lines, with one ellipsis line reporting the elided count.
pub fn truncate_innodb_status(status: &str) -> String {
    let lines: Vec<&str> = status.lines().collect();
    let size = lines.len();
    if size <= 150 {
        return status.to_string();
    }
    let mut new_lines: Vec<String> = lines[..50].iter().map(|s| s.to_string()).collect();
    new_lines.push(format!("...ignore {} lines here...", size - 150));
    new_lines.extend(lines[size - 100..].iter().map(|s| s.to_string()));
    new_lines.join("\n")
}

#[async_trait]
impl Collector for MysqlCollector {
    async fn check_permission(&mut self) -> Result<PermissionCheck> {
        let mut sql_priv_map: Vec<(String, String)> = vec![
            (ENGINE_INNODB_SQL.to_string(), "PROCESS".to_string()),
            (KNOBS_SQL.to_string(), String::new()),
            (ENGINE_MASTER_SQL.to_string(), "REPLICATION CLIENT".to_string()),
            (self.replica_sql().to_string(), "REPLICATION CLIENT".to_string()),
            (METRICS_INNODB_SQL.to_string(), "PROCESS".to_string()),
            (METRICS_SQL.to_string(), String::new()),
            (VERSION_SQL.to_string(), String::new()),
        ];
        if self.has_histogram {
            sql_priv_map.push((
                METRICS_LATENCY_HIST_SQL.to_string(),
                "performance_schema.events_statements_histogram_global".to_string(),
            ));
        }

        let mut success = true;
        let mut results = Vec::new();
        for (sql, privilege) in sql_priv_map {
            let outcome = self.conn_mut()?.query_drop(sql.as_str()).await;
            if let Err(err) = outcome {
                let example = match &err {
                    mysql_async::Error::Server(server_err)
                        if server_err.code == ER_ACCESS_DENIED_ERROR
                            || server_err.code == ER_SPECIFIC_ACCESS_DENIED_ERROR =>
                    {
                        format!("GRANT {privilege} ON *.* TO <user>@<host>;")
                    }
                    mysql_async::Error::Server(server_err)
                        if server_err.code == ER_TABLEACCESS_DENIED_ERROR =>
                    {
                        format!("GRANT SELECT ON {privilege} TO <user>@<'host'>;")
                    }
                    _ => "unknown".to_string(),
                };
                results.push(PermissionInfo {
                    query: sql,
                    success: false,
                    example,
                });
                success = false;
            }
        }

        let mut summary = String::new();
        for info in &results {
            summary.push_str("-----------------------------------------------\n");
            summary.push_str(&format!("Permissions check failed for SQL: {}\n", info.query));
            summary.push_str(&format!(
                "Please grant the privilege. For example: {}\n",
                info.example
            ));
        }
        Ok(PermissionCheck {
            success,
            results,
            summary,
        })
    }

    async fn collect_knobs(&mut self) -> Result<Value> {
        let knobs = self.query_kv(KNOBS_SQL, false).await?;
        Ok(json!({"global": {"global": knobs}, "local": null}))
    }

    async fn collect_metrics(&mut self) -> Result<Value> {
        self.global_status = self.query_kv(METRICS_SQL, true).await?;
        let innodb_metrics = self.query_kv(METRICS_INNODB_SQL, false).await?;

        let (_, status_rows) = self.query_tabular(ENGINE_INNODB_SQL).await?;
        if let Some(row) = status_rows.first() {
            if let Some(cell) = row.last() {
                self.innodb_status = truncate_innodb_status(&cell_to_string(cell));
            }
        }

        let replica_sql = self.replica_sql();
        let replica_status = self.query_status_json(replica_sql).await?;
        let master_status = self.query_status_json(ENGINE_MASTER_SQL).await?;

        let summary_by_digest = match self.query_tabular(QUERY_DIGEST_TIME_SQL).await {
            Ok((columns, rows)) => make_list(&columns, &rows),
            Err(err) => {
                tracing::error!(%err, "failed to collect query latency metrics");
                Vec::new()
            }
        };
        let mut performance_schema = Map::new();
        performance_schema.insert(
            "events_statements_summary_by_digest".to_string(),
            Value::String(serde_json::to_string(&summary_by_digest)?),
        );
        if self.has_histogram {
            let (columns, rows) = self.query_tabular(METRICS_LATENCY_HIST_SQL).await?;
            performance_schema.insert(
                "events_statements_histogram_global".to_string(),
                Value::String(serde_json::to_string(&make_list(&columns, &rows))?),
            );
        }

        Ok(json!({
            "global": {
                "global": self.global_status.clone(),
                "innodb_metrics": innodb_metrics,
                "performance_schema": performance_schema,
                "engine": {
                    "innodb_status": self.innodb_status.clone(),
                    "replica_status": replica_status,
                    "master_status": master_status,
                },
                "derived": self.collect_derived_metrics(),
            },
            "local": null,
        }))
    }

    async fn collect_table_row_number_stats(&mut self) -> Result<Value> {
        // row distribution stats are a PostgreSQL-only collection
        Ok(json!({}))
    }

    async fn get_target_table_info(
        &mut self,
        num_table_to_collect_stats: usize,
    ) -> Result<TargetTableInfo> {
        let (table_columns, table_rows) = self
            .query_tabular(&table_level_stats_sql(num_table_to_collect_stats))
            .await?;
        let schema_table_pairs = find_columns(
            &table_columns,
            &table_rows,
            &["TABLE_SCHEMA", "TABLE_NAME"],
        )
        .into_iter()
        .map(|mut pair| {
            let table = pair.pop().unwrap_or_default();
            let schema = pair.pop().unwrap_or_default();
            (schema, table)
        })
        .collect();
        Ok(TargetTableInfo::Mysql(MysqlTargetTables {
            table_columns,
            table_rows,
            schema_table_pairs,
        }))
    }

    async fn collect_table_level_metrics(
        &mut self,
        target_table_info: &TargetTableInfo,
    ) -> Result<TabularMap> {
        let TargetTableInfo::Mysql(info) = target_table_info else {
            return Err(Error::MysqlCollector(
                "target table info was not collected from MySQL".into(),
            ));
        };
        let mut metrics = TabularMap::new();
        metrics.insert(
            "information_schema_TABLES".to_string(),
            TabularPayload {
                columns: info.table_columns.clone(),
                rows: info.table_rows.clone(),
            },
        );
        Ok(metrics)
    }

    async fn collect_index_metrics(
        &mut self,
        target_table_info: &TargetTableInfo,
        num_index_to_collect_stats: usize,
    ) -> Result<TabularMap> {
        let TargetTableInfo::Mysql(info) = target_table_info else {
            return Err(Error::MysqlCollector(
                "target table info was not collected from MySQL".into(),
            ));
        };

        let schema_table_string = if info.schema_table_pairs.is_empty() {
            "((NULL,NULL))".to_string()
        } else {
            let entries: Vec<String> = info
                .schema_table_pairs
                .iter()
                .map(|(schema, table)| format!("(\"{schema}\", \"{table}\")"))
                .collect();
            format!("({})", entries.join(","))
        };

        let (index_size_columns, index_size_rows) = self
            .query_tabular(&index_size_sql(
                &schema_table_string,
                num_index_to_collect_stats,
            ))
            .await?;

        let triples = find_columns(
            &index_size_columns,
            &index_size_rows,
            &["DATABASE_NAME", "TABLE_NAME", "INDEX_NAME"],
        );
        let schema_table_index_string = if triples.is_empty() {
            "((NULL,NULL,NULL))".to_string()
        } else {
            let entries: Vec<String> = triples
                .iter()
                .map(|t| format!("(\"{}\", \"{}\", \"{}\")", t[0], t[1], t[2]))
                .collect();
            format!("({})", entries.join(","))
        };

        let (index_stats_columns, index_stats_rows) = self
            .query_tabular(&index_stats_sql(&schema_table_index_string))
            .await?;
        let (index_usage_columns, index_usage_rows) = self
            .query_tabular(&index_usage_sql(&schema_table_index_string))
            .await?;

        let mut metrics = TabularMap::new();
        metrics.insert(
            "information_schema_STATISTICS".to_string(),
            TabularPayload {
                columns: index_stats_columns,
                rows: index_stats_rows,
            },
        );
        metrics.insert(
            "performance_schema_table_io_waits_summary_by_index_usage".to_string(),
            TabularPayload {
                columns: index_usage_columns,
                rows: index_usage_rows,
            },
        );
        metrics.insert(
            "indexes_size".to_string(),
            TabularPayload {
                columns: index_size_columns,
                rows: index_size_rows,
            },
        );
        Ok(metrics)
    }

    async fn collect_query_metrics(&mut self, num_query_to_collect: usize) -> Result<TabularMap> {
        let (columns, rows) = self
            .query_tabular(&query_stats_sql(num_query_to_collect))
            .await?;
        let mut metrics = TabularMap::new();
        metrics.insert(
            "events_statements_summary_by_digest".to_string(),
            TabularPayload { columns, rows },
        );
        Ok(metrics)
    }

    async fn collect_long_running_query(
        &mut self,
        num_query_to_collect: usize,
        latency_threshold_min: u32,
    ) -> Result<TabularMap> {
        // threshold minutes to picoseconds
        let timer_wait_ps = u64::from(latency_threshold_min) * 60_000_000_000_000;
        let (columns, rows) = self
            .query_tabular(&long_running_query_sql(timer_wait_ps, num_query_to_collect))
            .await?;
        let mut metrics = TabularMap::new();
        metrics.insert(
            "events_statements_current".to_string(),
            TabularPayload { columns, rows },
        );
        Ok(metrics)
    }

    async fn collect_schema(&mut self) -> Result<TabularMap> {
        let mut schema = TabularMap::new();
        for (name, sql) in [
            ("columns", columns_schema_sql()),
            ("indexes", index_schema_sql()),
            ("index_columns", index_columns_schema_sql()),
            ("foreign_keys", foreign_key_schema_sql()),
            ("tables", table_schema_sql()),
            ("views", view_schema_sql()),
        ] {
            let (columns, rows) = self.query_tabular(&sql).await?;
            schema.insert(name.to_string(), TabularPayload { columns, rows });
        }
        Ok(schema)
    }

    fn get_version(&self) -> &str {
        &self.version_str
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.disconnect()
                .await
                .map_err(|err| Error::MysqlCollector(format!("Failed to disconnect: {err}")))?;
        }
        Ok(())
    }
}
