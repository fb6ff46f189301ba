//! Database collectors for the OtterTune agent.
//!
//! A collector executes version-specific SQL against one target database and
//! returns structured payloads for the six collection kinds. The pipeline is
//! polymorphic over the [`Collector`] trait; engine quirks stay behind it.

use async_trait::async_trait;
use ot_core::payload::TabularMap;
use ot_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

pub mod bloat;
pub mod mock;
pub mod mysql;
pub mod postgres;
pub mod postgres_sql;
pub mod value;

pub use mock::MockCollector;
pub use mysql::MysqlCollector;
pub use postgres::PostgresCollector;

/// Default logical database for PostgreSQL targets when none is configured.
pub const DEFAULT_POSTGRES_DB: &str = "postgres";
/// Default schema for MySQL targets when none is configured.
pub const DEFAULT_MYSQL_DB: &str = "information_schema";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbType {
    Mysql,
    AuroraMysql,
    Postgres,
    AuroraPostgresql,
    Mock,
}

impl DbType {
    pub fn is_mysql(&self) -> bool {
        matches!(self, DbType::Mysql | DbType::AuroraMysql)
    }

    pub fn is_postgres(&self) -> bool {
        matches!(self, DbType::Postgres | DbType::AuroraPostgresql)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Mysql => "mysql",
            DbType::AuroraMysql => "aurora_mysql",
            DbType::Postgres => "postgres",
            DbType::AuroraPostgresql => "aurora_postgresql",
            DbType::Mock => "mock",
        }
    }
}

impl FromStr for DbType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mysql" => Ok(DbType::Mysql),
            "aurora_mysql" => Ok(DbType::AuroraMysql),
            "postgres" => Ok(DbType::Postgres),
            "aurora_postgresql" => Ok(DbType::AuroraPostgresql),
            "mock" => Ok(DbType::Mock),
            other => Err(Error::DbCollector(format!(
                "Database type {other} is not supported in the agent"
            ))),
        }
    }
}

/// Connection parameters for the factory. Credentials must already be
/// resolved by the caller: when IAM auth is enabled a fresh token replaces
/// `db_password` before every connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub db_type: DbType,
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: Option<String>,
    pub db_enable_ssl: bool,
    pub db_ssl_ca: Option<String>,
    pub db_ssl_cert: Option<String>,
    pub db_ssl_key: Option<String>,
}

impl ConnectionConfig {
    /// Logical database names for a PostgreSQL target. A comma-separated
    /// `db_name` fans out into one connection per entry; the first entry is
    /// the main database.
    pub fn postgres_db_names(&self) -> Vec<String> {
        self.db_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_POSTGRES_DB)
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

/// Outcome of one permission probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermissionInfo {
    pub query: String,
    pub success: bool,
    /// Example GRANT statement for the missing privilege.
    pub example: String,
}

/// Result of `check_permission`: overall success, per-query details, and a
/// human-readable summary for the startup log.
#[derive(Debug, Clone, Default)]
pub struct PermissionCheck {
    pub success: bool,
    pub results: Vec<PermissionInfo>,
    pub summary: String,
}

/// Per-logical-database target tables for PostgreSQL.
#[derive(Debug, Clone, PartialEq)]
pub struct PgTargetTables {
    /// relids of the top-N user tables by live row count.
    pub target_tables: Vec<u32>,
    /// Pre-quoted `(relid, ...)` list for IN clauses; `(0)` when empty.
    pub target_tables_str: String,
}

/// Target tables for MySQL: the selected `information_schema.TABLES` rows
/// plus the `(schema, table)` pairs for index lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct MysqlTargetTables {
    pub table_columns: Vec<String>,
    pub table_rows: Vec<Vec<Value>>,
    pub schema_table_pairs: Vec<(String, String)>,
}

/// Shared record between `get_target_table_info` and the table/index
/// collectors; keeps the selection policy in one place.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetTableInfo {
    Mysql(MysqlTargetTables),
    Postgres(BTreeMap<String, PgTargetTables>),
    Empty,
}

/// The capability set every engine variant implements. One collector owns
/// one connection (or one connection per logical database) for the duration
/// of a single pipeline tick.
#[async_trait]
pub trait Collector: Send {
    /// Run each required read against the server. Permission failures mark
    /// the query `success=false` with an example GRANT; remaining queries
    /// still run.
    async fn check_permission(&mut self) -> Result<PermissionCheck>;

    /// `{global: {global: {name -> value}}, local: null}`.
    async fn collect_knobs(&mut self) -> Result<Value>;

    /// Global counters plus engine-specific local aggregations.
    async fn collect_metrics(&mut self) -> Result<Value>;

    /// Distribution of live-row counts bucketed by powers of ten.
    /// MySQL returns an empty map.
    async fn collect_table_row_number_stats(&mut self) -> Result<Value>;

    /// Select the top-N tables by live-row count.
    async fn get_target_table_info(
        &mut self,
        num_table_to_collect_stats: usize,
    ) -> Result<TargetTableInfo>;

    async fn collect_table_level_metrics(
        &mut self,
        target_table_info: &TargetTableInfo,
    ) -> Result<TabularMap>;

    async fn collect_index_metrics(
        &mut self,
        target_table_info: &TargetTableInfo,
        num_index_to_collect_stats: usize,
    ) -> Result<TabularMap>;

    /// Top-M rows from the engine's statement digest table.
    async fn collect_query_metrics(&mut self, num_query_to_collect: usize) -> Result<TabularMap>;

    /// Active statements whose elapsed time exceeds the threshold.
    async fn collect_long_running_query(
        &mut self,
        num_query_to_collect: usize,
        latency_threshold_min: u32,
    ) -> Result<TabularMap>;

    /// Tabular payloads for columns, indexes, index_columns, foreign_keys,
    /// tables, and views.
    async fn collect_schema(&mut self) -> Result<TabularMap>;

    fn get_version(&self) -> &str;

    /// Release the underlying connection(s). Called on every exit path of a
    /// pipeline tick.
    async fn close(&mut self) -> Result<()>;
}

fn stub_collector_enabled() -> bool {
    std::env::var("STUB_COLLECTOR")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Build the collector for the configured database type, connecting to the
/// target and resolving its server version. Callers must `close()` the
/// collector when the tick finishes.
pub async fn get_collector(conf: &ConnectionConfig) -> Result<Box<dyn Collector>> {
    if conf.db_type == DbType::Mock || stub_collector_enabled() {
        return Ok(Box::new(MockCollector::new()));
    }

    match conf.db_type {
        DbType::Mysql | DbType::AuroraMysql => {
            let conn = mysql::connect(conf).await?;
            let (conn, version) = mysql::server_version(conn).await?;
            Ok(Box::new(MysqlCollector::new(conn, version)))
        }
        DbType::Postgres | DbType::AuroraPostgresql => {
            let db_names = conf.postgres_db_names();
            let mut conns = Vec::with_capacity(db_names.len());
            for logical_database in &db_names {
                let client = postgres::connect(conf, logical_database).await?;
                conns.push((logical_database.clone(), client));
            }
            let main_db = db_names[0].clone();
            let version = postgres::server_version(&conns[0].1).await?;
            Ok(Box::new(PostgresCollector::new(conns, main_db, version)))
        }
        DbType::Mock => unreachable!("handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_type_parses_known_values() {
        assert_eq!("mysql".parse::<DbType>().unwrap(), DbType::Mysql);
        assert_eq!(
            "aurora_postgresql".parse::<DbType>().unwrap(),
            DbType::AuroraPostgresql
        );
        assert_eq!("mock".parse::<DbType>().unwrap(), DbType::Mock);
        assert!("oracle".parse::<DbType>().is_err());
    }

    #[test]
    fn postgres_db_names_split_on_commas() {
        let conf = ConnectionConfig {
            db_type: DbType::Postgres,
            db_host: "localhost".into(),
            db_port: 5432,
            db_user: "agent".into(),
            db_password: "secret".into(),
            db_name: Some("a, b".into()),
            db_enable_ssl: false,
            db_ssl_ca: None,
            db_ssl_cert: None,
            db_ssl_key: None,
        };
        assert_eq!(conf.postgres_db_names(), vec!["a", "b"]);
    }

    #[test]
    fn postgres_db_names_default() {
        let conf = ConnectionConfig {
            db_type: DbType::Postgres,
            db_host: "localhost".into(),
            db_port: 5432,
            db_user: "agent".into(),
            db_password: "secret".into(),
            db_name: None,
            db_enable_ssl: false,
            db_ssl_ca: None,
            db_ssl_cert: None,
            db_ssl_key: None,
        };
        assert_eq!(conf.postgres_db_names(), vec![DEFAULT_POSTGRES_DB]);
    }
}
