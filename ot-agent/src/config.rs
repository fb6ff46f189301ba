//! Driver configuration.
//!
//! The immutable [`DriverConfig`] record is produced once at startup by
//! [`DriverConfigBuilder`], which fuses five layers in a fixed order:
//! file, cloud-provider discovery, cloud-metrics catalog, command line,
//! environment, and runtime overrides. Later layers overwrite earlier ones
//! key-for-key; a `None` override never erases a set value. Validation is
//! total on the final record and failures are fatal at startup.

use clap::Parser;
use ot_cloud::RdsClient;
use ot_collector::{ConnectionConfig, DbType};
use ot_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use validator::Validate;

/// Environment variable naming the PostgreSQL logical databases to monitor.
pub const POSTGRES_DB_LIST_ENV: &str = "POSTGRES_OTTERTUNE_DB_NAME";

const DEFAULT_CATALOG_DIR: &str = "./config/cloudwatch_metrics";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub server_url: String,

    pub db_identifier: String,
    pub db_cluster_identifier: Option<String>,
    pub aws_region: String,

    pub db_type: DbType,
    pub db_host: String,
    pub db_port: u16,
    /// Normalized engine version: dots and dashes replaced by underscores.
    pub db_version: String,
    pub db_user: String,
    pub db_password: String,
    /// When set, the password is replaced by a fresh IAM auth token
    /// immediately before every connection.
    pub enable_aws_iam_auth: bool,
    pub db_name: Option<String>,
    pub postgres_db_list: Option<Vec<String>>,

    pub api_key: String,
    pub db_key: String,
    pub organization_id: String,

    pub monitor_interval: u64,
    pub table_level_monitor_interval: u64,
    pub long_running_query_monitor_interval: u64,
    pub query_monitor_interval: u64,
    pub schema_monitor_interval: u64,
    pub agent_health_report_interval: u64,

    pub lr_query_latency_threshold_min: u32,

    pub metric_source: Vec<String>,
    pub metrics_to_retrieve_from_source: BTreeMap<String, Vec<String>>,

    pub disable_table_level_stats: bool,
    pub num_table_to_collect_stats: usize,
    pub disable_index_stats: bool,
    pub num_index_to_collect_stats: usize,
    pub disable_long_running_query_monitoring: bool,
    pub disable_query_monitoring: bool,
    pub num_query_to_collect: usize,
    pub disable_schema_monitoring: bool,

    pub db_non_default_parameters: Vec<String>,

    pub enable_s3: bool,
    pub s3_bucket_name: String,

    pub db_enable_ssl: bool,
    pub db_ssl_ca: Option<String>,
    pub db_ssl_cert: Option<String>,
    pub db_ssl_key: Option<String>,
}

impl DriverConfig {
    /// Connection parameters for the collector factory. IAM credentials are
    /// resolved by the caller right before connecting.
    pub fn connection_config(&self) -> ConnectionConfig {
        let db_name = self
            .postgres_db_list
            .as_ref()
            .filter(|list| !list.is_empty() && self.db_type.is_postgres())
            .map(|list| list.join(","))
            .or_else(|| self.db_name.clone());
        ConnectionConfig {
            db_type: self.db_type,
            db_host: self.db_host.clone(),
            db_port: self.db_port,
            db_user: self.db_user.clone(),
            db_password: self.db_password.clone(),
            db_name,
            db_enable_ssl: self.db_enable_ssl,
            db_ssl_ca: self.db_ssl_ca.clone(),
            db_ssl_cert: self.db_ssl_cert.clone(),
            db_ssl_key: self.db_ssl_key.clone(),
        }
    }

    /// Range and consistency checks over the final record; every failure
    /// names the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.monitor_interval < 60 {
            return Err(field_error("monitor_interval", "at least 60 seconds", self.monitor_interval));
        }
        if self.table_level_monitor_interval < 300 {
            return Err(field_error(
                "table_level_monitor_interval",
                "at least 300 seconds",
                self.table_level_monitor_interval,
            ));
        }
        if self.long_running_query_monitor_interval < 60 {
            return Err(field_error(
                "long_running_query_monitor_interval",
                "at least 60 seconds",
                self.long_running_query_monitor_interval,
            ));
        }
        if self.query_monitor_interval < 300 {
            return Err(field_error(
                "query_monitor_interval",
                "at least 300 seconds",
                self.query_monitor_interval,
            ));
        }
        if self.schema_monitor_interval < 300 {
            return Err(field_error(
                "schema_monitor_interval",
                "at least 300 seconds",
                self.schema_monitor_interval,
            ));
        }
        if self.agent_health_report_interval == 0 {
            return Err(field_error(
                "agent_health_report_interval",
                "a positive value",
                self.agent_health_report_interval,
            ));
        }
        if self.lr_query_latency_threshold_min < 1 {
            return Err(field_error(
                "lr_query_latency_threshold_min",
                "at least 1 minute",
                self.lr_query_latency_threshold_min,
            ));
        }
        if self.db_password.is_empty() && !self.enable_aws_iam_auth {
            return Err(Error::Config(
                "invalid driver option db_password: empty password requires enable_aws_iam_auth"
                    .into(),
            ));
        }
        if self.db_enable_ssl
            && !option_set(&self.db_ssl_ca)
            && !option_set(&self.db_ssl_cert)
            && !option_set(&self.db_ssl_key)
        {
            return Err(Error::Config(
                "invalid driver option db_ssl_ca: SSL is enabled but no CA, certificate, or key \
                 is configured"
                    .into(),
            ));
        }
        if self.enable_s3 && self.s3_bucket_name.is_empty() {
            return Err(Error::Config(
                "invalid driver option s3_bucket_name: required when enable_s3 is set".into(),
            ));
        }
        Ok(())
    }
}

fn option_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

fn field_error<T: std::fmt::Display>(field: &str, expectation: &str, found: T) -> Error {
    Error::Config(format!(
        "invalid driver option {field}: {expectation} is expected, but {found} is found"
    ))
}

/// Startup flags.
#[derive(Parser, Debug, Clone)]
#[command(name = "ot-agent", about = "Provide driver configuration", version)]
pub struct Args {
    /// Logging level: DEBUG, INFO, WARNING, ...
    #[arg(long, default_value = "INFO")]
    pub log_verbosity: String,

    /// Path to the driver configuration file
    #[arg(long)]
    pub config: PathBuf,

    /// AWS region of the database and its CloudWatch metrics, e.g. us-east-2
    #[arg(long)]
    pub aws_region: String,

    /// AWS RDS database identifier
    #[arg(long)]
    pub db_identifier: String,

    /// Username used for the database connection
    #[arg(long)]
    pub db_username: String,

    /// Password used for the database connection; may be empty with IAM auth
    #[arg(long, default_value = "")]
    pub db_password: String,

    /// Authenticate with a short-lived IAM token instead of the password
    #[arg(long, action = clap::ArgAction::Set, default_value_t = false)]
    pub enable_aws_iam_auth: bool,

    /// API key used to identify the OtterTune user
    #[arg(long)]
    pub api_key: String,

    /// Key used to identify the database to OtterTune
    #[arg(long)]
    pub db_key: String,

    /// Organization id in OtterTune
    #[arg(long)]
    pub organization_id: String,

    /// Ship observations to S3 instead of the compute service
    #[arg(long, action = clap::ArgAction::Set, default_value_t = false)]
    pub enable_s3: bool,

    #[arg(long, default_value = "")]
    pub s3_bucket_name: String,

    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub disable_table_level_stats: bool,

    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub disable_index_stats: bool,

    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub disable_long_running_query_monitoring: bool,

    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub disable_query_monitoring: bool,

    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub disable_schema_monitoring: bool,

    /// Override the file setting for how often to collect new data (seconds)
    #[arg(long)]
    pub override_monitor_interval: Option<u64>,

    /// Override the file setting for the observation endpoint
    #[arg(long)]
    pub override_server_url: Option<String>,

    #[arg(long)]
    pub override_table_level_monitor_interval: Option<u64>,

    #[arg(long)]
    pub override_long_running_query_monitor_interval: Option<u64>,

    #[arg(long)]
    pub override_query_monitor_interval: Option<u64>,

    #[arg(long)]
    pub override_schema_monitor_interval: Option<u64>,

    #[arg(long)]
    pub override_agent_health_report_interval: Option<u64>,

    #[arg(long)]
    pub override_num_table_to_collect_stats: Option<usize>,

    #[arg(long)]
    pub override_num_index_to_collect_stats: Option<usize>,

    #[arg(long)]
    pub override_num_query_to_collect: Option<usize>,

    #[arg(long)]
    pub override_lr_query_latency_threshold_min: Option<u32>,
}

/// Runtime overrides for file settings, useful when running in a container.
/// `None` values never overwrite a configured value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub monitor_interval: Option<u64>,
    pub server_url: Option<String>,
    pub table_level_monitor_interval: Option<u64>,
    pub long_running_query_monitor_interval: Option<u64>,
    pub query_monitor_interval: Option<u64>,
    pub schema_monitor_interval: Option<u64>,
    pub agent_health_report_interval: Option<u64>,
    pub num_table_to_collect_stats: Option<usize>,
    pub num_index_to_collect_stats: Option<usize>,
    pub num_query_to_collect: Option<usize>,
    pub lr_query_latency_threshold_min: Option<u32>,
}

impl Overrides {
    pub fn from_args(args: &Args) -> Self {
        Self {
            monitor_interval: args.override_monitor_interval,
            server_url: args.override_server_url.clone(),
            table_level_monitor_interval: args.override_table_level_monitor_interval,
            long_running_query_monitor_interval: args.override_long_running_query_monitor_interval,
            query_monitor_interval: args.override_query_monitor_interval,
            schema_monitor_interval: args.override_schema_monitor_interval,
            agent_health_report_interval: args.override_agent_health_report_interval,
            num_table_to_collect_stats: args.override_num_table_to_collect_stats,
            num_index_to_collect_stats: args.override_num_index_to_collect_stats,
            num_query_to_collect: args.override_num_query_to_collect,
            lr_query_latency_threshold_min: args.override_lr_query_latency_threshold_min,
        }
    }
}

/// Driver options read from the configuration file. Validates missing keys,
/// wrong types, and out-of-range values before the layer is applied.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ConfigFromFile {
    pub server_url: String,
    pub metric_source: Vec<String>,

    #[validate(range(min = 60, message = "at least 60 seconds is expected"))]
    pub monitor_interval: u64,
    #[validate(range(min = 300, message = "at least 300 seconds is expected"))]
    pub table_level_monitor_interval: u64,
    #[validate(range(min = 60, message = "at least 60 seconds is expected"))]
    pub long_running_query_monitor_interval: u64,
    #[validate(range(min = 300, message = "at least 300 seconds is expected"))]
    pub query_monitor_interval: u64,
    #[validate(range(min = 300, message = "at least 300 seconds is expected"))]
    pub schema_monitor_interval: u64,
    #[validate(range(min = 1, message = "a positive value is expected"))]
    pub agent_health_report_interval: u64,

    pub num_table_to_collect_stats: usize,
    pub num_index_to_collect_stats: usize,
    pub num_query_to_collect: usize,
    #[validate(range(min = 1, message = "at least 1 minute is expected"))]
    pub lr_query_latency_threshold_min: u32,

    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub db_cluster_identifier: Option<String>,
    #[serde(default)]
    pub disable_table_level_stats: Option<bool>,
    #[serde(default)]
    pub disable_index_stats: Option<bool>,
    #[serde(default)]
    pub disable_long_running_query_monitoring: Option<bool>,
    #[serde(default)]
    pub disable_query_monitoring: Option<bool>,
    #[serde(default)]
    pub disable_schema_monitoring: Option<bool>,
    #[serde(default)]
    pub db_enable_ssl: Option<bool>,
    #[serde(default)]
    pub db_ssl_ca: Option<String>,
    #[serde(default)]
    pub db_ssl_cert: Option<String>,
    #[serde(default)]
    pub db_ssl_key: Option<String>,
}

/// One catalog entry; only the name is consumed.
#[derive(Debug, Deserialize)]
struct CatalogMetric {
    name: String,
}

/// File-name key for the cloud-metrics catalog: `rds_{db_type}-{version}`
/// with the engine-specific version rules applied to the already-normalized
/// version string.
pub fn metrics_catalog_key(db_type: &str, db_version: &str) -> String {
    let mut version = db_version.to_string();
    if db_type == "aurora_mysql" {
        // e.g. 5_7_mysql_aurora_2_11_1 keeps the release_major prefix
        version = version
            .split("_mysql")
            .next()
            .unwrap_or(&version)
            .to_string();
    }
    if db_type == "aurora_postgresql" {
        version = version
            .split("_postgres")
            .next()
            .unwrap_or(&version)
            .to_string();
    }
    if db_type.contains("postgres") {
        // drop the minor version except for 9_6
        if version.starts_with("9_6") {
            version = "9_6".to_string();
        } else {
            version = version.split('_').next().unwrap_or(&version).to_string();
        }
    } else if db_type.contains("mysql") {
        // keep release_major only
        let mut segments = version.split('_');
        let release = segments.next().unwrap_or_default();
        let major = segments.next().unwrap_or_default();
        version = format!("{release}_{major}");
    }
    format!("rds_{db_type}-{version}")
}

#[derive(Debug, Clone, Default)]
struct PartialDriverConfig {
    server_url: Option<String>,
    db_identifier: Option<String>,
    db_cluster_identifier: Option<String>,
    aws_region: Option<String>,
    db_type: Option<String>,
    db_host: Option<String>,
    db_port: Option<u16>,
    db_version: Option<String>,
    db_user: Option<String>,
    db_password: Option<String>,
    enable_aws_iam_auth: Option<bool>,
    db_name: Option<String>,
    postgres_db_list: Option<Vec<String>>,
    api_key: Option<String>,
    db_key: Option<String>,
    organization_id: Option<String>,
    monitor_interval: Option<u64>,
    table_level_monitor_interval: Option<u64>,
    long_running_query_monitor_interval: Option<u64>,
    query_monitor_interval: Option<u64>,
    schema_monitor_interval: Option<u64>,
    agent_health_report_interval: Option<u64>,
    lr_query_latency_threshold_min: Option<u32>,
    metric_source: Option<Vec<String>>,
    metrics_to_retrieve_from_source: Option<BTreeMap<String, Vec<String>>>,
    disable_table_level_stats: Option<bool>,
    num_table_to_collect_stats: Option<usize>,
    disable_index_stats: Option<bool>,
    num_index_to_collect_stats: Option<usize>,
    disable_long_running_query_monitoring: Option<bool>,
    disable_query_monitoring: Option<bool>,
    num_query_to_collect: Option<usize>,
    disable_schema_monitoring: Option<bool>,
    db_non_default_parameters: Option<Vec<String>>,
    enable_s3: Option<bool>,
    s3_bucket_name: Option<String>,
    db_enable_ssl: Option<bool>,
    db_ssl_ca: Option<String>,
    db_ssl_cert: Option<String>,
    db_ssl_key: Option<String>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| Error::Config(format!("driver option {field} is missing")))
}

/// Builds the driver configuration layer by layer.
#[derive(Debug, Default)]
pub struct DriverConfigBuilder {
    config: PartialDriverConfig,
    catalog_dir: PathBuf,
}

impl DriverConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PartialDriverConfig::default(),
            catalog_dir: PathBuf::from(DEFAULT_CATALOG_DIR),
        }
    }

    /// Directory holding the cloud-metrics catalog files.
    pub fn with_catalog_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.catalog_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Layer 1: the configuration file.
    pub fn from_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            Error::Config(format!(
                "failed to read configuration file {}: {err}",
                path.as_ref().display()
            ))
        })?;
        let file_config: ConfigFromFile = serde_yaml::from_str(&raw).map_err(|err| {
            Error::Config(format!(
                "the driver option from file is missing or invalid: {err}"
            ))
        })?;
        file_config.validate().map_err(|err| {
            Error::Config(format!("invalid driver option from file: {err}"))
        })?;

        let config = &mut self.config;
        config.server_url = Some(file_config.server_url);
        config.metric_source = Some(file_config.metric_source);
        config.monitor_interval = Some(file_config.monitor_interval);
        config.table_level_monitor_interval = Some(file_config.table_level_monitor_interval);
        config.long_running_query_monitor_interval =
            Some(file_config.long_running_query_monitor_interval);
        config.query_monitor_interval = Some(file_config.query_monitor_interval);
        config.schema_monitor_interval = Some(file_config.schema_monitor_interval);
        config.agent_health_report_interval = Some(file_config.agent_health_report_interval);
        config.num_table_to_collect_stats = Some(file_config.num_table_to_collect_stats);
        config.num_index_to_collect_stats = Some(file_config.num_index_to_collect_stats);
        config.num_query_to_collect = Some(file_config.num_query_to_collect);
        config.lr_query_latency_threshold_min = Some(file_config.lr_query_latency_threshold_min);
        set_if_some(&mut config.db_name, file_config.db_name);
        set_if_some(&mut config.db_cluster_identifier, file_config.db_cluster_identifier);
        set_if_some(&mut config.disable_table_level_stats, file_config.disable_table_level_stats);
        set_if_some(&mut config.disable_index_stats, file_config.disable_index_stats);
        set_if_some(
            &mut config.disable_long_running_query_monitoring,
            file_config.disable_long_running_query_monitoring,
        );
        set_if_some(
            &mut config.disable_query_monitoring,
            file_config.disable_query_monitoring,
        );
        set_if_some(
            &mut config.disable_schema_monitoring,
            file_config.disable_schema_monitoring,
        );
        set_if_some(&mut config.db_enable_ssl, file_config.db_enable_ssl);
        set_if_some(&mut config.db_ssl_ca, file_config.db_ssl_ca);
        set_if_some(&mut config.db_ssl_cert, file_config.db_ssl_cert);
        set_if_some(&mut config.db_ssl_key, file_config.db_ssl_key);
        Ok(self)
    }

    /// Layer 2: cloud-provider discovery. Resolves host, port, version,
    /// engine type, and the user-modified parameter list from the RDS
    /// description of the instance.
    pub async fn from_rds(mut self, rds: &RdsClient, db_instance_identifier: &str) -> Result<Self> {
        self.config.db_identifier = Some(db_instance_identifier.to_string());
        self.config.db_host = Some(rds.db_host(db_instance_identifier).await?);
        self.config.db_port = Some(rds.db_port(db_instance_identifier).await?);
        self.config.db_version = Some(rds.db_version(db_instance_identifier).await?);
        self.config.db_type = Some(rds.db_type(db_instance_identifier).await?);
        self.config.db_non_default_parameters =
            Some(rds.db_non_default_parameters(db_instance_identifier).await?);
        Ok(self)
    }

    /// Layer 3: the cloud-metrics catalog keyed by `{db_type}-{db_version}`.
    /// Requires the discovery layer to have run.
    pub fn from_cloudwatch_metrics(mut self) -> Result<Self> {
        let db_type = self
            .config
            .db_type
            .clone()
            .ok_or_else(|| Error::Config("driver option db_type is missing".into()))?;
        let db_version = self
            .config
            .db_version
            .clone()
            .ok_or_else(|| Error::Config("driver option db_version is missing".into()))?;

        let key = metrics_catalog_key(&db_type, &db_version);
        let instance_metrics = self.read_catalog(&format!("{key}.json"), true)?;
        let cluster_metrics = self.read_catalog(&format!("{key}_cluster.json"), false)?;

        let mut mapping = BTreeMap::new();
        mapping.insert("cloudwatch".to_string(), instance_metrics);
        mapping.insert("cloudwatch_cluster".to_string(), cluster_metrics);
        self.config.metrics_to_retrieve_from_source = Some(mapping);
        Ok(self)
    }

    fn read_catalog(&self, file_name: &str, required_file: bool) -> Result<Vec<String>> {
        let path = self.catalog_dir.join(file_name);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if !required_file => {
                tracing::debug!(path = %path.display(), %err, "no cluster metrics catalog");
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(Error::Config(format!(
                    "failed to read cloudwatch metrics catalog {}: {err}",
                    path.display()
                )));
            }
        };
        let metrics: Vec<CatalogMetric> = serde_json::from_str(&raw).map_err(|err| {
            Error::Config(format!(
                "invalid cloudwatch metrics catalog {}: {err}",
                path.display()
            ))
        })?;
        Ok(metrics.into_iter().map(|metric| metric.name).collect())
    }

    /// Layer 4: command-line arguments.
    pub fn from_command_line(mut self, args: &Args) -> Self {
        let config = &mut self.config;
        config.aws_region = Some(args.aws_region.clone());
        config.db_identifier = Some(args.db_identifier.clone());
        config.db_user = Some(args.db_username.clone());
        config.db_password = Some(args.db_password.clone());
        config.enable_aws_iam_auth = Some(args.enable_aws_iam_auth);
        config.api_key = Some(args.api_key.clone());
        config.db_key = Some(args.db_key.clone());
        config.organization_id = Some(args.organization_id.clone());
        config.enable_s3 = Some(args.enable_s3);
        config.s3_bucket_name = Some(args.s3_bucket_name.clone());
        if args.disable_table_level_stats {
            config.disable_table_level_stats = Some(true);
        }
        if args.disable_index_stats {
            config.disable_index_stats = Some(true);
        }
        if args.disable_long_running_query_monitoring {
            config.disable_long_running_query_monitoring = Some(true);
        }
        if args.disable_query_monitoring {
            config.disable_query_monitoring = Some(true);
        }
        if args.disable_schema_monitoring {
            config.disable_schema_monitoring = Some(true);
        }
        self
    }

    /// Layer 5: the environment. `POSTGRES_OTTERTUNE_DB_NAME` lists the
    /// logical databases for a PostgreSQL target and is ignored for MySQL.
    pub fn from_env(self) -> Self {
        let db_list = std::env::var(POSTGRES_DB_LIST_ENV).ok();
        self.from_env_value(db_list)
    }

    fn from_env_value(mut self, db_list: Option<String>) -> Self {
        let Some(raw) = db_list.filter(|v| !v.trim().is_empty()) else {
            return self;
        };
        let is_postgres = self
            .config
            .db_type
            .as_deref()
            .is_some_and(|db_type| db_type.contains("postgres"));
        if !is_postgres {
            tracing::debug!(
                "{POSTGRES_DB_LIST_ENV} is set but the target is not PostgreSQL; ignoring"
            );
            return self;
        }
        let names: Vec<String> = raw
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        if !names.is_empty() {
            self.config.postgres_db_list = Some(names);
        }
        self
    }

    /// Layer 6: runtime overrides. `None` never overwrites a set value.
    pub fn from_overrides(mut self, overrides: &Overrides) -> Self {
        let config = &mut self.config;
        set_if_some(&mut config.monitor_interval, overrides.monitor_interval);
        set_if_some(&mut config.server_url, overrides.server_url.clone());
        set_if_some(
            &mut config.table_level_monitor_interval,
            overrides.table_level_monitor_interval,
        );
        set_if_some(
            &mut config.long_running_query_monitor_interval,
            overrides.long_running_query_monitor_interval,
        );
        set_if_some(
            &mut config.query_monitor_interval,
            overrides.query_monitor_interval,
        );
        set_if_some(
            &mut config.schema_monitor_interval,
            overrides.schema_monitor_interval,
        );
        set_if_some(
            &mut config.agent_health_report_interval,
            overrides.agent_health_report_interval,
        );
        set_if_some(
            &mut config.num_table_to_collect_stats,
            overrides.num_table_to_collect_stats,
        );
        set_if_some(
            &mut config.num_index_to_collect_stats,
            overrides.num_index_to_collect_stats,
        );
        set_if_some(
            &mut config.num_query_to_collect,
            overrides.num_query_to_collect,
        );
        set_if_some(
            &mut config.lr_query_latency_threshold_min,
            overrides.lr_query_latency_threshold_min,
        );
        self
    }

    /// Produce and validate the final record.
    pub fn get_config(self) -> Result<DriverConfig> {
        let partial = self.config;
        let db_type_str = required(partial.db_type, "db_type")?;
        let db_type = DbType::from_str(&db_type_str)
            .map_err(|err| Error::Config(format!("invalid driver option db_type: {err}")))?;

        let config = DriverConfig {
            server_url: required(partial.server_url, "server_url")?,
            db_identifier: required(partial.db_identifier, "db_identifier")?,
            db_cluster_identifier: partial.db_cluster_identifier,
            aws_region: required(partial.aws_region, "aws_region")?,
            db_type,
            db_host: required(partial.db_host, "db_host")?,
            db_port: required(partial.db_port, "db_port")?,
            db_version: required(partial.db_version, "db_version")?,
            db_user: required(partial.db_user, "db_user")?,
            db_password: partial.db_password.unwrap_or_default(),
            enable_aws_iam_auth: partial.enable_aws_iam_auth.unwrap_or(false),
            db_name: partial.db_name,
            postgres_db_list: partial.postgres_db_list,
            api_key: required(partial.api_key, "api_key")?,
            db_key: required(partial.db_key, "db_key")?,
            organization_id: required(partial.organization_id, "organization_id")?,
            monitor_interval: required(partial.monitor_interval, "monitor_interval")?,
            table_level_monitor_interval: required(
                partial.table_level_monitor_interval,
                "table_level_monitor_interval",
            )?,
            long_running_query_monitor_interval: required(
                partial.long_running_query_monitor_interval,
                "long_running_query_monitor_interval",
            )?,
            query_monitor_interval: required(
                partial.query_monitor_interval,
                "query_monitor_interval",
            )?,
            schema_monitor_interval: required(
                partial.schema_monitor_interval,
                "schema_monitor_interval",
            )?,
            agent_health_report_interval: required(
                partial.agent_health_report_interval,
                "agent_health_report_interval",
            )?,
            lr_query_latency_threshold_min: required(
                partial.lr_query_latency_threshold_min,
                "lr_query_latency_threshold_min",
            )?,
            metric_source: required(partial.metric_source, "metric_source")?,
            metrics_to_retrieve_from_source: partial
                .metrics_to_retrieve_from_source
                .unwrap_or_default(),
            disable_table_level_stats: partial.disable_table_level_stats.unwrap_or(false),
            num_table_to_collect_stats: required(
                partial.num_table_to_collect_stats,
                "num_table_to_collect_stats",
            )?,
            disable_index_stats: partial.disable_index_stats.unwrap_or(false),
            num_index_to_collect_stats: required(
                partial.num_index_to_collect_stats,
                "num_index_to_collect_stats",
            )?,
            disable_long_running_query_monitoring: partial
                .disable_long_running_query_monitoring
                .unwrap_or(false),
            disable_query_monitoring: partial.disable_query_monitoring.unwrap_or(false),
            num_query_to_collect: required(partial.num_query_to_collect, "num_query_to_collect")?,
            disable_schema_monitoring: partial.disable_schema_monitoring.unwrap_or(false),
            db_non_default_parameters: partial.db_non_default_parameters.unwrap_or_default(),
            enable_s3: partial.enable_s3.unwrap_or(false),
            s3_bucket_name: partial.s3_bucket_name.unwrap_or_default(),
            db_enable_ssl: partial.db_enable_ssl.unwrap_or(false),
            db_ssl_ca: partial.db_ssl_ca,
            db_ssl_cert: partial.db_ssl_cert,
            db_ssl_key: partial.db_ssl_key,
        };
        config.validate()?;
        Ok(config)
    }
}

fn set_if_some<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_key_for_mysql_keeps_release_major() {
        assert_eq!(metrics_catalog_key("mysql", "8_0_28"), "rds_mysql-8_0");
        assert_eq!(metrics_catalog_key("mysql", "5_7_34"), "rds_mysql-5_7");
    }

    #[test]
    fn catalog_key_for_aurora_mysql_strips_aurora_suffix() {
        assert_eq!(
            metrics_catalog_key("aurora_mysql", "5_7_mysql_aurora_2_11_1"),
            "rds_aurora_mysql-5_7"
        );
        assert_eq!(
            metrics_catalog_key("aurora_mysql", "8_0_mysql_aurora_3_02_2"),
            "rds_aurora_mysql-8_0"
        );
    }

    #[test]
    fn catalog_key_for_postgres_drops_minor_except_9_6() {
        assert_eq!(metrics_catalog_key("postgres", "13_4"), "rds_postgres-13");
        assert_eq!(metrics_catalog_key("postgres", "9_6_24"), "rds_postgres-9_6");
        assert_eq!(metrics_catalog_key("postgres", "14_2"), "rds_postgres-14");
    }

    #[test]
    fn catalog_key_for_aurora_postgresql_uses_major_only() {
        assert_eq!(
            metrics_catalog_key("aurora_postgresql", "13_7"),
            "rds_aurora_postgresql-13"
        );
    }

    fn base_config() -> DriverConfig {
        DriverConfig {
            server_url: "https://api.ottertune.com".into(),
            db_identifier: "prod-db".into(),
            db_cluster_identifier: None,
            aws_region: "us-east-2".into(),
            db_type: DbType::Postgres,
            db_host: "localhost".into(),
            db_port: 5432,
            db_version: "13_4".into(),
            db_user: "agent".into(),
            db_password: "secret".into(),
            enable_aws_iam_auth: false,
            db_name: None,
            postgres_db_list: None,
            api_key: "api".into(),
            db_key: "db".into(),
            organization_id: "org".into(),
            monitor_interval: 60,
            table_level_monitor_interval: 300,
            long_running_query_monitor_interval: 60,
            query_monitor_interval: 3600,
            schema_monitor_interval: 3600,
            agent_health_report_interval: 60,
            lr_query_latency_threshold_min: 5,
            metric_source: vec!["cloudwatch".into()],
            metrics_to_retrieve_from_source: BTreeMap::new(),
            disable_table_level_stats: false,
            num_table_to_collect_stats: 10,
            disable_index_stats: false,
            num_index_to_collect_stats: 100,
            disable_long_running_query_monitoring: false,
            disable_query_monitoring: false,
            num_query_to_collect: 1000,
            disable_schema_monitoring: false,
            db_non_default_parameters: vec![],
            enable_s3: false,
            s3_bucket_name: String::new(),
            db_enable_ssl: false,
            db_ssl_ca: None,
            db_ssl_cert: None,
            db_ssl_key: None,
        }
    }

    #[test]
    fn validation_names_the_offending_field() {
        let mut config = base_config();
        config.monitor_interval = 30;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("monitor_interval"), "got: {err}");

        let mut config = base_config();
        config.table_level_monitor_interval = 100;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("table_level_monitor_interval"), "got: {err}");

        let mut config = base_config();
        config.lr_query_latency_threshold_min = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("lr_query_latency_threshold_min"), "got: {err}");
    }

    #[test]
    fn empty_password_requires_iam_auth() {
        let mut config = base_config();
        config.db_password = String::new();
        assert!(config.validate().is_err());
        config.enable_aws_iam_auth = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn ssl_requires_at_least_one_credential_file() {
        let mut config = base_config();
        config.db_enable_ssl = true;
        assert!(config.validate().is_err());
        config.db_ssl_ca = Some("/etc/ssl/rds-ca.pem".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn s3_sink_requires_a_bucket() {
        let mut config = base_config();
        config.enable_s3 = true;
        assert!(config.validate().is_err());
        config.s3_bucket_name = "customer-database-observations".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overrides_never_erase_set_values() {
        let mut builder = DriverConfigBuilder::new();
        builder.config.monitor_interval = Some(120);
        builder.config.server_url = Some("https://api.ottertune.com".into());
        let builder = builder.from_overrides(&Overrides {
            monitor_interval: None,
            server_url: Some("https://staging.ottertune.com".into()),
            ..Overrides::default()
        });
        assert_eq!(builder.config.monitor_interval, Some(120));
        assert_eq!(
            builder.config.server_url.as_deref(),
            Some("https://staging.ottertune.com")
        );
    }

    #[test]
    fn env_layer_only_applies_to_postgres() {
        let mut builder = DriverConfigBuilder::new();
        builder.config.db_type = Some("mysql".into());
        let builder = builder.from_env_value(Some("a,b".into()));
        assert!(builder.config.postgres_db_list.is_none());

        let mut builder = DriverConfigBuilder::new();
        builder.config.db_type = Some("aurora_postgresql".into());
        let builder = builder.from_env_value(Some("a, b".into()));
        assert_eq!(
            builder.config.postgres_db_list,
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn connection_config_prefers_postgres_db_list() {
        let mut config = base_config();
        config.db_name = Some("main".into());
        config.postgres_db_list = Some(vec!["a".into(), "b".into()]);
        assert_eq!(config.connection_config().db_name.as_deref(), Some("a,b"));

        config.postgres_db_list = None;
        assert_eq!(config.connection_config().db_name.as_deref(), Some("main"));
    }

    #[test]
    fn config_file_parses_and_validates() {
        let yaml = r#"
server_url: https://api.ottertune.com
metric_source:
  - cloudwatch
monitor_interval: 60
table_level_monitor_interval: 300
long_running_query_monitor_interval: 60
query_monitor_interval: 3600
schema_monitor_interval: 3600
agent_health_report_interval: 60
num_table_to_collect_stats: 10
num_index_to_collect_stats: 100
num_query_to_collect: 1000
lr_query_latency_threshold_min: 5
"#;
        let parsed: ConfigFromFile = serde_yaml::from_str(yaml).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.monitor_interval, 60);

        let bad = yaml.replace("monitor_interval: 60", "monitor_interval: 30");
        let parsed: ConfigFromFile = serde_yaml::from_str(&bad).unwrap();
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn cloudwatch_metrics_layer_reads_catalog_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("rds_mysql-8_0.json"),
            r#"[{"name": "CPUUtilization"}, {"name": "ReadIOPS"}]"#,
        )
        .unwrap();

        let mut builder = DriverConfigBuilder::new().with_catalog_dir(dir.path());
        builder.config.db_type = Some("mysql".into());
        builder.config.db_version = Some("8_0_28".into());
        let builder = builder.from_cloudwatch_metrics().unwrap();

        let mapping = builder.config.metrics_to_retrieve_from_source.unwrap();
        assert_eq!(
            mapping["cloudwatch"],
            vec!["CPUUtilization".to_string(), "ReadIOPS".to_string()]
        );
        // no cluster catalog file for this engine
        assert!(mapping["cloudwatch_cluster"].is_empty());
    }

    #[test]
    fn missing_catalog_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = DriverConfigBuilder::new().with_catalog_dir(dir.path());
        builder.config.db_type = Some("mysql".into());
        builder.config.db_version = Some("8_0_28".into());
        let err = builder.from_cloudwatch_metrics().unwrap_err().to_string();
        assert!(err.contains("rds_mysql-8_0.json"), "got: {err}");
    }

    #[test]
    fn config_file_rejects_unknown_keys() {
        let yaml = "server_url: https://api.ottertune.com\nunknown_option: 1\n";
        assert!(serde_yaml::from_str::<ConfigFromFile>(yaml).is_err());
    }
}
