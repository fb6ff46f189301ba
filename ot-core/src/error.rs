use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid driver configuration: {0}")]
    Config(String),

    #[error("Database collector error: {0}")]
    DbCollector(String),

    #[error("MySQL collector error: {0}")]
    MysqlCollector(String),

    #[error("Postgres collector error: {0}")]
    PostgresCollector(String),

    #[error("Compute server client error: {0}")]
    ComputeServerClient(String),

    #[error("S3 client error: {0}")]
    S3Client(String),

    #[error("CloudWatch error: {0}")]
    CloudWatch(String),

    #[error("RDS error: {0}")]
    Rds(String),

    #[error("STS error: {0}")]
    Sts(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl Error {
    /// Stable name for this error kind, reported in agent health payloads.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Io(_) => "IoError",
            Error::Serialization(_) => "SerializationError",
            Error::Config(_) => "DriverConfigError",
            Error::DbCollector(_) => "DbCollectorError",
            Error::MysqlCollector(_) => "MysqlCollectorError",
            Error::PostgresCollector(_) => "PostgresCollectorError",
            Error::ComputeServerClient(_) => "ComputeServerClientError",
            Error::S3Client(_) => "S3ClientError",
            Error::CloudWatch(_) => "CloudWatchError",
            Error::Rds(_) => "RdsError",
            Error::Sts(_) => "StsError",
            Error::Network(_) => "NetworkError",
        }
    }

    /// Network failures get their own log category in the pipeline dispatcher.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_name_matches_variant() {
        assert_eq!(
            Error::MysqlCollector("boom".into()).kind_name(),
            "MysqlCollectorError"
        );
        assert_eq!(Error::Network("refused".into()).kind_name(), "NetworkError");
    }

    #[test]
    fn network_detection() {
        assert!(Error::Network("timeout".into()).is_network());
        assert!(!Error::Config("bad".into()).is_network());
    }

    #[test]
    fn display_includes_message() {
        let err = Error::PostgresCollector("Failed to execute sql SELECT 1".into());
        assert!(err.to_string().contains("Failed to execute sql"));
    }
}
