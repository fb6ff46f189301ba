//! AWS collaborators for the OtterTune agent.
//!
//! Thin wrappers over the AWS SDK clients the agent needs: RDS instance
//! discovery and IAM auth tokens, the CloudWatch metric source, and the STS
//! role assumption used for the shared observation bucket.

pub mod cloudwatch;
pub mod rds;
pub mod sts;

pub use rds::RdsClient;

/// Load the default AWS configuration for a region.
pub async fn sdk_config(region: &str) -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await
}
