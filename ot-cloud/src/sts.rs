//! STS role assumption for the shared observation bucket.

use aws_credential_types::Credentials;
use ot_core::{Error, Result};

/// Cross-account role that grants write access to the OtterTune-owned
/// observation bucket.
pub const S3_BUCKET_SHARING_ROLE: &str =
    "arn:aws:iam::691523222388:role/CrossAccountS3BucketSharingRole";

const SESSION_NAME: &str = "s3";
const SESSION_DURATION_SECONDS: i32 = 900;

/// Assume the bucket-sharing role and return short-lived credentials.
pub async fn bucket_sharing_credentials(config: &aws_config::SdkConfig) -> Result<Credentials> {
    let client = aws_sdk_sts::Client::new(config);
    let resp = client
        .assume_role()
        .role_arn(S3_BUCKET_SHARING_ROLE)
        .role_session_name(SESSION_NAME)
        .duration_seconds(SESSION_DURATION_SECONDS)
        .send()
        .await
        .map_err(|err| Error::Sts(format!("failed to assume bucket sharing role: {err}")))?;
    let creds = resp
        .credentials()
        .ok_or_else(|| Error::Sts("assume role response carried no credentials".into()))?;
    Ok(Credentials::new(
        creds.access_key_id(),
        creds.secret_access_key(),
        Some(creds.session_token().to_string()),
        None,
        "ottertune-bucket-sharing-role",
    ))
}
