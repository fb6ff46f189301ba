//! RDS instance discovery and IAM database auth tokens.
//!
//! Describe calls are memoized per instance identifier so the layered config
//! build issues each `Describe*` once.

use aws_credential_types::provider::ProvideCredentials;
use aws_sigv4::http_request::{
    SignableBody, SignableRequest, SignatureLocation, SigningSettings, sign,
};
use aws_sigv4::sign::v4;
use ot_core::{Error, Result};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

/// Auth tokens are valid for 15 minutes; a fresh one is minted before every
/// connection.
const AUTH_TOKEN_EXPIRY: Duration = Duration::from_secs(900);

/// The subset of `DescribeDBInstances` the agent consumes.
#[derive(Debug, Clone)]
pub struct DbInstanceInfo {
    pub endpoint_address: String,
    pub endpoint_port: u16,
    pub engine: String,
    pub engine_version: String,
    pub parameter_group_name: Option<String>,
}

pub struct RdsClient {
    client: aws_sdk_rds::Client,
    cache: Mutex<HashMap<String, DbInstanceInfo>>,
}

impl RdsClient {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_rds::Client::new(config),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Describe the target instance, memoized per identifier.
    pub async fn instance_info(&self, db_instance_identifier: &str) -> Result<DbInstanceInfo> {
        let mut cache = self.cache.lock().await;
        if let Some(info) = cache.get(db_instance_identifier) {
            return Ok(info.clone());
        }

        let resp = self
            .client
            .describe_db_instances()
            .db_instance_identifier(db_instance_identifier)
            .send()
            .await
            .map_err(|err| Error::Rds(format!("failed to describe db instances: {err}")))?;
        let instances = resp.db_instances();
        let instance = match instances.len() {
            0 => {
                return Err(Error::Rds(
                    "no instance was found for provided db identifier".into(),
                ));
            }
            1 => &instances[0],
            _ => {
                return Err(Error::Rds(
                    "multiple instances found for provided db identifier, expected only one".into(),
                ));
            }
        };

        let endpoint = instance
            .endpoint()
            .ok_or_else(|| Error::Rds("instance has no endpoint".into()))?;
        let info = DbInstanceInfo {
            endpoint_address: endpoint
                .address()
                .ok_or_else(|| Error::Rds("instance endpoint has no address".into()))?
                .to_string(),
            endpoint_port: endpoint.port().unwrap_or(0) as u16,
            engine: instance.engine().unwrap_or_default().to_string(),
            engine_version: instance.engine_version().unwrap_or_default().to_string(),
            parameter_group_name: instance
                .db_parameter_groups()
                .first()
                .and_then(|group| group.db_parameter_group_name())
                .map(|name| name.to_string()),
        };
        cache.insert(db_instance_identifier.to_string(), info.clone());
        Ok(info)
    }

    pub async fn db_host(&self, db_instance_identifier: &str) -> Result<String> {
        Ok(self.instance_info(db_instance_identifier).await?.endpoint_address)
    }

    pub async fn db_port(&self, db_instance_identifier: &str) -> Result<u16> {
        Ok(self.instance_info(db_instance_identifier).await?.endpoint_port)
    }

    /// Engine version with dots and dashes normalized to underscores.
    pub async fn db_version(&self, db_instance_identifier: &str) -> Result<String> {
        let info = self.instance_info(db_instance_identifier).await?;
        Ok(normalize_identifier(&info.engine_version))
    }

    /// Engine name normalized the same way; bare `aurora` means the MySQL
    /// flavor.
    pub async fn db_type(&self, db_instance_identifier: &str) -> Result<String> {
        let info = self.instance_info(db_instance_identifier).await?;
        let mut db_type = normalize_identifier(&info.engine);
        if db_type == "aurora" {
            db_type = "aurora_mysql".to_string();
        }
        Ok(db_type)
    }

    /// Parameters whose value was set by the user on the instance's
    /// parameter group.
    pub async fn db_non_default_parameters(
        &self,
        db_instance_identifier: &str,
    ) -> Result<Vec<String>> {
        let info = self.instance_info(db_instance_identifier).await?;
        let Some(group_name) = info.parameter_group_name else {
            tracing::warn!(
                db_instance_identifier,
                "cannot fetch parameters without a parameter group name"
            );
            return Ok(Vec::new());
        };

        let mut names = Vec::new();
        let mut pages = self
            .client
            .describe_db_parameters()
            .db_parameter_group_name(&group_name)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page =
                page.map_err(|err| Error::Rds(format!("failed to describe db parameters: {err}")))?;
            for parameter in page.parameters() {
                if parameter.source() == Some("user") {
                    if let Some(name) = parameter.parameter_name() {
                        names.push(name.to_string());
                    }
                }
            }
        }
        Ok(names)
    }
}

pub fn normalize_identifier(value: &str) -> String {
    value.replace(['.', '-'], "_")
}

/// Mint a short-lived IAM auth token for the resolved host/port/user. The
/// token is the presigned `rds-db:connect` request without the scheme.
pub async fn get_db_auth_token(
    config: &aws_config::SdkConfig,
    db_user: &str,
    db_host: &str,
    db_port: u16,
) -> Result<String> {
    let credentials = config
        .credentials_provider()
        .ok_or_else(|| Error::Rds("no AWS credentials provider configured".into()))?
        .provide_credentials()
        .await
        .map_err(|err| Error::Rds(format!("failed to resolve AWS credentials: {err}")))?;
    let identity = credentials.into();
    let region = config
        .region()
        .ok_or_else(|| Error::Rds("no AWS region configured".into()))?
        .to_string();

    let mut settings = SigningSettings::default();
    settings.expires_in = Some(AUTH_TOKEN_EXPIRY);
    settings.signature_location = SignatureLocation::QueryParams;

    let signing_params = v4::SigningParams::builder()
        .identity(&identity)
        .region(&region)
        .name("rds-db")
        .time(SystemTime::now())
        .settings(settings)
        .build()
        .map_err(|err| Error::Rds(format!("failed to build signing parameters: {err}")))?;

    let url = format!("https://{db_host}:{db_port}/?Action=connect&DBUser={db_user}");
    let signable = SignableRequest::new(
        "GET",
        &url,
        std::iter::empty::<(&str, &str)>(),
        SignableBody::Bytes(&[]),
    )
    .map_err(|err| Error::Rds(format!("failed to build signable request: {err}")))?;
    let (instructions, _signature) = sign(signable, &signing_params.into())
        .map_err(|err| Error::Rds(format!("failed to sign auth token request: {err}")))?
        .into_parts();

    let mut request = http::Request::builder()
        .method("GET")
        .uri(&url)
        .body(())
        .map_err(|err| Error::Rds(format!("failed to build token request: {err}")))?;
    instructions.apply_to_request_http1x(&mut request);

    let signed = request.uri().to_string();
    Ok(signed.trim_start_matches("https://").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_replaces_dots_and_dashes() {
        assert_eq!(normalize_identifier("8.0.mysql_aurora.3.02.2"), "8_0_mysql_aurora_3_02_2");
        assert_eq!(normalize_identifier("13.4"), "13_4");
        assert_eq!(normalize_identifier("aurora-postgresql"), "aurora_postgresql");
    }
}
