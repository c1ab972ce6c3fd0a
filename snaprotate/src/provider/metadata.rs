//! EC2 instance metadata service client, used to find out which instance
//! this program runs on.

use std::time::Duration;

use crate::utils::{Result, SnapError};

const DEFAULT_ENDPOINT: &str = "http://169.254.169.254/latest";
const TOKEN_TTL_SECONDS: &str = "21600";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

pub struct InstanceMetadata {
    client: reqwest::Client,
    endpoint: String,
}

impl InstanceMetadata {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SnapError::ProviderInit(format!("failed to build metadata client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    /// Session token for IMDSv2. `None` when the service only speaks IMDSv1.
    async fn session_token(&self) -> Option<String> {
        let response = self
            .client
            .put(format!("{}/api/token", self.endpoint))
            .header("X-aws-ec2-metadata-token-ttl-seconds", TOKEN_TTL_SECONDS)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.text().await.ok()
    }

    pub async fn instance_id(&self) -> Result<String> {
        let mut request = self
            .client
            .get(format!("{}/meta-data/instance-id", self.endpoint));
        if let Some(token) = self.session_token().await {
            request = request.header("X-aws-ec2-metadata-token", token);
        }

        let response = request.send().await.map_err(|e| {
            SnapError::ResourceQueryFailed(format!("unable to determine the EC2 instance ID: {}", e))
        })?;
        if !response.status().is_success() {
            return Err(SnapError::ResourceQueryFailed(format!(
                "unable to determine the EC2 instance ID: HTTP {}",
                response.status()
            )));
        }

        let body = response.text().await.map_err(|e| {
            SnapError::ResourceQueryFailed(format!("unable to retrieve the EC2 instance ID: {}", e))
        })?;
        let instance_id = body.trim().to_string();
        if instance_id.is_empty() {
            return Err(SnapError::ResourceQueryFailed(
                "instance metadata returned an empty instance ID".to_string(),
            ));
        }
        Ok(instance_id)
    }
}
