use super::{check_status, endpoint_url};
use crate::error::Result;
use crate::retry::{RetryConfig, retry};
use crate::types::FlagConfig;
use async_trait::async_trait;
use url::Url;

#[async_trait]
pub trait FlagApi: Send + Sync {
    /// Current flag configurations, authenticated by the deployment key.
    async fn get_flag_configs(&self, deployment_key: &str) -> Result<Vec<FlagConfig>>;
}

pub struct HttpFlagApi {
    client: reqwest::Client,
    endpoint: Url,
    retry: RetryConfig,
}

impl HttpFlagApi {
    pub fn new(client: reqwest::Client, server_url: &str) -> Result<Self> {
        Ok(HttpFlagApi {
            client,
            endpoint: endpoint_url(server_url, "sdk/v2/flags")?,
            retry: RetryConfig::default(),
        })
    }

    async fn fetch(&self, deployment_key: &str) -> Result<Vec<FlagConfig>> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .header("Authorization", format!("Api-Key {deployment_key}"))
            .send()
            .await?;
        let response = check_status(response, "flags")?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl FlagApi for HttpFlagApi {
    async fn get_flag_configs(&self, deployment_key: &str) -> Result<Vec<FlagConfig>> {
        retry(self.retry, || self.fetch(deployment_key)).await
    }
}
