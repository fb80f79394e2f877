use super::{check_status, endpoint_url};
use crate::error::Result;
use crate::retry::{RetryConfig, retry};
use crate::types::DeploymentRecord;
use async_trait::async_trait;
use url::Url;

#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// All deployments of the project, including records flagged deleted.
    async fn get_deployments(&self) -> Result<Vec<DeploymentRecord>>;
}

pub struct HttpManagementApi {
    client: reqwest::Client,
    endpoint: Url,
    management_key: String,
    retry: RetryConfig,
}

impl HttpManagementApi {
    pub fn new(
        client: reqwest::Client,
        server_url: &str,
        management_key: String,
    ) -> Result<Self> {
        Ok(HttpManagementApi {
            client,
            endpoint: endpoint_url(server_url, "api/1/deployments")?,
            management_key,
            retry: RetryConfig::default(),
        })
    }

    async fn fetch(&self) -> Result<Vec<DeploymentRecord>> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .bearer_auth(&self.management_key)
            .send()
            .await?;
        let response = check_status(response, "deployments")?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ManagementApi for HttpManagementApi {
    async fn get_deployments(&self) -> Result<Vec<DeploymentRecord>> {
        retry(self.retry, || self.fetch()).await
    }
}
