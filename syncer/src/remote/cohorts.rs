use super::{check_status, endpoint_url};
use crate::error::Result;
use crate::retry::{RetryConfig, retry};
use crate::types::CohortDescription;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashSet;
use url::Url;

/// Outcome of a member download. Not-modified and too-large are expected
/// responses, distinguished from transport errors.
#[derive(Clone, Debug, PartialEq)]
pub enum CohortMembers {
    Members(HashSet<String>),
    NotModified,
    TooLarge,
}

#[async_trait]
pub trait CohortApi: Send + Sync {
    async fn get_descriptions(
        &self,
        cohort_ids: &HashSet<String>,
    ) -> Result<Vec<CohortDescription>>;

    /// Member ids for the given computed version, or a typed signal when
    /// the version is unchanged or exceeds `max_size`.
    async fn get_members(
        &self,
        description: &CohortDescription,
        max_size: u64,
    ) -> Result<CohortMembers>;
}

pub struct HttpCohortApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    retry: RetryConfig,
}

impl HttpCohortApi {
    pub fn new(
        client: reqwest::Client,
        cohort_server_url: &str,
        api_key: String,
        secret_key: String,
    ) -> Result<Self> {
        // Validate the base URL once at construction.
        endpoint_url(cohort_server_url, "sdk/v1/cohorts")?;
        Ok(HttpCohortApi {
            client,
            base_url: cohort_server_url.to_string(),
            api_key,
            secret_key,
            retry: RetryConfig::default(),
        })
    }

    fn descriptions_url(&self) -> Result<Url> {
        endpoint_url(&self.base_url, "sdk/v1/cohorts")
    }

    fn members_url(&self, cohort_id: &str) -> Result<Url> {
        endpoint_url(&self.base_url, &format!("sdk/v1/cohorts/{cohort_id}/members"))
    }

    async fn fetch_descriptions(
        &self,
        cohort_ids: &HashSet<String>,
    ) -> Result<Vec<CohortDescription>> {
        let mut ids: Vec<&str> = cohort_ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        let response = self
            .client
            .get(self.descriptions_url()?)
            .basic_auth(&self.api_key, Some(&self.secret_key))
            .query(&[("ids", ids.join(","))])
            .send()
            .await?;
        let response = check_status(response, "cohort descriptions")?;
        Ok(response.json().await?)
    }

    async fn fetch_members(
        &self,
        description: &CohortDescription,
        max_size: u64,
    ) -> Result<CohortMembers> {
        let response = self
            .client
            .get(self.members_url(&description.id)?)
            .basic_auth(&self.api_key, Some(&self.secret_key))
            .query(&[
                ("lastComputed", description.last_computed.to_string()),
                ("maxSize", max_size.to_string()),
            ])
            .send()
            .await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(CohortMembers::NotModified),
            StatusCode::PAYLOAD_TOO_LARGE => Ok(CohortMembers::TooLarge),
            _ => {
                let response = check_status(response, "cohort members")?;
                let members: HashSet<String> = response.json().await?;
                Ok(CohortMembers::Members(members))
            }
        }
    }
}

#[async_trait]
impl CohortApi for HttpCohortApi {
    async fn get_descriptions(
        &self,
        cohort_ids: &HashSet<String>,
    ) -> Result<Vec<CohortDescription>> {
        retry(self.retry, || self.fetch_descriptions(cohort_ids)).await
    }

    async fn get_members(
        &self,
        description: &CohortDescription,
        max_size: u64,
    ) -> Result<CohortMembers> {
        retry(self.retry, || self.fetch_members(description, max_size)).await
    }
}
