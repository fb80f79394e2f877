//! Clients for the remote management, deployment and cohort APIs.
//!
//! Each client retries transient failures with exponential backoff and is
//! fronted by a trait so the runners can be exercised against mocks.

mod cohorts;
mod flags;
mod management;

pub use self::cohorts::{CohortApi, CohortMembers, HttpCohortApi};
pub use self::flags::{FlagApi, HttpFlagApi};
pub use self::management::{HttpManagementApi, ManagementApi};

use crate::error::{Result, SyncError};
use url::Url;

pub(crate) fn check_status(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SyncError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        })
    }
}

pub(crate) fn endpoint_url(base: &str, path: &str) -> Result<Url> {
    let base = if base.ends_with('/') {
        Url::parse(base)
    } else {
        Url::parse(&format!("{base}/"))
    };
    base.and_then(|url| url.join(path))
        .map_err(|err| SyncError::InvalidUrl(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paths_with_and_without_trailing_slash() {
        let a = endpoint_url("https://api.example.com", "api/1/deployments").unwrap();
        let b = endpoint_url("https://api.example.com/", "api/1/deployments").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "https://api.example.com/api/1/deployments");
    }
}
