//! Git hosting provider adapters
//! - github.rs: GitHub REST API (github.com and GitHub Enterprise)
//! - gitlab.rs: GitLab REST API v4 (gitlab.com and self-hosted)
//!
//! Both adapters expose the same trait so the scan engine never knows which
//! product it is talking to.

pub mod github;
pub mod gitlab;

pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;

#[cfg(test)]
use mockall::automock;

use thiserror::Error;

use crate::store::{ProviderKind, Source};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

/// A repository as reported by the hosting provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub name: String,
    pub full_name: String,
    pub default_branch: String,
    pub web_url: String,
}

/// Uniform surface over a git hosting account.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait GitProvider: Send + Sync {
    /// Lists every repository the source's token and scope can see,
    /// following pagination to the end.
    async fn list_repositories(&self) -> Result<Vec<RepoInfo>, ProviderError>;

    /// Fetches one file from a repository at the given ref. `Ok(None)` means
    /// the file does not exist; probing for absent manifests is routine, not
    /// an error.
    async fn get_file_content(
        &self,
        full_name: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError>;

    /// Checks that the token authenticates against the provider.
    async fn validate_token(&self) -> Result<(), ProviderError>;
}

/// Builds the adapter matching a source's provider kind.
pub fn for_source(source: &Source) -> Result<Box<dyn GitProvider>, ProviderError> {
    match source.provider {
        ProviderKind::GitHub => Ok(Box::new(GitHubProvider::from_source(source)?)),
        ProviderKind::GitLab => Ok(Box::new(GitLabProvider::from_source(source)?)),
    }
}
