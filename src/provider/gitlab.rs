//! GitLab provider adapter
//!
//! Talks to the GitLab REST API v4. Self-hosted instances are reached via
//! the `base_url` override, optionally with TLS verification disabled for
//! instances behind self-signed certificates.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{MAX_PROVIDER_PAGES, PROVIDER_PAGE_SIZE};
use crate::provider::{GitProvider, ProviderError, RepoInfo};
use crate::store::Source;
use crate::transport::{HttpClient, RetryConfig};

/// Default base URL for gitlab.com
pub const DEFAULT_BASE_URL: &str = "https://gitlab.com";

#[derive(Debug, Deserialize)]
struct GitLabProject {
    path: String,
    path_with_namespace: String,
    default_branch: Option<String>,
    web_url: String,
}

/// Repository files API response for a single file.
#[derive(Debug, Deserialize)]
struct GitLabFileContent {
    content: String,
    encoding: String,
}

pub struct GitLabProvider {
    http: HttpClient,
    base_url: String,
    token: String,
    group: Option<String>,
    owned_only: bool,
    page_size: usize,
    max_pages: usize,
}

impl GitLabProvider {
    pub fn from_source(source: &Source) -> Result<Self, ProviderError> {
        if source.token.is_empty() {
            return Err(ProviderError::InvalidConfig(
                "GitLab source requires a token".to_string(),
            ));
        }

        let base_url = source
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let http = if source.insecure_tls {
            warn!(
                source = %source.name,
                "TLS certificate verification disabled for this source"
            );
            let client = reqwest::Client::builder()
                .user_agent(concat!("stalewatch/", env!("CARGO_PKG_VERSION")))
                .timeout(std::time::Duration::from_secs(30))
                .danger_accept_invalid_certs(true)
                .build()?;
            HttpClient::with_client(client, RetryConfig::default())
        } else {
            HttpClient::default()
        };

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: source.token.clone(),
            group: source.organization.clone(),
            owned_only: source.owned_only,
            page_size: PROVIDER_PAGE_SIZE,
            max_pages: MAX_PROVIDER_PAGES,
        })
    }

    #[cfg(test)]
    fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[cfg(test)]
    fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.http.get(url).header("PRIVATE-TOKEN", &self.token)
    }

    fn list_url(&self, page: usize) -> String {
        match &self.group {
            Some(group) => format!(
                "{}/api/v4/groups/{}/projects?include_subgroups=true&per_page={}&page={}",
                self.base_url,
                urlencoding::encode(group),
                self.page_size,
                page
            ),
            None => {
                let mut url = format!(
                    "{}/api/v4/projects?per_page={}&page={}",
                    self.base_url, self.page_size, page
                );
                if self.owned_only {
                    url.push_str("&membership=true");
                }
                url
            }
        }
    }
}

fn api_error(status: reqwest::StatusCode, message: String) -> ProviderError {
    match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            ProviderError::Auth(message)
        }
        _ => ProviderError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait::async_trait]
impl GitProvider for GitLabProvider {
    async fn list_repositories(&self) -> Result<Vec<RepoInfo>, ProviderError> {
        let mut repos = Vec::new();
        let mut page = 1;

        // Page ceiling guards against instances that keep returning full
        // pages (broken pagination on some self-hosted deployments).
        while page <= self.max_pages {
            let url = self.list_url(page);
            let response = self.http.execute(self.get(&url)).await?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(api_error(status, message));
            }

            let batch: Vec<GitLabProject> = response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
            let batch_len = batch.len();

            for project in batch {
                repos.push(RepoInfo {
                    name: project.path,
                    full_name: project.path_with_namespace,
                    default_branch: project
                        .default_branch
                        .unwrap_or_else(|| "main".to_string()),
                    web_url: project.web_url,
                });
            }

            if batch_len < self.page_size {
                break;
            }
            page += 1;
        }

        debug!(count = repos.len(), "listed GitLab projects");
        Ok(repos)
    }

    async fn get_file_content(
        &self,
        full_name: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        let url = format!(
            "{}/api/v4/projects/{}/repository/files/{}?ref={}",
            self.base_url,
            urlencoding::encode(full_name),
            urlencoding::encode(path),
            git_ref
        );
        let response = self.http.execute(self.get(&url)).await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(api_error(status, message));
        }

        let file: GitLabFileContent = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        match file.encoding.as_str() {
            "base64" => {
                let compact: String = file
                    .content
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect();
                let bytes = BASE64.decode(compact).map_err(|e| {
                    ProviderError::InvalidResponse(format!("invalid base64 content: {}", e))
                })?;
                Ok(Some(bytes))
            }
            _ => Ok(Some(file.content.into_bytes())),
        }
    }

    async fn validate_token(&self) -> Result<(), ProviderError> {
        let url = format!("{}/api/v4/user", self.base_url);
        let response = self.http.execute(self.get(&url)).await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(api_error(status, message));
        }
        Ok(())
    }
}
