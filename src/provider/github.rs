//! GitHub provider adapter
//!
//! Talks to the GitHub REST API. Works against github.com and GitHub
//! Enterprise via the `base_url` override.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use tracing::debug;

use crate::config::PROVIDER_PAGE_SIZE;
use crate::provider::{GitProvider, ProviderError, RepoInfo};
use crate::store::Source;
use crate::transport::HttpClient;

/// Default base URL for the GitHub REST API
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    name: String,
    full_name: String,
    default_branch: Option<String>,
    html_url: String,
}

/// Contents API response for a single file.
#[derive(Debug, Deserialize)]
struct GitHubFileContent {
    content: String,
    encoding: String,
}

pub struct GitHubProvider {
    http: HttpClient,
    base_url: String,
    token: String,
    organization: Option<String>,
    owned_only: bool,
    page_size: usize,
}

impl GitHubProvider {
    pub fn from_source(source: &Source) -> Result<Self, ProviderError> {
        if source.token.is_empty() {
            return Err(ProviderError::InvalidConfig(
                "GitHub source requires a token".to_string(),
            ));
        }

        let base_url = source
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            http: HttpClient::default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: source.token.clone(),
            organization: source.organization.clone(),
            owned_only: source.owned_only,
            page_size: PROVIDER_PAGE_SIZE,
        })
    }

    #[cfg(test)]
    fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
    }

    fn list_url(&self, page: usize) -> String {
        match &self.organization {
            Some(org) => format!(
                "{}/orgs/{}/repos?per_page={}&page={}",
                self.base_url, org, self.page_size, page
            ),
            None => {
                let mut url = format!(
                    "{}/user/repos?per_page={}&page={}",
                    self.base_url, self.page_size, page
                );
                if self.owned_only {
                    url.push_str("&affiliation=owner");
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
impl GitProvider for GitHubProvider {
    async fn list_repositories(&self) -> Result<Vec<RepoInfo>, ProviderError> {
        let mut repos = Vec::new();
        let mut page = 1;

        loop {
            let url = self.list_url(page);
            let response = self.http.execute(self.get(&url)).await?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(api_error(status, message));
            }

            let batch: Vec<GitHubRepo> = response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
            let batch_len = batch.len();

            for repo in batch {
                repos.push(RepoInfo {
                    name: repo.name,
                    full_name: repo.full_name,
                    default_branch: repo.default_branch.unwrap_or_else(|| "main".to_string()),
                    web_url: repo.html_url,
                });
            }

            // A short page is the last page.
            if batch_len < self.page_size {
                break;
            }
            page += 1;
        }

        debug!(count = repos.len(), "listed GitHub repositories");
        Ok(repos)
    }

    async fn get_file_content(
        &self,
        full_name: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        let url = format!(
            "{}/repos/{}/contents/{}?ref={}",
            self.base_url, full_name, path, git_ref
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

        let file: GitHubFileContent = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        match file.encoding.as_str() {
            "base64" => {
                // The contents API wraps base64 bodies with newlines.
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
        let url = format!("{}/user", self.base_url);
        let response = self.http.execute(self.get(&url)).await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(api_error(status, message));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ProviderKind;
    use mockito::{Matcher, Server};

    fn source(base_url: &str) -> Source {
        Source {
            id: 1,
            provider: ProviderKind::GitHub,
            name: "test".to_string(),
            token: "ghp_testtoken".to_string(),
            organization: None,
            base_url: Some(base_url.to_string()),
            insecure_tls: false,
            owned_only: false,
            repositories: vec![],
            last_scan: None,
        }
    }

    fn repo_json(name: &str) -> String {
        format!(
            r#"{{"name":"{name}","full_name":"acme/{name}","default_branch":"main",
                "html_url":"https://github.com/acme/{name}"}}"#
        )
    }

    #[test]
    fn from_source_rejects_empty_token() {
        let mut src = source("https://example.com");
        src.token = String::new();
        assert!(matches!(
            GitHubProvider::from_source(&src),
            Err(ProviderError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn list_repositories_follows_pagination() {
        let mut server = Server::new_async().await;

        let page1 = server
            .mock("GET", "/user/repos")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(format!("[{},{}]", repo_json("alpha"), repo_json("beta")))
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/user/repos")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body(format!("[{}]", repo_json("gamma")))
            .create_async()
            .await;

        let provider = GitHubProvider::from_source(&source(&server.url()))
            .unwrap()
            .with_page_size(2);
        let repos = provider.list_repositories().await.unwrap();

        page1.assert_async().await;
        page2.assert_async().await;
        assert_eq!(repos.len(), 3);
        assert_eq!(repos[0].full_name, "acme/alpha");
        assert_eq!(repos[2].name, "gamma");
    }

    #[tokio::test]
    async fn list_repositories_uses_org_endpoint_when_scoped() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/orgs/acme/repos")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(format!("[{}]", repo_json("webapp")))
            .create_async()
            .await;

        let mut src = source(&server.url());
        src.organization = Some("acme".to_string());
        let provider = GitHubProvider::from_source(&src).unwrap();
        let repos = provider.list_repositories().await.unwrap();

        mock.assert_async().await;
        assert_eq!(repos.len(), 1);
    }

    #[tokio::test]
    async fn list_repositories_sends_owner_affiliation_when_owned_only() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/user/repos")
            .match_query(Matcher::UrlEncoded("affiliation".into(), "owner".into()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let mut src = source(&server.url());
        src.owned_only = true;
        let provider = GitHubProvider::from_source(&src).unwrap();
        provider.list_repositories().await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn list_repositories_maps_401_to_auth_error() {
        let mut server = Server::new_async().await;

        server
            .mock("GET", "/user/repos")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"message":"Bad credentials"}"#)
            .create_async()
            .await;

        let provider = GitHubProvider::from_source(&source(&server.url())).unwrap();
        let result = provider.list_repositories().await;

        assert!(matches!(result, Err(ProviderError::Auth(_))));
    }

    #[tokio::test]
    async fn get_file_content_decodes_base64_with_newlines() {
        let mut server = Server::new_async().await;

        // "{\"name\":\"webapp\"}" encoded and split like the API does.
        let mock = server
            .mock("GET", "/repos/acme/webapp/contents/package.json")
            .match_query(Matcher::UrlEncoded("ref".into(), "main".into()))
            .with_status(200)
            .with_body(r#"{"content":"eyJuYW1lIjoid2Vi\nYXBwIn0=\n","encoding":"base64"}"#)
            .create_async()
            .await;

        let provider = GitHubProvider::from_source(&source(&server.url())).unwrap();
        let content = provider
            .get_file_content("acme/webapp", "package.json", "main")
            .await
            .unwrap()
            .unwrap();

        mock.assert_async().await;
        assert_eq!(content, br#"{"name":"webapp"}"#);
    }

    #[tokio::test]
    async fn get_file_content_returns_none_for_missing_file() {
        let mut server = Server::new_async().await;

        server
            .mock("GET", "/repos/acme/webapp/contents/go.mod")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let provider = GitHubProvider::from_source(&source(&server.url())).unwrap();
        let content = provider
            .get_file_content("acme/webapp", "go.mod", "main")
            .await
            .unwrap();

        assert!(content.is_none());
    }

    #[tokio::test]
    async fn validate_token_checks_user_endpoint() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/user")
            .match_header("authorization", "Bearer ghp_testtoken")
            .with_status(200)
            .with_body(r#"{"login":"octocat"}"#)
            .create_async()
            .await;

        let provider = GitHubProvider::from_source(&source(&server.url())).unwrap();
        provider.validate_token().await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn validate_token_rejects_bad_credentials() {
        let mut server = Server::new_async().await;

        server
            .mock("GET", "/user")
            .with_status(401)
            .create_async()
            .await;

        let provider = GitHubProvider::from_source(&source(&server.url())).unwrap();
        assert!(matches!(
            provider.validate_token().await,
            Err(ProviderError::Auth(_))
        ));
    }
}
