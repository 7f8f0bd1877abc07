//! npm registry client

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::registry::cache::VersionCache;
use crate::registry::RegistryError;
use crate::transport::HttpClient;

/// Default base URL for the npm registry
pub const DEFAULT_BASE_URL: &str = "https://registry.npmjs.org";

/// Relevant subset of the npm package document.
#[derive(Debug, Deserialize)]
struct NpmPackageResponse {
    #[serde(default, rename = "dist-tags")]
    dist_tags: HashMap<String, String>,
}

pub struct NpmRegistry {
    http: HttpClient,
    base_url: String,
    cache: Arc<VersionCache>,
    cache_ttl: Duration,
}

impl NpmRegistry {
    pub fn new(
        base_url: &str,
        http: HttpClient,
        cache: Arc<VersionCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache,
            cache_ttl,
        }
    }

    /// Encode package name for URL (handles scoped packages)
    fn encode_package_name(package_name: &str) -> String {
        if package_name.starts_with('@') {
            // Scoped package: @scope/name -> @scope%2Fname
            package_name.replace('/', "%2F")
        } else {
            package_name.to_string()
        }
    }

    /// Resolves `dist-tags.latest` for a package, consulting the cache first.
    pub async fn latest_version(&self, package_name: &str) -> Result<String, RegistryError> {
        let cache_key = format!("npm:{}", package_name);
        if let Some(cached) = self.cache.get(&cache_key) {
            return Ok(cached);
        }

        let url = format!(
            "{}/{}",
            self.base_url,
            Self::encode_package_name(package_name)
        );
        let response = self.http.execute(self.http.get(&url)).await?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(package_name.to_string()));
        }

        if !status.is_success() {
            warn!("npm registry returned status {}: {}", status, url);
            return Err(RegistryError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        let package: NpmPackageResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse npm registry response: {}", e);
            RegistryError::InvalidResponse(e.to_string())
        })?;

        let latest = package.dist_tags.get("latest").cloned().ok_or_else(|| {
            RegistryError::InvalidResponse(format!("{} has no latest dist-tag", package_name))
        })?;

        self.cache.set(&cache_key, latest.clone(), self.cache_ttl);
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn registry(base_url: &str) -> NpmRegistry {
        NpmRegistry::new(
            base_url,
            HttpClient::default(),
            Arc::new(VersionCache::new()),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn latest_version_reads_latest_dist_tag() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/lodash")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "name": "lodash",
                    "dist-tags": {"latest": "4.17.21", "beta": "5.0.0-beta.1"},
                    "versions": {"4.17.21": {}}
                }"#,
            )
            .create_async()
            .await;

        let registry = registry(&server.url());
        let result = registry.latest_version("lodash").await.unwrap();

        mock.assert_async().await;
        assert_eq!(result, "4.17.21");
    }

    #[tokio::test]
    async fn latest_version_returns_not_found_for_404() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/nonexistent-package")
            .with_status(404)
            .with_body(r#"{"error": "Not found"}"#)
            .create_async()
            .await;

        let registry = registry(&server.url());
        let result = registry.latest_version("nonexistent-package").await;

        mock.assert_async().await;
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn latest_version_encodes_scoped_packages() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/@types%2Fnode")
            .with_status(200)
            .with_body(r#"{"dist-tags": {"latest": "20.5.0"}}"#)
            .create_async()
            .await;

        let registry = registry(&server.url());
        let result = registry.latest_version("@types/node").await.unwrap();

        mock.assert_async().await;
        assert_eq!(result, "20.5.0");
    }

    #[tokio::test]
    async fn latest_version_uses_cache_on_second_lookup() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/axios")
            .with_status(200)
            .with_body(r#"{"dist-tags": {"latest": "1.6.0"}}"#)
            .expect(1)
            .create_async()
            .await;

        let registry = registry(&server.url());
        assert_eq!(registry.latest_version("axios").await.unwrap(), "1.6.0");
        assert_eq!(registry.latest_version("axios").await.unwrap(), "1.6.0");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn latest_version_rejects_document_without_latest_tag() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/odd-package")
            .with_status(200)
            .with_body(r#"{"dist-tags": {}}"#)
            .create_async()
            .await;

        let registry = registry(&server.url());
        let result = registry.latest_version("odd-package").await;

        mock.assert_async().await;
        assert!(matches!(result, Err(RegistryError::InvalidResponse(_))));
    }
}
