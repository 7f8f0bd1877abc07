//! Go module proxy registry client

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::registry::cache::VersionCache;
use crate::registry::RegistryError;
use crate::transport::HttpClient;

/// Default base URL for the Go module proxy
pub const DEFAULT_BASE_URL: &str = "https://proxy.golang.org";

/// Response from the proxy's `@latest` endpoint.
#[derive(Debug, Deserialize)]
struct LatestInfo {
    #[serde(rename = "Version")]
    version: String,
}

pub struct GoProxyRegistry {
    http: HttpClient,
    base_url: String,
    cache: Arc<VersionCache>,
    cache_ttl: Duration,
}

impl GoProxyRegistry {
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

    /// Resolves a module path's latest version via `{path}/@latest`,
    /// consulting the cache first.
    pub async fn latest_version(&self, module_path: &str) -> Result<String, RegistryError> {
        let cache_key = format!("go:{}", module_path);
        if let Some(cached) = self.cache.get(&cache_key) {
            return Ok(cached);
        }

        let url = format!(
            "{}/{}/@latest",
            self.base_url,
            encode_module_path(module_path)
        );
        let response = self.http.execute(self.http.get(&url)).await?;

        let status = response.status();

        // The proxy answers 404 or 410 for modules that don't exist; both are
        // deliberate "no such module" statuses, not transport failures.
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(RegistryError::NotFound(module_path.to_string()));
        }

        if !status.is_success() {
            warn!("Go proxy returned status {}: {}", status, url);
            return Err(RegistryError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        let info: LatestInfo = response.json().await.map_err(|e| {
            warn!("Failed to parse Go proxy response: {}", e);
            RegistryError::InvalidResponse(e.to_string())
        })?;

        self.cache
            .set(&cache_key, info.version.clone(), self.cache_ttl);
        Ok(info.version)
    }
}

/// Encodes a Go module path for use in proxy URLs.
/// Uppercase letters are escaped as !{lowercase}.
fn encode_module_path(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            result.push('!');
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}
