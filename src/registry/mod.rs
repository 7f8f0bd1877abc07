//! Registry clients for resolving "package → latest published version"
//!
//! - cache.rs: TTL cache shared by all clients
//! - npm.rs: npm registry (`dist-tags.latest`)
//! - maven.rs: Maven Central metadata files
//! - go_proxy.rs: Go module proxy (`@latest`)
//!
//! [`RegistryRouter`] dispatches by ecosystem; Gradle coordinates resolve
//! through the Maven client.

pub mod cache;
pub mod go_proxy;
pub mod maven;
pub mod npm;

pub use cache::{TtlCache, VersionCache};
pub use go_proxy::GoProxyRegistry;
pub use maven::MavenRegistry;
pub use npm::NpmRegistry;

#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::manifest::Ecosystem;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Package not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Resolves the latest published version of a dependency.
///
/// `name` is the per-ecosystem identifier: package name for npm,
/// `group:artifact` for Maven/Gradle, module path for Go.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait VersionLookup: Send + Sync {
    async fn latest_version(
        &self,
        ecosystem: Ecosystem,
        name: &str,
    ) -> Result<String, RegistryError>;
}

/// Routes lookups to the registry client for the dependency's ecosystem.
pub struct RegistryRouter {
    npm: NpmRegistry,
    maven: MavenRegistry,
    go: GoProxyRegistry,
}

impl RegistryRouter {
    pub fn new(npm: NpmRegistry, maven: MavenRegistry, go: GoProxyRegistry) -> Self {
        Self { npm, maven, go }
    }
}

impl Default for RegistryRouter {
    fn default() -> Self {
        use std::sync::Arc;

        use crate::config::VERSION_CACHE_TTL;
        use crate::transport::HttpClient;

        let http = HttpClient::default();
        let cache = Arc::new(VersionCache::new());
        Self {
            npm: NpmRegistry::new(npm::DEFAULT_BASE_URL, http.clone(), cache.clone(), VERSION_CACHE_TTL),
            maven: MavenRegistry::new(
                maven::DEFAULT_BASE_URL,
                http.clone(),
                cache.clone(),
                VERSION_CACHE_TTL,
            ),
            go: GoProxyRegistry::new(go_proxy::DEFAULT_BASE_URL, http, cache, VERSION_CACHE_TTL),
        }
    }
}

#[async_trait::async_trait]
impl VersionLookup for RegistryRouter {
    async fn latest_version(
        &self,
        ecosystem: Ecosystem,
        name: &str,
    ) -> Result<String, RegistryError> {
        match ecosystem {
            Ecosystem::Npm => self.npm.latest_version(name).await,
            Ecosystem::Maven | Ecosystem::Gradle => self.maven.latest_version(name).await,
            Ecosystem::Go => self.go.latest_version(name).await,
        }
    }
}
