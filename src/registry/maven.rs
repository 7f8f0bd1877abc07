//! Maven Central registry client
//!
//! Resolves the latest version from the artifact's `maven-metadata.xml`:
//! `<release>` preferred, then `<latest>`, then the last `<versions>` entry.
//! Artifact names use the `group:artifact` coordinate form.

use std::sync::Arc;
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::warn;

use crate::registry::cache::VersionCache;
use crate::registry::RegistryError;
use crate::transport::HttpClient;

/// Default base URL for Maven Central
pub const DEFAULT_BASE_URL: &str = "https://repo1.maven.org/maven2";

pub struct MavenRegistry {
    http: HttpClient,
    base_url: String,
    cache: Arc<VersionCache>,
    cache_ttl: Duration,
}

impl MavenRegistry {
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

    /// Resolves the latest version of a `group:artifact` coordinate,
    /// consulting the cache first.
    pub async fn latest_version(&self, name: &str) -> Result<String, RegistryError> {
        let (group_id, artifact_id) = name.split_once(':').ok_or_else(|| {
            RegistryError::InvalidResponse(format!(
                "expected group:artifact coordinate, got {name:?}"
            ))
        })?;

        let cache_key = format!("maven:{}", name);
        if let Some(cached) = self.cache.get(&cache_key) {
            return Ok(cached);
        }

        let group_path = group_id.replace('.', "/");
        let url = format!(
            "{}/{}/{}/maven-metadata.xml",
            self.base_url, group_path, artifact_id
        );
        let response = self.http.execute(self.http.get(&url)).await?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(name.to_string()));
        }

        if !status.is_success() {
            warn!("Maven repository returned status {}: {}", status, url);
            return Err(RegistryError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        let body = response.text().await.map_err(|e| {
            warn!("Failed to read Maven metadata response: {}", e);
            RegistryError::InvalidResponse(e.to_string())
        })?;

        let latest = parse_metadata(&body).ok_or_else(|| {
            RegistryError::InvalidResponse(format!("no version information for {}", name))
        })?;

        self.cache.set(&cache_key, latest.clone(), self.cache_ttl);
        Ok(latest)
    }
}

/// Picks a version out of maven-metadata.xml:
/// `<release>`, else `<latest>`, else the last `<versions>` entry.
fn parse_metadata(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut current_tag = String::new();

    let mut release = None;
    let mut latest = None;
    let mut last_version = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                current_tag = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
            }
            Ok(Event::Text(ref e)) => {
                if let Ok(text) = e.unescape() {
                    match current_tag.as_str() {
                        "release" => release = Some(text.into_owned()),
                        "latest" => latest = Some(text.into_owned()),
                        "version" => last_version = Some(text.into_owned()),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(_)) => current_tag.clear(),
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    release.or(latest).or(last_version)
}
