//! Scan engine
//!
//! Walks every configured source: lists its repositories, probes each for
//! the known manifest files, extracts declared dependencies and resolves
//! their latest published versions. Results are upserted so repeated scans
//! converge instead of accumulating rows.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::manifest::{self, ManifestKind};
use crate::provider::{self, GitProvider, ProviderError, RepoInfo};
use crate::registry::VersionLookup;
use crate::scan::outdated::is_outdated;
use crate::store::{
    DependencyRecord, DependencyStore, RepoEntity, RepoStore, Source, SourceStore, StoreError,
};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Unknown source: {0}")]
    UnknownSource(i64),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counters reported by a finished scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub repos_scanned: i64,
    pub deps_scanned: i64,
}

/// Something the scheduler can execute as a scan.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ScanRunner: Send + Sync {
    /// Scans one source, or every source when `source_id` is `None`.
    async fn run(&self, source_id: Option<i64>) -> Result<ScanOutcome, ScanError>;
}

type ProviderFactory =
    Box<dyn Fn(&Source) -> Result<Box<dyn GitProvider>, ProviderError> + Send + Sync>;

pub struct ScanEngine {
    sources: Arc<dyn SourceStore>,
    repos: Arc<dyn RepoStore>,
    deps: Arc<dyn DependencyStore>,
    lookup: Arc<dyn VersionLookup>,
    provider_factory: ProviderFactory,
    resolve_concurrency: usize,
}

impl ScanEngine {
    pub fn new(
        sources: Arc<dyn SourceStore>,
        repos: Arc<dyn RepoStore>,
        deps: Arc<dyn DependencyStore>,
        lookup: Arc<dyn VersionLookup>,
    ) -> Self {
        Self {
            sources,
            repos,
            deps,
            lookup,
            provider_factory: Box::new(|source| provider::for_source(source)),
            resolve_concurrency: crate::config::RESOLVE_CONCURRENCY,
        }
    }

    /// Replaces the provider factory, letting tests inject a mock provider.
    pub fn with_provider_factory(mut self, factory: ProviderFactory) -> Self {
        self.provider_factory = factory;
        self
    }

    /// Scans every configured source. A failing source is logged and
    /// skipped; the remaining sources still run.
    pub async fn scan_all(&self) -> Result<ScanOutcome, ScanError> {
        let sources = self.sources.get_all()?;
        info!(sources = sources.len(), "starting scan of all sources");

        let mut outcome = ScanOutcome::default();
        for source in sources {
            match self.scan_one(&source).await {
                Ok(partial) => {
                    outcome.repos_scanned += partial.repos_scanned;
                    outcome.deps_scanned += partial.deps_scanned;
                }
                Err(e) => {
                    warn!(source = %source.name, error = %e, "source scan failed, skipping");
                }
            }
        }

        info!(
            repos = outcome.repos_scanned,
            deps = outcome.deps_scanned,
            "scan finished"
        );
        Ok(outcome)
    }

    /// Scans a single source; unlike [`scan_all`](Self::scan_all) its
    /// failure propagates to the caller.
    pub async fn scan_source(&self, source_id: i64) -> Result<ScanOutcome, ScanError> {
        let source = self
            .sources
            .get_by_id(source_id)?
            .ok_or(ScanError::UnknownSource(source_id))?;
        self.scan_one(&source).await
    }

    async fn scan_one(&self, source: &Source) -> Result<ScanOutcome, ScanError> {
        info!(source = %source.name, "scanning source");
        let provider = (self.provider_factory)(source)?;

        let mut repos = provider.list_repositories().await?;
        if !source.repositories.is_empty() {
            repos.retain(|r| {
                source.repositories.iter().any(|allowed| {
                    allowed == &r.name || allowed == &r.full_name
                })
            });
        }
        debug!(source = %source.name, repos = repos.len(), "repositories to scan");

        let deps_scanned = AtomicI64::new(0);
        let mut repos_scanned: i64 = 0;
        for repo in &repos {
            if self
                .scan_repo(source, provider.as_ref(), repo, &deps_scanned)
                .await?
            {
                repos_scanned += 1;
            }
        }

        self.sources.update_last_scan(source.id)?;
        Ok(ScanOutcome {
            repos_scanned,
            deps_scanned: deps_scanned.load(Ordering::Relaxed),
        })
    }

    /// Returns whether the repository was recorded; repositories without any
    /// known manifest are left out of the store entirely.
    async fn scan_repo(
        &self,
        source: &Source,
        provider: &dyn GitProvider,
        repo: &RepoInfo,
        deps_scanned: &AtomicI64,
    ) -> Result<bool, ScanError> {
        // Probe for every manifest we understand before writing anything,
        // so the repository row carries accurate presence flags.
        let mut found: Vec<(ManifestKind, Vec<u8>)> = Vec::new();
        for kind in ManifestKind::ALL {
            if let Some(content) = provider
                .get_file_content(&repo.full_name, kind.path(), &repo.default_branch)
                .await?
            {
                found.push((kind, content));
            }
        }

        if found.is_empty() {
            debug!(repo = %repo.full_name, "no known manifests, skipping");
            return Ok(false);
        }

        let entity = RepoEntity {
            id: 0,
            source_id: source.id,
            name: repo.name.clone(),
            full_name: repo.full_name.clone(),
            default_branch: repo.default_branch.clone(),
            web_url: repo.web_url.clone(),
            has_package_json: found.iter().any(|(k, _)| *k == ManifestKind::PackageJson),
            has_pom_xml: found.iter().any(|(k, _)| *k == ManifestKind::PomXml),
            has_build_gradle: found.iter().any(|(k, _)| {
                matches!(k, ManifestKind::BuildGradle | ManifestKind::BuildGradleKts)
            }),
            has_go_mod: found.iter().any(|(k, _)| *k == ManifestKind::GoMod),
        };
        let repo_id = self.repos.upsert(&entity)?;

        for (kind, content) in found {
            let text = String::from_utf8_lossy(&content);
            let extraction = match manifest::extract(kind, &text) {
                Ok(extraction) => extraction,
                Err(e) => {
                    warn!(
                        repo = %repo.full_name,
                        manifest = kind.path(),
                        error = %e,
                        "failed to extract manifest, skipping"
                    );
                    continue;
                }
            };

            for skipped in &extraction.skipped {
                debug!(
                    repo = %repo.full_name,
                    manifest = kind.path(),
                    dependency = %skipped,
                    "skipped unresolvable dependency"
                );
            }

            self.resolve_and_store(repo_id, &repo.full_name, extraction.dependencies, deps_scanned)
                .await?;
        }

        Ok(true)
    }

    /// Resolves latest versions with bounded concurrency and upserts every
    /// dependency row. A failed lookup still produces a row, with an empty
    /// latest version and `outdated = false`.
    async fn resolve_and_store(
        &self,
        repo_id: i64,
        full_name: &str,
        dependencies: Vec<crate::manifest::ExtractedDependency>,
        deps_scanned: &AtomicI64,
    ) -> Result<(), ScanError> {
        let semaphore = Arc::new(Semaphore::new(self.resolve_concurrency));

        let futures = dependencies.into_iter().map(|dep| {
            let semaphore = semaphore.clone();
            async move {
                // Semaphore is never closed; acquire cannot fail.
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("resolver semaphore closed");

                let latest = match self.lookup.latest_version(dep.ecosystem, &dep.name).await {
                    Ok(latest) => latest,
                    Err(e) => {
                        warn!(
                            repo = full_name,
                            dependency = %dep.name,
                            error = %e,
                            "version lookup failed"
                        );
                        String::new()
                    }
                };

                let outdated = !latest.is_empty() && is_outdated(&dep.version, &latest);
                let record = DependencyRecord {
                    id: 0,
                    repository_id: repo_id,
                    name: dep.name,
                    ecosystem: dep.ecosystem,
                    dep_type: dep.dep_type,
                    current_version: dep.version,
                    latest_version: latest,
                    outdated,
                    previously_outdated: false,
                };
                self.deps.upsert(&record)?;
                deps_scanned.fetch_add(1, Ordering::Relaxed);
                Ok::<(), ScanError>(())
            }
        });

        for result in join_all(futures).await {
            result?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ScanRunner for ScanEngine {
    async fn run(&self, source_id: Option<i64>) -> Result<ScanOutcome, ScanError> {
        match source_id {
            Some(id) => self.scan_source(id).await,
            None => self.scan_all().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Ecosystem;
    use crate::provider::MockGitProvider;
    use crate::registry::{MockVersionLookup, RegistryError};
    use crate::store::{ProviderKind, SqliteStore};
    use mockall::predicate::eq;

    fn test_source(id: i64) -> Source {
        Source {
            id,
            provider: ProviderKind::GitHub,
            name: format!("source-{id}"),
            token: "token".to_string(),
            organization: None,
            base_url: None,
            insecure_tls: false,
            owned_only: false,
            repositories: vec![],
            last_scan: None,
        }
    }

    fn webapp_repo() -> RepoInfo {
        RepoInfo {
            name: "webapp".to_string(),
            full_name: "acme/webapp".to_string(),
            default_branch: "main".to_string(),
            web_url: "https://github.com/acme/webapp".to_string(),
        }
    }

    /// Provider serving one repo with a single package.json.
    fn webapp_provider() -> MockGitProvider {
        let mut provider = MockGitProvider::new();
        provider
            .expect_list_repositories()
            .returning(|| Ok(vec![webapp_repo()]));
        provider
            .expect_get_file_content()
            .with(eq("acme/webapp"), eq("package.json"), eq("main"))
            .returning(|_, _, _| {
                Ok(Some(
                    br#"{"dependencies":{"lodash":"^4.17.20"},"devDependencies":{"jest":"29.0.0"}}"#
                        .to_vec(),
                ))
            });
        provider
            .expect_get_file_content()
            .returning(|_, _, _| Ok(None));
        provider
    }

    fn engine_with(
        store: &Arc<SqliteStore>,
        lookup: MockVersionLookup,
        provider_for: impl Fn() -> MockGitProvider + Send + Sync + 'static,
    ) -> ScanEngine {
        ScanEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(lookup),
        )
        .with_provider_factory(Box::new(move |_| Ok(Box::new(provider_for()))))
    }

    #[tokio::test]
    async fn scan_source_stores_repo_and_dependencies() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let source_id = store.add_source(&test_source(0)).unwrap();

        let mut lookup = MockVersionLookup::new();
        lookup
            .expect_latest_version()
            .with(eq(Ecosystem::Npm), eq("lodash"))
            .returning(|_, _| Ok("4.17.21".to_string()));
        lookup
            .expect_latest_version()
            .with(eq(Ecosystem::Npm), eq("jest"))
            .returning(|_, _| Ok("29.0.0".to_string()));

        let engine = engine_with(&store, lookup, webapp_provider);
        let outcome = engine.scan_source(source_id).await.unwrap();

        assert_eq!(outcome.repos_scanned, 1);
        assert_eq!(outcome.deps_scanned, 2);
        assert_eq!(RepoStore::count(store.as_ref()).unwrap(), 1);
        assert_eq!(DependencyStore::count(store.as_ref()).unwrap(), 2);

        let source = store.get_by_id(source_id).unwrap().unwrap();
        assert!(source.last_scan.is_some());
    }

    #[tokio::test]
    async fn scan_source_flags_outdated_dependency() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let source_id = store.add_source(&test_source(0)).unwrap();

        let mut lookup = MockVersionLookup::new();
        lookup
            .expect_latest_version()
            .with(eq(Ecosystem::Npm), eq("lodash"))
            .returning(|_, _| Ok("5.0.0".to_string()));
        lookup
            .expect_latest_version()
            .returning(|_, _| Ok("29.0.0".to_string()));

        let engine = engine_with(&store, lookup, webapp_provider);
        engine.scan_source(source_id).await.unwrap();

        let newly = store.get_newly_outdated().unwrap();
        assert_eq!(newly.len(), 1);
        assert_eq!(newly[0].name, "lodash");
        assert_eq!(newly[0].latest_version, "5.0.0");
        assert!(newly[0].outdated);
    }

    #[tokio::test]
    async fn failed_lookup_still_records_dependency() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let source_id = store.add_source(&test_source(0)).unwrap();

        let mut lookup = MockVersionLookup::new();
        lookup
            .expect_latest_version()
            .returning(|_, name| Err(RegistryError::NotFound(name.to_string())));

        let engine = engine_with(&store, lookup, webapp_provider);
        let outcome = engine.scan_source(source_id).await.unwrap();

        assert_eq!(outcome.deps_scanned, 2);
        let newly = store.get_newly_outdated().unwrap();
        assert!(newly.is_empty(), "failed lookups must not flag staleness");
    }

    #[tokio::test]
    async fn scan_source_honors_repository_allow_list() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let mut source = test_source(0);
        source.repositories = vec!["other".to_string()];
        let source_id = store.add_source(&source).unwrap();

        let lookup = MockVersionLookup::new();
        let engine = engine_with(&store, lookup, || {
            let mut provider = MockGitProvider::new();
            provider
                .expect_list_repositories()
                .returning(|| Ok(vec![webapp_repo()]));
            provider
        });
        let outcome = engine.scan_source(source_id).await.unwrap();

        assert_eq!(outcome.repos_scanned, 0);
        assert_eq!(RepoStore::count(store.as_ref()).unwrap(), 0);
    }

    #[tokio::test]
    async fn repository_without_manifests_is_not_recorded() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let source_id = store.add_source(&test_source(0)).unwrap();

        let engine = engine_with(&store, MockVersionLookup::new(), || {
            let mut provider = MockGitProvider::new();
            provider
                .expect_list_repositories()
                .returning(|| Ok(vec![webapp_repo()]));
            provider
                .expect_get_file_content()
                .returning(|_, _, _| Ok(None));
            provider
        });
        let outcome = engine.scan_source(source_id).await.unwrap();

        assert_eq!(outcome.repos_scanned, 0);
        assert_eq!(outcome.deps_scanned, 0);
        assert_eq!(RepoStore::count(store.as_ref()).unwrap(), 0);
    }

    #[tokio::test]
    async fn scan_source_rejects_unknown_source() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = engine_with(&store, MockVersionLookup::new(), MockGitProvider::new);

        let result = engine.scan_source(99).await;
        assert!(matches!(result, Err(ScanError::UnknownSource(99))));
    }

    #[tokio::test]
    async fn scan_all_skips_failing_source() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.add_source(&test_source(0)).unwrap();
        let mut second = test_source(0);
        second.name = "second".to_string();
        store.add_source(&second).unwrap();

        let mut lookup = MockVersionLookup::new();
        lookup
            .expect_latest_version()
            .returning(|_, _| Ok("99.0.0".to_string()));

        let calls = std::sync::atomic::AtomicUsize::new(0);
        let engine = ScanEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(lookup),
        )
        .with_provider_factory(Box::new(move |_| {
            // First source's listing blows up; the second succeeds.
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let mut provider = MockGitProvider::new();
                provider.expect_list_repositories().returning(|| {
                    Err(ProviderError::Auth("bad credentials".to_string()))
                });
                Ok(Box::new(provider))
            } else {
                Ok(Box::new(webapp_provider()))
            }
        }));

        let outcome = engine.scan_all().await.unwrap();
        assert_eq!(outcome.repos_scanned, 1);
        assert_eq!(outcome.deps_scanned, 2);
    }

    #[tokio::test]
    async fn rescan_upserts_instead_of_duplicating() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let source_id = store.add_source(&test_source(0)).unwrap();

        let mut lookup = MockVersionLookup::new();
        lookup
            .expect_latest_version()
            .returning(|_, _| Ok("99.0.0".to_string()));

        let engine = engine_with(&store, lookup, webapp_provider);
        engine.scan_source(source_id).await.unwrap();
        engine.scan_source(source_id).await.unwrap();

        assert_eq!(RepoStore::count(store.as_ref()).unwrap(), 1);
        assert_eq!(DependencyStore::count(store.as_ref()).unwrap(), 2);
    }
}
