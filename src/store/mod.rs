//! Persistence layer
//! - mod.rs: entity types and store traits the scan core depends on
//! - sqlite.rs: rusqlite-backed implementation
//!
//! The store traits are synchronous; SQLite work is fast enough to run
//! inline from async callers, serialized through one connection mutex.

pub mod sqlite;

pub use sqlite::SqliteStore;

#[cfg(test)]
use mockall::automock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::{DependencyType, Ecosystem};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

/// Which git hosting product a source talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    GitHub,
    GitLab,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "github",
            ProviderKind::GitLab => "gitlab",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(ProviderKind::GitHub),
            "gitlab" => Ok(ProviderKind::GitLab),
            _ => Err(()),
        }
    }
}

/// One configured provider account to scan.
///
/// The token reaches the core already decrypted; encryption at rest is the
/// configuration layer's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub id: i64,
    pub provider: ProviderKind,
    pub name: String,
    pub token: String,
    /// Organization (GitHub) or group path (GitLab) to scope listing to.
    pub organization: Option<String>,
    /// Base URL override for self-hosted instances.
    pub base_url: Option<String>,
    /// Accept invalid TLS certificates (self-hosted GitLab).
    pub insecure_tls: bool,
    /// Restrict user-scoped listing to owned (GitHub) / member (GitLab)
    /// repositories.
    pub owned_only: bool,
    /// Allow-list of repository names; empty means scan everything listed.
    pub repositories: Vec<String>,
    pub last_scan: Option<DateTime<Utc>>,
}

/// A scanned repository with its manifest-presence flags.
/// Unique by `full_name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoEntity {
    pub id: i64,
    pub source_id: i64,
    pub name: String,
    pub full_name: String,
    pub default_branch: String,
    pub web_url: String,
    pub has_package_json: bool,
    pub has_pom_xml: bool,
    pub has_build_gradle: bool,
    pub has_go_mod: bool,
}

/// One dependency row. Unique per (repository, name, type); rescans upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRecord {
    pub id: i64,
    pub repository_id: i64,
    pub name: String,
    pub ecosystem: Ecosystem,
    pub dep_type: DependencyType,
    /// Declared (cleaned) version from the manifest.
    pub current_version: String,
    /// Latest published version; empty when resolution failed.
    pub latest_version: String,
    pub outdated: bool,
    /// Snapshot of `outdated` taken immediately before the current scan.
    pub previously_outdated: bool,
}

/// Lifecycle of one scan execution. Transitions are monotonic:
/// pending → running → {completed, failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

impl std::str::FromStr for ScanStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            _ => Err(()),
        }
    }
}

/// One scan execution record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    pub id: i64,
    /// None scans every source.
    pub source_id: Option<i64>,
    pub status: ScanStatus,
    pub repos_scanned: i64,
    pub deps_scanned: i64,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Access to configured sources.
#[cfg_attr(test, automock)]
pub trait SourceStore: Send + Sync {
    fn get_all(&self) -> Result<Vec<Source>, StoreError>;
    fn get_by_id(&self, id: i64) -> Result<Option<Source>, StoreError>;
    fn update_last_scan(&self, id: i64) -> Result<(), StoreError>;
}

/// Access to scanned repositories.
#[cfg_attr(test, automock)]
pub trait RepoStore: Send + Sync {
    /// Inserts or updates by full name, returning the row id.
    fn upsert(&self, repo: &RepoEntity) -> Result<i64, StoreError>;
    fn count(&self) -> Result<i64, StoreError>;
}

/// Access to dependency rows.
#[cfg_attr(test, automock)]
pub trait DependencyStore: Send + Sync {
    /// Inserts or updates by (repository, name, type), returning the row id.
    /// Never touches `previously_outdated`.
    fn upsert(&self, dep: &DependencyRecord) -> Result<i64, StoreError>;

    /// Snapshots every row's `outdated` flag into `previously_outdated`.
    /// Must run before any dependency upsert of a scan.
    fn mark_previously_outdated(&self) -> Result<(), StoreError>;

    /// Rows outdated now that were not outdated (or absent) at snapshot time.
    fn get_newly_outdated(&self) -> Result<Vec<DependencyRecord>, StoreError>;

    fn count(&self) -> Result<i64, StoreError>;
}

/// Access to scan job records.
pub trait ScanJobStore: Send + Sync {
    fn create(&self, source_id: Option<i64>) -> Result<ScanJob, StoreError>;

    fn get(&self, id: i64) -> Result<Option<ScanJob>, StoreError>;

    /// Transitions a job's status. Returns false when the job is already
    /// terminal; a late completion write never resurrects a finished job.
    fn update_status(
        &self,
        id: i64,
        status: ScanStatus,
        error: Option<&str>,
    ) -> Result<bool, StoreError>;

    fn update_stats(&self, id: i64, repos_scanned: i64, deps_scanned: i64)
        -> Result<(), StoreError>;

    fn get_latest_running(&self) -> Result<Option<ScanJob>, StoreError>;

    /// Sweeps jobs left `running` by a previous process lifetime to `failed`.
    /// Returns the number of jobs swept.
    fn cleanup_stale_scans(&self) -> Result<usize, StoreError>;
}
