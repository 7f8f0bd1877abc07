//! SQLite-backed store
//!
//! One connection behind a mutex, WAL mode for read concurrency. All
//! write-or-update paths use `INSERT ... ON CONFLICT` so concurrent writers
//! and rescans converge on the same rows instead of duplicating them.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::manifest::{DependencyType, Ecosystem};
use crate::store::{
    DependencyRecord, DependencyStore, ProviderKind, RepoEntity, RepoStore, ScanJob, ScanJobStore,
    ScanStatus, Source, SourceStore, StoreError,
};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(db_path: &Path) -> Result<Self, StoreError> {
        info!("Opening database at {:?}", db_path);
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        // WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        debug!("Database schema ready");
        Ok(store)
    }

    /// Acquire database connection lock with proper error handling
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::InvalidValue("connection lock poisoned".to_string()))
    }

    fn create_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider TEXT NOT NULL,
                name TEXT NOT NULL UNIQUE,
                token TEXT NOT NULL,
                organization TEXT,
                base_url TEXT,
                insecure_tls INTEGER NOT NULL DEFAULT 0,
                owned_only INTEGER NOT NULL DEFAULT 0,
                repositories TEXT NOT NULL DEFAULT '[]',
                last_scan TEXT
            );

            CREATE TABLE IF NOT EXISTS repositories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                full_name TEXT NOT NULL UNIQUE,
                default_branch TEXT NOT NULL,
                web_url TEXT NOT NULL,
                has_package_json INTEGER NOT NULL DEFAULT 0,
                has_pom_xml INTEGER NOT NULL DEFAULT 0,
                has_build_gradle INTEGER NOT NULL DEFAULT 0,
                has_go_mod INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS dependencies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repository_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                ecosystem TEXT NOT NULL,
                dep_type TEXT NOT NULL,
                current_version TEXT NOT NULL,
                latest_version TEXT NOT NULL DEFAULT '',
                outdated INTEGER NOT NULL DEFAULT 0,
                previously_outdated INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (repository_id) REFERENCES repositories(id) ON DELETE CASCADE,
                UNIQUE(repository_id, name, dep_type)
            );

            CREATE INDEX IF NOT EXISTS idx_dependencies_outdated
                ON dependencies(outdated);

            CREATE TABLE IF NOT EXISTS scan_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id INTEGER,
                status TEXT NOT NULL DEFAULT 'pending',
                repos_scanned INTEGER NOT NULL DEFAULT 0,
                deps_scanned INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_scan_jobs_status
                ON scan_jobs(status);
            "#,
        )?;

        Ok(())
    }

    /// Registers a new source, returning its id. Used at configuration time,
    /// not on the scan hot path.
    pub fn add_source(&self, source: &Source) -> Result<i64, StoreError> {
        let repositories = serde_json::to_string(&source.repositories)
            .map_err(|e| StoreError::InvalidValue(e.to_string()))?;

        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO sources (provider, name, token, organization, base_url,
                                 insecure_tls, owned_only, repositories)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            (
                source.provider.as_str(),
                &source.name,
                &source.token,
                &source.organization,
                &source.base_url,
                source.insecure_tls,
                source.owned_only,
                repositories,
            ),
        )?;
        Ok(conn.last_insert_rowid())
    }
}

fn row_to_source(row: &Row<'_>) -> rusqlite::Result<Source> {
    let provider_str: String = row.get("provider")?;
    let repositories_json: String = row.get("repositories")?;
    Ok(Source {
        id: row.get("id")?,
        provider: ProviderKind::from_str(&provider_str).unwrap_or(ProviderKind::GitHub),
        name: row.get("name")?,
        token: row.get("token")?,
        organization: row.get("organization")?,
        base_url: row.get("base_url")?,
        insecure_tls: row.get("insecure_tls")?,
        owned_only: row.get("owned_only")?,
        repositories: serde_json::from_str(&repositories_json).unwrap_or_default(),
        last_scan: row.get("last_scan")?,
    })
}

fn row_to_dependency(row: &Row<'_>) -> rusqlite::Result<DependencyRecord> {
    let ecosystem_str: String = row.get("ecosystem")?;
    let dep_type_str: String = row.get("dep_type")?;
    Ok(DependencyRecord {
        id: row.get("id")?,
        repository_id: row.get("repository_id")?,
        name: row.get("name")?,
        ecosystem: Ecosystem::from_str(&ecosystem_str).unwrap_or(Ecosystem::Npm),
        dep_type: DependencyType::from_str(&dep_type_str).unwrap_or(DependencyType::Runtime),
        current_version: row.get("current_version")?,
        latest_version: row.get("latest_version")?,
        outdated: row.get("outdated")?,
        previously_outdated: row.get("previously_outdated")?,
    })
}

fn row_to_scan_job(row: &Row<'_>) -> rusqlite::Result<ScanJob> {
    let status_str: String = row.get("status")?;
    Ok(ScanJob {
        id: row.get("id")?,
        source_id: row.get("source_id")?,
        status: ScanStatus::from_str(&status_str).unwrap_or(ScanStatus::Failed),
        repos_scanned: row.get("repos_scanned")?,
        deps_scanned: row.get("deps_scanned")?,
        error: row.get("error")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
    })
}

impl SourceStore for SqliteStore {
    fn get_all(&self) -> Result<Vec<Source>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT * FROM sources ORDER BY id")?;
        let sources = stmt
            .query_map([], row_to_source)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    fn get_by_id(&self, id: i64) -> Result<Option<Source>, StoreError> {
        let conn = self.lock_conn()?;
        let source = conn
            .query_row("SELECT * FROM sources WHERE id = ?1", [id], row_to_source)
            .optional()?;
        Ok(source)
    }

    fn update_last_scan(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE sources SET last_scan = ?1 WHERE id = ?2",
            (Utc::now(), id),
        )?;
        Ok(())
    }
}

impl RepoStore for SqliteStore {
    fn upsert(&self, repo: &RepoEntity) -> Result<i64, StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO repositories (source_id, name, full_name, default_branch, web_url,
                                      has_package_json, has_pom_xml, has_build_gradle, has_go_mod)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(full_name) DO UPDATE SET
                source_id = excluded.source_id,
                name = excluded.name,
                default_branch = excluded.default_branch,
                web_url = excluded.web_url,
                has_package_json = excluded.has_package_json,
                has_pom_xml = excluded.has_pom_xml,
                has_build_gradle = excluded.has_build_gradle,
                has_go_mod = excluded.has_go_mod
            "#,
            (
                repo.source_id,
                &repo.name,
                &repo.full_name,
                &repo.default_branch,
                &repo.web_url,
                repo.has_package_json,
                repo.has_pom_xml,
                repo.has_build_gradle,
                repo.has_go_mod,
            ),
        )?;

        let id = conn.query_row(
            "SELECT id FROM repositories WHERE full_name = ?1",
            [&repo.full_name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn count(&self) -> Result<i64, StoreError> {
        let conn = self.lock_conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl DependencyStore for SqliteStore {
    fn upsert(&self, dep: &DependencyRecord) -> Result<i64, StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO dependencies (repository_id, name, ecosystem, dep_type,
                                      current_version, latest_version, outdated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(repository_id, name, dep_type) DO UPDATE SET
                ecosystem = excluded.ecosystem,
                current_version = excluded.current_version,
                latest_version = excluded.latest_version,
                outdated = excluded.outdated
            "#,
            (
                dep.repository_id,
                &dep.name,
                dep.ecosystem.as_str(),
                dep.dep_type.as_str(),
                &dep.current_version,
                &dep.latest_version,
                dep.outdated,
            ),
        )?;

        let id = conn.query_row(
            "SELECT id FROM dependencies WHERE repository_id = ?1 AND name = ?2 AND dep_type = ?3",
            (dep.repository_id, &dep.name, dep.dep_type.as_str()),
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn mark_previously_outdated(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute("UPDATE dependencies SET previously_outdated = outdated", [])?;
        Ok(())
    }

    fn get_newly_outdated(&self) -> Result<Vec<DependencyRecord>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM dependencies WHERE outdated = 1 AND previously_outdated = 0 ORDER BY name",
        )?;
        let deps = stmt
            .query_map([], row_to_dependency)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(deps)
    }

    fn count(&self) -> Result<i64, StoreError> {
        let conn = self.lock_conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM dependencies", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl ScanJobStore for SqliteStore {
    fn create(&self, source_id: Option<i64>) -> Result<ScanJob, StoreError> {
        let started_at = Utc::now();
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO scan_jobs (source_id, status, started_at) VALUES (?1, 'pending', ?2)",
            (source_id, started_at),
        )?;
        let id = conn.last_insert_rowid();

        Ok(ScanJob {
            id,
            source_id,
            status: ScanStatus::Pending,
            repos_scanned: 0,
            deps_scanned: 0,
            error: None,
            started_at,
            finished_at: None,
        })
    }

    fn get(&self, id: i64) -> Result<Option<ScanJob>, StoreError> {
        let conn = self.lock_conn()?;
        let job = conn
            .query_row("SELECT * FROM scan_jobs WHERE id = ?1", [id], row_to_scan_job)
            .optional()?;
        Ok(job)
    }

    fn update_status(
        &self,
        id: i64,
        status: ScanStatus,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let finished_at = status.is_terminal().then(Utc::now);

        let conn = self.lock_conn()?;
        // Terminal jobs never transition again; a late write is a no-op.
        let affected = conn.execute(
            r#"
            UPDATE scan_jobs
            SET status = ?1, error = ?2, finished_at = ?3
            WHERE id = ?4 AND status NOT IN ('completed', 'failed')
            "#,
            (status.as_str(), error, finished_at, id),
        )?;
        Ok(affected > 0)
    }

    fn update_stats(
        &self,
        id: i64,
        repos_scanned: i64,
        deps_scanned: i64,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE scan_jobs SET repos_scanned = ?1, deps_scanned = ?2 WHERE id = ?3",
            (repos_scanned, deps_scanned, id),
        )?;
        Ok(())
    }

    fn get_latest_running(&self) -> Result<Option<ScanJob>, StoreError> {
        let conn = self.lock_conn()?;
        let job = conn
            .query_row(
                "SELECT * FROM scan_jobs WHERE status = 'running' ORDER BY id DESC LIMIT 1",
                [],
                row_to_scan_job,
            )
            .optional()?;
        Ok(job)
    }

    fn cleanup_stale_scans(&self) -> Result<usize, StoreError> {
        let conn = self.lock_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE scan_jobs
            SET status = 'failed', error = 'interrupted by process restart', finished_at = ?1
            WHERE status IN ('pending', 'running')
            "#,
            [Utc::now()],
        )?;
        if affected > 0 {
            info!(swept = affected, "marked stale scan jobs as failed");
        }
        Ok(affected)
    }
}
