use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Scan tuning constants
// =============================================================================

/// How long a resolved latest version stays valid in the cache.
/// Publication cadence is slow enough that an hour of staleness is fine.
pub const VERSION_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// How often the version cache evicts expired entries.
pub const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Maximum simultaneous version lookups per manifest.
pub const RESOLVE_CONCURRENCY: usize = 10;

/// Repositories requested per provider listing page.
pub const PROVIDER_PAGE_SIZE: usize = 100;

/// Hard ceiling on listing pages, so a misbehaving server cannot
/// keep us paginating forever.
pub const MAX_PROVIDER_PAGES: usize = 100;

/// Cron expression used when none is configured (daily at 03:00).
pub const DEFAULT_CRON: &str = "0 3 * * *";

/// Returns the path to the data directory for stalewatch.
/// Uses $XDG_DATA_HOME/stalewatch if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/stalewatch,
/// or ./stalewatch if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the default path to the database file.
pub fn db_path() -> PathBuf {
    data_dir().join("stalewatch.db")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("stalewatch")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_with_env_uses_xdg_data_home_when_set() {
        let path = data_dir_with_env(
            Some("/tmp/test-data".to_string()),
            Some(PathBuf::from("/home/user")),
        );

        assert_eq!(path, PathBuf::from("/tmp/test-data/stalewatch"));
    }

    #[test]
    fn data_dir_with_env_falls_back_to_home_local_share() {
        let path = data_dir_with_env(None, Some(PathBuf::from("/home/user")));

        assert_eq!(path, PathBuf::from("/home/user/.local/share/stalewatch"));
    }

    #[test]
    fn data_dir_with_env_falls_back_to_current_dir_when_no_dirs_available() {
        let path = data_dir_with_env(None, None);
        assert_eq!(path, PathBuf::from("./stalewatch"));
    }
}
