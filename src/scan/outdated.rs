//! Staleness decision
//!
//! A dependency is outdated when its declared version parses, the resolved
//! latest version parses, and declared < latest under semver ordering.
//! Anything unparsable is treated as current; a wrong "up to date" is
//! cheaper than a false alarm on a version scheme we don't understand.

use semver::Version;
use tracing::debug;

/// Parses a version string leniently: a leading `v` is dropped and partial
/// versions are padded (`1` -> `1.0.0`, `1.2` -> `1.2.0`).
pub fn parse_version(version: &str) -> Option<Version> {
    let trimmed = version.trim().trim_start_matches('v');
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = Version::parse(trimmed) {
        return Some(parsed);
    }

    // Split off build/pre-release suffixes before counting parts.
    let core_len = trimmed
        .find(['-', '+'])
        .unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(core_len);

    let padded = match core.split('.').count() {
        1 => format!("{core}.0.0{suffix}"),
        2 => format!("{core}.0{suffix}"),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

/// Whether `current` is strictly behind `latest`.
pub fn is_outdated(current: &str, latest: &str) -> bool {
    let (Some(current), Some(latest)) = (parse_version(current), parse_version(latest)) else {
        debug!(current, latest, "unparsable version, treating as current");
        return false;
    };
    current < latest
}
