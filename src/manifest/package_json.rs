//! package.json extractor
//!
//! Unions `dependencies` (runtime) and `devDependencies` (dev). Declared
//! versions are cleaned down to a single concrete version for comparison:
//! leading range operators are stripped and only the first component of a
//! range is kept. This is a deliberate first-match heuristic, not a range
//! solver.

use std::collections::HashMap;

use serde::Deserialize;

use crate::manifest::types::{DependencyType, Ecosystem, ExtractedDependency, Extraction};
use crate::manifest::ExtractError;

#[derive(Debug, Deserialize, Default)]
struct PackageJson {
    #[serde(default)]
    dependencies: HashMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: HashMap<String, String>,
}

pub fn extract(content: &str) -> Result<Extraction, ExtractError> {
    let parsed: PackageJson =
        serde_json::from_str(content).map_err(|e| ExtractError::InvalidContent(e.to_string()))?;

    let mut dependencies = Vec::new();
    for (name, version) in parsed.dependencies {
        dependencies.push(dependency(name, &version, DependencyType::Runtime));
    }
    for (name, version) in parsed.dev_dependencies {
        dependencies.push(dependency(name, &version, DependencyType::Dev));
    }

    // Deterministic output regardless of map iteration order.
    dependencies.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Extraction {
        dependencies,
        skipped: Vec::new(),
    })
}

fn dependency(name: String, version: &str, dep_type: DependencyType) -> ExtractedDependency {
    ExtractedDependency {
        name,
        version: clean_version(version),
        ecosystem: Ecosystem::Npm,
        dep_type,
    }
}

/// Reduces an npm version range to a single concrete version string.
///
/// Strips leading `^ ~ >= > <= < =` operators; for `||` alternatives and
/// space-separated ranges, keeps the first component.
pub fn clean_version(version: &str) -> String {
    let mut v = version.trim();

    if let Some((first, _)) = v.split_once("||") {
        v = first.trim();
    }
    if let Some((first, _)) = v.split_once(' ') {
        v = first.trim();
    }

    for op in [">=", "<=", "^", "~", ">", "<", "="] {
        if let Some(stripped) = v.strip_prefix(op) {
            v = stripped.trim();
            break;
        }
    }

    v.to_string()
}
