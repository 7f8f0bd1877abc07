//! Common types for manifest extraction

use serde::{Deserialize, Serialize};

/// Package ecosystem a dependency belongs to. Determines which registry
/// client resolves its latest version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    /// npm registry (package.json)
    Npm,
    /// Maven Central (pom.xml)
    Maven,
    /// Gradle build files; versions resolved against Maven Central
    Gradle,
    /// Go module proxy (go.mod)
    Go,
}

impl Ecosystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::Maven => "maven",
            Ecosystem::Gradle => "gradle",
            Ecosystem::Go => "go",
        }
    }
}

impl std::str::FromStr for Ecosystem {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "npm" => Ok(Ecosystem::Npm),
            "maven" => Ok(Ecosystem::Maven),
            "gradle" => Ok(Ecosystem::Gradle),
            "go" => Ok(Ecosystem::Go),
            _ => Err(()),
        }
    }
}

/// Whether a dependency is needed at runtime or only for development/tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    Runtime,
    Dev,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::Runtime => "runtime",
            DependencyType::Dev => "dev",
        }
    }
}

impl std::str::FromStr for DependencyType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "runtime" => Ok(DependencyType::Runtime),
            "dev" => Ok(DependencyType::Dev),
            _ => Err(()),
        }
    }
}

/// A dependency declared in a manifest.
///
/// `name` is the registry lookup key: package name for npm,
/// `group:artifact` for Maven/Gradle, module path for Go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDependency {
    pub name: String,
    pub version: String,
    pub ecosystem: Ecosystem,
    pub dep_type: DependencyType,
}

/// Result of extracting one manifest.
///
/// `skipped` holds dependencies whose version could not be pinned down
/// (Gradle property interpolation, Maven `${...}` placeholders); they are
/// reported but never resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub dependencies: Vec<ExtractedDependency>,
    pub skipped: Vec<String>,
}
