//! Manifest extraction layer
//! - types.rs: Common types (Ecosystem, DependencyType, ExtractedDependency)
//! - package_json.rs: package.json extractor
//! - pom_xml.rs: pom.xml extractor
//! - gradle.rs: build.gradle / build.gradle.kts extractor (regex, best-effort)
//! - go_mod.rs: go.mod extractor

pub mod go_mod;
pub mod gradle;
pub mod package_json;
pub mod pom_xml;
pub mod types;

pub use types::{DependencyType, Ecosystem, ExtractedDependency, Extraction};

/// A manifest file the scan engine probes for in every repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestKind {
    PackageJson,
    PomXml,
    BuildGradle,
    BuildGradleKts,
    GoMod,
}

impl ManifestKind {
    /// All kinds, in probe order. Probing is non-exclusive: a repository may
    /// carry manifests from several ecosystems at once.
    pub const ALL: [ManifestKind; 5] = [
        ManifestKind::PackageJson,
        ManifestKind::PomXml,
        ManifestKind::BuildGradle,
        ManifestKind::BuildGradleKts,
        ManifestKind::GoMod,
    ];

    /// Path of the manifest relative to the repository root.
    pub fn path(&self) -> &'static str {
        match self {
            ManifestKind::PackageJson => "package.json",
            ManifestKind::PomXml => "pom.xml",
            ManifestKind::BuildGradle => "build.gradle",
            ManifestKind::BuildGradleKts => "build.gradle.kts",
            ManifestKind::GoMod => "go.mod",
        }
    }

    pub fn ecosystem(&self) -> Ecosystem {
        match self {
            ManifestKind::PackageJson => Ecosystem::Npm,
            ManifestKind::PomXml => Ecosystem::Maven,
            ManifestKind::BuildGradle | ManifestKind::BuildGradleKts => Ecosystem::Gradle,
            ManifestKind::GoMod => Ecosystem::Go,
        }
    }
}

/// Error type for extraction operations
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Invalid manifest content: {0}")]
    InvalidContent(String),
}

/// Extracts declared dependencies from manifest content.
pub fn extract(kind: ManifestKind, content: &str) -> Result<Extraction, ExtractError> {
    match kind {
        ManifestKind::PackageJson => package_json::extract(content),
        ManifestKind::PomXml => pom_xml::extract(content),
        ManifestKind::BuildGradle | ManifestKind::BuildGradleKts => Ok(gradle::extract(content)),
        ManifestKind::GoMod => Ok(go_mod::extract(content)),
    }
}
