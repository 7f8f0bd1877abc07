//! build.gradle / build.gradle.kts extractor
//!
//! Regex-based and best-effort; the Gradle DSL is a full programming
//! language, so only the common declaration shapes are recognized:
//!
//! - `implementation 'group:name:1.2.3'` / `implementation("group:name:1.2.3")`
//! - `implementation group: 'g', name: 'n', version: '1.2.3'`
//!
//! across the configurations {implementation, api, compile,
//! testImplementation, testCompile, runtimeOnly, compileOnly}. Versions with
//! `$` interpolation are collected as skipped, not emitted.

use regex::Regex;
use std::sync::OnceLock;

use crate::manifest::types::{DependencyType, Ecosystem, ExtractedDependency, Extraction};

const CONFIGURATIONS: &str =
    "implementation|api|compile|testImplementation|testCompile|runtimeOnly|compileOnly";

fn string_form_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // implementation 'g:n:v'  |  implementation("g:n:v")
        Regex::new(&format!(
            r#"(?m)^\s*({CONFIGURATIONS})\s*\(?\s*['"]([\w.\-]+):([\w.\-]+):([^'"]+)['"]\s*\)?"#
        ))
        .expect("invalid gradle string-form regex")
    })
}

fn map_form_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // implementation group: 'g', name: 'n', version: 'v'
        Regex::new(&format!(
            r#"(?m)^\s*({CONFIGURATIONS})\s*\(?\s*group\s*:\s*['"]([^'"]+)['"]\s*,\s*name\s*:\s*['"]([^'"]+)['"]\s*,\s*version\s*:\s*['"]([^'"]+)['"]"#
        ))
        .expect("invalid gradle map-form regex")
    })
}

pub fn extract(content: &str) -> Extraction {
    let mut extraction = Extraction::default();

    for re in [string_form_re(), map_form_re()] {
        for caps in re.captures_iter(content) {
            let configuration = &caps[1];
            let group = &caps[2];
            let artifact = &caps[3];
            let version = &caps[4];

            let name = format!("{}:{}", group, artifact);

            if version.contains('$') {
                // Gradle property interpolation; not resolvable here.
                extraction.skipped.push(name);
                continue;
            }

            let dep_type = match configuration {
                "testImplementation" | "testCompile" => DependencyType::Dev,
                _ => DependencyType::Runtime,
            };

            extraction.dependencies.push(ExtractedDependency {
                name,
                version: version.to_string(),
                ecosystem: Ecosystem::Gradle,
                dep_type,
            });
        }
    }

    extraction
}
