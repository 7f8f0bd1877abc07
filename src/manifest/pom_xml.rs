//! pom.xml extractor
//!
//! Walks `<dependencies>` entries with the quick-xml event API. Versions
//! that are property placeholders (`${...}`) cannot be resolved without full
//! POM inheritance and are reported as skipped. `scope=test` maps to a dev
//! dependency, every other scope to runtime.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::manifest::types::{DependencyType, Ecosystem, ExtractedDependency, Extraction};
use crate::manifest::ExtractError;

pub fn extract(content: &str) -> Result<Extraction, ExtractError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut extraction = Extraction::default();
    let mut buf = Vec::new();

    let mut in_dependencies = false;
    let mut in_dependency = false;
    let mut in_exclusions = false;
    let mut current_tag = String::new();

    let mut group_id = String::new();
    let mut artifact_id = String::new();
    let mut version = String::new();
    let mut scope = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                match tag.as_str() {
                    "dependencies" => in_dependencies = true,
                    "dependency" if in_dependencies && !in_exclusions => {
                        in_dependency = true;
                        group_id.clear();
                        artifact_id.clear();
                        version.clear();
                        scope.clear();
                    }
                    "exclusions" if in_dependency => in_exclusions = true,
                    _ => {}
                }
                current_tag = tag;
            }
            Ok(Event::Text(ref e)) if in_dependency && !in_exclusions => {
                if let Ok(text) = e.unescape() {
                    match current_tag.as_str() {
                        "groupId" => group_id = text.into_owned(),
                        "artifactId" => artifact_id = text.into_owned(),
                        "version" => version = text.into_owned(),
                        "scope" => scope = text.into_owned(),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                match tag.as_str() {
                    "exclusions" => in_exclusions = false,
                    "dependency" if in_dependency && !in_exclusions => {
                        in_dependency = false;
                        finish_dependency(
                            &mut extraction,
                            &group_id,
                            &artifact_id,
                            &version,
                            &scope,
                        );
                    }
                    "dependencies" if !in_dependency => in_dependencies = false,
                    _ => {}
                }
                current_tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::InvalidContent(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(extraction)
}

fn finish_dependency(
    extraction: &mut Extraction,
    group_id: &str,
    artifact_id: &str,
    version: &str,
    scope: &str,
) {
    if artifact_id.is_empty() {
        return;
    }

    let name = if group_id.is_empty() {
        artifact_id.to_string()
    } else {
        format!("{}:{}", group_id, artifact_id)
    };

    if version.is_empty() {
        // Version managed elsewhere (BOM, parent POM); nothing to compare.
        return;
    }
    if version.contains("${") {
        // Property placeholder, unresolvable without POM inheritance.
        extraction.skipped.push(name);
        return;
    }

    let dep_type = if scope == "test" {
        DependencyType::Dev
    } else {
        DependencyType::Runtime
    };

    extraction.dependencies.push(ExtractedDependency {
        name,
        version: version.to_string(),
        ecosystem: Ecosystem::Maven,
        dep_type,
    });
}
