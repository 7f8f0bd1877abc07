//! go.mod extractor
//!
//! Line-oriented extraction recognizing both forms:
//! - Single: `require golang.org/x/text v0.14.0`
//! - Block:
//!   ```text
//!   require (
//!       golang.org/x/text v0.14.0
//!       golang.org/x/net v0.20.0 // indirect
//!   )
//!   ```
//!
//! `// indirect` comments are stripped, not treated as a filter: indirect
//! requirements are still extracted.

use regex::Regex;
use std::sync::OnceLock;

use crate::manifest::types::{DependencyType, Ecosystem, ExtractedDependency, Extraction};

fn single_require_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // require module/path v1.2.3 [// comment]
    RE.get_or_init(|| {
        Regex::new(r"^require\s+(\S+)\s+(v\S+)(?:\s*//.*)?$").expect("invalid go.mod regex")
    })
}

fn require_spec_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // module/path v1.2.3 [// comment], inside a require block
    RE.get_or_init(|| {
        Regex::new(r"^(\S+)\s+(v\S+)(?:\s*//.*)?$").expect("invalid go.mod regex")
    })
}

pub fn extract(content: &str) -> Extraction {
    let mut extraction = Extraction::default();
    let mut in_require_block = false;

    for line in content.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }

        if in_require_block {
            if trimmed == ")" {
                in_require_block = false;
            } else if let Some(caps) = require_spec_re().captures(trimmed) {
                push_dependency(&mut extraction, &caps[1], &caps[2]);
            }
            continue;
        }

        if trimmed == "require (" || trimmed == "require(" {
            in_require_block = true;
        } else if let Some(caps) = single_require_re().captures(trimmed) {
            push_dependency(&mut extraction, &caps[1], &caps[2]);
        }
    }

    extraction
}

fn push_dependency(extraction: &mut Extraction, module_path: &str, version: &str) {
    extraction.dependencies.push(ExtractedDependency {
        name: module_path.to_string(),
        version: version.to_string(),
        ecosystem: Ecosystem::Go,
        dep_type: DependencyType::Runtime,
    });
}
