//! Framework detection from package manifests

use super::ProjectType;
use std::collections::HashMap;
use std::path::Path;

/// Node framework precedence: meta-frameworks before UI libraries before
/// server frameworks, so `next` + `react` detects as Next.js.
const NODE_FRAMEWORKS: &[(&str, &str)] = &[
    ("next", "Next.js"),
    ("nuxt", "Nuxt"),
    ("@remix-run/react", "Remix"),
    ("gatsby", "Gatsby"),
    ("astro", "Astro"),
    ("@sveltejs/kit", "SvelteKit"),
    ("@builder.io/qwik-city", "Qwik City"),
    ("@angular/core", "Angular"),
    ("react", "React"),
    ("vue", "Vue"),
    ("svelte", "Svelte"),
    ("solid-js", "Solid"),
    ("preact", "Preact"),
    ("express", "Express"),
    ("fastify", "Fastify"),
    ("@nestjs/core", "NestJS"),
    ("koa", "Koa"),
    ("hono", "Hono"),
    ("@hapi/hapi", "Hapi"),
];

/// Python framework markers looked up as requirement substrings
const PYTHON_FRAMEWORKS: &[(&str, &str)] = &[
    ("django", "Django"),
    ("flask", "Flask"),
    ("fastapi", "FastAPI"),
];

/// Detect the primary framework for a validated project directory.
///
/// Only node and python projects carry framework detection; everything else
/// returns None. Read or parse failures degrade to None.
pub fn detect_framework(path: &Path, project_type: ProjectType) -> Option<String> {
    match project_type {
        ProjectType::Node => detect_node_framework(path),
        ProjectType::Python => detect_python_framework(path),
        _ => None,
    }
}

fn detect_node_framework(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path.join("package.json")).ok()?;
    let manifest: serde_json::Value = serde_json::from_str(&content).ok()?;

    let mut dependencies: HashMap<&str, ()> = HashMap::new();
    for section in ["dependencies", "devDependencies"] {
        if let Some(map) = manifest.get(section).and_then(|v| v.as_object()) {
            for key in map.keys() {
                dependencies.insert(key.as_str(), ());
            }
        }
    }

    NODE_FRAMEWORKS
        .iter()
        .find(|(dep, _)| dependencies.contains_key(dep))
        .map(|(_, name)| name.to_string())
}

fn detect_python_framework(path: &Path) -> Option<String> {
    // requirements.txt first, then pyproject.toml dependency listings
    for manifest in ["requirements.txt", "pyproject.toml"] {
        if let Ok(content) = std::fs::read_to_string(path.join(manifest)) {
            let lowered = content.to_lowercase();
            if let Some((_, name)) = PYTHON_FRAMEWORKS
                .iter()
                .find(|(marker, _)| lowered.contains(marker))
            {
                return Some(name.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_meta_framework_precedes_ui_library() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies":{"react":"^18","next":"^14"}}"#,
        )
        .unwrap();

        assert_eq!(
            detect_framework(dir.path(), ProjectType::Node).as_deref(),
            Some("Next.js")
        );
    }

    #[test]
    fn test_dev_dependencies_count() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"devDependencies":{"svelte":"^4"}}"#,
        )
        .unwrap();

        assert_eq!(
            detect_framework(dir.path(), ProjectType::Node).as_deref(),
            Some("Svelte")
        );
    }

    #[test]
    fn test_malformed_manifest_degrades_to_none() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), "not json at all").unwrap();
        assert_eq!(detect_framework(dir.path(), ProjectType::Node), None);
    }

    #[test]
    fn test_python_requirements_substring() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("requirements.txt"),
            "Django>=4.2\npsycopg2\n",
        )
        .unwrap();

        assert_eq!(
            detect_framework(dir.path(), ProjectType::Python).as_deref(),
            Some("Django")
        );
    }

    #[test]
    fn test_non_node_non_python_has_no_framework() {
        let dir = TempDir::new().unwrap();
        assert_eq!(detect_framework(dir.path(), ProjectType::Rust), None);
    }
}
