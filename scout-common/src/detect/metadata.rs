//! Project metadata extraction
//!
//! Builds the full descriptive record persisted with a project: statistics
//! from a bounded traversal, language ranking by file count, and the
//! classification fields from validation. Filesystem errors degrade to
//! missing fields; they never fail the extraction.

use super::{
    count_lines, is_system_dir, language_for_extension, validate, ProjectValidation,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Traversal depth bound for statistics
const MAX_SCAN_DEPTH: usize = 10;

/// Files larger than this are counted/sized but not read for LOC
const MAX_LOC_FILE_BYTES: u64 = 1024 * 1024;

/// Complete metadata record for a validated project directory
#[derive(Debug, Clone)]
pub struct ProjectMetadata {
    /// Human name (directory name, or the manifest name when present)
    pub name: String,
    pub path: PathBuf,
    /// Free-text description lifted from the manifest when available
    pub description: Option<String>,
    pub validation: ProjectValidation,
    /// Primary language ranked by code-file count
    pub language: Option<String>,
    /// All detected languages with file counts, descending
    pub languages: Vec<(String, u64)>,
    pub file_count: u64,
    pub lines_of_code: u64,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

/// Extract metadata for a directory. The directory should already have
/// passed [`validate`]; calling this on an invalid directory still returns a
/// (mostly empty) record.
pub fn extract(path: &Path) -> ProjectMetadata {
    let validation = validate(path);

    let mut file_count = 0u64;
    let mut size_bytes = 0u64;
    let mut lines_of_code = 0u64;
    let mut language_counts: HashMap<&'static str, u64> = HashMap::new();

    let walker = WalkDir::new(path)
        .follow_links(false)
        .max_depth(MAX_SCAN_DEPTH)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_dir() && (is_system_dir(&name) || name.starts_with('.')))
        });

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        file_count += 1;

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };
        size_bytes += metadata.len();

        let Some(ext) = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
        else {
            continue;
        };

        if let Some(language) = language_for_extension(&ext) {
            *language_counts.entry(language).or_insert(0) += 1;

            if metadata.len() <= MAX_LOC_FILE_BYTES {
                if let Ok(content) = std::fs::read_to_string(entry.path()) {
                    lines_of_code += count_lines(&content, &ext);
                }
            }
        }
    }

    let mut languages: Vec<(String, u64)> = language_counts
        .into_iter()
        .map(|(language, count)| (language.to_string(), count))
        .collect();
    languages.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    // Primary language: top-ranked code language, else the marker default
    let language = languages
        .first()
        .map(|(language, _)| language.clone())
        .or_else(|| validation.language.clone());

    let last_modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let (name, description) = read_manifest_identity(path);
    let name = name.unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string())
    });

    ProjectMetadata {
        name,
        path: path.to_path_buf(),
        description,
        validation,
        language,
        languages,
        file_count,
        lines_of_code,
        size_bytes,
        last_modified,
    }
}

/// Pull name/description from package.json when the project carries one
fn read_manifest_identity(path: &Path) -> (Option<String>, Option<String>) {
    let Ok(content) = std::fs::read_to_string(path.join("package.json")) else {
        return (None, None);
    };
    let Ok(manifest) = serde_json::from_str::<serde_json::Value>(&content) else {
        return (None, None);
    };
    let name = manifest
        .get("name")
        .and_then(|v| v.as_str())
        .map(String::from);
    let description = manifest
        .get("description")
        .and_then(|v| v.as_str())
        .map(String::from);
    (name, description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_extract_counts_files_and_loc() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("demo");
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(
            dir.join("package.json"),
            r#"{"name":"demo","description":"a demo","dependencies":{"react":"^18"}}"#,
        )
        .unwrap();
        fs::write(
            dir.join("src/index.tsx"),
            "// entry\nexport const x = 1;\nexport const y = 2;\n",
        )
        .unwrap();

        let meta = extract(&dir);
        assert_eq!(meta.name, "demo");
        assert_eq!(meta.description.as_deref(), Some("a demo"));
        assert_eq!(meta.file_count, 2);
        assert_eq!(meta.lines_of_code, 2);
        assert_eq!(meta.language.as_deref(), Some("TypeScript"));
        assert!(meta.validation.valid);
        assert_eq!(meta.validation.framework.as_deref(), Some("React"));
        assert!(meta.size_bytes > 0);
    }

    #[test]
    fn test_system_dirs_excluded_from_stats() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("app");
        fs::create_dir_all(dir.join("node_modules/react")).unwrap();
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("package.json"), "{}").unwrap();
        fs::write(dir.join("node_modules/react/index.js"), "huge();\n".repeat(100)).unwrap();
        fs::write(dir.join("src/main.js"), "run();\n").unwrap();

        let meta = extract(&dir);
        assert_eq!(meta.file_count, 2);
        assert_eq!(meta.lines_of_code, 1);
    }

    #[test]
    fn test_language_ranking_prefers_most_files() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("poly");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Cargo.toml"), "[package]").unwrap();
        fs::write(dir.join("a.rs"), "fn a() {}\n").unwrap();
        fs::write(dir.join("b.rs"), "fn b() {}\n").unwrap();
        fs::write(dir.join("script.py"), "pass\n").unwrap();

        let meta = extract(&dir);
        assert_eq!(meta.language.as_deref(), Some("Rust"));
        assert_eq!(meta.languages[0], ("Rust".to_string(), 2));
        assert_eq!(meta.languages[1], ("Python".to_string(), 1));
    }

    #[test]
    fn test_unreadable_directory_degrades() {
        let meta = extract(Path::new("/definitely/not/here"));
        assert!(!meta.validation.valid);
        assert_eq!(meta.file_count, 0);
        assert_eq!(meta.lines_of_code, 0);
    }
}
