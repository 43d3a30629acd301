//! Project context assembly
//!
//! Builds the text blob handed to the analyzer, bounded by a token budget.
//! Admission order: README first (capped at 2000 tokens), then the package
//! manifest verbatim, then source files ranked by priority name, path depth
//! and size. Oversized files are skipped outright; the last admissible file
//! is truncated rather than dropped. Unreadable files are silently skipped.

use scout_common::detect::{self, is_system_dir, CODE_EXTENSIONS};
use scout_common::tokens::{estimate_tokens, truncate_to_tokens};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// README inclusion cap, in tokens
const README_TOKEN_CAP: usize = 2000;

/// Files above this size are never admitted
const MAX_FILE_BYTES: u64 = 100 * 1024;

/// Admission stops at this share of the remaining budget
const ADMISSION_SHARE: f64 = 0.9;

/// Truncating below this many tokens is not worth including
const MIN_TRUNCATED_TOKENS: usize = 50;

/// Context traversal depth
const MAX_DEPTH: usize = 6;

/// Known manifests, first match wins
const MANIFEST_FILES: &[&str] = &[
    "package.json",
    "Cargo.toml",
    "go.mod",
    "pom.xml",
    "composer.json",
    "Gemfile",
    "pyproject.toml",
];

/// Filenames admitted ahead of everything else, in rank order
const PRIORITY_FILES: &[&str] = &[
    "readme.md",
    "readme",
    "claude.md",
    "prd.md",
    "architecture.md",
    "makefile",
    "dockerfile",
    "docker-compose.yml",
    "tsconfig.json",
    "vite.config.ts",
    "webpack.config.js",
    ".env.example",
];

/// Package manifest, parsed when possible
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ManifestData {
    /// Parseable manifest included as structured data
    Structured { file: String, data: Value },
    /// Anything else included as raw text
    Raw { file: String, content: String },
}

/// One admitted source file
#[derive(Debug, Clone, Serialize)]
pub struct ContextFile {
    /// Path relative to the project root
    pub path: String,
    pub content: String,
    pub truncated: bool,
    pub tokens: usize,
}

/// Project statistics reported alongside the context
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    pub file_count: u64,
    pub lines_of_code: u64,
    pub total_size: u64,
    pub estimated_tokens: usize,
}

/// Token-budgeted project context
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectContext {
    pub project_name: String,
    pub readme: Option<String>,
    pub manifest: Option<ManifestData>,
    pub files: Vec<ContextFile>,
    pub summary: ContextSummary,
}

impl ProjectContext {
    /// Render the context as the analyzer's user message
    pub fn to_prompt(&self) -> String {
        let mut prompt = format!("# Project: {}\n\n", self.project_name);
        prompt.push_str(&format!(
            "Files: {}, lines of code: {}, total size: {} bytes\n\n",
            self.summary.file_count, self.summary.lines_of_code, self.summary.total_size
        ));

        if let Some(readme) = &self.readme {
            prompt.push_str("## README\n\n");
            prompt.push_str(readme);
            prompt.push_str("\n\n");
        }

        match &self.manifest {
            Some(ManifestData::Structured { file, data }) => {
                prompt.push_str(&format!("## Manifest ({})\n\n```json\n{}\n```\n\n", file, data));
            }
            Some(ManifestData::Raw { file, content }) => {
                prompt.push_str(&format!("## Manifest ({})\n\n```\n{}\n```\n\n", file, content));
            }
            None => {}
        }

        for file in &self.files {
            prompt.push_str(&format!("## {}\n\n```\n{}\n```\n\n", file.path, file.content));
        }

        prompt
    }
}

/// A candidate source file with its sort key
struct Candidate {
    path: PathBuf,
    relative: String,
    rank: usize,
    depth: usize,
    size: u64,
}

/// Priority rank for a file name; unknown names sort after the known list
fn priority_rank(file_name: &str) -> usize {
    let lowered = file_name.to_lowercase();
    PRIORITY_FILES
        .iter()
        .position(|p| *p == lowered)
        .unwrap_or(PRIORITY_FILES.len())
}

/// Whether a file qualifies for context at all
fn is_context_candidate(file_name: &str) -> bool {
    if priority_rank(file_name) < PRIORITY_FILES.len() {
        return true;
    }
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let lowered = ext.to_lowercase();
            CODE_EXTENSIONS.iter().any(|c| *c == lowered)
        })
        .unwrap_or(false)
}

/// Assemble the context for a project, bounded by `max_tokens`.
pub fn extract_context(path: &Path, max_tokens: usize) -> ProjectContext {
    let metadata = detect::extract(path);
    let mut remaining = max_tokens;

    // README first, capped
    let readme = read_readme(path).map(|content| {
        let cap = README_TOKEN_CAP.min(remaining);
        let (text, truncated) = truncate_to_tokens(&content, cap);
        if truncated {
            debug!("README truncated to {} tokens", cap);
        }
        remaining = remaining.saturating_sub(estimate_tokens(&text));
        text
    });

    // Manifest verbatim, structured when parseable
    let manifest = read_manifest(path).map(|manifest| {
        let tokens = match &manifest {
            ManifestData::Structured { data, .. } => estimate_tokens(&data.to_string()),
            ManifestData::Raw { content, .. } => estimate_tokens(content),
        };
        remaining = remaining.saturating_sub(tokens);
        manifest
    });

    // Source files by (priority, depth, size)
    let mut candidates = collect_candidates(path);
    candidates.sort_by(|a, b| {
        a.rank
            .cmp(&b.rank)
            .then(a.depth.cmp(&b.depth))
            .then(a.size.cmp(&b.size))
    });

    let mut files = Vec::new();
    for candidate in candidates {
        if remaining == 0 {
            break;
        }
        let Ok(content) = std::fs::read_to_string(&candidate.path) else {
            continue;
        };
        let tokens = estimate_tokens(&content);
        let admission_limit = (remaining as f64 * ADMISSION_SHARE) as usize;

        if tokens <= admission_limit {
            remaining = remaining.saturating_sub(tokens);
            files.push(ContextFile {
                path: candidate.relative,
                content,
                truncated: false,
                tokens,
            });
        } else {
            // Truncate the last admissible file instead of dropping it
            if admission_limit >= MIN_TRUNCATED_TOKENS {
                let (truncated_content, _) = truncate_to_tokens(&content, admission_limit);
                let tokens = estimate_tokens(&truncated_content);
                remaining = remaining.saturating_sub(tokens);
                files.push(ContextFile {
                    path: candidate.relative,
                    content: truncated_content,
                    truncated: true,
                    tokens,
                });
            }
            break;
        }
    }

    let estimated_tokens = max_tokens.saturating_sub(remaining);
    ProjectContext {
        project_name: metadata.name.clone(),
        readme,
        manifest,
        files,
        summary: ContextSummary {
            file_count: metadata.file_count,
            lines_of_code: metadata.lines_of_code,
            total_size: metadata.size_bytes,
            estimated_tokens,
        },
    }
}

fn read_readme(path: &Path) -> Option<String> {
    let entries = std::fs::read_dir(path).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let stem_is_readme = Path::new(&name)
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|stem| stem.eq_ignore_ascii_case("readme"));
        if stem_is_readme && entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            return std::fs::read_to_string(entry.path()).ok();
        }
    }
    None
}

fn read_manifest(path: &Path) -> Option<ManifestData> {
    for file in MANIFEST_FILES {
        let manifest_path = path.join(file);
        let Ok(content) = std::fs::read_to_string(&manifest_path) else {
            continue;
        };
        if *file == "package.json" {
            if let Ok(data) = serde_json::from_str::<Value>(&content) {
                return Some(ManifestData::Structured {
                    file: file.to_string(),
                    data,
                });
            }
        }
        return Some(ManifestData::Raw {
            file: file.to_string(),
            content,
        });
    }
    None
}

fn collect_candidates(root: &Path) -> Vec<Candidate> {
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(MAX_DEPTH)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_dir() && (is_system_dir(&name) || name.starts_with('.')))
        });

    let mut candidates = Vec::new();
    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();

        // README and manifests are handled by their own sections
        let stem_is_readme = Path::new(&name)
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|stem| stem.eq_ignore_ascii_case("readme"));
        if stem_is_readme || MANIFEST_FILES.iter().any(|m| *m == name) {
            continue;
        }
        if !is_context_candidate(&name) {
            continue;
        }

        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.len() > MAX_FILE_BYTES {
            debug!("Skipping oversized file {}", entry.path().display());
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| entry.path().display().to_string());

        candidates.push(Candidate {
            path: entry.path().to_path_buf(),
            relative,
            rank: priority_rank(&name),
            depth: entry.depth(),
            size: meta.len(),
        });
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project(root: &TempDir) -> PathBuf {
        let dir = root.path().join("demo");
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("package.json"), r#"{"name":"demo"}"#).unwrap();
        dir
    }

    #[test]
    fn test_readme_comes_first_and_manifest_is_structured() {
        let root = TempDir::new().unwrap();
        let dir = project(&root);
        fs::write(dir.join("README.md"), "# Demo\nA demo project.").unwrap();
        fs::write(dir.join("src/index.ts"), "export const x = 1;\n").unwrap();

        let context = extract_context(&dir, 10_000);
        assert!(context.readme.as_deref().unwrap().starts_with("# Demo"));
        assert!(matches!(
            context.manifest,
            Some(ManifestData::Structured { ref file, .. }) if file == "package.json"
        ));
        assert_eq!(context.files.len(), 1);
        assert_eq!(context.files[0].path, "src/index.ts");
    }

    #[test]
    fn test_non_json_manifest_included_raw() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("cli");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Cargo.toml"), "[package]\nname = \"cli\"\n").unwrap();

        let context = extract_context(&dir, 10_000);
        assert!(matches!(
            context.manifest,
            Some(ManifestData::Raw { ref file, .. }) if file == "Cargo.toml"
        ));
    }

    #[test]
    fn test_file_at_size_limit_admitted_beyond_skipped() {
        let root = TempDir::new().unwrap();
        let dir = project(&root);
        fs::write(dir.join("src/exact.ts"), "x".repeat(MAX_FILE_BYTES as usize)).unwrap();
        fs::write(
            dir.join("src/over.ts"),
            "y".repeat(MAX_FILE_BYTES as usize + 1),
        )
        .unwrap();

        let candidates = collect_candidates(&dir);
        let names: Vec<&str> = candidates
            .iter()
            .map(|c| c.relative.as_str())
            .collect();
        assert!(names.contains(&"src/exact.ts"));
        assert!(!names.contains(&"src/over.ts"));
    }

    #[test]
    fn test_shallow_then_small_ordering() {
        let root = TempDir::new().unwrap();
        let dir = project(&root);
        fs::create_dir_all(dir.join("src/deep")).unwrap();
        fs::write(dir.join("src/deep/nested.ts"), "deep();\n").unwrap();
        fs::write(dir.join("top.ts"), "top();\n".repeat(10)).unwrap();
        fs::write(dir.join("small.ts"), "s();\n").unwrap();

        let context = extract_context(&dir, 10_000);
        let order: Vec<&str> = context.files.iter().map(|f| f.path.as_str()).collect();
        // Shallower first, then smaller within a depth
        assert_eq!(order, vec!["small.ts", "top.ts", "src/deep/nested.ts"]);
    }

    #[test]
    fn test_budget_truncates_last_file() {
        let root = TempDir::new().unwrap();
        let dir = project(&root);
        fs::write(dir.join("big.ts"), "const line = 1;\n".repeat(500)).unwrap();

        // Budget too small for the whole file but enough to truncate into
        let context = extract_context(&dir, 400);
        assert_eq!(context.files.len(), 1);
        assert!(context.files[0].truncated);
        assert!(context.files[0].content.ends_with("[… truncated …]"));
        assert!(context.summary.estimated_tokens <= 400);
    }

    #[test]
    fn test_oversized_readme_leaves_no_room_for_sources() {
        let root = TempDir::new().unwrap();
        let dir = project(&root);
        fs::write(dir.join("README.md"), "word ".repeat(5000)).unwrap();
        fs::write(dir.join("src/index.ts"), "export {};\n".repeat(100)).unwrap();

        // Budget smaller than the README cap: README itself is truncated
        let context = extract_context(&dir, 500);
        let readme = context.readme.unwrap();
        assert!(readme.ends_with("[… truncated …]"));
        assert!(estimate_tokens(&readme) <= 500 + 8);
        assert!(context.files.is_empty());
    }

    #[test]
    fn test_prompt_rendering_contains_sections() {
        let root = TempDir::new().unwrap();
        let dir = project(&root);
        fs::write(dir.join("README.md"), "# Demo").unwrap();
        fs::write(dir.join("src/index.ts"), "export {};\n").unwrap();

        let prompt = extract_context(&dir, 10_000).to_prompt();
        assert!(prompt.contains("# Project: demo"));
        assert!(prompt.contains("## README"));
        assert!(prompt.contains("## Manifest (package.json)"));
        assert!(prompt.contains("## src/index.ts"));
    }
}
