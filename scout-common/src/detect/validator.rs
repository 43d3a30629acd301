//! Directory classification
//!
//! Scores a directory as a project via three detection tiers:
//! strong marker files in the root, the same markers one level down, and a
//! weighted sum of generic signals. The highest-confidence tier wins, with
//! ties broken strong > nested > generic. Anything below 0.5 is rejected.

use super::{
    detect_framework, is_system_dir, ProjectType, CODE_EXTENSIONS, SOURCE_DIRS, TOOLING_FILES,
};
use std::path::Path;

/// Generic detection weights
const WEIGHT_GIT: f64 = 0.25;
const WEIGHT_README: f64 = 0.15;
const WEIGHT_SOURCE_DIR: f64 = 0.20;
const WEIGHT_CODE_FILES: f64 = 0.15;
const WEIGHT_TOOLING: f64 = 0.10;
const WEIGHT_DOCS: f64 = 0.05;
const WEIGHT_TESTS: f64 = 0.05;

/// Confidence below which a directory is not a project
const MIN_CONFIDENCE: f64 = 0.5;

/// Confidence for strong markers found one level below the root
const NESTED_CONFIDENCE: f64 = 0.85;

/// Cap applied to summed generic weights
const GENERIC_CAP: f64 = 0.95;

/// Classification result for a single directory
#[derive(Debug, Clone)]
pub struct ProjectValidation {
    pub valid: bool,
    pub project_type: Option<ProjectType>,
    pub framework: Option<String>,
    pub language: Option<String>,
    pub package_manager: Option<String>,
    pub confidence: f64,
}

impl ProjectValidation {
    fn invalid() -> Self {
        Self {
            valid: false,
            project_type: None,
            framework: None,
            language: None,
            package_manager: None,
            confidence: 0.0,
        }
    }
}

/// A strong marker match before framework refinement
#[derive(Debug, Clone, Copy)]
struct MarkerHit {
    project_type: ProjectType,
    package_manager: &'static str,
    confidence: f64,
}

/// Strong marker table: file name, detected type, package manager, confidence
fn strong_marker(file_name: &str) -> Option<MarkerHit> {
    let hit = match file_name {
        "package.json" => MarkerHit {
            project_type: ProjectType::Node,
            package_manager: "npm",
            confidence: 0.95,
        },
        "Cargo.toml" => MarkerHit {
            project_type: ProjectType::Rust,
            package_manager: "cargo",
            confidence: 0.95,
        },
        "go.mod" => MarkerHit {
            project_type: ProjectType::Go,
            package_manager: "go",
            confidence: 0.95,
        },
        "pom.xml" => MarkerHit {
            project_type: ProjectType::Java,
            package_manager: "maven",
            confidence: 0.9,
        },
        "build.gradle" | "build.gradle.kts" => MarkerHit {
            project_type: ProjectType::Java,
            package_manager: "gradle",
            confidence: 0.9,
        },
        "composer.json" => MarkerHit {
            project_type: ProjectType::Php,
            package_manager: "composer",
            confidence: 0.9,
        },
        "Gemfile" => MarkerHit {
            project_type: ProjectType::Ruby,
            package_manager: "bundler",
            confidence: 0.9,
        },
        "pyproject.toml" => MarkerHit {
            project_type: ProjectType::Python,
            package_manager: "poetry",
            confidence: 0.95,
        },
        "requirements.txt" => MarkerHit {
            project_type: ProjectType::Python,
            package_manager: "pip",
            confidence: 0.9,
        },
        "Pipfile" => MarkerHit {
            project_type: ProjectType::Python,
            package_manager: "pipenv",
            confidence: 0.9,
        },
        "pubspec.yaml" => MarkerHit {
            project_type: ProjectType::Dart,
            package_manager: "pub",
            confidence: 0.9,
        },
        _ => {
            // C# markers match by extension rather than exact name
            if file_name.ends_with(".csproj") || file_name.ends_with(".sln") {
                MarkerHit {
                    project_type: ProjectType::CSharp,
                    package_manager: "nuget",
                    confidence: 0.9,
                }
            } else {
                return None;
            }
        }
    };
    Some(hit)
}

/// Classify a directory. Never errors: unreadable directories validate as
/// `valid = false` with confidence 0.
pub fn validate(path: &Path) -> ProjectValidation {
    if !path.is_dir() {
        return ProjectValidation::invalid();
    }

    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return ProjectValidation::invalid(),
    };
    if name.starts_with('.') || is_system_dir(name) {
        return ProjectValidation::invalid();
    }

    let entries = match read_entries(path) {
        Some(entries) if !entries.is_empty() => entries,
        _ => return ProjectValidation::invalid(),
    };

    // Tier 1: strong markers in the root
    let strong = entries
        .iter()
        .filter(|e| e.is_file)
        .filter_map(|e| strong_marker(&e.name))
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

    // Tier 2: strong markers exactly one level below
    let nested = entries
        .iter()
        .filter(|e| e.is_dir && !is_system_dir(&e.name) && !e.name.starts_with('.'))
        .filter_map(|e| read_entries(&path.join(&e.name)))
        .flat_map(|children| {
            children
                .into_iter()
                .filter(|c| c.is_file)
                .filter_map(|c| strong_marker(&c.name))
                .collect::<Vec<_>>()
        })
        .map(|hit| MarkerHit {
            confidence: NESTED_CONFIDENCE,
            ..hit
        })
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

    // Tier 3: generic signals
    let generic_confidence = score_generic(&entries);

    // Highest confidence wins; on ties the earlier tier wins
    let mut best_confidence = 0.0;
    let mut best_hit: Option<MarkerHit> = None;
    if let Some(hit) = strong {
        best_confidence = hit.confidence;
        best_hit = Some(hit);
    }
    if let Some(hit) = nested {
        if hit.confidence > best_confidence {
            best_confidence = hit.confidence;
            best_hit = Some(hit);
        }
    }
    if generic_confidence > best_confidence {
        best_confidence = generic_confidence;
        best_hit = None;
    }

    if best_confidence < MIN_CONFIDENCE {
        return ProjectValidation::invalid();
    }

    match best_hit {
        Some(hit) => {
            let framework = detect_framework(path, hit.project_type);
            // Lockfiles refine the node package manager
            let package_manager = if hit.project_type == ProjectType::Node {
                node_package_manager(&entries)
            } else {
                hit.package_manager.to_string()
            };
            ProjectValidation {
                valid: true,
                project_type: Some(hit.project_type),
                framework,
                language: hit.project_type.default_language().map(String::from),
                package_manager: Some(package_manager),
                confidence: best_confidence,
            }
        }
        None => ProjectValidation {
            valid: true,
            project_type: Some(ProjectType::Generic),
            framework: None,
            language: None,
            package_manager: None,
            confidence: best_confidence,
        },
    }
}

/// Lightweight directory entry used during scoring
struct Entry {
    name: String,
    is_file: bool,
    is_dir: bool,
}

/// Read immediate children, absorbing errors. None means unreadable.
fn read_entries(path: &Path) -> Option<Vec<Entry>> {
    let read = std::fs::read_dir(path).ok()?;
    let mut entries = Vec::new();
    for entry in read.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().to_string();
        entries.push(Entry {
            name,
            is_file: file_type.is_file(),
            is_dir: file_type.is_dir(),
        });
    }
    Some(entries)
}

fn score_generic(entries: &[Entry]) -> f64 {
    let mut score = 0.0;

    let has_git = entries.iter().any(|e| e.is_dir && e.name == ".git");
    if has_git {
        score += WEIGHT_GIT;
    }

    let has_readme = entries.iter().any(|e| {
        e.is_file
            && Path::new(&e.name)
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| stem.eq_ignore_ascii_case("readme"))
    });
    if has_readme {
        score += WEIGHT_README;
    }

    let has_source_dir = entries.iter().any(|e| {
        e.is_dir
            && SOURCE_DIRS
                .iter()
                .any(|src| e.name.eq_ignore_ascii_case(src))
    });
    if has_source_dir {
        score += WEIGHT_SOURCE_DIR;
    }

    let code_files = entries
        .iter()
        .filter(|e| {
            e.is_file
                && Path::new(&e.name)
                    .extension()
                    .and_then(|x| x.to_str())
                    .is_some_and(|ext| {
                        let lowered = ext.to_lowercase();
                        CODE_EXTENSIONS.iter().any(|c| *c == lowered)
                    })
        })
        .count();
    if code_files >= 2 {
        score += WEIGHT_CODE_FILES;
    }

    let has_tooling = entries.iter().any(|e| {
        e.is_file
            && TOOLING_FILES
                .iter()
                .any(|t| e.name.eq_ignore_ascii_case(t))
    });
    if has_tooling {
        score += WEIGHT_TOOLING;
    }

    let has_docs = entries
        .iter()
        .any(|e| e.is_dir && (e.name.eq_ignore_ascii_case("docs") || e.name.eq_ignore_ascii_case("doc")));
    if has_docs {
        score += WEIGHT_DOCS;
    }

    let has_tests = entries.iter().any(|e| {
        e.is_dir
            && matches!(
                e.name.to_lowercase().as_str(),
                "test" | "tests" | "__tests__" | "spec"
            )
    });
    if has_tests {
        score += WEIGHT_TESTS;
    }

    score.min(GENERIC_CAP)
}

/// Pick the node package manager from lockfiles, defaulting to npm
fn node_package_manager(entries: &[Entry]) -> String {
    let has = |name: &str| entries.iter().any(|e| e.is_file && e.name == name);
    if has("pnpm-lock.yaml") {
        "pnpm".to_string()
    } else if has("yarn.lock") {
        "yarn".to_string()
    } else if has("bun.lockb") || has("bun.lock") {
        "bun".to_string()
    } else {
        "npm".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project_dir(root: &TempDir, name: &str) -> std::path::PathBuf {
        let dir = root.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_non_directory_rejected() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("demo.txt");
        fs::write(&file, "hello").unwrap();
        assert!(!validate(&file).valid);
    }

    #[test]
    fn test_empty_directory_rejected() {
        let root = TempDir::new().unwrap();
        let dir = project_dir(&root, "empty");
        assert!(!validate(&dir).valid);
    }

    #[test]
    fn test_hidden_and_system_directories_rejected() {
        let root = TempDir::new().unwrap();
        for name in [".hidden", "node_modules", "dist", "__pycache__"] {
            let dir = project_dir(&root, name);
            fs::write(dir.join("package.json"), "{}").unwrap();
            assert!(!validate(&dir).valid, "{} should be rejected", name);
        }
    }

    #[test]
    fn test_strong_marker_node() {
        let root = TempDir::new().unwrap();
        let dir = project_dir(&root, "webapp");
        fs::write(
            dir.join("package.json"),
            r#"{"dependencies":{"react":"^18"}}"#,
        )
        .unwrap();

        let result = validate(&dir);
        assert!(result.valid);
        assert_eq!(result.project_type, Some(ProjectType::Node));
        assert_eq!(result.framework.as_deref(), Some("React"));
        assert_eq!(result.package_manager.as_deref(), Some("npm"));
        assert!(result.confidence >= 0.9);
    }

    #[test]
    fn test_strong_marker_rust() {
        let root = TempDir::new().unwrap();
        let dir = project_dir(&root, "cli");
        fs::write(dir.join("Cargo.toml"), "[package]\nname = \"cli\"\n").unwrap();

        let result = validate(&dir);
        assert!(result.valid);
        assert_eq!(result.project_type, Some(ProjectType::Rust));
        assert_eq!(result.package_manager.as_deref(), Some("cargo"));
        assert_eq!(result.language.as_deref(), Some("Rust"));
    }

    #[test]
    fn test_csharp_marker_by_extension() {
        let root = TempDir::new().unwrap();
        let dir = project_dir(&root, "service");
        fs::write(dir.join("Service.csproj"), "<Project/>").unwrap();

        let result = validate(&dir);
        assert!(result.valid);
        assert_eq!(result.project_type, Some(ProjectType::CSharp));
    }

    #[test]
    fn test_nested_marker_scores_lower_than_root() {
        let root = TempDir::new().unwrap();
        let dir = project_dir(&root, "monorepo");
        let inner = dir.join("service");
        fs::create_dir_all(&inner).unwrap();
        fs::write(inner.join("go.mod"), "module example.com/service\n").unwrap();

        let result = validate(&dir);
        assert!(result.valid);
        assert_eq!(result.project_type, Some(ProjectType::Go));
        assert!((result.confidence - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_git_only_rejected_below_threshold() {
        let root = TempDir::new().unwrap();
        let dir = project_dir(&root, "scratch");
        fs::create_dir_all(dir.join(".git")).unwrap();

        let result = validate(&dir);
        assert!(!result.valid);
    }

    #[test]
    fn test_generic_signals_accumulate() {
        let root = TempDir::new().unwrap();
        let dir = project_dir(&root, "legacy");
        fs::create_dir_all(dir.join(".git")).unwrap();
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("README.md"), "# legacy").unwrap();
        fs::write(dir.join("main.c"), "int main(){}").unwrap();
        fs::write(dir.join("util.c"), "").unwrap();

        // 0.25 + 0.20 + 0.15 + 0.15 = 0.75
        let result = validate(&dir);
        assert!(result.valid);
        assert_eq!(result.project_type, Some(ProjectType::Generic));
        assert!((result.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_readme_and_code_alone_stay_below_threshold() {
        let root = TempDir::new().unwrap();
        let dir = project_dir(&root, "snippets");
        fs::write(dir.join("README.md"), "# snippets").unwrap();
        fs::write(dir.join("a.py"), "print(1)").unwrap();
        fs::write(dir.join("b.py"), "print(2)").unwrap();

        // 0.15 + 0.15 = 0.30 < 0.5
        let result = validate(&dir);
        assert!(!result.valid);
    }

    #[test]
    fn test_lockfile_refines_node_package_manager() {
        let root = TempDir::new().unwrap();
        let dir = project_dir(&root, "pnpm-app");
        fs::write(dir.join("package.json"), "{}").unwrap();
        fs::write(dir.join("pnpm-lock.yaml"), "").unwrap();

        let result = validate(&dir);
        assert_eq!(result.package_manager.as_deref(), Some("pnpm"));
    }

    #[test]
    fn test_root_marker_beats_nested_marker() {
        let root = TempDir::new().unwrap();
        let dir = project_dir(&root, "mixed");
        fs::write(dir.join("Cargo.toml"), "[package]").unwrap();
        let inner = dir.join("web");
        fs::create_dir_all(&inner).unwrap();
        fs::write(inner.join("package.json"), "{}").unwrap();

        let result = validate(&dir);
        assert_eq!(result.project_type, Some(ProjectType::Rust));
        assert!(result.confidence > 0.85);
    }
}
