//! Project validation and metadata extraction
//!
//! Classifies a directory as a development project and extracts the
//! descriptive metadata persisted with it: detected type, framework,
//! language, package manager, file/LOC/size statistics.
//!
//! Every filesystem error inside this module degrades the result instead of
//! failing it: unreadable entries are skipped, and a completely unreadable
//! directory validates as `valid = false` with confidence 0.

mod frameworks;
mod loc;
mod metadata;
mod validator;

pub use frameworks::detect_framework;
pub use loc::count_lines;
pub use metadata::{extract, ProjectMetadata};
pub use validator::{validate, ProjectValidation};

/// Directory names never treated as projects and skipped during traversal
pub const SYSTEM_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "target",
    "coverage",
    "__pycache__",
    "vendor",
    ".vscode",
    ".idea",
    ".next",
    "out",
    ".cache",
    ".svn",
    ".hg",
];

/// Source subdirectory names contributing to generic project detection
pub const SOURCE_DIRS: &[&str] = &[
    "src", "lib", "app", "components", "services", "utils", "core", "modules", "backend",
    "frontend", "server", "client", "api", "web", "ui", "packages", "apps",
];

/// File extensions counted as code
pub const CODE_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "mjs", "cjs", "py", "rs", "go", "java", "kt", "c", "h", "cpp",
    "hpp", "cc", "cs", "rb", "php", "swift", "scala", "dart", "vue", "svelte", "ex", "exs",
    "clj", "hs", "lua", "r", "zig", "sh",
];

/// Build/tooling config files contributing to generic project detection
pub const TOOLING_FILES: &[&str] = &[
    "makefile",
    "dockerfile",
    "docker-compose.yml",
    "docker-compose.yaml",
    "tsconfig.json",
    "webpack.config.js",
    "vite.config.js",
    "vite.config.ts",
    "rollup.config.js",
    "babel.config.js",
    ".eslintrc",
    ".eslintrc.js",
    ".eslintrc.json",
    "cmakelists.txt",
    "meson.build",
    "justfile",
    "taskfile.yml",
];

/// Project type detected from a strong marker file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    Node,
    Rust,
    Go,
    Java,
    Php,
    Ruby,
    Python,
    Dart,
    CSharp,
    Generic,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Node => "node",
            ProjectType::Rust => "rust",
            ProjectType::Go => "go",
            ProjectType::Java => "java",
            ProjectType::Php => "php",
            ProjectType::Ruby => "ruby",
            ProjectType::Python => "python",
            ProjectType::Dart => "dart",
            ProjectType::CSharp => "csharp",
            ProjectType::Generic => "generic",
        }
    }

    /// Default language for projects of this type, used when the file scan
    /// finds nothing better
    pub fn default_language(&self) -> Option<&'static str> {
        match self {
            ProjectType::Node => Some("JavaScript"),
            ProjectType::Rust => Some("Rust"),
            ProjectType::Go => Some("Go"),
            ProjectType::Java => Some("Java"),
            ProjectType::Php => Some("PHP"),
            ProjectType::Ruby => Some("Ruby"),
            ProjectType::Python => Some("Python"),
            ProjectType::Dart => Some("Dart"),
            ProjectType::CSharp => Some("C#"),
            ProjectType::Generic => None,
        }
    }
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Map a file extension to its display language, or None for non-code files
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let language = match ext {
        "ts" | "tsx" => "TypeScript",
        "js" | "jsx" | "mjs" | "cjs" => "JavaScript",
        "py" => "Python",
        "rs" => "Rust",
        "go" => "Go",
        "java" => "Java",
        "kt" => "Kotlin",
        "c" | "h" => "C",
        "cpp" | "hpp" | "cc" => "C++",
        "cs" => "C#",
        "rb" => "Ruby",
        "php" => "PHP",
        "swift" => "Swift",
        "scala" => "Scala",
        "dart" => "Dart",
        "vue" => "Vue",
        "svelte" => "Svelte",
        "ex" | "exs" => "Elixir",
        "clj" => "Clojure",
        "hs" => "Haskell",
        "lua" => "Lua",
        "r" => "R",
        "zig" => "Zig",
        "sh" => "Shell",
        _ => return None,
    };
    Some(language)
}

/// Whether a directory name belongs to the system set (case-insensitive)
pub fn is_system_dir(name: &str) -> bool {
    let lowered = name.to_lowercase();
    SYSTEM_DIRS.iter().any(|dir| *dir == lowered)
}
