//! Project language profiles: file classification, sandbox defaults,
//! and test-log heuristics.

use regex::Regex;
use std::path::Path;

/// Extensions treated as code when building the candidate file tree.
///
/// Documentation and config files are excluded on purpose so planning stays
/// focused on logic.
pub const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "ts", "tsx", "go", "rs", "c", "h", "java", "html", "css",
];

/// Check whether a repo-relative path counts as a code file.
pub fn is_code_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_lowercase();
            CODE_EXTENSIONS.iter().any(|e| *e == lower)
        })
        .unwrap_or(false)
}

/// Detected project type, used to pick sandbox defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    Python,
    Rust,
    Node,
    Go,
    Unknown,
}

impl ProjectKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProjectKind::Python => "Python",
            ProjectKind::Rust => "Rust",
            ProjectKind::Node => "Node.js",
            ProjectKind::Go => "Go",
            ProjectKind::Unknown => "Unknown",
        }
    }

    /// Docker image used for the sandboxed test run.
    pub fn docker_image(&self) -> &'static str {
        match self {
            ProjectKind::Python => "python:3.11-slim",
            ProjectKind::Rust => "rust:1.88-slim",
            ProjectKind::Node => "node:20-slim",
            ProjectKind::Go => "golang:1.22",
            ProjectKind::Unknown => "ubuntu:latest",
        }
    }

    /// Shell command run inside the sandbox.
    pub fn test_command(&self) -> &'static str {
        match self {
            ProjectKind::Python => "pip install pytest -r requirements.txt -q && pytest",
            ProjectKind::Rust => "cargo test",
            ProjectKind::Node => "npm install --silent && npm test",
            ProjectKind::Go => "go test ./...",
            ProjectKind::Unknown => "echo 'No tests configured'",
        }
    }
}

/// Detect the project kind from marker files in the repository root.
pub fn detect_project_kind(repo_path: &Path) -> ProjectKind {
    if repo_path.join("Cargo.toml").exists() {
        ProjectKind::Rust
    } else if repo_path.join("package.json").exists() {
        ProjectKind::Node
    } else if repo_path.join("pyproject.toml").exists()
        || repo_path.join("setup.py").exists()
        || repo_path.join("requirements.txt").exists()
    {
        ProjectKind::Python
    } else if repo_path.join("go.mod").exists() {
        ProjectKind::Go
    } else {
        ProjectKind::Unknown
    }
}

/// Scan a test log for the most likely failing test file.
///
/// Best-effort: matches a test-path shape (`tests/...` or `test/...` with a
/// known code extension). Returns a normalized forward-slash path.
pub fn failing_test_hint(log: &str) -> Option<String> {
    let pattern = Regex::new(r"\btests?[/\\][A-Za-z0-9_/\\.-]+\.(?:py|rs|js|jsx|ts|tsx|go)\b")
        .ok()?;
    pattern
        .find(log)
        .map(|m| m.as_str().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_code_file() {
        assert!(is_code_file("src/main.py"));
        assert!(is_code_file("lib/util.rs"));
        assert!(is_code_file("web/index.HTML"));
        assert!(!is_code_file("README.md"));
        assert!(!is_code_file("config.yml"));
        assert!(!is_code_file("LICENSE"));
    }

    #[test]
    fn test_detect_project_kind() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_project_kind(dir.path()), ProjectKind::Unknown);

        std::fs::write(dir.path().join("requirements.txt"), "pytest\n").unwrap();
        assert_eq!(detect_project_kind(dir.path()), ProjectKind::Python);

        std::fs::write(dir.path().join("Cargo.toml"), "[package]\n").unwrap();
        assert_eq!(detect_project_kind(dir.path()), ProjectKind::Rust);
    }

    #[test]
    fn test_failing_test_hint_matches_pytest_output() {
        let log = "FAILED tests/test_links.py::test_build_url - AssertionError";
        assert_eq!(
            failing_test_hint(log),
            Some("tests/test_links.py".to_string())
        );
    }

    #[test]
    fn test_failing_test_hint_normalizes_backslashes() {
        let log = r"error in tests\test_render.py line 4";
        assert_eq!(
            failing_test_hint(log),
            Some("tests/test_render.py".to_string())
        );
    }

    #[test]
    fn test_failing_test_hint_absent() {
        assert_eq!(failing_test_hint("all good"), None);
    }
}
