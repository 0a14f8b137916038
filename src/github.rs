//! Issue and pull-request hosting operations.
//!
//! Everything goes through the authenticated `gh` CLI so the user's existing
//! GitHub credentials apply. The trait seam exists so the pipeline can be
//! exercised against a fake host in tests.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

/// The issue under resolution. Immutable input, created once per run.
#[derive(Debug, Clone)]
pub struct Issue {
    pub id: u64,
    pub title: String,
    pub body: String,
}

impl Issue {
    /// Title and body as one prompt-ready block.
    pub fn text(&self) -> String {
        format!("#{} {}\n\n{}", self.id, self.title, self.body)
    }
}

/// A created pull request. The number is parsed from the URL when possible.
#[derive(Debug, Clone)]
pub struct CreatedPr {
    pub number: Option<u64>,
    pub url: String,
}

/// Issue and pull-request hosting operations.
pub trait IssueHost: Send + Sync {
    fn fetch_issue(&self, id: u64) -> Result<Issue>;
    fn create_pr(&self, title: &str, body: &str) -> Result<CreatedPr>;
    fn edit_pr(&self, number: u64, title: Option<&str>, body: Option<&str>) -> Result<()>;
    fn comment_pr(&self, number: u64, body: &str) -> Result<()>;
}

/// Check if gh CLI is available
pub fn gh_available() -> bool {
    Command::new("gh")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check if gh is authenticated
pub fn gh_authenticated() -> bool {
    Command::new("gh")
        .args(["auth", "status"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[derive(Deserialize)]
struct IssueJson {
    title: String,
    #[serde(default)]
    body: String,
}

/// `gh` CLI implementation of [`IssueHost`].
pub struct GhCli {
    repo_path: PathBuf,
}

impl GhCli {
    pub fn new(repo_path: &Path) -> Result<Self> {
        if !gh_available() {
            return Err(anyhow!(
                "gh CLI not installed. Install from https://cli.github.com"
            ));
        }
        if !gh_authenticated() {
            return Err(anyhow!(
                "gh CLI not authenticated. Run 'gh auth login' first"
            ));
        }
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    fn run_gh(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("gh")
            .current_dir(&self.repo_path)
            .args(args)
            .output()
            .context("Failed to execute gh")?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(anyhow!(
                "gh {} failed: {}",
                args.first().copied().unwrap_or(""),
                String::from_utf8_lossy(&output.stderr)
            ))
        }
    }
}

impl IssueHost for GhCli {
    fn fetch_issue(&self, id: u64) -> Result<Issue> {
        let stdout = self
            .run_gh(&["issue", "view", &id.to_string(), "--json", "title,body"])
            .context(format!("Failed to fetch issue #{}", id))?;

        let parsed: IssueJson = serde_json::from_str(&stdout)
            .context(format!("Unexpected issue payload for #{}", id))?;

        Ok(Issue {
            id,
            title: parsed.title,
            body: parsed.body,
        })
    }

    fn create_pr(&self, title: &str, body: &str) -> Result<CreatedPr> {
        let stdout = self.run_gh(&["pr", "create", "--title", title, "--body", body])?;

        // gh pr create prints the PR URL
        let url = stdout.trim().to_string();
        Ok(CreatedPr {
            number: parse_pr_number(&url),
            url,
        })
    }

    fn edit_pr(&self, number: u64, title: Option<&str>, body: Option<&str>) -> Result<()> {
        let number_str = number.to_string();
        let mut args = vec!["pr", "edit", number_str.as_str()];
        if let Some(title) = title {
            args.extend(["--title", title]);
        }
        if let Some(body) = body {
            args.extend(["--body", body]);
        }
        self.run_gh(&args).map(|_| ())
    }

    fn comment_pr(&self, number: u64, body: &str) -> Result<()> {
        self.run_gh(&["pr", "comment", &number.to_string(), "--body", body])
            .map(|_| ())
    }
}

/// Extract the PR number from a pull request URL.
fn parse_pr_number(url: &str) -> Option<u64> {
    let pattern = Regex::new(r"/pull/(\d+)").ok()?;
    pattern
        .captures(url)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
