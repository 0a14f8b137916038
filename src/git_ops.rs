//! Git operations for the fix-and-publish workflow
//!
//! Provides branch, stage, commit, diff, and push operations. Local history
//! is managed through git2; pushing shells out to git so the user's normal
//! credential helpers apply.

use anyhow::{anyhow, Context, Result};
use git2::{Repository, Signature};
use std::path::Path;
use std::process::Command;

/// Branch naming convention for issue fixes.
pub fn fix_branch_name(issue_id: u64) -> String {
    format!("fix/issue-{}", issue_id)
}

/// Check out the named branch, creating it from HEAD when it does not exist.
pub fn checkout_or_create_branch(repo_path: &Path, name: &str) -> Result<()> {
    let repo = Repository::open(repo_path)?;

    if repo.find_branch(name, git2::BranchType::Local).is_err() {
        let head = repo.head()?;
        let commit = head.peel_to_commit()?;
        repo.branch(name, &commit, false)
            .context(format!("Failed to create branch '{}'", name))?;
    }

    let (object, reference) = repo
        .revparse_ext(name)
        .context(format!("Branch '{}' not found", name))?;
    repo.checkout_tree(&object, None)?;
    match reference {
        Some(r) => repo.set_head(r.name().unwrap_or("HEAD"))?,
        None => repo.set_head_detached(object.id())?,
    }

    Ok(())
}

/// Current branch shorthand.
pub fn current_branch(repo_path: &Path) -> Result<String> {
    let repo = Repository::open(repo_path)?;
    let head = repo.head().context("Failed to get HEAD")?;
    Ok(head.shorthand().unwrap_or("detached").to_string())
}

/// Stage the given repo-relative files (new or modified).
pub fn stage_files(repo_path: &Path, files: &[&Path]) -> Result<()> {
    let repo = Repository::open(repo_path)?;
    let mut index = repo.index()?;

    for file in files {
        index
            .add_path(file)
            .context(format!("Failed to stage '{}'", file.display()))?;
    }
    index.write()?;

    Ok(())
}

/// Whether the index differs from HEAD.
///
/// Drives the commit-increment no-op: regenerating identical content must
/// not produce an empty commit.
pub fn has_staged_changes(repo_path: &Path) -> Result<bool> {
    let repo = Repository::open(repo_path)?;
    let index = repo.index()?;

    let head_tree = match repo.head() {
        Ok(head) => Some(head.peel_to_tree()?),
        Err(_) => None, // unborn branch: anything staged counts
    };

    let diff = repo.diff_tree_to_index(head_tree.as_ref(), Some(&index), None)?;
    Ok(diff.deltas().len() > 0)
}

/// Commit staged changes and return the new commit id.
pub fn commit(repo_path: &Path, message: &str) -> Result<String> {
    let repo = Repository::open(repo_path)?;
    let mut index = repo.index()?;

    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let head = repo.head()?;
    let parent = head.peel_to_commit()?;

    // Author info from git config, with a service fallback
    let config = repo.config()?;
    let name = config
        .get_string("user.name")
        .unwrap_or_else(|_| "mend".to_string());
    let email = config
        .get_string("user.email")
        .unwrap_or_else(|_| "mend@local".to_string());

    let sig = Signature::now(&name, &email)?;

    let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;

    Ok(oid.to_string())
}

/// Push the branch to origin (shells out to git).
pub fn push_branch(repo_path: &Path, branch: &str) -> Result<String> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(["push", "-u", "origin", branch])
        .output()
        .context("Failed to execute git push")?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(anyhow!(
            "git push failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ))
    }
}

/// Diff of everything the run produced so far, from the base commit to HEAD.
pub fn diff_since(repo_path: &Path, base_commit: &str) -> Result<String> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(["diff", &format!("{}..HEAD", base_commit)])
        .output()
        .context("Failed to execute git diff")?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(anyhow!(
            "git diff failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ))
    }
}

/// Commit id of the current HEAD.
pub fn head_commit(repo_path: &Path) -> Result<String> {
    let repo = Repository::open(repo_path)?;
    let head = repo.head()?;
    let commit = head.peel_to_commit()?;
    Ok(commit.id().to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    /// Scratch repository with one initial commit.
    pub(crate) fn init_repo() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let repo_path = dir.path().to_path_buf();

        let repo = Repository::init(&repo_path).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Mend Test").unwrap();
        config.set_str("user.email", "mend@test.local").unwrap();

        fs::write(repo_path.join("README.md"), "hello\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("Mend Test", "mend@test.local").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();

        (dir, repo_path)
    }

    #[test]
    fn test_checkout_or_create_branch_twice() {
        let (_dir, repo_path) = init_repo();

        checkout_or_create_branch(&repo_path, "fix/issue-42").unwrap();
        assert_eq!(current_branch(&repo_path).unwrap(), "fix/issue-42");

        // Second call checks out the existing branch instead of failing.
        checkout_or_create_branch(&repo_path, "fix/issue-42").unwrap();
        assert_eq!(current_branch(&repo_path).unwrap(), "fix/issue-42");
    }

    #[test]
    fn test_stage_and_commit_cycle() {
        let (_dir, repo_path) = init_repo();

        fs::write(repo_path.join("app.py"), "x = 1\n").unwrap();
        stage_files(&repo_path, &[Path::new("app.py")]).unwrap();
        assert!(has_staged_changes(&repo_path).unwrap());

        let sha = commit(&repo_path, "add app").unwrap();
        assert_eq!(sha.len(), 40);
        assert!(!has_staged_changes(&repo_path).unwrap());
    }

    #[test]
    fn test_has_staged_changes_false_on_clean_tree() {
        let (_dir, repo_path) = init_repo();
        assert!(!has_staged_changes(&repo_path).unwrap());
    }

    #[test]
    fn test_diff_since_shows_changes() {
        let (_dir, repo_path) = init_repo();
        let base = head_commit(&repo_path).unwrap();

        fs::write(repo_path.join("app.py"), "x = 1\n").unwrap();
        stage_files(&repo_path, &[Path::new("app.py")]).unwrap();
        commit(&repo_path, "add app").unwrap();

        let diff = diff_since(&repo_path, &base).unwrap();
        assert!(diff.contains("app.py"));
        assert!(diff.contains("+x = 1"));
    }

    #[test]
    fn test_fix_branch_name_convention() {
        assert_eq!(fix_branch_name(123), "fix/issue-123");
    }

    #[test]
    fn test_push_without_remote_fails_but_history_intact() {
        let (_dir, repo_path) = init_repo();
        let before = head_commit(&repo_path).unwrap();

        assert!(push_branch(&repo_path, "main").is_err());
        assert_eq!(head_commit(&repo_path).unwrap(), before);
    }
}
