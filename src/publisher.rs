//! Checkpoint publisher: the only component that touches external state.
//!
//! Owns the PR lifecycle (`None → Wip → Finalized`, never backward) and the
//! incremental commit/push checkpoints. Progress notes are append-only PR
//! comments so the reviewable description is never clobbered by noise.

use crate::git_ops;
use crate::github::IssueHost;
use anyhow::{anyhow, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrLifecycle {
    Wip,
    Finalized,
}

/// Published PR state for one run.
#[derive(Debug, Clone)]
pub struct PrState {
    pub number: Option<u64>,
    pub url: String,
    pub lifecycle: PrLifecycle,
    pub progress_log: Vec<String>,
}

/// What a commit checkpoint actually did. Push failures are surfaced here
/// rather than failing the run; local history stays intact either way.
#[derive(Debug, Clone, Default)]
pub struct CheckpointReport {
    pub committed: bool,
    pub pushed: bool,
    pub push_error: Option<String>,
}

pub struct CheckpointPublisher<'a> {
    repo_path: PathBuf,
    branch: String,
    host: &'a dyn IssueHost,
    push_enabled: bool,
    pr: Option<PrState>,
}

impl<'a> CheckpointPublisher<'a> {
    pub fn new(repo_path: &Path, branch: &str, host: &'a dyn IssueHost, push_enabled: bool) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            branch: branch.to_string(),
            host,
            push_enabled,
            pr: None,
        }
    }

    pub fn pr(&self) -> Option<&PrState> {
        self.pr.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.pr.is_some()
    }

    /// Push the branch and open a `[WIP]` pull request.
    ///
    /// Called exactly once per run; calling again while a PR exists is a
    /// no-op so the repair loop cannot double-publish.
    pub fn open_work_in_progress(&mut self, title: &str, body: &str) -> Result<()> {
        if self.pr.is_some() {
            return Ok(());
        }

        if self.push_enabled {
            git_ops::push_branch(&self.repo_path, &self.branch)?;
        }

        let wip_title = format!("[WIP] {}", title);
        eprintln!("  Opening WIP PR: {}", wip_title);
        let created = self.host.create_pr(&wip_title, body)?;
        eprintln!("  PR: {}", created.url);

        self.pr = Some(PrState {
            number: created.number,
            url: created.url,
            lifecycle: PrLifecycle::Wip,
            progress_log: Vec::new(),
        });
        Ok(())
    }

    /// Append a timestamped progress comment. Never rewrites the PR body.
    ///
    /// Best-effort: a failed comment is a warning, not a failed run.
    pub fn record_progress(&mut self, phase: &str, details: &str) {
        let host = self.host;
        let entry = format!(
            "**[{}] {}**\n\n{}",
            Utc::now().format("%Y-%m-%d %H:%M UTC"),
            phase,
            details
        );

        match &mut self.pr {
            Some(pr) => {
                pr.progress_log.push(entry.clone());
                if let Some(number) = pr.number {
                    if let Err(err) = host.comment_pr(number, &entry) {
                        eprintln!("  Warning: could not record progress: {}", err);
                    }
                }
            }
            None => eprintln!("  [{}] {}", phase, details),
        }
    }

    /// Stage and commit the given files, then push.
    ///
    /// Nothing staged relative to the last commit is a successful no-op, so
    /// no-op regeneration rounds stay idempotent and never create empty
    /// commits.
    pub fn commit_increment(&mut self, files: &[PathBuf], message: &str) -> Result<CheckpointReport> {
        let file_refs: Vec<&Path> = files.iter().map(|p| p.as_path()).collect();
        git_ops::stage_files(&self.repo_path, &file_refs)?;

        if !git_ops::has_staged_changes(&self.repo_path)? {
            return Ok(CheckpointReport::default());
        }

        git_ops::commit(&self.repo_path, message)?;
        eprintln!("  Committed: {}", message);

        if !self.push_enabled {
            return Ok(CheckpointReport {
                committed: true,
                ..Default::default()
            });
        }

        match git_ops::push_branch(&self.repo_path, &self.branch) {
            Ok(_) => Ok(CheckpointReport {
                committed: true,
                pushed: true,
                push_error: None,
            }),
            Err(err) => {
                eprintln!("  Warning: push failed (local commit kept): {}", err);
                Ok(CheckpointReport {
                    committed: true,
                    pushed: false,
                    push_error: Some(err.to_string()),
                })
            }
        }
    }

    /// Drop the WIP marker and set the final title and body.
    pub fn finalize(&mut self, title: &str, body: &str) -> Result<()> {
        let host = self.host;
        let pr = self
            .pr
            .as_mut()
            .ok_or_else(|| anyhow!("No open PR to finalize"))?;

        if pr.lifecycle == PrLifecycle::Finalized {
            return Ok(());
        }

        let number = pr.number.ok_or_else(|| {
            anyhow!("PR number unknown; finalize manually at {}", pr.url)
        })?;

        host.edit_pr(number, Some(title), Some(body))?;
        pr.lifecycle = PrLifecycle::Finalized;
        eprintln!("  Finalized PR #{}", number);
        Ok(())
    }
}
