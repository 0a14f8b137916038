//! The iterative convergence pipeline.
//!
//! One bounded, strictly sequential control loop: rank candidate files, plan
//! the edit, generate file rewrites, gate them behind review, verify in the
//! sandbox with bounded repairs, and publish checkpoints. Three fallible
//! oracles (planner/generator, reviewer, test runner) are reconciled here
//! into a terminating process; every retry ceiling lives in
//! [`crate::config::PipelineConfig`] and every loop has a visible counter.
//!
//! Shared mutable state ([`PipelineState`] and the in-memory map of current
//! file contents) is owned by this loop alone. External side effects happen
//! only through the [`CheckpointPublisher`], after a gate has passed or a
//! test round has finished.

use crate::budget::{ContextValue, TokenBudget};
use crate::config::PipelineConfig;
use crate::generate::{generate_file, GenerationFeedback};
use crate::git_ops;
use crate::github::{Issue, IssueHost};
use crate::index::ChunkIndex;
use crate::lang;
use crate::llm::client::EmbeddingClient;
use crate::llm::parse::{parse_pr_content, PrContent};
use crate::llm::{prompts, OracleRequest, TextOracle};
use crate::plan::{self, EditPlan, PlanOutcome};
use crate::publisher::CheckpointPublisher;
use crate::review::{review_changes, ReviewStatus, ReviewVerdict};
use crate::sandbox::TestOracle;
use crate::util::resolve_repo_path_allow_new;
use anyhow::{Context, Result};
use git2::Repository;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Run-scoped counters and flags. Initialized at run start, discarded at
/// run end; nothing here survives across runs.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub review_iteration: u32,
    pub repair_count: u32,
    pub review_approved: bool,
    pub test_passed: bool,
}

/// Terminal state of a run. Fatal aborts surface as `Err` from [`Pipeline::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The planner found nothing to change; no branch was created.
    NothingToFix,
    Published {
        pr_url: Option<String>,
        /// None when the sandbox was disabled.
        tests_passed: Option<bool>,
        review_approved: bool,
    },
}

pub struct Pipeline<'a> {
    repo_root: PathBuf,
    config: PipelineConfig,
    oracle: &'a dyn TextOracle,
    host: &'a dyn IssueHost,
    tester: &'a dyn TestOracle,
    embedder: EmbeddingClient,
    budget: TokenBudget,
    state: PipelineState,
}

impl<'a> Pipeline<'a> {
    /// Validate the repository up front: an unreadable repo is a fatal input
    /// error and must abort before any side effect.
    pub fn new(
        repo_root: &Path,
        config: PipelineConfig,
        oracle: &'a dyn TextOracle,
        host: &'a dyn IssueHost,
        tester: &'a dyn TestOracle,
        embedder: EmbeddingClient,
    ) -> Result<Self> {
        let repo_root = repo_root
            .canonicalize()
            .context("Repository path does not exist")?;
        Repository::open(&repo_root).context("Not a git repository")?;

        let budget = TokenBudget::new(config.max_context_tokens);
        Ok(Self {
            repo_root,
            config,
            oracle,
            host,
            tester,
            embedder,
            budget,
            state: PipelineState::default(),
        })
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Resolve one issue end to end.
    pub async fn run(&mut self, issue_id: u64) -> Result<RunOutcome> {
        let issue = self
            .host
            .fetch_issue(issue_id)
            .context("Failed to fetch issue")?;
        eprintln!("  Issue #{}: {}", issue.id, issue.title);

        let file_tree = self.code_file_tree();
        eprintln!("  {} code files in tree", file_tree.len());

        let candidates = self.rank_candidates(&issue, &file_tree).await;

        let outcome = plan::plan(
            self.oracle,
            &issue,
            &candidates,
            &self.repo_root,
            &self.budget,
        )
        .await
        .context("Planning stage failed")?;

        let edit_plan = match outcome {
            PlanOutcome::Empty => {
                eprintln!("  Nothing to fix: the planner selected no files.");
                return Ok(RunOutcome::NothingToFix);
            }
            PlanOutcome::Plan(edit_plan) => self.sanitize_plan(edit_plan),
        };
        if edit_plan.is_empty() {
            eprintln!("  Nothing to fix: no usable plan targets.");
            return Ok(RunOutcome::NothingToFix);
        }

        eprintln!(
            "  Plan: {} to modify, {} to create",
            edit_plan.files_to_modify.len(),
            edit_plan.files_to_create.len()
        );

        // Read originals before touching anything: unreadable planned input
        // is fatal while the tree is still untouched.
        let originals = self.read_originals(&edit_plan)?;

        let mut stat_contexts = BTreeMap::new();
        stat_contexts.insert("issue".to_string(), ContextValue::Text(issue.text()));
        stat_contexts.insert(
            "file_content".to_string(),
            ContextValue::Files(
                originals
                    .iter()
                    .map(|(path, content)| (path.display().to_string(), content.clone()))
                    .collect(),
            ),
        );
        eprintln!("  {}", self.budget.stats_line(&stat_contexts));

        let branch = git_ops::fix_branch_name(issue.id);
        git_ops::checkout_or_create_branch(&self.repo_root, &branch)
            .context("Failed to prepare fix branch")?;
        let base_commit = git_ops::head_commit(&self.repo_root)?;
        eprintln!("  Branch: {}", branch);

        // Initial generation, one file at a time, in plan order.
        let mut current = BTreeMap::new();
        for path in edit_plan.all_files() {
            let existing = originals.get(&path).map(|s| s.as_str());
            let generated = generate_file(
                self.oracle,
                &issue,
                &path,
                existing,
                &GenerationFeedback::default(),
                &self.budget,
            )
            .await
            .context("Generation stage failed")?;
            current.insert(path, generated.content);
        }

        let outstanding_review = self
            .review_loop(&issue, &edit_plan, &originals, &mut current)
            .await?;

        // Review gate has spoken: externalize the first checkpoint.
        self.write_files(&current)?;
        let mut publisher = CheckpointPublisher::new(
            &self.repo_root,
            &branch,
            self.host,
            self.config.push_enabled,
        );
        publisher.commit_increment(
            &edit_plan.all_files(),
            &format!("wip: apply generated changes for issue #{}", issue.id),
        )?;

        let wip_body = format!(
            "Automated fix for #{} (work in progress).\n\n### Plan\n{}\n\nFiles: {}",
            issue.id,
            edit_plan.rationale,
            edit_plan
                .all_files()
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        if let Err(err) =
            publisher.open_work_in_progress(&format!("Fix #{}: {}", issue.id, issue.title), &wip_body)
        {
            eprintln!("  Warning: could not open WIP PR: {}", err);
        }

        publisher.record_progress(
            "review",
            &match &outstanding_review {
                None => format!(
                    "Review passed after {} iteration(s).",
                    self.state.review_iteration
                ),
                Some(feedback) => format!(
                    "Review bound reached after {} iteration(s); outstanding concerns:\n\n{}",
                    self.state.review_iteration, feedback
                ),
            },
        );

        let tests_passed = if self.config.sandbox_enabled {
            Some(
                self.verify_and_repair(&issue, &edit_plan, &mut current, &mut publisher)
                    .await?,
            )
        } else {
            eprintln!("  Sandbox disabled; skipping verification.");
            None
        };

        // Publish the write-up, flagged rather than withheld on failure.
        let diff = git_ops::diff_since(&self.repo_root, &base_commit).unwrap_or_default();
        let pr_content = self.generate_pr_content(&issue, &diff).await;
        let body = final_body(&issue, &pr_content, tests_passed, outstanding_review.as_deref());

        if publisher.is_open() {
            if let Err(err) = publisher.finalize(&pr_content.pr_title, &body) {
                eprintln!("  Warning: could not finalize PR: {}", err);
            }
        }

        Ok(RunOutcome::Published {
            pr_url: publisher.pr().map(|pr| pr.url.clone()),
            tests_passed,
            review_approved: self.state.review_approved,
        })
    }

    /// Tracked code files, in repository order.
    fn code_file_tree(&self) -> Vec<PathBuf> {
        let output = Command::new("git")
            .current_dir(&self.repo_root)
            .arg("ls-files")
            .output();

        let listed: Vec<String> = match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .map(String::from)
                .collect(),
            _ => {
                eprintln!("  Warning: git ls-files failed, walking the tree instead");
                walkdir::WalkDir::new(&self.repo_root)
                    .into_iter()
                    .filter_entry(|e| e.file_name().to_string_lossy() != ".git")
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .filter_map(|e| {
                        e.path()
                            .strip_prefix(&self.repo_root)
                            .ok()
                            .map(|p| p.display().to_string())
                    })
                    .collect()
            }
        };

        listed
            .into_iter()
            .filter(|path| lang::is_code_file(path))
            .map(PathBuf::from)
            .collect()
    }

    /// Rank candidates through the retriever; an empty ranking means "no
    /// ranking available" and falls back to the full code tree.
    async fn rank_candidates(&self, issue: &Issue, files: &[PathBuf]) -> Vec<PathBuf> {
        if files.is_empty() {
            return Vec::new();
        }
        if !self.embedder.is_available() {
            eprintln!("  No embedding backend configured; planning over the full tree.");
            return files.to_vec();
        }

        let index = ChunkIndex::build(
            &self.repo_root,
            files,
            &self.embedder,
            self.config.chunk_size,
            self.config.force_reindex,
        )
        .await;
        eprintln!("  Indexed {} chunks from {} files", index.chunk_count(), files.len());

        let ranked = index
            .query(&self.embedder, &issue.text(), self.config.max_candidate_files)
            .await;
        if ranked.is_empty() {
            eprintln!("  No ranking available; planning over the full tree.");
            files.to_vec()
        } else {
            ranked
        }
    }

    /// Drop creation targets that would escape the repository.
    fn sanitize_plan(&self, mut edit_plan: EditPlan) -> EditPlan {
        edit_plan.files_to_create.retain(|path| {
            match resolve_repo_path_allow_new(&self.repo_root, path) {
                Ok(_) => true,
                Err(err) => {
                    eprintln!("  Warning: dropping planned file {}: {}", path.display(), err);
                    false
                }
            }
        });
        edit_plan
    }

    fn read_originals(&self, edit_plan: &EditPlan) -> Result<BTreeMap<PathBuf, String>> {
        let mut originals = BTreeMap::new();
        for path in &edit_plan.files_to_modify {
            let content = fs::read_to_string(self.repo_root.join(path))
                .context(format!("Cannot read planned file {}", path.display()))?;
            originals.insert(path.clone(), content);
        }
        Ok(originals)
    }

    /// Review gate loop: rejected changes are regenerated with feedback and
    /// re-reviewed until approval or the iteration bound.
    ///
    /// Returns the outstanding reviewer concerns when the bound is reached
    /// without approval; the work is kept either way.
    async fn review_loop(
        &mut self,
        issue: &Issue,
        edit_plan: &EditPlan,
        originals: &BTreeMap<PathBuf, String>,
        current: &mut BTreeMap<PathBuf, String>,
    ) -> Result<Option<String>> {
        loop {
            let changed: Vec<(PathBuf, String, String)> = edit_plan
                .all_files()
                .into_iter()
                .map(|path| {
                    let old = originals.get(&path).cloned().unwrap_or_default();
                    let new = current.get(&path).cloned().unwrap_or_default();
                    (path, old, new)
                })
                .collect();

            // An unreachable reviewer must not wedge the run; ambiguity and
            // unavailability both pass with caution.
            let verdict = match review_changes(self.oracle, issue, &changed).await {
                Ok(verdict) => verdict,
                Err(err) => {
                    eprintln!("  Warning: review unavailable, proceeding with caution: {}", err);
                    ReviewVerdict {
                        status: ReviewStatus::ApprovedWithNotes,
                        feedback: format!("Review unavailable: {}", err),
                    }
                }
            };

            if verdict.passed() {
                self.state.review_approved = true;
                eprintln!(
                    "  Review passed (iteration {})",
                    self.state.review_iteration
                );
                return Ok(None);
            }

            if self.state.review_iteration >= self.config.max_review_iterations {
                self.state.review_approved = false;
                eprintln!(
                    "  Review bound reached ({}); keeping best attempt",
                    self.config.max_review_iterations
                );
                return Ok(Some(verdict.feedback));
            }

            self.state.review_iteration += 1;
            eprintln!(
                "  Review rejected; regenerating (iteration {}/{})",
                self.state.review_iteration, self.config.max_review_iterations
            );

            let feedback = GenerationFeedback {
                review: Some(verdict.feedback),
                ..Default::default()
            };
            self.regenerate_all(issue, edit_plan, current, &feedback).await?;
        }
    }

    /// Test verification loop: `Run → {Pass: done; Fail: Repair → Run}`,
    /// bounded by `max_repairs` run attempts. Returns whether tests passed.
    async fn verify_and_repair(
        &mut self,
        issue: &Issue,
        edit_plan: &EditPlan,
        current: &mut BTreeMap<PathBuf, String>,
        publisher: &mut CheckpointPublisher<'_>,
    ) -> Result<bool> {
        for round in 1..=self.config.max_repairs {
            eprintln!("  Test round {}/{}", round, self.config.max_repairs);
            let run = self.tester.run(&self.repo_root);

            if run.passed {
                self.state.test_passed = true;
                publisher.record_progress("tests", &format!("Tests passed on round {}.", round));
                return Ok(true);
            }

            self.state.repair_count += 1;
            eprintln!("  Tests failed; repair round {}", self.state.repair_count);

            // Attach the suspected failing test file as extra context.
            let failing_context = run.failing_file_hint.as_ref().and_then(|hint| {
                fs::read_to_string(self.repo_root.join(hint))
                    .ok()
                    .map(|content| (hint.clone(), content))
            });

            let feedback = GenerationFeedback {
                review: None,
                test_log: Some(run.log.clone()),
                failing_context,
            };
            self.regenerate_all(issue, edit_plan, current, &feedback).await?;
            self.write_files(current)?;

            publisher.commit_increment(
                &edit_plan.all_files(),
                &format!("wip: repair round {} for issue #{}", round, issue.id),
            )?;
            publisher.record_progress(
                "repair",
                &format!(
                    "Round {}: tests failing, regenerated {} file(s).\n\n```\n{}\n```",
                    round,
                    edit_plan.all_files().len(),
                    crate::util::tail(&run.log, 1500)
                ),
            );
        }

        self.state.test_passed = false;
        eprintln!(
            "  Tests still failing after {} round(s); publishing anyway",
            self.config.max_repairs
        );
        Ok(false)
    }

    /// Regenerate every planned file with the given feedback, in plan order.
    /// Each rewrite supersedes the previous snapshot.
    async fn regenerate_all(
        &self,
        issue: &Issue,
        edit_plan: &EditPlan,
        current: &mut BTreeMap<PathBuf, String>,
        feedback: &GenerationFeedback,
    ) -> Result<()> {
        for path in edit_plan.all_files() {
            let existing = current.get(&path).cloned();
            let generated = generate_file(
                self.oracle,
                issue,
                &path,
                existing.as_deref(),
                feedback,
                &self.budget,
            )
            .await
            .context("Regeneration failed")?;
            current.insert(path, generated.content);
        }
        Ok(())
    }

    fn write_files(&self, current: &BTreeMap<PathBuf, String>) -> Result<()> {
        for (path, content) in current {
            let resolved = resolve_repo_path_allow_new(&self.repo_root, path)?;
            if let Some(parent) = resolved.absolute.parent() {
                fs::create_dir_all(parent)
                    .context(format!("Cannot create directory for {}", path.display()))?;
            }
            fs::write(&resolved.absolute, content)
                .context(format!("Cannot write {}", path.display()))?;
        }
        Ok(())
    }

    /// Ask the oracle for PR prose; any failure falls back to stock text so
    /// publishing never depends on the write-up.
    async fn generate_pr_content(&self, issue: &Issue, diff: &str) -> PrContent {
        let diff_view = TokenBudget::truncate_to_limit(diff, self.budget.file_tokens);
        let user = format!(
            "ISSUE:\n{}\n\nCHANGES MADE (diff):\n{}",
            issue.text(),
            diff_view
        );

        let response = match self
            .oracle
            .generate(OracleRequest::new(prompts::PR_SYSTEM, user))
            .await
        {
            Ok(response) => response,
            Err(err) => {
                eprintln!("  Warning: PR write-up failed: {}", err);
                String::new()
            }
        };

        parse_pr_content(&response)
    }
}

/// Assemble the final PR body: oracle prose plus explicit annotations for
/// anything that did not converge.
fn final_body(
    issue: &Issue,
    pr_content: &PrContent,
    tests_passed: Option<bool>,
    outstanding_review: Option<&str>,
) -> String {
    let mut body = pr_content.pr_body.trim().to_string();
    body.push_str(&format!("\n\n---\nResolves #{}", issue.id));

    if tests_passed == Some(false) {
        body.push_str(
            "\n\n> **Warning: tests failing.** The repair budget was exhausted; \
             see the progress comments for the last test log.",
        );
    }
    if let Some(concerns) = outstanding_review {
        body.push_str(&format!(
            "\n\n> **Outstanding review concerns:**\n>\n> {}",
            concerns.replace('\n', "\n> ")
        ));
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::tests::FakeHost;
    use crate::llm::testing::ScriptedOracle;
    use crate::sandbox::TestRun;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const PLAN_RESPONSE: &str = "The URL builder drops the scheme.\nMODIFY: src/links.py";
    const GOOD_CODE: &str = "```python\ndef build(url):\n    return 'https://' + url\n```";
    const PR_JSON: &str = r#"{"commit_message": "fix: keep scheme", "pr_title": "Keep URL scheme", "pr_body": "Prepends the scheme."}"#;

    /// Test oracle fake scripting pass/fail per round.
    struct FakeTester {
        results: Mutex<std::collections::VecDeque<TestRun>>,
        runs: AtomicUsize,
    }

    impl FakeTester {
        fn new(results: Vec<TestRun>) -> Self {
            Self {
                results: Mutex::new(results.into_iter().collect()),
                runs: AtomicUsize::new(0),
            }
        }

        fn passing() -> Self {
            Self::new(vec![TestRun::passed("1 passed".to_string())])
        }

        fn run_count(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    impl TestOracle for FakeTester {
        fn run(&self, _repo_root: &Path) -> TestRun {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .expect("test oracle script exhausted")
        }
    }

    fn issue() -> Issue {
        Issue {
            id: 42,
            title: "Links drop the scheme".to_string(),
            body: "Generated links come out without https://".to_string(),
        }
    }

    /// Scratch repo with one committed Python file.
    fn repo_with_code() -> (tempfile::TempDir, PathBuf) {
        let (dir, repo_path) = crate::git_ops::tests::init_repo();
        std::fs::create_dir_all(repo_path.join("src")).unwrap();
        std::fs::write(
            repo_path.join("src/links.py"),
            "def build(url):\n    return url\n",
        )
        .unwrap();
        crate::git_ops::stage_files(&repo_path, &[Path::new("src/links.py")]).unwrap();
        crate::git_ops::commit(&repo_path, "add links").unwrap();
        (dir, repo_path)
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            sandbox_enabled: true,
            push_enabled: false,
            ..Default::default()
        }
    }

    async fn run_pipeline(
        repo_path: &Path,
        config: PipelineConfig,
        oracle: &ScriptedOracle,
        host: &FakeHost,
        tester: &FakeTester,
    ) -> (RunOutcome, PipelineState) {
        let mut pipeline = Pipeline::new(
            repo_path,
            config,
            oracle,
            host,
            tester,
            EmbeddingClient::disabled(),
        )
        .unwrap();
        let outcome = pipeline.run(42).await.unwrap();
        (outcome, pipeline.state().clone())
    }

    #[tokio::test]
    async fn test_no_code_files_is_a_clean_no_op() {
        let (_dir, repo_path) = crate::git_ops::tests::init_repo();
        let oracle = ScriptedOracle::new(vec![]);
        let host = FakeHost::new(issue());
        let tester = FakeTester::passing();

        let branch_before = git_ops::current_branch(&repo_path).unwrap();
        let (outcome, _) =
            run_pipeline(&repo_path, test_config(), &oracle, &host, &tester).await;

        assert_eq!(outcome, RunOutcome::NothingToFix);
        // No oracle call, no branch, no PR.
        assert_eq!(oracle.call_count(), 0);
        assert_eq!(git_ops::current_branch(&repo_path).unwrap(), branch_before);
        assert!(host.created.lock().unwrap().is_empty());
        assert_eq!(tester.run_count(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_plan_exits_cleanly() {
        let (_dir, repo_path) = repo_with_code();
        let oracle = ScriptedOracle::new(vec!["I believe this is fine as-is."]);
        let host = FakeHost::new(issue());
        let tester = FakeTester::passing();

        let (outcome, _) =
            run_pipeline(&repo_path, test_config(), &oracle, &host, &tester).await;

        assert_eq!(outcome, RunOutcome::NothingToFix);
        assert_eq!(oracle.call_count(), 1);
        assert!(host.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_happy_path_publishes_finalized_pr() {
        let (_dir, repo_path) = repo_with_code();
        let oracle = ScriptedOracle::new(vec![PLAN_RESPONSE, GOOD_CODE, "APPROVED\nClean fix.", PR_JSON]);
        let host = FakeHost::new(issue());
        let tester = FakeTester::passing();

        let (outcome, state) =
            run_pipeline(&repo_path, test_config(), &oracle, &host, &tester).await;

        let RunOutcome::Published {
            pr_url,
            tests_passed,
            review_approved,
        } = outcome
        else {
            panic!("expected Published");
        };
        assert!(pr_url.is_some());
        assert_eq!(tests_passed, Some(true));
        assert!(review_approved);
        assert_eq!(state.review_iteration, 0);
        assert_eq!(oracle.call_count(), 4); // plan, generate, review, PR prose

        // Branch and working tree were updated.
        assert_eq!(git_ops::current_branch(&repo_path).unwrap(), "fix/issue-42");
        let content = std::fs::read_to_string(repo_path.join("src/links.py")).unwrap();
        assert!(content.contains("https://"));

        // WIP PR opened once, then finalized with the oracle's title.
        let created = host.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert!(created[0].0.starts_with("[WIP] Fix #42"));
        let edits = host.edits.lock().unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].1.as_deref(), Some("Keep URL scheme"));
    }

    #[tokio::test]
    async fn test_two_rejections_then_approval() {
        let (_dir, repo_path) = repo_with_code();
        let oracle = ScriptedOracle::new(vec![
            PLAN_RESPONSE,
            GOOD_CODE,
            "REJECTED\nDoes not handle empty urls.",
            GOOD_CODE,
            "REJECTED\nStill no empty-url handling.",
            GOOD_CODE,
            "APPROVED",
            PR_JSON,
        ]);
        let host = FakeHost::new(issue());
        let tester = FakeTester::passing();

        let (outcome, state) =
            run_pipeline(&repo_path, test_config(), &oracle, &host, &tester).await;

        // Exactly two regeneration rounds before approval.
        assert_eq!(state.review_iteration, 2);
        assert!(state.review_approved);
        assert_eq!(oracle.call_count(), 8);
        assert!(matches!(outcome, RunOutcome::Published { .. }));

        // The regeneration prompts carried the reviewer feedback.
        let regen_prompt = oracle.request_user(3);
        assert!(regen_prompt.contains("REVIEW FEEDBACK"));
        assert!(regen_prompt.contains("empty urls"));
    }

    #[tokio::test]
    async fn test_review_bound_publishes_best_attempt_with_concerns() {
        let (_dir, repo_path) = repo_with_code();
        let mut config = test_config();
        config.max_review_iterations = 1;
        // review, regen, review (bound reached, still rejected), PR prose
        let oracle = ScriptedOracle::new(vec![
            PLAN_RESPONSE,
            GOOD_CODE,
            "REJECTED\nMissing edge case.",
            GOOD_CODE,
            "REJECTED\nStill missing edge case.",
            PR_JSON,
        ]);
        let host = FakeHost::new(issue());
        let tester = FakeTester::passing();

        let (outcome, state) = run_pipeline(&repo_path, config, &oracle, &host, &tester).await;

        let RunOutcome::Published {
            review_approved, ..
        } = outcome
        else {
            panic!("expected Published");
        };
        assert!(!review_approved);
        assert_eq!(state.review_iteration, 1);

        // Outstanding concerns surface in the final body, work is kept.
        let edits = host.edits.lock().unwrap();
        assert_eq!(edits.len(), 1);
        let body = edits[0].2.as_deref().unwrap();
        assert!(body.contains("Outstanding review concerns"));
        assert!(body.contains("Still missing edge case"));
    }

    #[tokio::test]
    async fn test_three_failed_rounds_publish_flagged_as_failing() {
        let (_dir, repo_path) = repo_with_code();
        let oracle = ScriptedOracle::new(vec![
            PLAN_RESPONSE,
            GOOD_CODE,
            "APPROVED",
            GOOD_CODE, // repair 1
            GOOD_CODE, // repair 2
            GOOD_CODE, // repair 3
            PR_JSON,
        ]);
        let host = FakeHost::new(issue());
        let tester = FakeTester::new(vec![
            TestRun::failed("FAILED tests/test_links.py".to_string()),
            TestRun::failed("FAILED tests/test_links.py".to_string()),
            TestRun::failed("FAILED tests/test_links.py".to_string()),
        ]);

        let (outcome, state) =
            run_pipeline(&repo_path, test_config(), &oracle, &host, &tester).await;

        // Exactly max_repairs run attempts and repair rounds.
        assert_eq!(tester.run_count(), 3);
        assert_eq!(state.repair_count, 3);
        assert!(!state.test_passed);

        let RunOutcome::Published { tests_passed, .. } = outcome else {
            panic!("expected Published");
        };
        assert_eq!(tests_passed, Some(false));

        // Publish proceeds with an explicit "tests failing" annotation.
        let edits = host.edits.lock().unwrap();
        let body = edits[0].2.as_deref().unwrap();
        assert!(body.contains("tests failing"));
    }

    #[tokio::test]
    async fn test_repair_prompts_carry_test_log() {
        let (_dir, repo_path) = repo_with_code();
        let oracle = ScriptedOracle::new(vec![
            PLAN_RESPONSE,
            GOOD_CODE,
            "APPROVED",
            GOOD_CODE, // repair 1
            PR_JSON,
        ]);
        let host = FakeHost::new(issue());
        let tester = FakeTester::new(vec![
            TestRun::failed("AssertionError: expected https".to_string()),
            TestRun::passed("1 passed".to_string()),
        ]);

        let (_, state) = run_pipeline(&repo_path, test_config(), &oracle, &host, &tester).await;

        assert_eq!(state.repair_count, 1);
        assert!(state.test_passed);
        assert_eq!(tester.run_count(), 2);

        let repair_prompt = oracle.request_user(3);
        assert!(repair_prompt.contains("FAILED TESTS"));
        assert!(repair_prompt.contains("AssertionError"));
    }

    #[tokio::test]
    async fn test_sandbox_disabled_skips_verification() {
        let (_dir, repo_path) = repo_with_code();
        let mut config = test_config();
        config.sandbox_enabled = false;
        let oracle = ScriptedOracle::new(vec![PLAN_RESPONSE, GOOD_CODE, "APPROVED", PR_JSON]);
        let host = FakeHost::new(issue());
        let tester = FakeTester::new(vec![]);

        let (outcome, _) = run_pipeline(&repo_path, config, &oracle, &host, &tester).await;

        assert_eq!(tester.run_count(), 0);
        let RunOutcome::Published { tests_passed, .. } = outcome else {
            panic!("expected Published");
        };
        assert_eq!(tests_passed, None);
    }

    #[tokio::test]
    async fn test_created_file_is_written_inside_repo() {
        let (_dir, repo_path) = repo_with_code();
        let oracle = ScriptedOracle::new(vec![
            "Splitting the scheme logic out.\nMODIFY: src/links.py\nCREATE: src/schemes.py\nCREATE: ../escape.py",
            GOOD_CODE,
            "```python\nSCHEMES = ['https']\n```",
            "APPROVED",
            PR_JSON,
        ]);
        let host = FakeHost::new(issue());
        let tester = FakeTester::passing();

        let (outcome, _) =
            run_pipeline(&repo_path, test_config(), &oracle, &host, &tester).await;

        assert!(matches!(outcome, RunOutcome::Published { .. }));
        // The traversal target was dropped, the legitimate one created.
        assert!(repo_path.join("src/schemes.py").exists());
        assert!(!repo_path.parent().unwrap().join("escape.py").exists());
    }

    #[tokio::test]
    async fn test_unparseable_pr_metadata_falls_back() {
        let (_dir, repo_path) = repo_with_code();
        let oracle = ScriptedOracle::new(vec![
            PLAN_RESPONSE,
            GOOD_CODE,
            "APPROVED",
            "Shipped a nice little fix, enjoy!",
        ]);
        let host = FakeHost::new(issue());
        let tester = FakeTester::passing();

        let (outcome, _) =
            run_pipeline(&repo_path, test_config(), &oracle, &host, &tester).await;

        assert!(matches!(outcome, RunOutcome::Published { .. }));
        let edits = host.edits.lock().unwrap();
        assert_eq!(edits[0].1.as_deref(), Some("Fix issue"));
        assert!(edits[0].2.as_deref().unwrap().contains("nice little fix"));
    }
}
