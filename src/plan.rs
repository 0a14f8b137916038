//! Planning stage: turn an issue plus candidate files into an edit plan.
//!
//! The oracle's free-text response is parsed by line-prefix convention.
//! Parsing never fails: a response with no recognized lines is an empty plan
//! and the orchestrator treats that as "nothing to fix".

use crate::budget::TokenBudget;
use crate::github::Issue;
use crate::llm::{prompts, OracleRequest, TextOracle};
use anyhow::Result;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_PREVIEW_LINES: usize = 10;
pub const DEFAULT_PREVIEW_FILES: usize = 20;

/// The structured edit plan for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditPlan {
    pub files_to_modify: BTreeSet<PathBuf>,
    pub files_to_create: BTreeSet<PathBuf>,
    pub rationale: String,
}

impl EditPlan {
    pub fn is_empty(&self) -> bool {
        self.files_to_modify.is_empty() && self.files_to_create.is_empty()
    }

    /// All planned files in stable order: modifications first, then creations.
    pub fn all_files(&self) -> Vec<PathBuf> {
        self.files_to_modify
            .iter()
            .chain(self.files_to_create.iter())
            .cloned()
            .collect()
    }
}

/// Tagged planning result so callers always have an explicit default branch.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Plan(EditPlan),
    Empty,
}

/// Strip list decoration and quoting the oracle tends to add around paths.
fn clean_line(line: &str) -> &str {
    line.trim()
        .trim_start_matches(['-', '*'])
        .trim()
        .trim_matches(['"', '\'', '`'])
        .trim()
}

/// Normalize a path string for comparison: forward slashes only.
fn normalize_path(raw: &str) -> String {
    clean_line(raw).replace('\\', "/")
}

/// Parse the oracle's planning response.
///
/// `MODIFY:` lines are kept only when the path names a known candidate;
/// `CREATE:` lines are unvalidated (creation targets need not pre-exist);
/// the legacy `FILE:` prefix means `MODIFY:`. Unrecognized lines are
/// ignored. The rationale is everything before the first recognized prefix.
pub fn parse_plan_response(response: &str, candidates: &[PathBuf]) -> PlanOutcome {
    let candidate_set: BTreeSet<String> = candidates
        .iter()
        .map(|p| normalize_path(&p.display().to_string()))
        .collect();

    let mut files_to_modify = BTreeSet::new();
    let mut files_to_create = BTreeSet::new();
    let mut rationale_lines: Vec<&str> = Vec::new();
    let mut seen_prefix = false;

    for line in response.lines() {
        let cleaned = clean_line(line);

        let modify_target = cleaned
            .strip_prefix("MODIFY:")
            .or_else(|| cleaned.strip_prefix("FILE:"));

        if let Some(rest) = modify_target {
            seen_prefix = true;
            let path = normalize_path(rest);
            if candidate_set.contains(&path) {
                files_to_modify.insert(PathBuf::from(path));
            }
        } else if let Some(rest) = cleaned.strip_prefix("CREATE:") {
            seen_prefix = true;
            let path = normalize_path(rest);
            if !path.is_empty() {
                files_to_create.insert(PathBuf::from(path));
            }
        } else if !seen_prefix {
            rationale_lines.push(line);
        }
    }

    let plan = EditPlan {
        files_to_modify,
        files_to_create,
        rationale: rationale_lines.join("\n").trim().to_string(),
    };

    if plan.is_empty() {
        PlanOutcome::Empty
    } else {
        PlanOutcome::Plan(plan)
    }
}

/// Build a bounded preview of candidate files: the first `preview_lines`
/// lines of up to `max_files` files. Full file bodies are never sent here.
pub fn build_preview(
    repo_root: &Path,
    candidates: &[PathBuf],
    preview_lines: usize,
    max_files: usize,
) -> String {
    let mut sections = Vec::new();
    for path in candidates.iter().take(max_files) {
        let full_path = repo_root.join(path);
        let preview = match fs::read_to_string(&full_path) {
            Ok(content) => content
                .lines()
                .take(preview_lines)
                .collect::<Vec<_>>()
                .join("\n"),
            Err(_) => "(unreadable)".to_string(),
        };
        sections.push(format!("--- {} ---\n{}", path.display(), preview));
    }
    sections.join("\n\n")
}

/// Run the planning stage against the oracle.
///
/// No candidates means there is nothing to plan over; the oracle is not
/// consulted and the result is `Empty`.
pub async fn plan(
    oracle: &dyn TextOracle,
    issue: &Issue,
    candidates: &[PathBuf],
    repo_root: &Path,
    budget: &TokenBudget,
) -> Result<PlanOutcome> {
    if candidates.is_empty() {
        return Ok(PlanOutcome::Empty);
    }

    let file_list = candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    let preview = build_preview(
        repo_root,
        candidates,
        DEFAULT_PREVIEW_LINES,
        DEFAULT_PREVIEW_FILES,
    );

    let issue_text = TokenBudget::truncate_to_limit(&issue.text(), budget.other_tokens);
    let user = format!(
        "ISSUE:\n{}\n\nCANDIDATE FILES:\n{}\n\nFILE PREVIEWS:\n{}",
        issue_text, file_list, preview
    );

    let response = oracle
        .generate(OracleRequest::new(prompts::PLAN_SYSTEM, user))
        .await?;

    Ok(parse_plan_response(&response, candidates))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<PathBuf> {
        vec![
            PathBuf::from("src/app.py"),
            PathBuf::from("src/links.py"),
            PathBuf::from("tests/test_links.py"),
        ]
    }

    #[test]
    fn test_parse_modify_and_create() {
        let response = "The link builder drops the scheme.\n\nMODIFY: src/links.py\nCREATE: src/schemes.py\n";
        let outcome = parse_plan_response(response, &candidates());

        let PlanOutcome::Plan(plan) = outcome else {
            panic!("expected a plan");
        };
        assert!(plan.files_to_modify.contains(Path::new("src/links.py")));
        assert!(plan.files_to_create.contains(Path::new("src/schemes.py")));
        assert_eq!(plan.rationale, "The link builder drops the scheme.");
    }

    #[test]
    fn test_parse_legacy_file_prefix_means_modify() {
        let response = "FILE: src/app.py";
        let PlanOutcome::Plan(plan) = parse_plan_response(response, &candidates()) else {
            panic!("expected a plan");
        };
        assert!(plan.files_to_modify.contains(Path::new("src/app.py")));
    }

    #[test]
    fn test_parse_rejects_unknown_modify_targets() {
        let response = "MODIFY: src/invented.py\nMODIFY: src/links.py";
        let PlanOutcome::Plan(plan) = parse_plan_response(response, &candidates()) else {
            panic!("expected a plan");
        };
        assert_eq!(plan.files_to_modify.len(), 1);
        assert!(plan.files_to_modify.contains(Path::new("src/links.py")));
    }

    #[test]
    fn test_parse_tolerates_decoration_and_backslashes() {
        let response = "- MODIFY: \"src\\links.py\"";
        let PlanOutcome::Plan(plan) = parse_plan_response(response, &candidates()) else {
            panic!("expected a plan");
        };
        assert!(plan.files_to_modify.contains(Path::new("src/links.py")));
    }

    #[test]
    fn test_parse_no_recognized_lines_is_empty() {
        let response = "I think the issue is already fixed upstream.";
        assert_eq!(
            parse_plan_response(response, &candidates()),
            PlanOutcome::Empty
        );
    }

    #[test]
    fn test_parse_is_idempotent() {
        let response = "Rationale first.\nMODIFY: src/app.py\nnoise line\nCREATE: new.py";
        let first = parse_plan_response(response, &candidates());
        let second = parse_plan_response(response, &candidates());
        assert_eq!(first, second);
    }

    #[test]
    fn test_rationale_stops_at_first_prefix() {
        let response = "Line one.\nLine two.\nMODIFY: src/app.py\nLine after, ignored.";
        let PlanOutcome::Plan(plan) = parse_plan_response(response, &candidates()) else {
            panic!("expected a plan");
        };
        assert_eq!(plan.rationale, "Line one.\nLine two.");
    }

    #[test]
    fn test_preview_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let many_lines: String = (0..100).map(|i| format!("line {}\n", i)).collect();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/app.py"), &many_lines).unwrap();

        let preview = build_preview(dir.path(), &[PathBuf::from("src/app.py")], 10, 20);
        assert!(preview.contains("line 9"));
        assert!(!preview.contains("line 10\n"));
    }
}
