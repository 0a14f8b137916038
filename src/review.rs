//! Review gate: adversarial critique of the aggregate change set.
//!
//! The verdict is classified by scanning for literal markers; ambiguous
//! critic output passes with caution so the pipeline can never be wedged by
//! an unreadable review.

use crate::github::Issue;
use crate::llm::{prompts, OracleRequest, TextOracle};
use crate::util::truncate;
use anyhow::Result;
use std::path::PathBuf;

const MAX_REVIEW_CHARS_PER_FILE: usize = 40000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    Approved,
    /// No explicit marker found; treated as passing.
    ApprovedWithNotes,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct ReviewVerdict {
    pub status: ReviewStatus,
    pub feedback: String,
}

impl ReviewVerdict {
    pub fn passed(&self) -> bool {
        self.status != ReviewStatus::Rejected
    }
}

/// Classify an oracle response into a verdict.
///
/// `REJECTED` takes precedence over `APPROVED`; neither marker defaults to
/// approved-with-caution.
pub fn classify_review(response: &str) -> ReviewVerdict {
    let status = if response.contains("REJECTED") {
        ReviewStatus::Rejected
    } else if response.contains("APPROVED") {
        ReviewStatus::Approved
    } else {
        ReviewStatus::ApprovedWithNotes
    };

    ReviewVerdict {
        status,
        feedback: response.trim().to_string(),
    }
}

/// Add line numbers to code for review context.
fn add_line_numbers(content: &str) -> String {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| format!("{:4}| {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the change set as BEFORE/AFTER sections, one per file.
fn build_changes_text(changed_files: &[(PathBuf, String, String)]) -> String {
    let mut changes_text = String::new();

    for (path, old_content, new_content) in changed_files {
        changes_text.push_str(&format!("\n=== {} ===\n", path.display()));

        let old_view = truncate(old_content, MAX_REVIEW_CHARS_PER_FILE);
        let new_view = truncate(new_content, MAX_REVIEW_CHARS_PER_FILE);

        if old_content.is_empty() {
            changes_text.push_str("(NEW FILE)\n");
            changes_text.push_str(&add_line_numbers(&new_view));
        } else {
            changes_text.push_str("--- BEFORE ---\n");
            changes_text.push_str(&add_line_numbers(&old_view));
            changes_text.push_str("\n--- AFTER ---\n");
            changes_text.push_str(&add_line_numbers(&new_view));
        }
        changes_text.push('\n');
    }

    changes_text
}

/// Review the aggregate change set: (path, old content, new content).
pub async fn review_changes(
    oracle: &dyn TextOracle,
    issue: &Issue,
    changed_files: &[(PathBuf, String, String)],
) -> Result<ReviewVerdict> {
    let changes_text = build_changes_text(changed_files);
    let user = format!(
        "ISSUE:\n{}\n\nReview these code changes:\n{}",
        issue.text(),
        changes_text
    );

    let response = oracle
        .generate(OracleRequest::new(prompts::REVIEW_SYSTEM, user))
        .await?;

    Ok(classify_review(&response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_marker() {
        let verdict = classify_review("REJECTED\nThe fix deletes the retry loop.");
        assert_eq!(verdict.status, ReviewStatus::Rejected);
        assert!(!verdict.passed());
        assert!(verdict.feedback.contains("retry loop"));
    }

    #[test]
    fn test_approved_marker() {
        let verdict = classify_review("APPROVED\nLooks correct.");
        assert_eq!(verdict.status, ReviewStatus::Approved);
        assert!(verdict.passed());
    }

    #[test]
    fn test_rejected_takes_precedence_over_approved() {
        let verdict = classify_review("This cannot be APPROVED. REJECTED for now.");
        assert_eq!(verdict.status, ReviewStatus::Rejected);
    }

    #[test]
    fn test_ambiguous_review_passes_with_notes() {
        let verdict = classify_review("The change seems reasonable overall, some nits below.");
        assert_eq!(verdict.status, ReviewStatus::ApprovedWithNotes);
        assert!(verdict.passed());
    }

    #[test]
    fn test_changes_text_marks_new_files() {
        let changes = vec![(
            PathBuf::from("src/new.py"),
            String::new(),
            "VALUE = 1\n".to_string(),
        )];
        let text = build_changes_text(&changes);
        assert!(text.contains("(NEW FILE)"));
        assert!(text.contains("   1| VALUE = 1"));
        assert!(!text.contains("BEFORE"));
    }

    #[test]
    fn test_changes_text_shows_before_and_after() {
        let changes = vec![(
            PathBuf::from("src/app.py"),
            "old = 1\n".to_string(),
            "new = 2\n".to_string(),
        )];
        let text = build_changes_text(&changes);
        assert!(text.contains("--- BEFORE ---"));
        assert!(text.contains("--- AFTER ---"));
        assert!(text.contains("old = 1"));
        assert!(text.contains("new = 2"));
    }
}
