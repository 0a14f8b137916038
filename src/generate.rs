//! Generation stage: rewrite one file through the oracle with bounded retries.
//!
//! Each invocation makes at most three oracle calls. A syntactically invalid
//! attempt feeds its error (only the most recent one) into the next attempt;
//! when every attempt fails the last content is returned best-effort with a
//! warning, and the review/test gates downstream still apply.

use crate::budget::{ContextValue, TokenBudget};
use crate::github::Issue;
use crate::llm::parse::{extract_code_block, strip_leading_prose};
use crate::llm::{prompts, OracleRequest, TextOracle};
use crate::syntax::check_syntax;
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MAX_GENERATION_ATTEMPTS: usize = 3;

/// Accumulated feedback for a regeneration call.
#[derive(Debug, Clone, Default)]
pub struct GenerationFeedback {
    /// Reviewer rejection feedback from the previous iteration.
    pub review: Option<String>,
    /// Test log from the previous failed verification round.
    pub test_log: Option<String>,
    /// Suspected failing test file attached as extra context.
    pub failing_context: Option<(PathBuf, String)>,
}

/// Result of one generation invocation for one file.
#[derive(Debug, Clone)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub content: String,
    /// False when all attempts failed syntax validation (best-effort content).
    pub syntax_ok: bool,
    /// Oracle calls actually made (1..=3).
    pub attempts: usize,
}

/// Pull file content out of a conversational oracle response.
fn extract_content(response: &str) -> String {
    match extract_code_block(response) {
        Some(code) => code,
        None => strip_leading_prose(response),
    }
}

/// Normalize generated content: LF line endings, and a trailing newline
/// matching the original file (new files always end with one).
fn normalize_generated(original: Option<&str>, content: String) -> String {
    let mut normalized = content.replace("\r\n", "\n");

    let wants_newline = original.map(|o| o.ends_with('\n')).unwrap_or(true);
    if wants_newline {
        if !normalized.ends_with('\n') {
            normalized.push('\n');
        }
    } else {
        while normalized.ends_with('\n') {
            normalized.pop();
        }
    }

    normalized
}

fn build_user_prompt(
    issue: &Issue,
    path: &Path,
    current_content: Option<&str>,
    feedback: &GenerationFeedback,
    syntax_error: Option<&str>,
    budget: &TokenBudget,
) -> String {
    // Budget the bulky inputs before prompt assembly.
    let mut contexts = BTreeMap::new();
    contexts.insert(
        "issue".to_string(),
        ContextValue::Text(issue.text()),
    );

    let mut files = BTreeMap::new();
    if let Some(content) = current_content {
        files.insert(path.display().to_string(), content.to_string());
    }
    if let Some((hint_path, hint_content)) = &feedback.failing_context {
        files.insert(hint_path.display().to_string(), hint_content.clone());
    }
    if !files.is_empty() {
        contexts.insert("file_content".to_string(), ContextValue::Files(files));
    }

    if let Some(log) = &feedback.test_log {
        contexts.insert("test_log".to_string(), ContextValue::Text(log.clone()));
    }

    let allocated = budget.allocate(contexts);

    let issue_text = match allocated.get("issue") {
        Some(ContextValue::Text(text)) => text.clone(),
        _ => issue.text(),
    };
    let budgeted_files: BTreeMap<String, String> = match allocated.get("file_content") {
        Some(ContextValue::Files(files)) => files.clone(),
        _ => BTreeMap::new(),
    };
    let test_log = match allocated.get("test_log") {
        Some(ContextValue::Text(text)) => Some(text.clone()),
        _ => None,
    };

    let mut prompt = format!("CONTEXT: Fixing '{}'\n\nISSUE:\n{}\n", path.display(), issue_text);

    let path_key = path.display().to_string();
    match budgeted_files.get(&path_key) {
        Some(content) => {
            prompt.push_str(&format!("\nCURRENT FILE CONTENT:\n{}\n", content));
        }
        None => {
            prompt.push_str("\nThis file does not exist yet. Produce its full content.\n");
        }
    }

    if let Some(review) = &feedback.review {
        prompt.push_str(&format!(
            "\nREVIEW FEEDBACK (the previous version was rejected, address all of it):\n{}\n",
            review
        ));
    }

    if let Some(log) = test_log {
        prompt.push_str(&format!(
            "\nCRITICAL: THE PREVIOUS FIX FAILED TESTS:\n{}\nFIX THE CODE.\n",
            log
        ));
    }

    if let Some((hint_path, _)) = &feedback.failing_context {
        let hint_key = hint_path.display().to_string();
        if hint_key != path_key {
            if let Some(content) = budgeted_files.get(&hint_key) {
                prompt.push_str(&format!(
                    "\nFAILING TEST FILE ({}):\n{}\n",
                    hint_path.display(),
                    content
                ));
            }
        }
    }

    if let Some(error) = syntax_error {
        prompt.push_str(&format!(
            "\nPREVIOUS ATTEMPT HAD A SYNTAX ERROR:\n{}\nTRY AGAIN.\n",
            error
        ));
    }

    prompt
}

/// Generate new content for one file, retrying on syntax failures.
pub async fn generate_file(
    oracle: &dyn TextOracle,
    issue: &Issue,
    path: &Path,
    current_content: Option<&str>,
    feedback: &GenerationFeedback,
    budget: &TokenBudget,
) -> Result<GeneratedFile> {
    let mut syntax_error: Option<String> = None;
    let mut last_content = String::new();

    for attempt in 1..=MAX_GENERATION_ATTEMPTS {
        let user = build_user_prompt(
            issue,
            path,
            current_content,
            feedback,
            syntax_error.as_deref(),
            budget,
        );
        let response = oracle
            .generate(OracleRequest::new(prompts::GENERATE_SYSTEM, user))
            .await?;

        let content = normalize_generated(current_content, extract_content(&response));
        let check = check_syntax(path, &content);

        if check.valid {
            return Ok(GeneratedFile {
                path: path.to_path_buf(),
                content,
                syntax_ok: true,
                attempts: attempt,
            });
        }

        let error = check
            .error
            .unwrap_or_else(|| "unknown syntax error".to_string());
        eprintln!(
            "  ...syntax error on attempt {} for {}: {}",
            attempt,
            path.display(),
            error.lines().next().unwrap_or("")
        );
        // Only the most recent error carries over to the next attempt.
        syntax_error = Some(error);
        last_content = content;
    }

    eprintln!(
        "  Warning: no syntactically valid attempt for {}; keeping best effort",
        path.display()
    );
    Ok(GeneratedFile {
        path: path.to_path_buf(),
        content: last_content,
        syntax_ok: false,
        attempts: MAX_GENERATION_ATTEMPTS,
    })
}
