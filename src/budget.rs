//! Token estimation and context budgeting for oracle prompts.
//!
//! Keeps prompt context inside a configured token budget. Under budget,
//! allocation is the identity; over budget, each context class has its own
//! truncation policy and nothing is ever dropped silently.

use std::collections::BTreeMap;

/// Rough conversion used throughout: most models average ~4 characters per token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Exploration-log entries kept verbatim when summarizing.
const RECENT_LOG_ENTRIES: usize = 3;

/// Share of the total budget any single free-form context may claim.
const OTHER_CONTEXT_SHARE: usize = 10; // percent

/// Estimate the number of tokens in a text string.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count() / CHARS_PER_TOKEN
}

/// A named context handed to [`TokenBudget::allocate`].
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    /// Free-form text (issue body, feedback, rationale).
    Text(String),
    /// An ordered exploration/history log; old entries are summarized first.
    Log(Vec<String>),
    /// File contents keyed by path; truncated proportionally.
    Files(BTreeMap<String, String>),
}

impl ContextValue {
    pub fn estimated_tokens(&self) -> usize {
        match self {
            ContextValue::Text(text) => estimate_tokens(text),
            ContextValue::Log(entries) => estimate_tokens(&entries.join("\n\n")),
            ContextValue::Files(files) => files.values().map(|c| estimate_tokens(c)).sum(),
        }
    }
}

/// Budgeted truncation of named prompt contexts.
///
/// Sub-budgets follow a fixed 25/50/25 split (exploration history, file
/// content, everything else). These are soft ceilings: they only bite when
/// the combined total exceeds the overall budget.
#[derive(Debug, Clone)]
pub struct TokenBudget {
    pub max_tokens: usize,
    pub exploration_tokens: usize,
    pub file_tokens: usize,
    pub other_tokens: usize,
}

impl TokenBudget {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            exploration_tokens: max_tokens / 4,
            file_tokens: max_tokens / 2,
            other_tokens: max_tokens / 4,
        }
    }

    /// Truncate text to a token limit, appending a marker that states the
    /// original size. Returns the input unchanged when it already fits.
    pub fn truncate_to_limit(text: &str, max_tokens: usize) -> String {
        let estimated = estimate_tokens(text);
        if estimated <= max_tokens {
            return text.to_string();
        }

        let target_chars = max_tokens * CHARS_PER_TOKEN;
        let truncated: String = text.chars().take(target_chars).collect();
        format!(
            "{}\n\n... [truncated; original length: {} chars, ~{} tokens]",
            truncated,
            text.chars().count(),
            estimated
        )
    }

    /// Collapse all but the most recent log entries into a count-only
    /// placeholder once the log exceeds its sub-budget.
    pub fn summarize_log(&self, entries: &[String]) -> Vec<String> {
        if entries.is_empty() {
            return Vec::new();
        }

        let total = estimate_tokens(&entries.join("\n\n"));
        if total <= self.exploration_tokens {
            return entries.to_vec();
        }

        if entries.len() <= RECENT_LOG_ENTRIES {
            return entries.to_vec();
        }

        let old_count = entries.len() - RECENT_LOG_ENTRIES;
        let mut summarized = vec![format!("Previous {} entries (summarized)", old_count)];
        summarized.extend(entries[old_count..].iter().cloned());
        summarized
    }

    /// Truncate file contents to the file sub-budget, splitting it evenly
    /// across files. A single file larger than its share is truncated to the
    /// share, never dropped.
    pub fn truncate_files(&self, files: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        if files.is_empty() {
            return BTreeMap::new();
        }

        let total: usize = files.values().map(|c| estimate_tokens(c)).sum();
        if total <= self.file_tokens {
            return files.clone();
        }

        let share = self.file_tokens / files.len();
        files
            .iter()
            .map(|(path, content)| (path.clone(), Self::truncate_to_limit(content, share)))
            .collect()
    }

    /// Fit the given contexts into the overall budget.
    ///
    /// Under budget this is the identity. Over budget, logs are summarized,
    /// file maps are truncated proportionally, and any other context over
    /// 10% of the budget is hard-truncated to that share.
    pub fn allocate(
        &self,
        contexts: BTreeMap<String, ContextValue>,
    ) -> BTreeMap<String, ContextValue> {
        let total: usize = contexts.values().map(|v| v.estimated_tokens()).sum();
        if total <= self.max_tokens {
            return contexts;
        }

        let other_cap = self.max_tokens * OTHER_CONTEXT_SHARE / 100;

        contexts
            .into_iter()
            .map(|(name, value)| {
                let budgeted = match value {
                    ContextValue::Log(entries) => ContextValue::Log(self.summarize_log(&entries)),
                    ContextValue::Files(files) => {
                        ContextValue::Files(self.truncate_files(&files))
                    }
                    ContextValue::Text(text) => {
                        if estimate_tokens(&text) > other_cap {
                            ContextValue::Text(Self::truncate_to_limit(&text, other_cap))
                        } else {
                            ContextValue::Text(text)
                        }
                    }
                };
                (name, budgeted)
            })
            .collect()
    }

    /// One-line usage summary for the status narrative.
    pub fn stats_line(&self, contexts: &BTreeMap<String, ContextValue>) -> String {
        let mut parts = Vec::new();
        let mut total = 0usize;
        for (name, value) in contexts {
            let tokens = value.estimated_tokens();
            total += tokens;
            parts.push(format!(
                "{} {} tok ({}%)",
                name,
                tokens,
                tokens * 100 / self.max_tokens.max(1)
            ));
        }
        format!(
            "context: {} (total {}/{} tokens)",
            parts.join(", "),
            total,
            self.max_tokens
        )
    }
}
