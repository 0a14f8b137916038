//! Parsers that impose structure on free-text oracle output.
//!
//! Oracle responses are untrusted input. Everything here returns a value on
//! every input: ambiguity resolves to documented defaults, never a panic.

use serde::Deserialize;

/// Strip a single wrapping pair of markdown code fences, if present.
pub(crate) fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if trimmed.starts_with("```json") {
        trimmed.strip_prefix("```json").unwrap_or(trimmed)
    } else if trimmed.starts_with("```") {
        trimmed.strip_prefix("```").unwrap_or(trimmed)
    } else {
        trimmed
    };
    let clean = if clean.ends_with("```") {
        clean.strip_suffix("```").unwrap_or(clean)
    } else {
        clean
    };
    clean.trim()
}

/// Extract the body of the first fenced code block in a response.
///
/// The info string on the opening fence (```python) is discarded. A missing
/// closing fence swallows the rest of the response.
pub fn extract_code_block(response: &str) -> Option<String> {
    let mut in_block = false;
    let mut body: Vec<&str> = Vec::new();

    for line in response.lines() {
        let fence = line.trim_start().starts_with("```");
        if !in_block {
            if fence {
                in_block = true;
            }
            continue;
        }
        if fence {
            return Some(body.join("\n"));
        }
        body.push(line);
    }

    if in_block {
        Some(body.join("\n"))
    } else {
        None
    }
}

/// Tokens that mark the start of real code for the languages we generate.
const CODE_START_TOKENS: &[&str] = &[
    "import ", "from ", "def ", "class ", "async def ", "@", "#!", "\"\"\"", "fn ", "pub ",
    "use ", "mod ", "impl ", "const ", "static ", "let ", "var ", "function ", "export ",
    "package ", "#include", "//", "/*", "<!DOCTYPE", "<html",
];

/// Drop leading conversational lines before the first recognizable code-start
/// token. Returns the input unchanged when no token is found.
pub fn strip_leading_prose(response: &str) -> String {
    let lines: Vec<&str> = response.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if CODE_START_TOKENS.iter().any(|t| trimmed.starts_with(t)) {
            return lines[i..].join("\n");
        }
    }
    response.to_string()
}

/// Extract a JSON fragment between matching delimiters.
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Fix common JSON defects in oracle responses.
fn fix_json_issues(json: &str) -> String {
    let mut fixed = json.to_string();

    // Remove trailing commas before ] or }
    fixed = fixed.replace(",]", "]");
    fixed = fixed.replace(",}", "}");

    // Smart quotes to regular quotes
    fixed = fixed.replace('\u{201C}', "\"");
    fixed = fixed.replace('\u{201D}', "\"");
    fixed = fixed.replace('\u{2018}', "'");
    fixed = fixed.replace('\u{2019}', "'");

    // Drop stray control characters
    fixed = fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    fixed
}

/// Commit message, PR title and PR body as produced by the oracle.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PrContent {
    pub commit_message: String,
    pub pr_title: String,
    pub pr_body: String,
}

impl PrContent {
    fn fallback(raw: &str) -> Self {
        Self {
            commit_message: "fix: resolve issue".to_string(),
            pr_title: "Fix issue".to_string(),
            pr_body: raw.to_string(),
        }
    }
}

/// Parse PR metadata from an oracle response.
///
/// Unparseable JSON falls back to a stock commit message and title with the
/// raw response as the body; publishing must not fail on prose formatting.
pub fn parse_pr_content(response: &str) -> PrContent {
    let clean = strip_markdown_fences(response);
    let Some(fragment) = extract_json_fragment(clean, '{', '}') else {
        return PrContent::fallback(response);
    };

    if let Ok(parsed) = serde_json::from_str::<PrContent>(fragment) {
        return parsed;
    }

    let repaired = fix_json_issues(fragment);
    match serde_json::from_str::<PrContent>(&repaired) {
        Ok(parsed) => parsed,
        Err(_) => {
            eprintln!("  Warning: could not parse PR metadata JSON, using fallback");
            PrContent::fallback(response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_code_block_with_language_tag() {
        let response = "Here is the fix:\n```python\ndef hello():\n    pass\n```\nDone!";
        assert_eq!(
            extract_code_block(response),
            Some("def hello():\n    pass".to_string())
        );
    }

    #[test]
    fn test_extract_code_block_unclosed_fence() {
        let response = "```rust\nfn main() {}\n";
        assert_eq!(extract_code_block(response), Some("fn main() {}".to_string()));
    }

    #[test]
    fn test_extract_code_block_absent() {
        assert_eq!(extract_code_block("no code here"), None);
    }

    #[test]
    fn test_strip_leading_prose_finds_python() {
        let response = "Sure! Here's the corrected file:\n\nimport os\n\ndef main():\n    pass";
        let stripped = strip_leading_prose(response);
        assert!(stripped.starts_with("import os"));
    }

    #[test]
    fn test_strip_leading_prose_no_token_is_identity() {
        let response = "I cannot help with that request.";
        assert_eq!(strip_leading_prose(response), response);
    }

    #[test]
    fn test_parse_pr_content_valid_json() {
        let response = r#"{ "commit_message": "fix: escape url", "pr_title": "Escape URLs", "pr_body": "Details" }"#;
        let parsed = parse_pr_content(response);
        assert_eq!(parsed.commit_message, "fix: escape url");
        assert_eq!(parsed.pr_title, "Escape URLs");
    }

    #[test]
    fn test_parse_pr_content_json_inside_prose_and_fences() {
        let response = "Here you go:\n```json\n{\"commit_message\": \"fix: x\", \"pr_title\": \"Fix x\", \"pr_body\": \"Body\",}\n```";
        let parsed = parse_pr_content(response);
        assert_eq!(parsed.pr_title, "Fix x");
    }

    #[test]
    fn test_parse_pr_content_fallback_keeps_raw_body() {
        let response = "The changes look good to me, no JSON today.";
        let parsed = parse_pr_content(response);
        assert_eq!(parsed.commit_message, "fix: resolve issue");
        assert_eq!(parsed.pr_body, response);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let response = r#"{"commit_message": "a", "pr_title": "b", "pr_body": "c"}"#;
        assert_eq!(parse_pr_content(response), parse_pr_content(response));
    }
}
