//! Per-language syntax gate backed by tree-sitter.
//!
//! Generated file contents pass through here before they are accepted.
//! Languages without a registered grammar always pass: the gate exists to
//! catch obviously broken output, not to replace the test run.

use crate::index::Language;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use tree_sitter::{Node, Parser, Tree};

// Tree-sitter parsers are expensive to create but reusable per language, so
// each thread keeps a lazily built pool.
thread_local! {
    static PARSERS: RefCell<HashMap<&'static str, Parser>> = RefCell::new(HashMap::new());
}

fn grammar_for(language: Language, path: Option<&Path>) -> Option<(&'static str, tree_sitter::Language)> {
    match language {
        Language::Rust => Some(("rust", tree_sitter_rust::LANGUAGE.into())),
        Language::JavaScript => Some(("javascript", tree_sitter_javascript::LANGUAGE.into())),
        Language::TypeScript => {
            let use_tsx = path
                .and_then(|p| p.extension())
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("tsx"))
                .unwrap_or(false);
            if use_tsx {
                Some(("tsx", tree_sitter_typescript::LANGUAGE_TSX.into()))
            } else {
                Some(("typescript", tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()))
            }
        }
        Language::Python => Some(("python", tree_sitter_python::LANGUAGE.into())),
        Language::Go => Some(("go", tree_sitter_go::LANGUAGE.into())),
        Language::Unknown => None,
    }
}

/// Parse content with a pooled parser. Returns `None` for languages without
/// a grammar or when the parser itself gives up.
pub(crate) fn parse_tree(content: &str, language: Language, path: Option<&Path>) -> Option<Tree> {
    let (key, grammar) = grammar_for(language, path)?;
    PARSERS.with(|pool| {
        let mut pool = pool.borrow_mut();
        let parser = pool.entry(key).or_insert_with(|| {
            let mut p = Parser::new();
            // Ignore error here - surfaces as a failed parse below
            let _ = p.set_language(&grammar);
            p
        });
        parser.parse(content, None)
    })
}

/// Outcome of a syntax check.
#[derive(Debug, Clone)]
pub struct SyntaxCheck {
    pub valid: bool,
    pub error: Option<String>,
}

impl SyntaxCheck {
    fn valid() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn invalid(error: String) -> Self {
        Self {
            valid: false,
            error: Some(error),
        }
    }
}

/// Check the syntax of generated content for the language declared by the
/// file's extension. Unregistered languages are trivially valid.
pub fn check_syntax(path: &Path, content: &str) -> SyntaxCheck {
    let language = Language::from_path(path);
    if language == Language::Unknown {
        return SyntaxCheck::valid();
    }

    let tree = match parse_tree(content, language, Some(path)) {
        Some(tree) => tree,
        None => return SyntaxCheck::invalid("parser failed to produce a tree".to_string()),
    };

    let root = tree.root_node();
    if !root.has_error() {
        return SyntaxCheck::valid();
    }

    match find_first_error(root) {
        Some(node) => {
            let line = node.start_position().row + 1;
            let line_text = content
                .lines()
                .nth(node.start_position().row)
                .unwrap_or("")
                .trim();
            SyntaxCheck::invalid(format!(
                "SyntaxError at line {}: unexpected or missing syntax\nLine content: {}",
                line, line_text
            ))
        }
        None => SyntaxCheck::invalid("syntax error (location unknown)".to_string()),
    }
}

/// Depth-first search for the first ERROR or missing node.
fn find_first_error(root: Node) -> Option<Node> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node);
        }

        if cursor.goto_first_child() {
            continue;
        }

        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}
