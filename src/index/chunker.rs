//! Structural file chunking.
//!
//! Splits source files into semantic units at declaration boundaries when
//! tree-sitter knows the language, falling back to fixed character windows
//! otherwise. Any chunk is force-closed once it exceeds the target size, and
//! a trailing partial chunk is always emitted.

use super::{Chunk, Language};
use crate::syntax::parse_tree;
use std::collections::BTreeSet;
use std::path::Path;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Node kinds that open a new chunk, per language.
fn is_declaration_kind(language: Language, kind: &str) -> bool {
    match language {
        Language::Rust => matches!(
            kind,
            "function_item" | "struct_item" | "enum_item" | "impl_item" | "trait_item" | "mod_item"
        ),
        Language::JavaScript | Language::TypeScript => matches!(
            kind,
            "function_declaration"
                | "class_declaration"
                | "method_definition"
                | "interface_declaration"
        ),
        // Boundaries sit on the def/class line; decorator lines stay with
        // the preceding chunk.
        Language::Python => matches!(kind, "function_definition" | "class_definition"),
        Language::Go => matches!(
            kind,
            "function_declaration" | "method_declaration" | "type_declaration"
        ),
        Language::Unknown => false,
    }
}

/// Collect the 0-based start lines of declarations in the file.
fn declaration_lines(content: &str, language: Language, path: &Path) -> BTreeSet<usize> {
    let mut lines = BTreeSet::new();
    let tree = match parse_tree(content, language, Some(path)) {
        Some(tree) => tree,
        None => return lines,
    };

    let mut cursor = tree.root_node().walk();
    loop {
        let node = cursor.node();
        if is_declaration_kind(language, node.kind()) {
            lines.insert(node.start_position().row);
        }

        if cursor.goto_first_child() {
            continue;
        }

        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return lines;
            }
        }
    }
}

/// Split a file into chunks carrying 1-based line metadata.
pub fn chunk_file(path: &Path, content: &str, chunk_size: usize) -> Vec<Chunk> {
    let language = Language::from_path(path);
    let boundaries = declaration_lines(content, language, path);

    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_start = 0usize; // 0-based
    let mut current_len = 0usize;

    for (i, line) in lines.iter().enumerate() {
        // A declaration starts here: close the running chunk first.
        if boundaries.contains(&i) && !current.is_empty() {
            chunks.push(make_chunk(path, &current, current_start, i - 1));
            current.clear();
            current_start = i;
            current_len = 0;
        }

        current.push(line);
        current_len += line.len() + 1;

        // Force-close oversized chunks regardless of structure.
        if current_len > chunk_size {
            chunks.push(make_chunk(path, &current, current_start, i));
            current.clear();
            current_start = i + 1;
            current_len = 0;
        }
    }

    // Trailing partial chunk is always kept, even if undersized.
    if !current.is_empty() {
        chunks.push(make_chunk(path, &current, current_start, lines.len() - 1));
    }

    chunks
}

fn make_chunk(path: &Path, lines: &[&str], start: usize, end: usize) -> Chunk {
    Chunk {
        path: path.to_path_buf(),
        start_line: start + 1,
        end_line: end + 1,
        text: lines.join("\n"),
    }
}
