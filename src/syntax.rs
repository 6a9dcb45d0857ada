//! Python syntax gate backed by tree-sitter.

use crate::error::GenError;
use crate::util::truncate;
use std::cell::RefCell;
use tree_sitter::{Node, Parser};

thread_local! {
    // Parsers are expensive to create but reusable across candidates.
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - surfaces at parse time if the language fails
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

/// Parse candidate code with the Python grammar.
///
/// Rejects on any parse failure, including indentation errors. Rejection
/// is non-fatal to the overall loop; it just triggers a repair cycle.
pub fn check_python(code: &str) -> Result<(), GenError> {
    let tree = PYTHON_PARSER
        .with(|p| p.borrow_mut().parse(code, None))
        .ok_or_else(|| GenError::Syntax("parser produced no tree".to_string()))?;

    let root = tree.root_node();
    if !root.has_error() {
        return Ok(());
    }

    let detail = first_error(root, code)
        .unwrap_or_else(|| "syntax error in generated code".to_string());
    Err(GenError::Syntax(detail))
}

/// Describe the first error or missing node in the tree.
fn first_error(node: Node, source: &str) -> Option<String> {
    if node.is_error() || node.is_missing() {
        let pos = node.start_position();
        let text = node
            .utf8_text(source.as_bytes())
            .map(|t| truncate(t, 60))
            .unwrap_or_default();
        return Some(if text.trim().is_empty() {
            format!("syntax error at line {}, column {}", pos.row + 1, pos.column + 1)
        } else {
            format!(
                "syntax error at line {}, column {}: {}",
                pos.row + 1,
                pos.column + 1,
                text
            )
        });
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(detail) = first_error(child, source) {
            return Some(detail);
        }
    }
    None
}
