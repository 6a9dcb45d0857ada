//! Pulls a Python code block out of raw model-response text.

use regex::Regex;
use std::sync::OnceLock;

/// Matches the first ```python fenced block, body captured across newlines.
fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```python\n(.*?)```").expect("fence regex is valid"))
}

/// Extract the first Python fenced block from `text` and normalize it:
/// trim, expand tabs to four spaces, and strip the common indentation.
///
/// Returns `None` when no fence is found or the body is empty after
/// normalization — "no code produced" is a value here, not an error.
/// A response with multiple fences silently uses only the first.
pub fn extract_python_block(text: &str) -> Option<String> {
    let captures = fence_regex().captures(text)?;
    let body = captures.get(1)?.as_str().trim();
    let code = dedent(&body.replace('\t', "    "));
    if code.trim().is_empty() {
        None
    } else {
        Some(code)
    }
}

/// Remove the longest common leading-whitespace prefix of non-blank lines.
fn dedent(code: &str) -> String {
    let margin = code
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    if margin == 0 {
        return code.to_string();
    }
    code.lines()
        .map(|line| {
            if line.len() >= margin {
                &line[margin..]
            } else {
                // Blank line shorter than the margin.
                line.trim_start()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_fenced_block() {
        let text = "Here you go:\n```python\nimport bpy\nbpy.ops.mesh.primitive_cube_add()\n```\nDone.";
        let code = extract_python_block(text).unwrap();
        assert_eq!(code, "import bpy\nbpy.ops.mesh.primitive_cube_add()");
    }

    #[test]
    fn test_no_fence_returns_none() {
        assert!(extract_python_block("Sorry, I can't help with that.").is_none());
        assert!(extract_python_block("").is_none());
    }

    #[test]
    fn test_unmarked_fence_returns_none() {
        // Only blocks tagged as python are extracted.
        let text = "```\nprint('hi')\n```";
        assert!(extract_python_block(text).is_none());
    }

    #[test]
    fn test_first_fence_wins() {
        let text = "```python\nfirst = 1\n```\nand also\n```python\nsecond = 2\n```";
        assert_eq!(extract_python_block(text).unwrap(), "first = 1");
    }

    #[test]
    fn test_empty_body_returns_none() {
        assert!(extract_python_block("```python\n\n```").is_none());
        assert!(extract_python_block("```python\n   \n```").is_none());
    }

    #[test]
    fn test_tabs_become_spaces() {
        let text = "```python\nif True:\n\tx = 1\n```";
        assert_eq!(extract_python_block(text).unwrap(), "if True:\n    x = 1");
    }

    #[test]
    fn test_trim_strips_first_line_indent_before_dedent() {
        // The leading trim removes the first line's indentation, so the
        // common margin of the remaining lines is preserved as-is.
        let text = "```python\n    import bpy\n    if True:\n        pass\n```";
        assert_eq!(
            extract_python_block(text).unwrap(),
            "import bpy\n    if True:\n        pass"
        );
    }

    #[test]
    fn test_dedent_strips_common_margin() {
        assert_eq!(dedent("  a\n\n    b"), "a\n\n  b");
        assert_eq!(dedent("a\n  b"), "a\n  b");
    }
}
