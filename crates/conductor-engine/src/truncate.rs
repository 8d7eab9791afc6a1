//! Byte budgets applied to tool output before it enters the transcript.

use std::borrow::Cow;

const DEFAULT_MAX_OUTPUT: usize = 256 * 1024;
const SHELL_MAX_OUTPUT: usize = 1024 * 1024;

/// Byte budget for one tool's output. Shell gets extra room because build
/// and test runs legitimately produce long logs.
pub fn max_output_for_tool(tool_name: &str) -> usize {
    if tool_name == "shell" {
        SHELL_MAX_OUTPUT
    } else {
        DEFAULT_MAX_OUTPUT
    }
}

/// Cuts `output` to at most `max_bytes` of original text plus a marker
/// recording how much was dropped. Within budget, borrows unchanged.
pub fn truncate_output(output: &str, max_bytes: usize) -> Cow<'_, str> {
    if output.len() <= max_bytes {
        return Cow::Borrowed(output);
    }
    let keep = floor_char_boundary(output, max_bytes);
    Cow::Owned(format!(
        "{}\n\n[truncated: {} bytes -> {keep} bytes]",
        &output[..keep],
        output.len()
    ))
}

/// Largest index not past `max` that lands on a char boundary. The std
/// method of the same name is still unstable.
pub(crate) fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        s.len()
    } else {
        (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_budget_borrows_unchanged() {
        let out = truncate_output("hello world", 1024);
        assert!(matches!(out, Cow::Borrowed("hello world")));
    }

    #[test]
    fn over_budget_is_cut_and_marked() {
        let input = "a".repeat(1000);
        let out = truncate_output(&input, 100);
        assert!(out.starts_with(&"a".repeat(100)));
        assert!(out.contains("[truncated: 1000 bytes -> 100 bytes]"));
        assert!(out.len() < 200);
    }

    #[test]
    fn cut_never_splits_a_char() {
        let input = "\u{1F980}".repeat(100); // 4 bytes each
        let out = truncate_output(&input, 10);
        assert!(out.starts_with("\u{1F980}\u{1F980}\n"));
        assert!(out.contains("[truncated: 400 bytes -> 8 bytes]"));
    }

    #[test]
    fn budget_depends_on_tool() {
        assert_eq!(max_output_for_tool("shell"), SHELL_MAX_OUTPUT);
        assert_eq!(max_output_for_tool("read_file"), DEFAULT_MAX_OUTPUT);
        assert_eq!(max_output_for_tool("grep"), DEFAULT_MAX_OUTPUT);
    }

    #[test]
    fn budget_edges() {
        let exact = "a".repeat(100);
        assert_eq!(truncate_output(&exact, 100), exact);

        let over = "a".repeat(101);
        assert!(truncate_output(&over, 100).contains("[truncated: 101 bytes -> 100 bytes]"));

        assert_eq!(truncate_output("", 100), "");
    }

    #[test]
    fn boundary_scan_walks_backwards() {
        let s = "\u{E9}x"; // 2-byte char then ascii
        assert_eq!(floor_char_boundary(s, 1), 0);
        assert_eq!(floor_char_boundary(s, 2), 2);
        assert_eq!(floor_char_boundary(s, 99), s.len());
    }
}
