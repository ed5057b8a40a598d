//! Canonical text form shared by the seal hash and the drift diff.
//!
//! Only lines that carry meaning survive: comments and blank lines are
//! dropped and surrounding whitespace is trimmed. Order is kept, so moving a
//! dependency to another line counts as a change.

/// Lines whose trimmed form starts with this marker are comments.
pub const COMMENT_MARKER: &str = "#";

/// Meaningful lines of `text`, trimmed, in original order.
pub fn meaningful_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(COMMENT_MARKER))
}

/// Join the meaningful lines with `\n`. Empty input yields an empty string.
pub fn normalize(text: &str) -> String {
    meaningful_lines(text).collect::<Vec<_>>().join("\n")
}
