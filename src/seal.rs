//! Seal record embedded in a lock artifact.
//!
//! The record is a single comment line, `# lockseal: sha256=<hex>`, placed
//! directly after the artifact's leading banner (the run of `#` lines a
//! resolver writes at the top). Because it is a comment, resolvers and
//! package installers ignore it.
use crate::digest::CanonicalDigest;
use crate::normalize::COMMENT_MARKER;
use regex::Regex;
use std::sync::OnceLock;

/// Prefix every seal record starts with.
pub const SEAL_PREFIX: &str = "# lockseal:";

/// Ways a lock artifact's seal can be unreadable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SealError {
    /// More than one seal record; never resolved by picking one.
    #[error("multiple seal records on lines {lines:?}")]
    Multiple { lines: Vec<usize> },
    /// A line looks like a seal record but does not match the format.
    #[error("malformed seal record on line {line}: {text:?}")]
    NonConforming { line: usize, text: String },
}

fn candidate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#\s*lockseal:").expect("regex for seal candidates"))
}

fn record_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^# lockseal: sha256=([0-9a-f]{64})$").expect("regex for seal records")
    })
}

fn is_candidate(line: &str) -> bool {
    candidate_regex().is_match(line.trim())
}

/// Render the seal record line for `digest`.
pub fn encode(digest: &CanonicalDigest) -> String {
    format!("{SEAL_PREFIX} sha256={digest}")
}

/// Extract the embedded digest.
///
/// `Ok(None)` means the artifact carries no seal at all.
pub fn decode(lock_text: &str) -> Result<Option<CanonicalDigest>, SealError> {
    let candidates: Vec<(usize, &str)> = lock_text
        .lines()
        .enumerate()
        .filter(|(_, line)| is_candidate(line))
        .map(|(idx, line)| (idx + 1, line.trim()))
        .collect();
    match candidates.as_slice() {
        [] => Ok(None),
        [(line, text)] => {
            let nonconforming = || SealError::NonConforming {
                line: *line,
                text: text.to_string(),
            };
            let caps = record_regex().captures(text).ok_or_else(nonconforming)?;
            let hex = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            CanonicalDigest::parse(hex)
                .map(Some)
                .map_err(|_| nonconforming())
        }
        many => Err(SealError::Multiple {
            lines: many.iter().map(|(line, _)| *line).collect(),
        }),
    }
}

/// Embed `digest` into `lock_text`.
///
/// An existing record (well-formed or not) is replaced where it stands and any
/// extra records are dropped; otherwise the record goes right after the
/// leading banner. The result always ends with a single newline, so injecting
/// the same digest again is a no-op.
pub fn inject(lock_text: &str, digest: &CanonicalDigest) -> String {
    let record = encode(digest);
    let lines: Vec<&str> = lock_text.lines().collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 1);

    if lines.iter().any(|line| is_candidate(line)) {
        let mut placed = false;
        for line in lines {
            if !is_candidate(line) {
                out.push(line);
            } else if !placed {
                out.push(&record);
                placed = true;
            }
        }
    } else {
        let banner_end = lines
            .iter()
            .take_while(|line| line.trim_start().starts_with(COMMENT_MARKER))
            .count();
        out.extend_from_slice(&lines[..banner_end]);
        out.push(&record);
        out.extend_from_slice(&lines[banner_end..]);
    }

    let mut text = out.join("\n");
    text.push('\n');
    text
}

/// `lock_text` with every seal record line removed.
pub fn strip(lock_text: &str) -> String {
    lock_text
        .lines()
        .filter(|line| !is_candidate(line))
        .collect::<Vec<_>>()
        .join("\n")
}
