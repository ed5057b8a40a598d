//! Drift detection by re-resolving the specification.
//!
//! The seal only proves the lock was generated from the current specification
//! at some point. This check asks the resolver what the lock would be right
//! now and compares pins, which catches hand edits to the lock and upstream
//! republishes of unpinned transitive packages. The fresh result stays in
//! memory.
use crate::artifact::{InputSpecification, LockArtifact};
use crate::normalize::meaningful_lines;
use crate::resolver::Resolver;
use crate::seal;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Match,
    Drift,
    /// The check could not run; never equivalent to `Match`.
    Error,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Match => "match",
            Verdict::Drift => "drift",
            Verdict::Error => "error",
        }
    }
}

/// One line of a normalized lock diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", content = "line", rename_all = "snake_case")]
pub enum DiffLine {
    /// Present in the committed lock only.
    Removed(String),
    /// Present in the fresh resolution only.
    Added(String),
}

impl fmt::Display for DiffLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffLine::Removed(line) => write!(f, "-{line}"),
            DiffLine::Added(line) => write!(f, "+{line}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diff: Vec<DiffLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConsistencyReport {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Error,
            diff: Vec::new(),
            error: Some(message.into()),
        }
    }

    fn compared(diff: Vec<DiffLine>) -> Self {
        let verdict = if diff.is_empty() {
            Verdict::Match
        } else {
            Verdict::Drift
        };
        Self {
            verdict,
            diff,
            error: None,
        }
    }
}

/// Resolve `spec` afresh and diff it against the committed artifact.
///
/// A missing artifact compares as empty.
pub fn check<R: Resolver + ?Sized>(
    resolver: &R,
    spec: &InputSpecification,
    committed: Option<&LockArtifact>,
) -> ConsistencyReport {
    let fresh = match resolver.resolve(spec) {
        Ok(text) => text,
        Err(err) => {
            tracing::debug!(spec = %spec.path.display(), error = %err, "deep check could not resolve");
            return ConsistencyReport::error(err.to_string());
        }
    };
    let committed_lines = committed.map(LockArtifact::entries).unwrap_or_default();
    let committed_lines: Vec<&str> = committed_lines.iter().map(String::as_str).collect();
    let fresh_body = seal::strip(&fresh);
    let fresh_lines: Vec<&str> = meaningful_lines(&fresh_body).collect();
    let report = ConsistencyReport::compared(line_diff(&committed_lines, &fresh_lines));
    tracing::debug!(
        spec = %spec.path.display(),
        lock = ?committed.map(|artifact| artifact.path.display().to_string()),
        verdict = report.verdict.as_str(),
        changed_lines = report.diff.len(),
        "deep check complete"
    );
    report
}

/// Ordered diff of two line lists, built on their longest common subsequence.
pub fn line_diff(old: &[&str], new: &[&str]) -> Vec<DiffLine> {
    let (n, m) = (old.len(), new.len());
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut diff = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            diff.push(DiffLine::Removed(old[i].to_string()));
            i += 1;
        } else {
            diff.push(DiffLine::Added(new[j].to_string()));
            j += 1;
        }
    }
    diff.extend(old[i..].iter().map(|line| DiffLine::Removed(line.to_string())));
    diff.extend(new[j..].iter().map(|line| DiffLine::Added(line.to_string())));
    diff
}
