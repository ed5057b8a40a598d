//! Enforcement policy per execution context.
//!
//! Local runs fail hard on any doubt, including a deep check that could not
//! run. Pipeline runs stay green on seal or drift problems but always log a
//! warning on [`AUDIT_TARGET`], which the log filter cannot switch off.
use crate::consistency::Verdict;
use serde::Serialize;

/// Log target for policy warnings; forced on by the subscriber setup.
pub const AUDIT_TARGET: &str = "lockseal::policy";

pub const EXIT_PASS: i32 = 0;
pub const EXIT_BLOCK: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContext {
    Local,
    Ci,
}

impl ExecutionContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionContext::Local => "local",
            ExecutionContext::Ci => "ci",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Pass,
    Block,
    Warn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub action: Action,
    pub exit_code: i32,
}

impl Decision {
    const PASS: Decision = Decision {
        action: Action::Pass,
        exit_code: EXIT_PASS,
    };
    const BLOCK: Decision = Decision {
        action: Action::Block,
        exit_code: EXIT_BLOCK,
    };
    const WARN: Decision = Decision {
        action: Action::Warn,
        exit_code: EXIT_PASS,
    };
}

/// Map the caller's pipeline indicator to a context.
pub fn classify(ci_signal: bool) -> ExecutionContext {
    if ci_signal {
        ExecutionContext::Ci
    } else {
        ExecutionContext::Local
    }
}

pub fn decide(seal_valid: bool, verdict: Verdict, context: ExecutionContext) -> Decision {
    let clean = seal_valid && verdict == Verdict::Match;
    match (clean, context) {
        (true, _) => Decision::PASS,
        (false, ExecutionContext::Local) => Decision::BLOCK,
        (false, ExecutionContext::Ci) => Decision::WARN,
    }
}

/// Without a readable specification nothing can be vouched for, in any context.
pub fn decide_missing_spec(_context: ExecutionContext) -> Decision {
    Decision::BLOCK
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERDICTS: [Verdict; 3] = [Verdict::Match, Verdict::Drift, Verdict::Error];

    #[test]
    fn classify_follows_signal_only() {
        assert_eq!(classify(false), ExecutionContext::Local);
        assert_eq!(classify(true), ExecutionContext::Ci);
    }

    #[test]
    fn full_decision_matrix() {
        let cases = [
            (ExecutionContext::Local, false, Verdict::Match, Action::Block, 2),
            (ExecutionContext::Local, false, Verdict::Drift, Action::Block, 2),
            (ExecutionContext::Local, false, Verdict::Error, Action::Block, 2),
            (ExecutionContext::Local, true, Verdict::Drift, Action::Block, 2),
            (ExecutionContext::Local, true, Verdict::Error, Action::Block, 2),
            (ExecutionContext::Local, true, Verdict::Match, Action::Pass, 0),
            (ExecutionContext::Ci, false, Verdict::Match, Action::Warn, 0),
            (ExecutionContext::Ci, false, Verdict::Drift, Action::Warn, 0),
            (ExecutionContext::Ci, false, Verdict::Error, Action::Warn, 0),
            (ExecutionContext::Ci, true, Verdict::Drift, Action::Warn, 0),
            (ExecutionContext::Ci, true, Verdict::Error, Action::Warn, 0),
            (ExecutionContext::Ci, true, Verdict::Match, Action::Pass, 0),
        ];
        for (context, seal_valid, verdict, action, exit_code) in cases {
            assert_eq!(
                decide(seal_valid, verdict, context),
                Decision { action, exit_code },
                "{context:?} seal_valid={seal_valid} verdict={verdict:?}"
            );
        }
    }

    #[test]
    fn ci_never_blocks_and_local_never_warns() {
        for verdict in VERDICTS {
            for seal_valid in [false, true] {
                assert_ne!(
                    decide(seal_valid, verdict, ExecutionContext::Ci).action,
                    Action::Block
                );
                assert_ne!(
                    decide(seal_valid, verdict, ExecutionContext::Local).action,
                    Action::Warn
                );
            }
        }
    }

    #[test]
    fn missing_spec_blocks_everywhere() {
        for context in [ExecutionContext::Local, ExecutionContext::Ci] {
            assert_eq!(decide_missing_spec(context), Decision::BLOCK);
        }
    }
}
