//! Workflow validate step.
//!
//! Read-only: no lock is taken and nothing is written, so validation may run
//! while a seal is in progress and will observe either the old or the new
//! artifact. Stages run in order INIT, HASH, SEAL_CHECK, DEEP_CHECK (only when
//! asked), POLICY_DECISION, DONE; an unreadable specification jumps straight
//! to the policy decision.
use super::ProjectContext;
use crate::artifact::{InputSpecification, LockArtifact};
use crate::cli::ValidateArgs;
use crate::consistency::{self, ConsistencyReport, Verdict};
use crate::digest::CanonicalDigest;
use crate::paths::GroupPaths;
use crate::policy::{self, Action, Decision, ExecutionContext, AUDIT_TARGET, EXIT_PASS};
use crate::resolver::{MisconfiguredResolver, Resolver};
use crate::util::display_path;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Hash,
    SealCheck,
    DeepCheck,
    PolicyDecision,
    Done,
}

/// Why the seal could not vouch for the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SealFinding {
    /// Specification absent or unreadable.
    MissingSpec { detail: String },
    /// No usable seal record: artifact missing, unsealed, duplicated or garbled.
    MalformedSeal { detail: String },
    /// Well-formed record whose digest does not match the specification.
    TamperedSeal,
}

impl SealFinding {
    pub fn kind(&self) -> &'static str {
        match self {
            SealFinding::MissingSpec { .. } => "missing_spec",
            SealFinding::MalformedSeal { .. } => "malformed_seal",
            SealFinding::TamperedSeal => "tampered_seal",
        }
    }
}

/// Result of validating one group; becomes the process exit status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub group: String,
    pub spec: PathBuf,
    pub lock: PathBuf,
    pub context: ExecutionContext,
    pub seal_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finding: Option<SealFinding>,
    pub expected_digest: Option<CanonicalDigest>,
    pub embedded_digest: Option<CanonicalDigest>,
    pub consistency: Option<ConsistencyReport>,
    pub action: Action,
    pub exit_code: i32,
    pub stages: Vec<Stage>,
}

/// Run `validate` for one group or every tracked group.
pub fn run_validate(ctx: &ProjectContext, args: &ValidateArgs) -> Result<i32> {
    let context = policy::classify(args.ci);
    let groups = if args.all {
        ctx.paths.tracked_groups(&ctx.config)?
    } else {
        let name = args
            .name
            .as_deref()
            .ok_or_else(|| anyhow!("validate needs a group name or --all"))?;
        vec![ctx.group(name)?]
    };
    let resolver: Option<Box<dyn Resolver>> = if args.deep {
        match ctx.resolver(args.resolver.as_deref()) {
            Ok(resolver) => Some(Box::new(resolver)),
            Err(err) => {
                tracing::debug!(error = %err, "resolver command unusable");
                Some(Box::new(MisconfiguredResolver::new(&err)))
            }
        }
    } else {
        None
    };

    let outcomes: Vec<ValidationOutcome> = groups
        .iter()
        .map(|group| validate_group(group, context, resolver.as_deref()))
        .collect();

    if args.json {
        let json = if args.all {
            serde_json::to_string_pretty(&outcomes)
        } else {
            serde_json::to_string_pretty(&outcomes[0])
        }
        .context("serialize validation outcome")?;
        println!("{json}");
    } else {
        if outcomes.is_empty() {
            println!("no tracked dependency groups under {}", ctx.paths.root().display());
        }
        for outcome in &outcomes {
            print_outcome(ctx, outcome);
        }
    }
    Ok(aggregate_exit_code(&outcomes))
}

/// Worst exit code across groups.
pub fn aggregate_exit_code(outcomes: &[ValidationOutcome]) -> i32 {
    outcomes
        .iter()
        .map(|outcome| outcome.exit_code)
        .max()
        .unwrap_or(EXIT_PASS)
}

/// Validate one group. `deep` carries the resolver when the drift check is wanted.
pub fn validate_group(
    group: &GroupPaths,
    context: ExecutionContext,
    deep: Option<&dyn Resolver>,
) -> ValidationOutcome {
    let mut stages = vec![Stage::Init];
    let mut outcome = ValidationOutcome {
        group: group.name.clone(),
        spec: group.spec.clone(),
        lock: group.lock.clone(),
        context,
        seal_valid: false,
        finding: None,
        expected_digest: None,
        embedded_digest: None,
        consistency: None,
        action: Action::Block,
        exit_code: policy::EXIT_BLOCK,
        stages: Vec::new(),
    };

    let spec = match InputSpecification::load(&group.spec) {
        Ok(spec) => spec,
        Err(err) => {
            let detail = format!("{err:#}");
            stages.push(Stage::PolicyDecision);
            outcome.finding = Some(SealFinding::MissingSpec {
                detail: detail.clone(),
            });
            outcome.consistency = Some(ConsistencyReport::error(format!(
                "specification unavailable: {detail}"
            )));
            apply_decision(&mut outcome, policy::decide_missing_spec(context));
            stages.push(Stage::Done);
            outcome.stages = stages;
            report(&outcome);
            return outcome;
        }
    };

    stages.push(Stage::Hash);
    let expected = spec.digest();
    outcome.expected_digest = Some(expected.clone());

    stages.push(Stage::SealCheck);
    let artifact = match LockArtifact::load(&group.lock) {
        Ok(artifact) => artifact,
        Err(err) => {
            outcome.finding = Some(SealFinding::MalformedSeal {
                detail: format!("{err:#}"),
            });
            None
        }
    };
    if let Some(artifact) = &artifact {
        match artifact.seal() {
            Ok(Some(embedded)) => {
                if embedded != expected {
                    outcome.finding = Some(SealFinding::TamperedSeal);
                }
                outcome.embedded_digest = Some(embedded);
            }
            Ok(None) => {
                outcome.finding = Some(SealFinding::MalformedSeal {
                    detail: "lock artifact has no seal record".to_string(),
                });
            }
            Err(err) => {
                outcome.finding = Some(SealFinding::MalformedSeal {
                    detail: err.to_string(),
                });
            }
        }
    } else if outcome.finding.is_none() {
        outcome.finding = Some(SealFinding::MalformedSeal {
            detail: "lock artifact does not exist".to_string(),
        });
    }
    outcome.seal_valid = outcome.finding.is_none();

    if let Some(resolver) = deep {
        stages.push(Stage::DeepCheck);
        outcome.consistency = Some(consistency::check(resolver, &spec, artifact.as_ref()));
    }

    stages.push(Stage::PolicyDecision);
    let verdict = outcome
        .consistency
        .as_ref()
        .map(|report| report.verdict)
        .unwrap_or(Verdict::Match);
    let decision = policy::decide(outcome.seal_valid, verdict, context);
    apply_decision(&mut outcome, decision);
    stages.push(Stage::Done);
    outcome.stages = stages;
    report(&outcome);
    outcome
}

fn apply_decision(outcome: &mut ValidationOutcome, decision: Decision) {
    outcome.action = decision.action;
    outcome.exit_code = decision.exit_code;
}

/// Problems found, one line each, without remediation advice.
fn problems(outcome: &ValidationOutcome) -> Vec<String> {
    let mut problems = Vec::new();
    match &outcome.finding {
        Some(SealFinding::MissingSpec { detail }) => {
            problems.push(format!("specification missing: {detail}"));
        }
        Some(SealFinding::MalformedSeal { detail }) => {
            problems.push(format!("malformed seal: {detail}"));
        }
        Some(SealFinding::TamperedSeal) => problems.push(format!(
            "seal mismatch: expected sha256={} found sha256={}",
            digest_or_none(&outcome.expected_digest),
            digest_or_none(&outcome.embedded_digest)
        )),
        None => {}
    }
    if matches!(outcome.finding, Some(SealFinding::MissingSpec { .. })) {
        return problems;
    }
    if let Some(report) = &outcome.consistency {
        match report.verdict {
            Verdict::Match => {}
            Verdict::Drift => problems.push(format!(
                "drift: lock differs from a fresh resolution in {} line(s)",
                report.diff.len()
            )),
            Verdict::Error => problems.push(format!(
                "deep check could not run: {}",
                report.error.as_deref().unwrap_or("unknown error")
            )),
        }
    }
    problems
}

fn digest_or_none(digest: &Option<CanonicalDigest>) -> String {
    digest
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "<none>".to_string())
}

/// Structured log for every non-pass outcome. Warnings go to the audit target.
fn report(outcome: &ValidationOutcome) {
    let stage_trail = outcome
        .stages
        .iter()
        .map(|stage| format!("{stage:?}"))
        .collect::<Vec<_>>()
        .join(">");
    tracing::debug!(group = %outcome.group, stages = %stage_trail, "validation finished");
    if outcome.action == Action::Pass {
        return;
    }
    let check = outcome
        .finding
        .as_ref()
        .map(SealFinding::kind)
        .or_else(|| {
            outcome
                .consistency
                .as_ref()
                .map(|report| report.verdict.as_str())
        })
        .unwrap_or("unknown");
    let verdict = outcome
        .consistency
        .as_ref()
        .map(|report| report.verdict.as_str())
        .unwrap_or("skipped");
    let expected = digest_or_none(&outcome.expected_digest);
    let actual = digest_or_none(&outcome.embedded_digest);
    let diff = outcome
        .consistency
        .as_ref()
        .map(|report| {
            report
                .diff
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    let summary = problems(outcome).join("; ");
    match outcome.action {
        Action::Warn => tracing::warn!(
            target: AUDIT_TARGET,
            group = %outcome.group,
            spec = %outcome.spec.display(),
            lock = %outcome.lock.display(),
            context = outcome.context.as_str(),
            check,
            verdict,
            expected_digest = %expected,
            actual_digest = %actual,
            diff = %diff,
            problems = %summary,
            "lock integrity warning"
        ),
        _ => tracing::error!(
            group = %outcome.group,
            spec = %outcome.spec.display(),
            lock = %outcome.lock.display(),
            context = outcome.context.as_str(),
            check,
            verdict,
            expected_digest = %expected,
            actual_digest = %actual,
            diff = %diff,
            problems = %summary,
            "lock integrity violation"
        ),
    }
}

fn print_outcome(ctx: &ProjectContext, outcome: &ValidationOutcome) {
    let lock = display_path(&outcome.lock, Some(ctx.paths.root()));
    match outcome.action {
        Action::Pass => {
            println!("ok    {} ({})", outcome.group, lock);
            return;
        }
        Action::Warn => eprintln!("warn  {} ({})", outcome.group, lock),
        Action::Block => eprintln!("block {} ({})", outcome.group, lock),
    }
    for problem in problems(outcome) {
        eprintln!("  {problem}");
    }
    if let Some(report) = &outcome.consistency {
        for line in &report.diff {
            eprintln!("    {line}");
        }
    }
    eprintln!("  remediate: lockseal seal {}", outcome.group);
}
