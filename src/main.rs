use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod artifact;
mod atomic;
mod cli;
mod config;
mod consistency;
mod digest;
mod normalize;
mod paths;
mod policy;
mod resolver;
mod seal;
mod util;
mod workflow;

use atomic::LockError;
use cli::{Command, RootArgs};
use workflow::ProjectContext;

/// Log filter override when `--log-level` is absent.
const LOG_ENV: &str = "LOCKSEAL_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

/// Ambient pipeline indicator, consulted only when `--ci` is not given.
const CI_ENV: &str = "CI";

const EXIT_FAILURE: u8 = 1;
const EXIT_CONTENTION: u8 = 2;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.log_level.as_deref());
    match run(args) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(EXIT_FAILURE)),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn run(args: RootArgs) -> Result<i32> {
    match args.command {
        Command::Init(init) => workflow::run_init(&args.root, &init),
        Command::Seal(seal) => {
            let ctx = ProjectContext::load(&args.root)?;
            workflow::run_seal(&ctx, &seal)
        }
        Command::Validate(mut validate) => {
            validate.ci = validate.ci || ambient_ci_indicator();
            let ctx = ProjectContext::load(&args.root)?;
            workflow::run_validate(&ctx, &validate)
        }
        Command::Hash(hash) => {
            let ctx = ProjectContext::load(&args.root)?;
            workflow::run_hash(&ctx, &hash)
        }
    }
}

fn ambient_ci_indicator() -> bool {
    std::env::var(CI_ENV)
        .map(|value| {
            let value = value.trim();
            !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
        })
        .unwrap_or(false)
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    let contended = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<LockError>(),
            Some(LockError::Contention { .. })
        )
    });
    if contended {
        EXIT_CONTENTION
    } else {
        EXIT_FAILURE
    }
}

fn init_tracing(cli_filter: Option<&str>) {
    let raw = cli_filter
        .map(str::to_string)
        .or_else(|| std::env::var(LOG_ENV).ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    let mut filter = EnvFilter::try_new(&raw).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // Pipeline warnings must stay visible whatever the user filter says.
    if let Ok(directive) = format!("{}=warn", policy::AUDIT_TARGET).parse::<Directive>() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
