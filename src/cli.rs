//! CLI argument parsing.
//!
//! The CLI is thin: it names the group, supplies the execution-context signal,
//! and leaves all policy to the workflow modules.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "lockseal",
    version,
    about = "Seal dependency lock files to their specification and detect drift",
    after_help = "Commands:\n  init                       Write a default lockseal.json\n  seal <group>               Resolve, seal, and atomically write the lock file\n  validate <group>           Check the seal (add --deep to re-resolve and diff)\n  validate --all --deep      Check every tracked group (pre-push / CI)\n  hash <group>               Print the digest of the current specification\n\nExamples:\n  lockseal seal base\n  lockseal validate base --deep\n  lockseal validate --all --deep --ci --json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Project root containing lockseal.json and the dependency files
    #[arg(long, value_name = "DIR", default_value = ".", global = true)]
    pub root: PathBuf,

    /// Log filter (overrides LOCKSEAL_LOG), e.g. "info" or "lockseal=debug"
    #[arg(long, value_name = "FILTER", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Init(InitArgs),
    Seal(SealArgs),
    Validate(ValidateArgs),
    Hash(HashArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Write a default lockseal.json")]
pub struct InitArgs {
    /// Overwrite an existing lockseal.json
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Resolve a group's specification and write the sealed lock file")]
pub struct SealArgs {
    /// Dependency group name
    pub name: String,

    /// Resolver command (overrides LOCKSEAL_RESOLVER and lockseal.json)
    #[arg(long, value_name = "CMD")]
    pub resolver: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Check that lock files are sealed to their current specification")]
pub struct ValidateArgs {
    /// Dependency group name
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub name: Option<String>,

    /// Validate every tracked group
    #[arg(long)]
    pub all: bool,

    /// Also re-resolve the specification and diff against the lock file
    #[arg(long)]
    pub deep: bool,

    /// Pipeline mode: report problems as warnings instead of failing
    #[arg(long)]
    pub ci: bool,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    /// Resolver command for --deep (overrides LOCKSEAL_RESOLVER and lockseal.json)
    #[arg(long, value_name = "CMD", requires = "deep")]
    pub resolver: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Print the digest of a group's current specification")]
pub struct HashArgs {
    /// Dependency group name
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        RootArgs::command().debug_assert();
    }

    #[test]
    fn validate_requires_name_or_all() {
        assert!(RootArgs::try_parse_from(["lockseal", "validate"]).is_err());
        assert!(RootArgs::try_parse_from(["lockseal", "validate", "base", "--all"]).is_err());
        let parsed = RootArgs::try_parse_from(["lockseal", "validate", "--all", "--deep", "--ci"])
            .expect("parse");
        match parsed.command {
            Command::Validate(args) => {
                assert!(args.all && args.deep && args.ci);
                assert!(args.name.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_root_is_accepted_after_subcommand() {
        let parsed =
            RootArgs::try_parse_from(["lockseal", "seal", "base", "--root", "/repo"]).expect("parse");
        assert_eq!(parsed.root, PathBuf::from("/repo"));
    }
}
