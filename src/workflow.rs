//! Command implementations.
//!
//! Each `run_*` returns the process exit code; errors bubble to `main`, which
//! maps lock contention to exit 2 and everything else to exit 1.
mod context;
mod seal;
mod validate;

pub(crate) use context::ProjectContext;
pub use seal::run_seal;
pub use validate::run_validate;

use crate::artifact::InputSpecification;
use crate::cli::{HashArgs, InitArgs};
use crate::config;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;

/// Write a default `lockseal.json` into `root`.
pub fn run_init(root: &Path, args: &InitArgs) -> Result<i32> {
    fs::create_dir_all(root).with_context(|| format!("create {}", root.display()))?;
    let ctx = ProjectContext::load_unchecked(root)?;
    let config_path = ctx.paths.config_path();
    if config_path.is_file() && !args.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            config_path.display()
        ));
    }
    let stub = config::config_stub()?;
    ctx.writer().write(&config_path, &stub)?;
    println!("wrote {}", config_path.display());
    Ok(0)
}

/// Print the digest the current specification would be sealed with.
pub fn run_hash(ctx: &ProjectContext, args: &HashArgs) -> Result<i32> {
    let group = ctx.group(&args.name)?;
    let spec = InputSpecification::load(&group.spec)?;
    println!("{}", spec.digest());
    Ok(0)
}
