//! Subcommand implementations

pub mod converge;
pub mod inspect;

use anyhow::Result;

use crate::Context;
use crate::config;
use crate::schema::SachetConfig;

/// Resolve, load and validate the config named on the command line
fn load_config(ctx: &Context) -> Result<SachetConfig> {
    let path = config::resolve_path(ctx.config.as_deref())?;
    config::load(&path)
}
