//! `render` and `validate`: read-only views of the config

use anyhow::{Result, bail};

use super::load_config;
use crate::Context;
use crate::cli::RenderWhat;
use crate::config;
use crate::render;
use crate::schema::InstallMethod;
use crate::ui;

pub fn render(ctx: &Context, what: RenderWhat) -> Result<()> {
    let config = load_config(ctx)?;

    let output = match what {
        RenderWhat::Config => render::render_config(&config)?,
        RenderWhat::Unit => match render::render_unit(&config) {
            Some(unit) => unit,
            None => bail!("init_style '{}' has no unit to render", config.init_style()),
        },
        RenderWhat::Url => {
            if config.install_method != InstallMethod::Url {
                log::warn!("install_method is '{}'; the URL is unused", config.install_method);
            }
            format!("{}\n", render::download_url(&config))
        }
        RenderWhat::Args => format!("{}\n", render::service_args(&config)),
    };
    print!("{output}");
    Ok(())
}

pub fn validate(ctx: &Context) -> Result<()> {
    let path = config::resolve_path(ctx.config.as_deref())?;
    let config = config::load(&path)?;

    if !ctx.quiet {
        ui::success(&format!("{} is valid", path.display()));
        ui::kv("Install", &format!("{} {}", config.install_method, config.version));
        ui::kv("Init style", &config.init_style().to_string());
        ui::kv("Config file", &config.config_file().display().to_string());
        ui::kv("Templates", &config.templates.len().to_string());
    }
    Ok(())
}
