use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "sachet-converge")]
#[command(version)]
#[command(about = "Converge a host to a declared Sachet deployment", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Desired-state file (TOML, JSON or YAML)
    #[arg(short, long, global = true, env = "SACHET_CONVERGE_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Make the host match the desired state
    Apply(ApplyArgs),

    /// Preview what apply would change
    #[command(visible_alias = "plan")]
    Diff(TargetArgs),

    /// Show every managed resource and whether it is in sync
    Status(TargetArgs),

    /// Print a derived artifact without touching the host
    Render {
        /// What to render
        #[arg(short, long, value_enum, default_value_t = RenderWhat::Config)]
        what: RenderWhat,
    },

    /// Check the config file and exit
    Validate,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct TargetArgs {
    /// Limit to a resource type or `type.name`
    /// (e.g. `files`, `services`, `template.sms`)
    pub target: Option<String>,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Limit to a resource type or `type.name`
    pub target: Option<String>,

    /// Show the plan without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Don't ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Stop at the first failed resource
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RenderWhat {
    /// The daemon's YAML config file
    Config,
    /// The systemd unit or SysV init script
    Unit,
    /// The release download URL
    Url,
    /// The daemon command-line arguments
    Args,
}
