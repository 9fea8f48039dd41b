use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::infra::config::Settings;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub verbose: u8,    // global -v count
    /// File and environment settings with the global flags applied
    pub settings: Settings,
}

impl AppContext {
    /// Fold the global flags over the loaded settings.
    pub fn new(cli: &Cli, mut settings: Settings) -> Self {
        if let Some(node) = &cli.node {
            settings.node = Some(node.clone());
        }
        if let Some(base) = &cli.base {
            settings.base = base.clone();
        }
        if let Some(limit) = cli.concurrency {
            settings.concurrency = limit;
        }
        Self { quiet: cli.quiet, no_color: cli.no_color, verbose: cli.verbose, settings }
    }
}

#[derive(Parser)]
#[command(name = "ccs")]
#[command(about = "Keep a local content tree in sync with a storefront's design repository")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress progress output and informational logs
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Node base URL (overrides the config file)
    #[arg(short, long, global = true, value_name = "URL")]
    pub node: Option<String>,

    /// Directory content is grabbed into
    #[arg(short, long, global = true, value_name = "DIR")]
    pub base: Option<PathBuf>,

    /// Maximum in-flight requests per fan-out
    #[arg(long, global = true, value_name = "N")]
    pub concurrency: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download all editable content from the node
    Grab(GrabArgs),

    /// Upload one file or asset directory
    Put(PutArgs),

    /// Upload every asset under a directory
    PutAll(PutAllArgs),

    /// Upload a tree grabbed from another node on the same build
    TransferAll(TransferAllArgs),

    /// Decode and print the tracked etag of a file
    Etag(EtagArgs),

    /// Initialize a ccsync.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Parser, Debug)]
pub struct GrabArgs {
    /// Remove previously grabbed content and tracking data first
    #[arg(long)]
    pub clean: bool,

    /// Grab content for this locale only
    #[arg(long, conflicts_with = "all_locales")]
    pub locale: Option<String>,

    /// Grab content for every locale the node offers
    #[arg(long)]
    pub all_locales: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PutOptions {
    /// Propagate base widget edits to every instance
    #[arg(long)]
    pub update_instances: bool,

    /// Do not send widgetInstanceMetadata.json
    #[arg(long)]
    pub no_instance_config: bool,
}

#[derive(Parser, Debug)]
pub struct PutArgs {
    /// File or asset directory to upload
    pub path: PathBuf,

    #[command(flatten)]
    pub options: PutOptions,
}

#[derive(Parser, Debug)]
pub struct PutAllArgs {
    /// Directory to upload recursively
    pub dir: PathBuf,

    #[command(flatten)]
    pub options: PutOptions,
}

#[derive(Parser, Debug)]
pub struct TransferAllArgs {
    /// Grabbed tree (or a directory inside it) to send to --node
    pub dir: PathBuf,
}

#[derive(Parser, Debug)]
pub struct EtagArgs {
    /// Tracked content file
    pub file: PathBuf,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Output directory; if omitted and --stdout not set, prints error
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Print completion script to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,
}
