//! Settings file and environment.
//!
//! `ccsync.toml` (or `.ccsync.toml`) in the working directory is read first,
//! then `CCSYNC_*` variables on top. Command-line flags override both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};
use crate::core::error::SyncError;
use crate::core::run::DEFAULT_CONCURRENCY;
use crate::core::sidecar::{ConfigRecord, SidecarStore};
use crate::infra::io::ContentRoot;

pub const CONFIG_FILE: &str = "ccsync.toml";
const CONFIG_PATHS: [&str; 2] = [CONFIG_FILE, ".ccsync.toml"];
const ENV_PREFIX: &str = "CCSYNC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings
{
    /// Base URL of the node to talk to
    pub node: Option<String>,

    /// Application key registered on the node
    pub application_key: Option<String>,

    /// Directory content is grabbed into
    pub base: PathBuf,

    /// Upper bound on in-flight requests per fan-out
    pub concurrency: usize,

    /// Work in this locale only
    pub locale: Option<String>,

    /// Grab every locale the node offers
    pub all_locales: bool,

    /// Log in again once the session token is this old
    pub token_refresh_secs: u64,
}

impl Default for Settings
{
    fn default() -> Self
    {
        Self {
            node: None,
            application_key: None,
            base: PathBuf::from("."),
            concurrency: DEFAULT_CONCURRENCY,
            locale: None,
            all_locales: false,
            token_refresh_secs: 15,
        }
    }
}

impl Settings
{
    pub fn token_refresh(&self) -> Duration
    {
        Duration::from_secs(self.token_refresh_secs)
    }

    /// `base` with `~` expanded, canonical when it already exists.
    pub fn base_dir(&self) -> Result<PathBuf>
    {
        expand_path(&self.base)
    }

    /// Configured node, else the node the tree at `tree` was grabbed from.
    pub fn resolve_node(
        &self,
        tree: &Path,
    ) -> Result<String>
    {
        if let Some(node) = self
            .node
            .as_deref()
            .filter(|n| !n.is_empty())
        {
            return Ok(node.to_string());
        }
        recorded_node(tree)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SyncError::NoNode.into())
    }

    pub fn require_application_key(&self) -> Result<&str>
    {
        self.application_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .with_context(|| {
                format!("No application key; set application_key in {CONFIG_FILE} or {ENV_PREFIX}_APPLICATION_KEY")
            })
    }
}

/// Node recorded by the last grab of the tree containing `tree`.
fn recorded_node(tree: &Path) -> Option<String>
{
    let root = ContentRoot::discover(tree).ok()?;
    SidecarStore::new(root)
        .read_record::<ConfigRecord>(Path::new(""))
        .ok()
        .flatten()
        .map(|r| r.node)
}

pub fn expand_path(path: &Path) -> Result<PathBuf>
{
    let raw = path.to_string_lossy();
    let expanded = PathBuf::from(
        shellexpand::tilde(&raw)
            .into_owned(),
    );
    if expanded.exists()
    {
        dunce::canonicalize(&expanded)
            .with_context(|| format!("Failed to resolve {}", expanded.display()))
    }
    else
    {
        Ok(expanded)
    }
}

/// Settings from the working directory and the environment.
pub fn load_settings() -> Result<Settings>
{
    load_settings_from(Path::new("."))
}

pub fn load_settings_from(dir: &Path) -> Result<Settings>
{
    let mut builder = config::Config::builder();

    // First existing file wins
    if let Some(path) = CONFIG_PATHS
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
    {
        builder = builder.add_source(config::File::from(path));
    }

    builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Settings = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join(CONFIG_FILE);

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let settings = Settings {
        node: Some("https://admin.example.com".to_string()),
        application_key: Some(String::new()),
        ..Settings::default()
    };
    let toml_string =
        toml::to_string_pretty(&settings).context("Failed to serialize default config")?;

    std::fs::create_dir_all(&args.path)
        .with_context(|| format!("Failed to create {}", args.path.display()))?;
    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}
