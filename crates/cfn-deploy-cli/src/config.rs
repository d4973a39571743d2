//! Configuration file handling for cfn-deploy.
//!
//! Provides an optional TOML config file at
//! `~/.config/cfn-deploy/config.toml` and a resolution chain:
//! CLI flag > env var > config file > default.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use cfn_deploy_core::PollConfig;
use cfn_deploy_core::deploy::AWS_CLI;
use cfn_deploy_core::stackevents::aws_cli::DEFAULT_MAX_ITEMS;

pub const ENV_AWS_CLI: &str = "CFN_DEPLOY_AWS_CLI";
pub const ENV_COLOR: &str = "CFN_DEPLOY_COLOR";
pub const ENV_NO_COLOR: &str = "NO_COLOR";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub aws: AwsSection,
    pub poll: PollSection,
    pub output: OutputSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AwsSection {
    /// Executable used for both the deploy and event queries.
    pub cli: Option<String>,
    pub profile: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollSection {
    pub interval_ms: Option<u64>,
    pub lookback_secs: Option<u64>,
    pub max_items: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub color: Option<ColorMode>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Color when stdout is a terminal and `NO_COLOR` is unset.
    #[default]
    Auto,
    Always,
    Never,
}

impl FromStr for ColorMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => bail!("invalid color mode {other:?} (expected auto, always or never)"),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the cfn-deploy config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/cfn-deploy` or
/// `~/.config/cfn-deploy`, on every platform.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("cfn-deploy");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("cfn-deploy")
}

/// Return the path to the cfn-deploy config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read
// -----------------------------------------------------------------------

/// Load the config file at `path`. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(ConfigFile::default());
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Load the config file from [`config_path`].
pub fn load_config() -> Result<ConfigFile> {
    load_config_from(&config_path())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Settings given on the command line; `None` means not given.
#[derive(Debug, Default)]
pub struct Overrides {
    pub aws_cli: Option<String>,
    pub profile: Option<String>,
    pub region: Option<String>,
    pub color: Option<ColorMode>,
    pub poll_interval_ms: Option<u64>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    pub aws_cli: String,
    pub profile: Option<String>,
    pub region: Option<String>,
    pub poll_interval: Duration,
    pub lookback: Duration,
    pub max_items: u32,
    pub color: bool,
}

impl DeployConfig {
    /// Resolve configuration from the real environment and config file.
    pub fn resolve(overrides: &Overrides) -> Result<Self> {
        let file = load_config()?;
        Self::resolve_with(
            overrides,
            &file,
            |key| std::env::var(key).ok(),
            std::io::stdout().is_terminal(),
        )
    }

    /// Resolve using the chain: CLI flag > env var > config file > default.
    ///
    /// - aws cli: `--aws-cli` > `CFN_DEPLOY_AWS_CLI` > `aws.cli` > `aws`
    /// - profile, region: flag > `aws.profile` / `aws.region` > unset
    /// - poll interval: `--poll-interval-ms` > `poll.interval_ms` > 500ms
    /// - color: `--color` > `CFN_DEPLOY_COLOR` > `output.color` > auto
    pub fn resolve_with(
        overrides: &Overrides,
        file: &ConfigFile,
        env: impl Fn(&str) -> Option<String>,
        stdout_is_tty: bool,
    ) -> Result<Self> {
        let aws_cli = overrides
            .aws_cli
            .clone()
            .or_else(|| env(ENV_AWS_CLI).filter(|v| !v.is_empty()))
            .or_else(|| file.aws.cli.clone())
            .unwrap_or_else(|| AWS_CLI.to_string());

        let profile = overrides.profile.clone().or_else(|| file.aws.profile.clone());
        let region = overrides.region.clone().or_else(|| file.aws.region.clone());

        let poll_interval = overrides
            .poll_interval_ms
            .or(file.poll.interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(PollConfig::DEFAULT_INTERVAL);
        let lookback = file
            .poll
            .lookback_secs
            .map(Duration::from_secs)
            .unwrap_or(PollConfig::DEFAULT_LOOKBACK);
        let max_items = file.poll.max_items.unwrap_or(DEFAULT_MAX_ITEMS);

        let color_mode = match overrides.color {
            Some(mode) => mode,
            None => match env(ENV_COLOR).filter(|v| !v.is_empty()) {
                Some(value) => value
                    .parse()
                    .with_context(|| format!("{ENV_COLOR} is not a valid color mode"))?,
                None => file.output.color.unwrap_or_default(),
            },
        };
        let color = match color_mode {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout_is_tty && env(ENV_NO_COLOR).is_none(),
        };

        Ok(Self {
            aws_cli,
            profile,
            region,
            poll_interval,
            lookback,
            max_items,
            color,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
