//! Command-line interface and layered configuration for the echo server.
//!
//! Values are merged from, in increasing precedence: built-in defaults, the
//! `.eio-ws.toml` dotfile in the working directory, `EIO_WS_*` environment
//! variables and command-line flags.

use std::ffi::OsString;

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dotfile consulted in the working directory.
pub const CONFIG_FILE: &str = ".eio-ws.toml";
/// Prefix for configuration environment variables.
pub const ENV_PREFIX: &str = "EIO_WS_";
/// Default listener address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
/// Default tracing filter.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Errors raised while assembling the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Command-line arguments could not be parsed.
    #[error(transparent)]
    Cli(#[from] clap::Error),
    /// A configuration layer could not be read or merged.
    #[error(transparent)]
    Layer(#[from] Box<figment::Error>),
}

/// Command-line overrides; unset flags leave lower layers untouched.
#[derive(Parser, Serialize, Default, Debug, Clone)]
#[command(author, version, about)]
pub struct Cli {
    /// Server bind address.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    /// Tracing filter directive, for example `info` or `eio_websocket=debug`.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

/// Resolved runtime configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Server bind address.
    pub bind: String,
    /// Tracing filter directive.
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_owned(),
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
        }
    }
}

impl AppConfig {
    /// Load configuration using the process arguments.
    ///
    /// # Errors
    ///
    /// See [`AppConfig::load_from_iter`].
    pub fn load() -> Result<Self, ConfigError> { Self::load_from_iter(std::env::args_os()) }

    /// Load configuration using an explicit argument list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Cli`] for invalid arguments (including
    /// `--help`) and [`ConfigError::Layer`] when a layer cannot be merged.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args)?;
        Self::from_cli(&cli)
    }

    /// Merge the configuration layers beneath already parsed CLI flags.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Layer`] when a layer cannot be merged.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(cli))
            .extract()
            .map_err(|err| ConfigError::Layer(Box::new(err)))
    }
}
