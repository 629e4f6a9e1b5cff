//! Engine configuration, loaded from environment variables or embedded in
//! an application's own config file.

use std::env;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Derive the query's column selection from the active view (default: true).
    #[serde(default = "default_true")]
    pub auto_select: bool,

    /// Eager-load relations named by the active view (default: true).
    #[serde(default = "default_true")]
    pub auto_eager_load: bool,

    /// Pagination defaults.
    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Attribute and view markers.
    #[serde(default)]
    pub sigils: Sigils,
}

/// Pagination defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Whether results carry full metadata (total count, last page) unless a
    /// call asks otherwise (default: false, i.e. simple pagination).
    #[serde(default)]
    pub with_pages: bool,

    /// Page size used when neither the call nor the record source supplies one.
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Upper bound for caller-supplied page sizes.
    #[serde(default = "default_max_per_page")]
    pub max_per_page: u32,
}

/// Reserved marker prefixes. None may be empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawSigils")]
pub struct Sigils {
    /// Leaf prefix: select the column but omit it from output.
    pub hidden: String,

    /// Leaf prefix: resolve the value through a custom attribute provider.
    pub custom: String,

    /// View-name prefix: the view does not merge with the wildcard view.
    pub exclusive_view: String,
}

/// Unvalidated [`Sigils`] as read from a config file.
#[derive(Deserialize)]
struct RawSigils {
    #[serde(default = "default_hidden_sigil")]
    hidden: String,
    #[serde(default = "default_custom_sigil")]
    custom: String,
    #[serde(default = "default_exclusive_sigil")]
    exclusive_view: String,
}

impl TryFrom<RawSigils> for Sigils {
    type Error = Error;

    fn try_from(raw: RawSigils) -> std::result::Result<Self, Error> {
        let sigils = Sigils {
            hidden: raw.hidden,
            custom: raw.custom,
            exclusive_view: raw.exclusive_view,
        };
        sigils.validate()?;
        Ok(sigils)
    }
}

impl Sigils {
    /// Reject empty markers: an empty prefix matches every token.
    pub fn validate(&self) -> std::result::Result<(), Error> {
        for (name, sigil) in [
            ("hidden", &self.hidden),
            ("custom", &self.custom),
            ("exclusive_view", &self.exclusive_view),
        ] {
            if sigil.is_empty() {
                return Err(Error::Configuration(format!("the {name} sigil must not be empty")));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_per_page() -> u32 {
    15
}

fn default_max_per_page() -> u32 {
    100
}

fn default_hidden_sigil() -> String {
    ":".to_string()
}

fn default_custom_sigil() -> String {
    "@".to_string()
}

fn default_exclusive_sigil() -> String {
    "_".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_select: true,
            auto_eager_load: true,
            pagination: PaginationConfig::default(),
            sigils: Sigils::default(),
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            with_pages: false,
            per_page: default_per_page(),
            max_per_page: default_max_per_page(),
        }
    }
}

impl Default for Sigils {
    fn default() -> Self {
        Self {
            hidden: default_hidden_sigil(),
            custom: default_custom_sigil(),
            exclusive_view: default_exclusive_sigil(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional; unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let auto_select = env_bool("APIX_AUTO_SELECT", true)?;
        let auto_eager_load = env_bool("APIX_AUTO_EAGER_LOAD", true)?;
        let with_pages = env_bool("APIX_PAGINATION_WITH_PAGES", false)?;

        let per_page = env::var("APIX_PER_PAGE")
            .unwrap_or_else(|_| default_per_page().to_string())
            .parse()
            .context("APIX_PER_PAGE must be a valid u32")?;

        let max_per_page = env::var("APIX_MAX_PER_PAGE")
            .unwrap_or_else(|_| default_max_per_page().to_string())
            .parse()
            .context("APIX_MAX_PER_PAGE must be a valid u32")?;

        let hidden = env::var("APIX_HIDDEN_SIGIL").unwrap_or_else(|_| default_hidden_sigil());
        let custom = env::var("APIX_CUSTOM_SIGIL").unwrap_or_else(|_| default_custom_sigil());
        let exclusive_view =
            env::var("APIX_EXCLUSIVE_VIEW_SIGIL").unwrap_or_else(|_| default_exclusive_sigil());

        let sigils = Sigils {
            hidden,
            custom,
            exclusive_view,
        };
        sigils.validate()?;

        Ok(Self {
            auto_select,
            auto_eager_load,
            pagination: PaginationConfig {
                with_pages,
                per_page,
                max_per_page,
            },
            sigils,
        })
    }
}

/// Parse a boolean environment variable ("1"/"true"/"yes"/"on" and their opposites).
fn env_bool(name: &str, default: bool) -> Result<bool> {
    let Ok(raw) = env::var(name) else {
        return Ok(default);
    };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("{name} must be a boolean, got '{other}'"),
    }
}
