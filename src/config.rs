use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{AgriError, Result, AGRITWIN_FOLDER};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

pub const API_URL_VAR: &str = "AGRITWIN_API_URL";
pub const DATA_DIR_VAR: &str = "AGRITWIN_DATA_DIR";
pub const PLATFORM_LANGUAGE_VAR: &str = "LANG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: Url,
    /// Where client preferences are kept.
    pub data_dir: PathBuf,
    /// Language tag reported by the platform, e.g. `hi_IN.UTF-8`.
    #[serde(default)]
    pub platform_language: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    format!("agritwin-client/{}", env!("CARGO_PKG_VERSION"))
}

impl ClientConfig {
    /// Config for `base_url` with preferences under `./.agritwin`.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            data_dir: PathBuf::from(".").join(AGRITWIN_FOLDER),
            platform_language: None,
            user_agent: default_user_agent(),
        }
    }

    /// Config for a backend on [`DEFAULT_BASE_URL`].
    pub fn local() -> Result<Self> {
        Ok(Self::new(Url::parse(DEFAULT_BASE_URL)?))
    }

    /// Local defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match var(API_URL_VAR).filter(|v| !v.trim().is_empty())
        {
            Some(url) => Self::new(Url::parse(url.trim()).map_err(|e| {
                AgriError::Config(format!("{API_URL_VAR}={url}: {e}"))
            })?),
            None => Self::local()?,
        };
        if let Some(dir) = var(DATA_DIR_VAR).filter(|v| !v.is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        config.platform_language =
            var(PLATFORM_LANGUAGE_VAR).filter(|v| !v.is_empty());
        log::debug!("client config: {:?}", config);
        Ok(config)
    }
}
