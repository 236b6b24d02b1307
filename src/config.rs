use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::Error;
use crate::guild::{CookieStorage, FileCookieStorage, MemoryCookieStorage};
#[cfg(feature = "provider")]
use crate::provider::{DiscordClient, DiscordConfig};
use crate::transport::ReqwestTransport;

/// Control panel configuration.
///
/// Required field (`api_url`) is a constructor parameter. Use
/// [`from_env()`](PanelConfig::from_env) for convention-based setup, or
/// [`new()`](PanelConfig::new) with `with_*` methods for full control.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PanelConfig {
    pub(crate) api_url: Url,
    pub(crate) cookie_file: Option<PathBuf>,
    pub(crate) request_timeout: Option<Duration>,
    #[cfg(feature = "provider")]
    pub(crate) discord: Option<DiscordConfig>,
}

impl PanelConfig {
    #[must_use]
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            cookie_file: None,
            request_timeout: None,
            #[cfg(feature = "provider")]
            discord: None,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `MUNDOBOT_API_URL`: backend base URL
    ///
    /// # Optional env vars
    /// - `MUNDOBOT_COOKIE_FILE`: file backing the guild cookie (in-memory when unset)
    /// - `MUNDOBOT_TIMEOUT_SECS`: per-request timeout in seconds
    /// - `DISCORD_CLIENT_ID`, `DISCORD_CLIENT_SECRET`, `DISCORD_REDIRECT_URI`:
    ///   Discord login; all three or none
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required env vars are missing or values are invalid.
    pub fn from_env() -> Result<Self, Error> {
        let api_url = std::env::var("MUNDOBOT_API_URL")
            .map_err(|_| Error::Config("MUNDOBOT_API_URL is required".into()))?;
        let api_url: Url = api_url
            .parse()
            .map_err(|e| Error::Config(format!("MUNDOBOT_API_URL: {e}")))?;

        let mut config = Self::new(api_url);

        if let Ok(path) = std::env::var("MUNDOBOT_COOKIE_FILE") {
            config = config.with_cookie_file(path);
        }
        if let Ok(secs) = std::env::var("MUNDOBOT_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("MUNDOBOT_TIMEOUT_SECS: {e}")))?;
            config = config.with_request_timeout(Duration::from_secs(secs));
        }

        #[cfg(feature = "provider")]
        {
            if let Some(discord) = DiscordConfig::from_env()? {
                config = config.with_discord(discord);
            }
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_cookie_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookie_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    #[cfg(feature = "provider")]
    #[must_use]
    pub fn with_discord(mut self, discord: DiscordConfig) -> Self {
        self.discord = Some(discord);
        self
    }

    #[must_use]
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    #[must_use]
    pub fn cookie_file(&self) -> Option<&Path> {
        self.cookie_file.as_deref()
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    #[cfg(feature = "provider")]
    #[must_use]
    pub fn discord(&self) -> Option<&DiscordConfig> {
        self.discord.as_ref()
    }

    /// Discord login client, when Discord is configured. Honours the request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    #[cfg(feature = "provider")]
    pub fn discord_client(&self) -> Result<Option<DiscordClient>, Error> {
        let Some(discord) = &self.discord else {
            return Ok(None);
        };
        let mut client = DiscordClient::new(discord.clone());
        if let Some(timeout) = self.request_timeout {
            let http = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;
            client = client.with_http_client(http);
        }
        Ok(Some(client))
    }

    /// Cookie storage for the guild selection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the cookie file exists but cannot be read.
    pub fn cookie_storage(&self) -> Result<Arc<dyn CookieStorage>, Error> {
        match &self.cookie_file {
            Some(path) => {
                let storage = FileCookieStorage::open(path).map_err(|e| {
                    Error::Config(format!("cookie file {}: {e}", path.display()))
                })?;
                Ok(Arc::new(storage))
            }
            None => Ok(Arc::new(MemoryCookieStorage::default())),
        }
    }

    /// HTTP transport honouring the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn transport(&self) -> Result<ReqwestTransport, Error> {
        match self.request_timeout {
            Some(timeout) => ReqwestTransport::with_timeout(timeout),
            None => Ok(ReqwestTransport::new()),
        }
    }
}
