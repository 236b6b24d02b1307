//! Discord login: authorization code flow with PKCE.
//!
//! The Discord access token obtained here is the identity assertion handed to
//! [`SessionStore::accept`](crate::session::SessionStore::accept).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::Error;
use crate::session::IdentityCallback;
use crate::types::{IdentityAssertion, UserProfile};

const AVATAR_CDN: &str = "https://cdn.discordapp.com/avatars";

/// Discord OAuth2 application settings.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DiscordConfig {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) redirect_uri: Url,
    pub(crate) auth_url: Url,
    pub(crate) token_url: Url,
    pub(crate) user_url: Url,
    pub(crate) scopes: Vec<String>,
}

impl DiscordConfig {
    /// Required fields are parameters; endpoints default to discord.com.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>, redirect_uri: Url) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri,
            auth_url: "https://discord.com/oauth2/authorize"
                .parse()
                .expect("valid default URL"),
            token_url: "https://discord.com/api/oauth2/token"
                .parse()
                .expect("valid default URL"),
            user_url: "https://discord.com/api/users/@me"
                .parse()
                .expect("valid default URL"),
            scopes: vec!["identify".into()],
        }
    }

    /// Read `DISCORD_CLIENT_ID`, `DISCORD_CLIENT_SECRET` and `DISCORD_REDIRECT_URI`.
    ///
    /// Returns `Ok(None)` when none of them is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if only some are set or the redirect URI is invalid.
    pub fn from_env() -> Result<Option<Self>, Error> {
        let id = std::env::var("DISCORD_CLIENT_ID").ok();
        let secret = std::env::var("DISCORD_CLIENT_SECRET").ok();
        let redirect = std::env::var("DISCORD_REDIRECT_URI").ok();

        match (id, secret, redirect) {
            (None, None, None) => Ok(None),
            (Some(id), Some(secret), Some(redirect)) => {
                let redirect: Url = redirect
                    .parse()
                    .map_err(|e| Error::Config(format!("DISCORD_REDIRECT_URI: {e}")))?;
                Ok(Some(Self::new(id, secret, redirect)))
            }
            _ => Err(Error::Config(
                "DISCORD_CLIENT_ID, DISCORD_CLIENT_SECRET and DISCORD_REDIRECT_URI must be set together"
                    .into(),
            )),
        }
    }

    #[must_use]
    pub fn with_auth_url(mut self, url: Url) -> Self {
        self.auth_url = url;
        self
    }

    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    #[must_use]
    pub fn with_user_url(mut self, url: Url) -> Self {
        self.user_url = url;
        self
    }

    /// Override the scopes (default: `["identify"]`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

/// Where to send the user, plus the values to keep until the callback.
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
}

/// Discord token endpoint response.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct ProviderToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// `GET /users/@me`
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl DiscordUser {
    /// Display name (global name when set) and avatar URL.
    #[must_use]
    pub fn profile(&self) -> UserProfile {
        let profile = UserProfile::new(self.global_name.as_deref().unwrap_or(&self.username));
        match &self.avatar {
            Some(hash) => profile.with_image_url(format!("{AVATAR_CDN}/{}/{hash}.png", self.id)),
            None => profile,
        }
    }
}

pub struct DiscordClient {
    config: DiscordConfig,
    http: reqwest::Client,
}

impl DiscordClient {
    #[must_use]
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &DiscordConfig {
        &self.config
    }

    /// Authorization URL with fresh `state` and PKCE verifier.
    #[must_use]
    pub fn authorization_url(&self) -> AuthorizationRequest {
        let state = random_url_token::<16>();
        let code_verifier = random_url_token::<48>();
        let challenge = pkce_challenge(&code_verifier);

        let mut url = self.config.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", &state)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("prompt", "none");

        AuthorizationRequest {
            url: url.into(),
            state,
            code_verifier,
        }
    }

    /// Redeem the authorization code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] on network failure or a non-2xx answer.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<ProviderToken, Error> {
        self.token_request(
            "code exchange",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("code_verifier", code_verifier),
            ],
        )
        .await
    }

    /// Renew the Discord token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] on network failure or a non-2xx answer.
    pub async fn refresh(&self, refresh_token: &str) -> Result<ProviderToken, Error> {
        self.token_request(
            "token refresh",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }

    /// # Errors
    ///
    /// Returns [`Error::Provider`] on network failure or a non-2xx answer.
    pub async fn fetch_user(&self, access_token: &str) -> Result<DiscordUser, Error> {
        const OP: &str = "user lookup";
        let response = self
            .http
            .get(self.config.user_url.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_failure(OP, &e))?;

        ensure_success(response, OP)
            .await?
            .json::<DiscordUser>()
            .await
            .map_err(|e| transport_failure(OP, &e))
    }

    /// Finish the redirect callback: redeem the code and look up the user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] if either Discord call fails.
    pub async fn complete_login(&self, code: &str, code_verifier: &str) -> Result<IdentityCallback, Error> {
        let token = self.exchange_code(code, code_verifier).await?;
        self.callback_for(token).await
    }

    /// Renew the Discord token and produce a callback for the session store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] if either Discord call fails.
    pub async fn renew(&self, refresh_token: &str) -> Result<IdentityCallback, Error> {
        let token = self.refresh(refresh_token).await?;
        self.callback_for(token).await
    }

    async fn callback_for(&self, token: ProviderToken) -> Result<IdentityCallback, Error> {
        let user = self.fetch_user(&token.access_token).await?;
        tracing::info!(discord_user = %user.id, "Discord login successful");

        let callback = IdentityCallback::new(IdentityAssertion(token.access_token), user.profile());
        Ok(match token.refresh_token {
            Some(refresh) => callback.with_refresh_token(refresh),
            None => callback,
        })
    }

    async fn token_request(&self, operation: &'static str, grant: &[(&str, &str)]) -> Result<ProviderToken, Error> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        form.extend_from_slice(grant);

        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_failure(operation, &e))?;

        ensure_success(response, operation)
            .await?
            .json::<ProviderToken>()
            .await
            .map_err(|e| transport_failure(operation, &e))
    }
}

/// Checks HTTP response status; returns the response on success or an error with details.
async fn ensure_success(response: reqwest::Response, operation: &'static str) -> Result<reqwest::Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let detail = response.text().await.unwrap_or_default();
    tracing::warn!(operation, status, "Discord rejected request");
    Err(Error::Provider {
        operation,
        status: Some(status),
        detail,
    })
}

fn transport_failure(operation: &'static str, e: &reqwest::Error) -> Error {
    tracing::warn!(operation, error = %e, "Discord request failed");
    Error::Provider {
        operation,
        status: None,
        detail: e.to_string(),
    }
}

/// `N` random bytes, base64url without padding.
fn random_url_token<const N: usize>() -> String {
    let bytes: [u8; N] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 challenge: `BASE64URL(SHA256(verifier))`.
fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
