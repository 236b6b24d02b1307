//! Authenticated request construction.
//!
//! [`RequestFactory::build`] is the single place where the bearer token and the
//! guild header are attached. Both are read when the request is built, never
//! when the factory is created, so a factory shared by the whole UI keeps up
//! with token refreshes and guild changes.

use std::sync::Arc;

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::Error;
use crate::guild::{GuildSelection, GuildSelector};
use crate::session::SessionStore;
use crate::transport::Transport;

/// Header carrying the selected guild id on guild-scoped operations.
pub const GUILD_HEADER: &str = "guild-id";

/// Request payload.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<FormPart>),
}

/// One field of a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: Option<String>,
        bytes: Vec<u8>,
    },
}

/// What the caller wants to send, before auth and guild headers are merged in.
///
/// Every operation requires auth unless [`public`](Self::public) is called.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: RequestBody,
    requires_auth: bool,
    guild_scoped: bool,
    allow_auth_override: bool,
}

impl RequestDescriptor {
    /// `segments` are unencoded path segments relative to the base URL.
    pub fn new<I, S>(method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            requires_auth: true,
            guild_scoped: false,
            allow_auth_override: false,
        }
    }

    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::GET, segments)
    }

    pub fn post<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::POST, segments)
    }

    pub fn delete<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::DELETE, segments)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Caller-supplied header. Takes precedence over defaults and computed
    /// headers, except `Authorization` (see [`allow_auth_override`](Self::allow_auth_override)).
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    #[must_use]
    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    /// The operation may be sent without a session.
    #[must_use]
    pub fn public(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    /// The operation applies to the selected guild and carries [`GUILD_HEADER`].
    #[must_use]
    pub fn guild_scoped(mut self) -> Self {
        self.guild_scoped = true;
        self
    }

    /// Let a caller-supplied `Authorization` header win over the session token.
    /// Meant for tests and mocks.
    #[must_use]
    pub fn allow_auth_override(mut self) -> Self {
        self.allow_auth_override = true;
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }
}

/// A request ready for the transport.
#[derive(Debug, Clone)]
pub struct FinalizedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl FinalizedRequest {
    /// Header value as text, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Join unencoded path segments and query pairs onto `base`.
pub(crate) fn endpoint_url(
    base: &Url,
    segments: &[String],
    query: &[(String, String)],
) -> Result<Url, Error> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| Error::Config(format!("base URL cannot carry a path: {base}")))?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

/// Builds [`FinalizedRequest`]s from descriptors.
///
/// Header precedence, lowest to highest: transport defaults, computed
/// `Authorization`/guild headers, caller headers.
pub struct RequestFactory<T: Transport> {
    base_url: Url,
    default_headers: HeaderMap,
    session: Arc<SessionStore<T>>,
    guild: Arc<GuildSelector>,
}

// Manual Clone: avoid derive adding a `T: Clone` bound.
impl<T: Transport> Clone for RequestFactory<T> {
    fn clone(&self) -> Self {
        Self {
            base_url: self.base_url.clone(),
            default_headers: self.default_headers.clone(),
            session: self.session.clone(),
            guild: self.guild.clone(),
        }
    }
}

impl<T: Transport> RequestFactory<T> {
    #[must_use]
    pub fn new(base_url: Url, session: Arc<SessionStore<T>>, guild: Arc<GuildSelector>) -> Self {
        Self {
            base_url,
            default_headers: HeaderMap::new(),
            session,
            guild,
        }
    }

    #[must_use]
    pub fn with_default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Finalize a descriptor against the current session and guild selection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingToken`] if the operation requires auth and no
    /// session exists, or [`Error::Config`] if the base URL cannot take a path.
    pub fn build(&self, descriptor: RequestDescriptor) -> Result<FinalizedRequest, Error> {
        let RequestDescriptor {
            method,
            segments,
            query,
            headers: caller_headers,
            body,
            requires_auth,
            guild_scoped,
            allow_auth_override,
        } = descriptor;

        let url = endpoint_url(&self.base_url, &segments, &query)?;
        let mut headers = self.default_headers.clone();

        if requires_auth {
            match self.session.current() {
                Some(session) => {
                    headers.insert(AUTHORIZATION, bearer(&session.access_token)?);
                }
                None if allow_auth_override && caller_headers.contains_key(AUTHORIZATION) => {}
                None => return Err(Error::MissingToken),
            }
        }

        match self.guild.get() {
            GuildSelection::Selected(guild) if guild_scoped => {
                headers.insert(
                    HeaderName::from_static(GUILD_HEADER),
                    HeaderValue::from(guild.id.0),
                );
            }
            _ => {
                headers.remove(GUILD_HEADER);
            }
        }

        for name in caller_headers.keys() {
            if name == AUTHORIZATION && !allow_auth_override {
                tracing::debug!(path = %url.path(), "Ignoring caller-supplied Authorization header");
                continue;
            }
            headers.remove(name);
        }
        for (name, value) in &caller_headers {
            if name == AUTHORIZATION && !allow_auth_override {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        Ok(FinalizedRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

fn bearer(token: &str) -> Result<HeaderValue, Error> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| Error::InvalidArgument("access token is not a valid header value".into()))?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guild::{MemoryCookieStorage, SelectedGuild};
    use crate::test_support::{ScriptedTransport, signed_in_session, token_response};
    use crate::types::{GuildId, UserProfile};

    fn factory(
        session: Arc<SessionStore<ScriptedTransport>>,
        guild: Arc<GuildSelector>,
    ) -> RequestFactory<ScriptedTransport> {
        RequestFactory::new("http://api.test/".parse().unwrap(), session, guild)
    }

    fn hydrated_selector() -> Arc<GuildSelector> {
        let selector = GuildSelector::new(Arc::new(MemoryCookieStorage::default()));
        selector.hydrate();
        Arc::new(selector)
    }

    #[tokio::test]
    async fn selected_guild_is_sent_on_guild_scoped_requests() {
        let (session, _) = signed_in_session("T1").await;
        let guild = hydrated_selector();
        guild.set(SelectedGuild::new(GuildId(42), Some("Guild".into())));

        let request = factory(session, guild)
            .build(RequestDescriptor::get(["sounds", "list"]).guild_scoped())
            .unwrap();

        assert_eq!(request.header(GUILD_HEADER), Some("42"));
        assert_eq!(request.header("authorization"), Some("Bearer T1"));
        assert_eq!(request.url.as_str(), "http://api.test/sounds/list");
    }

    #[tokio::test]
    async fn guild_header_is_absent_without_selection() {
        let (session, _) = signed_in_session("T1").await;
        let mut defaults = HeaderMap::new();
        defaults.insert(GUILD_HEADER, HeaderValue::from_static(""));

        let request = factory(session, hydrated_selector())
            .with_default_headers(defaults)
            .build(RequestDescriptor::get(["sounds", "list"]).guild_scoped())
            .unwrap();

        assert!(!request.headers.contains_key(GUILD_HEADER));
    }

    #[tokio::test]
    async fn guild_header_is_not_sent_on_unscoped_requests() {
        let (session, _) = signed_in_session("T1").await;
        let guild = hydrated_selector();
        guild.set(SelectedGuild::new(GuildId(7), None));

        let request = factory(session, guild)
            .build(RequestDescriptor::get(["available-guilds"]))
            .unwrap();

        assert!(!request.headers.contains_key(GUILD_HEADER));
    }

    #[tokio::test]
    async fn factory_reads_the_token_at_build_time() {
        let (session, transport) = signed_in_session("T1").await;
        let factory = factory(session.clone(), hydrated_selector());

        let before = factory.build(RequestDescriptor::get(["available-guilds"])).unwrap();
        assert_eq!(before.header("authorization"), Some("Bearer T1"));

        transport.push_response(token_response("T2"));
        session
            .establish("renewed".into(), UserProfile::new("mundo"))
            .await
            .unwrap();

        let after = factory.build(RequestDescriptor::get(["available-guilds"])).unwrap();
        assert_eq!(after.header("authorization"), Some("Bearer T2"));
    }

    #[tokio::test]
    async fn missing_session_fails_before_the_network() {
        let session = Arc::new(SessionStore::new(crate::exchange::TokenExchanger::new(
            "http://api.test/".parse().unwrap(),
            Arc::new(ScriptedTransport::default()),
        )));
        let factory = factory(session, hydrated_selector());

        let err = factory
            .build(RequestDescriptor::get(["available-guilds"]))
            .unwrap_err();
        assert!(matches!(err, Error::MissingToken));

        let public = factory
            .build(RequestDescriptor::post(["login"]).public())
            .unwrap();
        assert!(!public.headers.contains_key(AUTHORIZATION));
    }

    #[tokio::test]
    async fn caller_headers_win_except_authorization() {
        let (session, _) = signed_in_session("T1").await;
        let mut defaults = HeaderMap::new();
        defaults.insert("x-client", HeaderValue::from_static("default"));
        let factory = factory(session, hydrated_selector()).with_default_headers(defaults);

        let request = factory
            .build(
                RequestDescriptor::get(["sounds", "list"])
                    .header(HeaderName::from_static("x-client"), HeaderValue::from_static("caller"))
                    .header(AUTHORIZATION, HeaderValue::from_static("Bearer forged")),
            )
            .unwrap();
        assert_eq!(request.header("x-client"), Some("caller"));
        assert_eq!(request.header("authorization"), Some("Bearer T1"));

        let mocked = factory
            .build(
                RequestDescriptor::get(["sounds", "list"])
                    .header(AUTHORIZATION, HeaderValue::from_static("Bearer mock"))
                    .allow_auth_override(),
            )
            .unwrap();
        assert_eq!(mocked.header("authorization"), Some("Bearer mock"));
    }

    #[test]
    fn endpoint_url_encodes_segments_and_keeps_base_path() {
        let base: Url = "http://api.test/v1/".parse().unwrap();
        let url = endpoint_url(
            &base,
            &["sounds".into(), "air horn".into()],
            &[("name".into(), "a&b".into())],
        )
        .unwrap();
        assert_eq!(url.as_str(), "http://api.test/v1/sounds/air%20horn?name=a%26b");
    }
}
