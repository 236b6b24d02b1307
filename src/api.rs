use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::PanelConfig;
use crate::error::Error;
use crate::exchange::TokenExchanger;
use crate::guild::{CookieStorage, GuildSelector};
use crate::interceptor::{Interceptor, Notifier, TracingNotifier};
use crate::request::{FormPart, RequestDescriptor, RequestFactory};
use crate::session::SessionStore;
use crate::transport::{AlwaysOnline, Connectivity, RawResponse, ReqwestTransport, Transport};
use crate::types::{GuildDto, SoundDto};

/// Sound names must be 1 to 29 characters long.
pub const MAX_SOUND_NAME_CHARS: usize = 29;

/// Audio file picked for upload.
#[derive(Debug, Clone)]
pub struct SoundFile {
    pub file_name: String,
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl SoundFile {
    #[must_use]
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: None,
            bytes,
        }
    }

    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

/// Check a sound name before anything is sent.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if the name is empty or too long.
pub fn validate_sound_name(name: &str) -> Result<(), Error> {
    let len = name.chars().count();
    if len == 0 {
        return Err(Error::InvalidArgument("sound name must not be empty".into()));
    }
    if len > MAX_SOUND_NAME_CHARS {
        return Err(Error::InvalidArgument(format!(
            "sound name must be at most {MAX_SOUND_NAME_CHARS} characters"
        )));
    }
    Ok(())
}

/// Typed client for the MundoBot backend.
///
/// Owns the session store and guild selector; every call goes through the
/// request factory and the interceptor.
pub struct ApiClient<T: Transport = ReqwestTransport> {
    transport: Arc<T>,
    session: Arc<SessionStore<T>>,
    guild: Arc<GuildSelector>,
    factory: RequestFactory<T>,
    interceptor: Interceptor,
}

impl ApiClient<ReqwestTransport> {
    /// Build a client from configuration and read the persisted guild selection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the cookie file or HTTP client cannot be set up.
    pub fn from_config(config: &PanelConfig) -> Result<Self, Error> {
        let client = Self::new(
            config.api_url().clone(),
            Arc::new(config.transport()?),
            config.cookie_storage()?,
        );
        client.guild.hydrate();
        Ok(client)
    }
}

impl<T: Transport> ApiClient<T> {
    /// The guild selector starts in `Loading`; call `guild().hydrate()` once
    /// the caller is ready to read the cookie.
    #[must_use]
    pub fn new(base_url: Url, transport: Arc<T>, cookies: Arc<dyn CookieStorage>) -> Self {
        let session = Arc::new(SessionStore::new(TokenExchanger::new(
            base_url.clone(),
            transport.clone(),
        )));
        let guild = Arc::new(GuildSelector::new(cookies));
        let factory = RequestFactory::new(base_url, session.clone(), guild.clone());

        Self {
            transport,
            session,
            guild,
            factory,
            interceptor: Interceptor::new(Arc::new(AlwaysOnline), Arc::new(TracingNotifier)),
        }
    }

    #[must_use]
    pub fn with_interceptor(
        mut self,
        connectivity: Arc<dyn Connectivity>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        self.interceptor = Interceptor::new(connectivity, notifier);
        self
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionStore<T>> {
        &self.session
    }

    #[must_use]
    pub fn guild(&self) -> &Arc<GuildSelector> {
        &self.guild
    }

    #[must_use]
    pub fn factory(&self) -> &RequestFactory<T> {
        &self.factory
    }

    /// Build and send an arbitrary request through the pipeline.
    ///
    /// # Errors
    ///
    /// Local precondition failures from [`RequestFactory::build`], or the
    /// classified failure from [`Interceptor::dispatch`].
    pub async fn execute(
        &self,
        descriptor: RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, Error> {
        let request = self.factory.build(descriptor)?;
        self.interceptor
            .dispatch(self.transport.as_ref(), request, cancel)
            .await
    }

    /// `GET /available-guilds`
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute); [`Error::Decode`] on a malformed body.
    pub async fn available_guilds(&self, cancel: &CancellationToken) -> Result<Vec<GuildDto>, Error> {
        self.execute(RequestDescriptor::get(["available-guilds"]), cancel)
            .await?
            .json()
    }

    /// `GET /sounds/list` for the selected guild.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute); [`Error::Decode`] on a malformed body.
    pub async fn list_sounds(&self, cancel: &CancellationToken) -> Result<Vec<SoundDto>, Error> {
        self.execute(RequestDescriptor::get(["sounds", "list"]).guild_scoped(), cancel)
            .await?
            .json()
    }

    /// `POST /sounds/create` with the name as query parameter and the audio as
    /// multipart `file`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a bad name or an empty file (nothing is
    /// sent); otherwise see [`execute`](Self::execute).
    pub async fn create_sound(
        &self,
        name: &str,
        file: SoundFile,
        cancel: &CancellationToken,
    ) -> Result<SoundDto, Error> {
        validate_sound_name(name)?;
        if file.bytes.is_empty() {
            return Err(Error::InvalidArgument("sound file is empty".into()));
        }

        let descriptor = RequestDescriptor::post(["sounds", "create"])
            .guild_scoped()
            .query("name", name)
            .multipart(vec![FormPart::File {
                name: "file".into(),
                file_name: file.file_name,
                mime: file.mime,
                bytes: file.bytes,
            }]);

        let sound: SoundDto = self.execute(descriptor, cancel).await?.json()?;
        tracing::info!(sound = %sound.name, "Sound uploaded");
        Ok(sound)
    }

    /// `GET /sounds/{name}`: the raw audio payload.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an empty name; otherwise see [`execute`](Self::execute).
    pub async fn get_sound(&self, name: &str, cancel: &CancellationToken) -> Result<Vec<u8>, Error> {
        require_name(name)?;
        let response = self
            .execute(RequestDescriptor::get(["sounds", name]).guild_scoped(), cancel)
            .await?;
        Ok(response.body)
    }

    /// `DELETE /sounds/{name}`
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an empty name; otherwise see [`execute`](Self::execute).
    pub async fn delete_sound(&self, name: &str, cancel: &CancellationToken) -> Result<(), Error> {
        require_name(name)?;
        self.execute(RequestDescriptor::delete(["sounds", name]).guild_scoped(), cancel)
            .await?;
        tracing::info!(sound = %name, "Sound deleted");
        Ok(())
    }
}

fn require_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("sound name must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Classified;
    use crate::guild::{MemoryCookieStorage, SelectedGuild};
    use crate::interceptor::NotificationKind;
    use crate::request::{GUILD_HEADER, RequestBody};
    use crate::test_support::{BASE_URL, RecordingNotifier, ScriptedTransport, token_response};
    use crate::transport::ConnectivityFlag;
    use crate::types::{GuildId, UserProfile};
    use reqwest::{Method, StatusCode};

    struct Harness {
        api: ApiClient<ScriptedTransport>,
        transport: Arc<ScriptedTransport>,
        notifier: Arc<RecordingNotifier>,
        connectivity: Arc<ConnectivityFlag>,
    }

    async fn signed_in() -> Harness {
        let transport = Arc::new(ScriptedTransport::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let connectivity = Arc::new(ConnectivityFlag::default());
        let api = ApiClient::new(
            BASE_URL.parse().unwrap(),
            transport.clone(),
            Arc::new(MemoryCookieStorage::default()),
        )
        .with_interceptor(connectivity.clone(), notifier.clone());
        api.guild().hydrate();

        transport.push_response(token_response("T1"));
        api.session()
            .establish("abc".into(), UserProfile::new("mundo"))
            .await
            .unwrap();
        transport.take_sent();

        Harness {
            api,
            transport,
            notifier,
            connectivity,
        }
    }

    #[tokio::test]
    async fn list_sounds_carries_token_and_selected_guild() {
        let h = signed_in().await;
        h.api
            .guild()
            .set(SelectedGuild::new(GuildId(42), Some("Guild".into())));
        h.transport.push_response(RawResponse::new(
            StatusCode::OK,
            r#"[{"name":"bonk","default":true},{"name":"horn","default":false}]"#,
        ));

        let sounds = h.api.list_sounds(&CancellationToken::new()).await.unwrap();

        assert_eq!(sounds.len(), 2);
        let sent = h.transport.take_sent();
        assert_eq!(sent[0].url.path(), "/sounds/list");
        assert_eq!(sent[0].header(GUILD_HEADER), Some("42"));
        assert_eq!(sent[0].header("authorization"), Some("Bearer T1"));
    }

    #[tokio::test]
    async fn unauthorized_list_notifies_once_and_rejects() {
        let h = signed_in().await;
        h.transport
            .push_response(RawResponse::new(StatusCode::UNAUTHORIZED, "expired"));

        let err = h.api.list_sounds(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.classify(), Some(Classified::HttpError(401)));
        let notes = h.notifier.take();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::Http(401));
    }

    #[tokio::test]
    async fn create_sound_sends_name_in_query_and_file_as_multipart() {
        let h = signed_in().await;
        h.transport.push_response(RawResponse::new(
            StatusCode::OK,
            r#"{"name":"horn","default":false}"#,
        ));

        let sound = h
            .api
            .create_sound(
                "horn",
                SoundFile::new("horn.mp3", vec![1, 2, 3]).with_mime("audio/mpeg"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(sound.name, "horn");
        let sent = h.transport.take_sent();
        assert_eq!(sent[0].method, Method::POST);
        assert_eq!(sent[0].url.as_str(), "http://api.test/sounds/create?name=horn");
        match &sent[0].body {
            RequestBody::Multipart(parts) => {
                assert!(matches!(
                    &parts[0],
                    FormPart::File { name, file_name, bytes, .. }
                        if name == "file" && file_name == "horn.mp3" && bytes == &[1, 2, 3]
                ));
            }
            other => panic!("expected multipart body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_names_never_reach_the_network() {
        let h = signed_in().await;
        let cancel = CancellationToken::new();

        let empty = h
            .api
            .create_sound("", SoundFile::new("a.mp3", vec![1]), &cancel)
            .await
            .unwrap_err();
        let long = h
            .api
            .create_sound(&"x".repeat(30), SoundFile::new("a.mp3", vec![1]), &cancel)
            .await
            .unwrap_err();
        let no_file = h
            .api
            .create_sound("ok", SoundFile::new("a.mp3", Vec::new()), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(empty, Error::InvalidArgument(_)));
        assert!(matches!(long, Error::InvalidArgument(_)));
        assert!(matches!(no_file, Error::InvalidArgument(_)));
        assert!(h.transport.sent().is_empty());
        assert!(h.notifier.take().is_empty());
    }

    #[tokio::test]
    async fn sound_names_are_path_encoded() {
        let h = signed_in().await;
        h.transport
            .push_response(RawResponse::new(StatusCode::OK, vec![0xFF, 0xFB]));
        h.transport.push_response(RawResponse::new(StatusCode::OK, "true"));
        let cancel = CancellationToken::new();

        let audio = h.api.get_sound("air horn", &cancel).await.unwrap();
        h.api.delete_sound("air horn", &cancel).await.unwrap();

        assert_eq!(audio, vec![0xFF, 0xFB]);
        let sent = h.transport.take_sent();
        assert_eq!(sent[0].url.path(), "/sounds/air%20horn");
        assert_eq!(sent[1].method, Method::DELETE);
    }

    #[tokio::test]
    async fn offline_client_sends_nothing() {
        let h = signed_in().await;
        h.connectivity.set_online(false);

        let err = h
            .api
            .available_guilds(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.notifier.take().len(), 1);
    }

    #[tokio::test]
    async fn signed_out_client_fails_locally() {
        let h = signed_in().await;
        h.api.session().sign_out();

        let err = h
            .api
            .available_guilds(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MissingToken));
        assert!(h.transport.sent().is_empty());
        assert!(h.notifier.take().is_empty());
    }

    #[test]
    fn name_length_limits() {
        assert!(validate_sound_name("a").is_ok());
        assert!(validate_sound_name(&"é".repeat(MAX_SOUND_NAME_CHARS)).is_ok());
        assert!(validate_sound_name(&"a".repeat(MAX_SOUND_NAME_CHARS + 1)).is_err());
        assert!(validate_sound_name("").is_err());
    }
}
