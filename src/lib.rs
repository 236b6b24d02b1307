#![doc = include_str!("../README.md")]

pub mod api;
pub mod config;
pub mod error;
pub mod exchange;
pub mod guild;
pub mod interceptor;
#[cfg(feature = "provider")]
pub mod provider;
pub mod request;
pub mod session;
pub mod sounds;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-exports for convenient access
pub use api::{ApiClient, MAX_SOUND_NAME_CHARS, SoundFile, validate_sound_name};
pub use config::PanelConfig;
pub use error::{CancelReason, Classified, Error};
pub use exchange::TokenExchanger;
pub use guild::{
    CookieStorage, FileCookieStorage, GuildContext, GuildSelection, GuildSelector,
    MemoryCookieStorage, SelectedGuild,
};
pub use interceptor::{Interceptor, Notification, NotificationKind, Notifier, TracingNotifier};
#[cfg(feature = "provider")]
pub use provider::{AuthorizationRequest, DiscordClient, DiscordConfig, DiscordUser, ProviderToken};
pub use request::{FinalizedRequest, FormPart, RequestBody, RequestDescriptor, RequestFactory};
pub use session::{ApplicationSession, IdentityCallback, SessionPhase, SessionStore};
pub use sounds::SoundList;
pub use transport::{
    AlwaysOnline, Connectivity, ConnectivityFlag, RawResponse, ReqwestTransport, Transport,
    TransportError,
};
pub use tokio_util::sync::CancellationToken;
pub use types::{GuildDto, GuildId, IdentityAssertion, SoundDto, TokenGrant, UserProfile};
