use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// Discord guild (server) identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct GuildId(pub u64);

/// Token issued by the identity provider after external login.
///
/// Forwarded to the backend once per exchange and never persisted.
/// `Debug` is redacted so the value does not end up in logs.
#[derive(Clone, PartialEq, Eq, Hash, From, Into)]
pub struct IdentityAssertion(pub String);

impl IdentityAssertion {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for IdentityAssertion {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl std::fmt::Debug for IdentityAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IdentityAssertion(..)")
    }
}

/// A guild the signed-in user may operate on (`GET /available-guilds`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildDto {
    pub id: GuildId,
    pub name: String,
}

/// A sound stored for a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundDto {
    pub name: String,
    /// Built-in sounds ship with the bot and cannot be deleted by users.
    #[serde(rename = "default")]
    pub is_default: bool,
}

/// Backend answer to `POST /login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub token_type: String,
}

/// Display identity of the signed-in user, as reported by the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl UserProfile {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_url: None,
        }
    }

    #[must_use]
    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sound_default_flag_uses_wire_name() {
        let sound: SoundDto = serde_json::from_str(r#"{"name":"bonk","default":true}"#).unwrap();
        assert_eq!(sound.name, "bonk");
        assert!(sound.is_default);

        let json = serde_json::to_string(&sound).unwrap();
        assert!(json.contains("\"default\":true"));
    }

    #[test]
    fn guild_id_is_a_bare_number_on_the_wire() {
        let guild: GuildDto = serde_json::from_str(r#"{"id":42,"name":"Guild"}"#).unwrap();
        assert_eq!(guild.id, GuildId(42));
        assert_eq!(guild.id.to_string(), "42");
    }

    #[test]
    fn token_grant_parses_login_response() {
        let grant: TokenGrant =
            serde_json::from_str(r#"{"access_token":"T1","token_type":"bearer"}"#).unwrap();
        assert_eq!(grant.access_token, "T1");
        assert_eq!(grant.token_type, "bearer");
    }

    #[test]
    fn assertion_debug_is_redacted() {
        let assertion = IdentityAssertion::from("secret-discord-token");
        assert!(!format!("{assertion:?}").contains("secret"));
    }
}
