//! Guild selection persisted in the `guild` cookie.
//!
//! The selection outlives the session: signing out or restarting keeps it.
//! It is never validated against the server here; [`GuildSelector::resolve`]
//! degrades a stale id to [`GuildContext::Unknown`].

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cookie::{Cookie, CookieJar, SameSite};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use time::Duration;

use crate::error::Error;
use crate::types::{GuildDto, GuildId};

pub const GUILD_COOKIE_NAME: &str = "guild";

/// Largest max-age browsers accept (2^31 - 1 seconds); effectively forever.
pub const GUILD_COOKIE_MAX_AGE_SECS: i64 = 2_147_483_647;

/// The operator's chosen guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedGuild {
    pub id: GuildId,
    pub name: Option<String>,
}

impl SelectedGuild {
    #[must_use]
    pub fn new(id: GuildId, name: Option<String>) -> Self {
        Self { id, name }
    }
}

/// Selector state. `Loading` means the cookie has not been read yet, which
/// is not the same as the user never having picked a guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuildSelection {
    Loading,
    Unset,
    Selected(SelectedGuild),
}

impl GuildSelection {
    #[must_use]
    pub fn selected(&self) -> Option<&SelectedGuild> {
        match self {
            Self::Selected(guild) => Some(guild),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

/// A selection checked against the latest available-guild list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuildContext {
    Known { id: GuildId, name: String },
    /// Selected id is not (or no longer) available to the user.
    Unknown(GuildId),
    None,
}

/// Durable cookie store backing the selector.
pub trait CookieStorage: Send + Sync {
    fn get(&self, name: &str) -> Option<Cookie<'static>>;

    /// Persist `cookie`, replacing any cookie of the same name.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the cookie could not be made durable.
    fn set(&self, cookie: Cookie<'static>) -> std::io::Result<()>;
}

/// Process-lifetime cookie jar.
#[derive(Debug, Default)]
pub struct MemoryCookieStorage {
    jar: Mutex<CookieJar>,
}

impl CookieStorage for MemoryCookieStorage {
    fn get(&self, name: &str) -> Option<Cookie<'static>> {
        self.jar.lock().get(name).cloned()
    }

    fn set(&self, cookie: Cookie<'static>) -> std::io::Result<()> {
        self.jar.lock().add(cookie);
        Ok(())
    }
}

/// Cookie jar kept in a file, one `Set-Cookie` line per cookie.
#[derive(Debug)]
pub struct FileCookieStorage {
    path: PathBuf,
    jar: Mutex<CookieJar>,
}

impl FileCookieStorage {
    /// Open (or start) the jar at `path`. Unparseable lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let mut jar = CookieJar::new();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                    match Cookie::parse(line.to_owned()) {
                        Ok(cookie) => jar.add_original(cookie),
                        Err(e) => tracing::warn!(error = %e, path = %path.display(), "Skipping malformed cookie line"),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(Self {
            path,
            jar: Mutex::new(jar),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CookieStorage for FileCookieStorage {
    fn get(&self, name: &str) -> Option<Cookie<'static>> {
        self.jar.lock().get(name).cloned()
    }

    fn set(&self, cookie: Cookie<'static>) -> std::io::Result<()> {
        let mut jar = self.jar.lock();
        jar.add(cookie);

        let tmp = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp)?;
        for cookie in jar.iter() {
            writeln!(file, "{cookie}")?;
        }
        file.sync_all()?;
        std::fs::rename(&tmp, &self.path)
    }
}

/// Build the `guild` cookie: JSON value, percent-encoded, path `/`, no practical expiry.
pub(crate) fn guild_cookie(guild: &SelectedGuild) -> Result<Cookie<'static>, Error> {
    let json = serde_json::to_string(guild).map_err(|e| Error::Decode(e.to_string()))?;
    Ok(Cookie::build((GUILD_COOKIE_NAME, urlencoding::encode(&json).into_owned()))
        .path("/")
        .same_site(SameSite::Lax)
        .max_age(Duration::seconds(GUILD_COOKIE_MAX_AGE_SECS))
        .build())
}

fn parse_guild_cookie(cookie: &Cookie<'_>) -> Option<SelectedGuild> {
    let decoded = urlencoding::decode(cookie.value())
        .inspect_err(|e| tracing::warn!(error = %e, "Guild cookie is not valid UTF-8"))
        .ok()?;
    serde_json::from_str(&decoded)
        .inspect_err(|e| tracing::warn!(error = %e, "Ignoring unreadable guild cookie"))
        .ok()
}

/// Current guild selection, read from and written through a [`CookieStorage`].
pub struct GuildSelector {
    storage: Arc<dyn CookieStorage>,
    selection: RwLock<GuildSelection>,
}

impl GuildSelector {
    /// Starts in [`GuildSelection::Loading`]; call [`hydrate`](Self::hydrate) to read the cookie.
    #[must_use]
    pub fn new(storage: Arc<dyn CookieStorage>) -> Self {
        Self {
            storage,
            selection: RwLock::new(GuildSelection::Loading),
        }
    }

    /// Read the cookie into memory. A missing or unreadable cookie yields `Unset`.
    pub fn hydrate(&self) -> GuildSelection {
        let selection = self
            .storage
            .get(GUILD_COOKIE_NAME)
            .and_then(|cookie| parse_guild_cookie(&cookie))
            .map_or(GuildSelection::Unset, GuildSelection::Selected);

        let mut current = self.selection.write();
        // A `set` that raced ahead of hydration wins.
        if current.is_loading() {
            *current = selection;
        }
        current.clone()
    }

    #[must_use]
    pub fn get(&self) -> GuildSelection {
        self.selection.read().clone()
    }

    /// Select `guild` and write the cookie before returning.
    ///
    /// A storage failure is logged; the in-memory selection still changes.
    pub fn set(&self, guild: SelectedGuild) {
        match guild_cookie(&guild) {
            Ok(cookie) => {
                if let Err(e) = self.storage.set(cookie) {
                    tracing::warn!(error = %e, guild_id = %guild.id, "Failed to persist guild cookie");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode guild cookie"),
        }
        tracing::debug!(guild_id = %guild.id, "Guild selected");
        *self.selection.write() = GuildSelection::Selected(guild);
    }

    /// Select a guild from the list the user was offered, taking its name from the list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `id` is not in `available`.
    pub fn select_from(&self, available: &[GuildDto], id: GuildId) -> Result<SelectedGuild, Error> {
        let guild = available
            .iter()
            .find(|g| g.id == id)
            .ok_or_else(|| Error::InvalidArgument(format!("guild {id} is not available")))?;
        let selected = SelectedGuild::new(guild.id, Some(guild.name.clone()));
        self.set(selected.clone());
        Ok(selected)
    }

    /// Check the selection against `available`. `None` while still loading.
    #[must_use]
    pub fn resolve(&self, available: &[GuildDto]) -> Option<GuildContext> {
        match self.get() {
            GuildSelection::Loading => None,
            GuildSelection::Unset => Some(GuildContext::None),
            GuildSelection::Selected(selected) => Some(
                available
                    .iter()
                    .find(|g| g.id == selected.id)
                    .map_or(GuildContext::Unknown(selected.id), |g| GuildContext::Known {
                        id: g.id,
                        name: g.name.clone(),
                    }),
            ),
        }
    }
}
