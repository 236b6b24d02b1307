//! Local model of the guild's sound list.
//!
//! Each operation is name check, then server call, then local update, and
//! takes `&mut self`, so operations on one list never interleave. The list is
//! only touched after the server confirmed; a failed or cancelled call leaves
//! it unchanged. Two clients editing the same guild are not coordinated.

use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, SoundFile, validate_sound_name};
use crate::error::Error;
use crate::transport::Transport;
use crate::types::SoundDto;

#[derive(Debug, Clone, Default)]
pub struct SoundList {
    sounds: Vec<SoundDto>,
}

impl SoundList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sounds(&self) -> &[SoundDto] {
        &self.sounds
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.sounds.iter().any(|s| s.name == name)
    }

    /// Replace the list with the server's.
    ///
    /// # Errors
    ///
    /// Propagates [`ApiClient::list_sounds`] failures; the list is unchanged.
    pub async fn reload<T: Transport>(
        &mut self,
        api: &ApiClient<T>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.sounds = api.list_sounds(cancel).await?;
        Ok(())
    }

    /// Upload a sound and append it.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a bad name or a name already in the
    /// list; otherwise propagates [`ApiClient::create_sound`] failures.
    pub async fn upload<T: Transport>(
        &mut self,
        api: &ApiClient<T>,
        name: &str,
        file: SoundFile,
        cancel: &CancellationToken,
    ) -> Result<SoundDto, Error> {
        validate_sound_name(name)?;
        if self.contains(name) {
            return Err(Error::InvalidArgument(format!("sound '{name}' already exists")));
        }
        let created = api.create_sound(name, file, cancel).await?;
        self.sounds.push(created.clone());
        Ok(created)
    }

    /// Delete a sound on the server, then locally.
    ///
    /// # Errors
    ///
    /// Propagates [`ApiClient::delete_sound`] failures; the list is unchanged.
    pub async fn remove<T: Transport>(
        &mut self,
        api: &ApiClient<T>,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        api.delete_sound(name, cancel).await?;
        self.sounds.retain(|s| s.name != name);
        Ok(())
    }
}
