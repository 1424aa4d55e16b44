//! Persistence of JSON documents in the data directory.
//!
//! Each document is rewritten in full on every save; the last write wins.
//! Persistence is never fatal: a document that cannot be loaded starts out
//! empty, and save failures are reported to the caller to log.

use std::{
    io,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Saved aliases per guild.
    pub const SAVED_URLS: &'static str = "saved_urls.json";

    /// Resolved objects by canonical URL.
    pub const AUDIO_CACHE: &'static str = "audio_cache.json";

    /// Designated channel per guild.
    pub const DJ_CHANNELS: &'static str = "dj_channels.json";

    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, document: &str) -> PathBuf {
        self.dir.join(document)
    }

    /// Loads `document`, or its default when it is missing or unreadable.
    pub async fn load<T>(&self, document: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        let path = self.path(document);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} does not exist yet", path.display());
                return T::default();
            }
            Err(e) => {
                warn!("could not read {}: {e}", path.display());
                return T::default();
            }
        };

        match serde_json::from_slice(&contents) {
            Ok(value) => {
                trace!("loaded {}", path.display());
                value
            }
            Err(e) => {
                warn!("could not parse {}: {e}", path.display());
                T::default()
            }
        }
    }

    /// Rewrites `document` with `value`, creating the data directory first.
    ///
    /// # Errors
    ///
    /// Fails when the directory or file cannot be written.
    pub async fn save<T>(&self, document: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let contents = serde_json::to_vec_pretty(value)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path(document);
        tokio::fs::write(&path, contents).await?;
        trace!("saved {}", path.display());
        Ok(())
    }
}
