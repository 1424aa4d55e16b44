//! Runtime configuration.
//!
//! Read from a TOML file in which every key is optional:
//!
//! ```toml
//! data_dir = "data"
//! cookie_file = "data/cookies.txt"
//! playlist_end = 100
//! yt_dlp = "yt-dlp"
//! ffmpeg = "ffmpeg"
//! resolve_timeout = 180
//! idle_timeout = 300
//! ```

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::Result;

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the persisted JSON documents.
    pub data_dir: PathBuf,

    /// Cookies for the resolver, used when the file exists.
    pub cookie_file: PathBuf,

    /// Maximum number of playlist entries to extract.
    pub playlist_end: usize,

    /// Resolver executable.
    pub yt_dlp: PathBuf,

    /// Audio pipe executable.
    pub ffmpeg: PathBuf,

    /// Seconds to wait for a resolution before giving up on it.
    pub resolve_timeout: u64,

    /// Seconds a voice channel may stay empty before the bot leaves.
    pub idle_timeout: u64,

    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        let app_name = env!("CARGO_PKG_NAME");
        let app_version = env!("CARGO_PKG_VERSION");
        let os_name = std::env::consts::OS;

        Self {
            data_dir: PathBuf::from("data"),
            cookie_file: PathBuf::from("data/cookies.txt"),
            playlist_end: 100,
            yt_dlp: PathBuf::from("yt-dlp"),
            ffmpeg: PathBuf::from("ffmpeg"),
            resolve_timeout: 180,
            idle_timeout: 300,
            user_agent: format!("{app_name}/{app_version} (Rust; {os_name})"),
        }
    }
}

impl Config {
    /// Loads the configuration from `path`. A missing file yields the
    /// defaults.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or is not valid TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents)?;
                debug!("loaded configuration from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("{} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    #[must_use]
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout)
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }
}
