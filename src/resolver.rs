//! Resolution of web URLs into playable objects.
//!
//! The [`Resolver`] trait is the contract with the external extractor: given
//! a URL it returns raw [`Info`], either a single item with a stream source or
//! a (possibly nested) playlist of items. [`YtDlp`] implements it on top of
//! the `yt-dlp` executable.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::{
    config::Config,
    error::{Error, Result},
    links,
    model::{PlayObject, Playlist, Track},
};

/// Raw extractor output.
///
/// Only the fields the player uses are kept. Playlist entries can be `null`
/// when the extractor skipped an item it failed to process.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Info {
    #[serde(rename = "_type")]
    pub kind: Option<String>,
    pub id: Option<String>,
    pub original_url: Option<String>,
    pub webpage_url: Option<String>,
    pub title: Option<String>,
    /// For single items, the stream source.
    pub url: Option<String>,
    pub entries: Option<Vec<Option<Info>>>,
}

impl Info {
    #[must_use]
    pub fn is_playlist(&self) -> bool {
        self.kind.as_deref() == Some("playlist")
    }

    /// The page URL of this item, as opposed to its stream source.
    #[must_use]
    pub fn page_url(&self) -> Option<&str> {
        self.original_url
            .as_deref()
            .or(self.webpage_url.as_deref())
    }

    /// Converts extractor output into a [`PlayObject`]. `requested` stands in
    /// for a missing page URL of the root object.
    ///
    /// Nested playlists are flattened by descending into the first entry for
    /// as long as it is itself a playlist.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when a playlist has no usable entries.
    pub fn into_play_object(self, requested: &str) -> Result<PlayObject> {
        let url = self.page_url().unwrap_or(requested).to_owned();

        if !self.is_playlist() {
            let title = self.title.unwrap_or_else(|| url.clone());
            return Ok(PlayObject::Track(Track::new(url, title).with_stream(self.url)));
        }

        let title = self.title.unwrap_or_else(|| url.clone());
        let mut entries = self.entries.unwrap_or_default();
        while let Some(Some(Info {
            entries: Some(nested),
            ..
        })) = entries.first()
        {
            entries = nested.clone();
        }

        let tracks: Vec<_> = entries
            .into_iter()
            .flatten()
            .filter_map(|entry| {
                let Some(page_url) = entry.page_url().map(str::to_owned) else {
                    debug!("skipping playlist entry without a page url in {url}");
                    return None;
                };
                let title = entry.title.unwrap_or_else(|| page_url.clone());
                Some(Track::new(page_url, title).with_stream(entry.url))
            })
            .collect();

        if tracks.is_empty() {
            return Err(Error::not_found(format!("nothing to play at {url}")));
        }

        Ok(PlayObject::Playlist(Playlist {
            url,
            title,
            entries: tracks,
        }))
    }
}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Extracts metadata and stream sources for `url`. Slow: expect seconds.
    async fn extract(&self, url: &str) -> Result<Info>;

    /// Searches for `query` and returns the URL of the first hit.
    async fn search(&self, query: &str) -> Result<Option<String>>;

    /// Drops any on-disk cache the extractor keeps of its own.
    async fn purge_cache(&self) -> Result<()> {
        Ok(())
    }
}

/// Options passed to the extractor for every request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolverOptions {
    pub format: String,
    /// Upper bound on the number of playlist entries to extract.
    pub playlist_end: usize,
    pub cookie_file: Option<PathBuf>,
    /// Keep going when single playlist entries fail.
    pub ignore_errors: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            format: "bestaudio/best".to_owned(),
            playlist_end: 100,
            cookie_file: None,
            ignore_errors: true,
        }
    }
}

/// A [`Resolver`] running the `yt-dlp` executable.
#[derive(Clone, Debug)]
pub struct YtDlp {
    program: PathBuf,
    options: ResolverOptions,
}

impl YtDlp {
    const SEARCH_PREFIX: &'static str = "ytsearch1:";

    #[must_use]
    pub fn new(program: impl Into<PathBuf>, options: ResolverOptions) -> Self {
        Self {
            program: program.into(),
            options,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        // The cookie file is optional; only pass it when it exists.
        let cookie_file = Some(config.cookie_file.clone()).filter(|path| path.is_file());
        if cookie_file.is_none() {
            debug!("no cookie file at {}", config.cookie_file.display());
        }

        Self::new(
            &config.yt_dlp,
            ResolverOptions {
                playlist_end: config.playlist_end,
                cookie_file,
                ..ResolverOptions::default()
            },
        )
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .args(["--dump-single-json", "--no-warnings"]);
        command
    }

    fn extract_args(&self) -> Vec<String> {
        let mut args = vec![
            "--format".to_owned(),
            self.options.format.clone(),
            "--playlist-end".to_owned(),
            self.options.playlist_end.to_string(),
        ];

        if let Some(cookie_file) = &self.options.cookie_file {
            args.push("--cookies".to_owned());
            args.push(cookie_file.display().to_string());
        }

        if self.options.ignore_errors {
            args.push("--ignore-errors".to_owned());
        }

        args
    }

    async fn run(&self, mut command: Command, target: &str) -> Result<Info> {
        let output = command.output().await?;

        // With `--ignore-errors` the exit status is non-zero as soon as a
        // single entry failed, while the document is still complete.
        if output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::not_found(format!(
                "{} failed for {target} ({}): {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        if !output.status.success() {
            debug!(
                "{} exited with {} for {target}, using partial output",
                self.program.display(),
                output.status
            );
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            Error::data_loss(format!("invalid extractor output for {target}: {e}"))
        })
    }
}

#[async_trait]
impl Resolver for YtDlp {
    async fn extract(&self, url: &str) -> Result<Info> {
        trace!("extracting {url}");
        let mut command = self.command();
        command.args(self.extract_args()).arg("--").arg(url);
        self.run(command, url).await
    }

    async fn search(&self, query: &str) -> Result<Option<String>> {
        trace!("searching for \"{query}\"");
        let mut command = self.command();
        command
            .arg("--flat-playlist")
            .arg("--")
            .arg(format!("{}{query}", Self::SEARCH_PREFIX));
        let info = self.run(command, query).await?;

        let hit = info
            .entries
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .find_map(|entry| entry.id)
            .map(|id| links::video_url(&id));
        Ok(hit)
    }

    async fn purge_cache(&self) -> Result<()> {
        let status = Command::new(&self.program)
            .arg("--rm-cache-dir")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::unknown(format!(
                "{} --rm-cache-dir exited with {status}",
                self.program.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn item(url: &str, title: &str, stream: &str) -> Info {
        Info {
            original_url: Some(url.to_owned()),
            title: Some(title.to_owned()),
            url: Some(stream.to_owned()),
            ..Info::default()
        }
    }

    fn playlist(url: &str, entries: Vec<Option<Info>>) -> Info {
        Info {
            kind: Some("playlist".to_owned()),
            original_url: Some(url.to_owned()),
            title: Some("mix".to_owned()),
            entries: Some(entries),
            ..Info::default()
        }
    }

    #[test]
    fn single_items_become_tracks_with_stream() {
        let object = item("https://youtu.be/abc", "song", "https://cdn/abc")
            .into_play_object("https://youtu.be/abc")
            .unwrap();

        let PlayObject::Track(track) = object else {
            panic!("expected a track");
        };
        assert_eq!(track.title(), "song");
        assert_eq!(track.stream(), Some("https://cdn/abc"));
    }

    #[test]
    fn nested_playlists_are_flattened() {
        let inner = playlist(
            "https://example.com/inner",
            vec![
                Some(item("https://example.com/1", "one", "s1")),
                None,
                Some(item("https://example.com/2", "two", "s2")),
            ],
        );
        let root = playlist("https://example.com/channel", vec![Some(inner)]);

        let object = root.into_play_object("https://example.com/channel").unwrap();
        assert!(object.is_playlist());
        assert_eq!(object.url(), "https://example.com/channel");

        let titles: Vec<_> = object
            .into_tracks()
            .iter()
            .map(|track| track.title().to_owned())
            .collect();
        assert_eq!(titles, ["one", "two"]);
    }

    #[test]
    fn empty_playlists_fail() {
        let err = playlist("https://example.com/empty", vec![None])
            .into_play_object("https://example.com/empty")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn parses_extractor_json() {
        let json = r#"{
            "_type": "playlist",
            "title": "list",
            "webpage_url": "https://www.youtube.com/playlist?list=PL1",
            "entries": [
                {"original_url": "https://youtu.be/a", "title": "a", "url": "https://cdn/a"},
                null
            ]
        }"#;

        let info: Info = serde_json::from_str(json).unwrap();
        assert!(info.is_playlist());
        assert_eq!(info.page_url(), Some("https://www.youtube.com/playlist?list=PL1"));
        assert_eq!(info.entries.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn extract_arguments_include_options() {
        let resolver = YtDlp::new(
            "yt-dlp",
            ResolverOptions {
                playlist_end: 25,
                cookie_file: Some(PathBuf::from("data/cookies.txt")),
                ..ResolverOptions::default()
            },
        );

        let args = resolver.extract_args();
        assert_eq!(
            args,
            [
                "--format",
                "bestaudio/best",
                "--playlist-end",
                "25",
                "--cookies",
                "data/cookies.txt",
                "--ignore-errors"
            ]
        );
    }
}
