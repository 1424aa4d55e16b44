//! Playable objects: tracks, uploaded files and playlists.
//!
//! A [`Track`] is identified by its source URL and title. Its stream source is
//! a directly streamable, possibly short-lived URL that is filled in lazily
//! and never persisted. Uploaded files are tracks of kind
//! [`TrackKind::Attachment`]: their source URL is already streamable.

use std::fmt;

/// Where a track comes from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// A web page the resolver turns into a stream source.
    #[default]
    Remote,

    /// A file attached to a chat message. Never cached.
    Attachment,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Track {
    url: String,
    title: String,
    stream: Option<String>,
    kind: TrackKind,
}

impl Track {
    #[must_use]
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            stream: None,
            kind: TrackKind::Remote,
        }
    }

    /// Creates a track from an uploaded file. The file URL doubles as the
    /// stream source.
    #[must_use]
    pub fn attachment(url: impl Into<String>, filename: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            stream: Some(url.clone()),
            url,
            title: filename.into(),
            kind: TrackKind::Attachment,
        }
    }

    #[must_use]
    pub fn with_stream(mut self, stream: Option<String>) -> Self {
        if self.kind == TrackKind::Remote {
            self.stream = stream;
        }
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The last known stream source, if any.
    #[must_use]
    pub fn stream(&self) -> Option<&str> {
        self.stream.as_deref()
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.kind == TrackKind::Attachment
    }

    /// Replaces the stream source of a remote track. Attachments keep their
    /// source URL.
    pub fn set_stream(&mut self, stream: impl Into<String>) {
        if self.kind == TrackKind::Remote {
            self.stream = Some(stream.into());
        }
    }

    /// Returns a copy without the stream source, as stored in the cache.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self {
            stream: None,
            ..self.clone()
        }
    }

    /// Markdown for chat messages: a link for remote tracks, the bare title
    /// for attachments.
    #[must_use]
    pub fn link(&self) -> String {
        match self.kind {
            TrackKind::Remote => format!("[{}]({})", self.title, self.url),
            TrackKind::Attachment => self.title.clone(),
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\" <{}>", self.title, self.url)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Playlist {
    pub url: String,
    pub title: String,
    pub entries: Vec<Track>,
}

impl Playlist {
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self {
            url: self.url.clone(),
            title: self.title.clone(),
            entries: self.entries.iter().map(Track::snapshot).collect(),
        }
    }
}

/// The result of resolving a URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PlayObject {
    Track(Track),
    Playlist(Playlist),
}

impl PlayObject {
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Track(track) => track.url(),
            Self::Playlist(playlist) => &playlist.url,
        }
    }

    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Track(track) => track.title(),
            Self::Playlist(playlist) => &playlist.title,
        }
    }

    #[must_use]
    pub fn is_playlist(&self) -> bool {
        matches!(self, Self::Playlist(_))
    }

    #[must_use]
    pub fn snapshot(&self) -> Self {
        match self {
            Self::Track(track) => Self::Track(track.snapshot()),
            Self::Playlist(playlist) => Self::Playlist(playlist.snapshot()),
        }
    }

    /// The tracks to enqueue for this object.
    #[must_use]
    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            Self::Track(track) => vec![track],
            Self::Playlist(playlist) => playlist.entries,
        }
    }
}

impl fmt::Display for PlayObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Track(track) => track.fmt(f),
            Self::Playlist(playlist) => write!(
                f,
                "playlist \"{}\" <{}> ({} entries)",
                playlist.title,
                playlist.url,
                playlist.entries.len()
            ),
        }
    }
}
