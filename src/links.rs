//! Request parsing and URL canonicalization.
//!
//! Cache and alias keys are canonical URLs, so that different spellings of
//! the same video share one entry: YouTube watch, embed and short links all
//! become `https://youtu.be/<id>`.

use std::sync::LazyLock;

use regex_lite::Regex;

const SHORT_URL: &str = "https://youtu.be/";
const PLAYLIST_URL: &str = "https://www.youtube.com/playlist?list=";

static YOUTUBE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("youtu|youtube").expect("valid youtube pattern"));

static VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:https?://)?(?:[0-9A-Z-]+\.)?(?:youtube|youtu|youtube-nocookie)\.(?:com|be)/(?:watch\?v=|watch\?.+&v=|embed/|v/|.+\?v=)?([^&=\n%?]{11})",
    )
    .expect("valid video id pattern")
});

static PLAYLIST_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[&?]list=([^&]+)").expect("valid playlist id pattern"));

static TIMECODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]t=(\d+)").expect("valid timecode pattern"));

/// Splits a request into its comma-separated items, dropping blank ones.
#[must_use]
pub fn split_request(request: &str) -> Vec<String> {
    request
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Whether `item` is a URL rather than a name or a search query.
#[must_use]
pub fn is_url(item: &str) -> bool {
    item.starts_with("http")
}

/// Guesses from its shape whether `url` points at a playlist.
#[must_use]
pub fn looks_like_playlist(url: &str) -> bool {
    if url.contains("yandex") {
        return !url.contains("track");
    }

    ["/playlist", "/channel", "@", "/videos"]
        .iter()
        .any(|part| url.contains(part))
        || ["/videos", "/shorts"].iter().any(|end| url.ends_with(end))
}

/// Returns the canonical form of `url`. `is_playlist` tells whether it
/// points at a playlist, from the cache or from [`looks_like_playlist`].
#[must_use]
pub fn canonicalize(url: &str, is_playlist: bool) -> String {
    if !YOUTUBE.is_match(url) {
        return url.to_owned();
    }

    if is_playlist {
        if !url.contains("/playlist") {
            return url.to_owned();
        }
        return match PLAYLIST_ID.captures(url) {
            Some(captures) => format!("{PLAYLIST_URL}{}", &captures[1]),
            None => url.to_owned(),
        };
    }

    let Some(captures) = VIDEO_ID.captures(url) else {
        return url.to_owned();
    };

    let mut canonical = format!("{SHORT_URL}{}", &captures[1]);
    if let Some(timecode) = TIMECODE.captures(url) {
        canonical.push_str("?t=");
        canonical.push_str(&timecode[1]);
    }
    canonical
}

/// The canonical URL of a search hit.
#[must_use]
pub fn video_url(id: &str) -> String {
    format!("{SHORT_URL}{id}")
}
