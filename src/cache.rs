//! The resolver cache.
//!
//! Resolution is slow, so every successfully resolved object is remembered by
//! its canonical URL and persisted. Cache entries are immutable snapshots
//! without stream sources: those expire, and are only ever written onto queue
//! entries. Entries never expire on their own; they are evicted explicitly.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model::{PlayObject, Playlist, Track},
    resolver::{Info, Resolver},
    store::Store,
};

/// A cached object as persisted: `{url, title, entries?: [{url, title}]}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct CachedObject {
    url: String,
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entries: Option<Vec<CachedTrack>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct CachedTrack {
    url: String,
    title: String,
}

impl From<&PlayObject> for CachedObject {
    fn from(object: &PlayObject) -> Self {
        let entries = match object {
            PlayObject::Track(_) => None,
            PlayObject::Playlist(playlist) => Some(
                playlist
                    .entries
                    .iter()
                    .map(|track| CachedTrack {
                        url: track.url().to_owned(),
                        title: track.title().to_owned(),
                    })
                    .collect(),
            ),
        };

        Self {
            url: object.url().to_owned(),
            title: object.title().to_owned(),
            entries,
        }
    }
}

impl From<CachedObject> for PlayObject {
    fn from(cached: CachedObject) -> Self {
        match cached.entries {
            None => Self::Track(Track::new(cached.url, cached.title)),
            Some(entries) => Self::Playlist(Playlist {
                url: cached.url,
                title: cached.title,
                entries: entries
                    .into_iter()
                    .map(|entry| Track::new(entry.url, entry.title))
                    .collect(),
            }),
        }
    }
}

pub struct ResolverCache {
    resolver: Arc<dyn Resolver>,
    store: Store,
    timeout: Duration,
    entries: Mutex<HashMap<String, PlayObject>>,
}

impl ResolverCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(resolver: Arc<dyn Resolver>, store: Store, timeout: Duration) -> Self {
        Self {
            resolver,
            store,
            timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a cache holding the persisted entries.
    pub async fn load(resolver: Arc<dyn Resolver>, store: Store, timeout: Duration) -> Self {
        let document: BTreeMap<String, CachedObject> = store.load(Store::AUDIO_CACHE).await;
        let entries: HashMap<_, _> = document
            .into_iter()
            .map(|(url, cached)| (url, PlayObject::from(cached)))
            .collect();
        debug!("loaded {} cached objects", entries.len());

        Self {
            resolver,
            store,
            timeout,
            entries: Mutex::new(entries),
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, PlayObject>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<PlayObject> {
        self.entries().get(url).cloned()
    }

    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.entries().contains_key(url)
    }

    /// Whether the cached object at `url` is a playlist, if it is cached.
    #[must_use]
    pub fn is_playlist(&self, url: &str) -> Option<bool> {
        self.entries().get(url).map(PlayObject::is_playlist)
    }

    #[must_use]
    pub fn title(&self, url: &str) -> Option<String> {
        self.entries().get(url).map(|object| object.title().to_owned())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Runs the resolver on its own task, waiting at most the configured
    /// timeout. A resolution that takes longer is abandoned, not aborted.
    async fn extract(&self, url: &str) -> Result<Info> {
        let resolver = Arc::clone(&self.resolver);
        let target = url.to_owned();
        let task = tokio::spawn(async move { resolver.extract(&target).await });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => Err(Error::deadline_exceeded(format!(
                "resolving {url} took longer than {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    /// Returns the object at `url`, resolving it when it is not cached.
    ///
    /// Freshly resolved objects carry stream sources; cached ones do not.
    ///
    /// # Errors
    ///
    /// Fails when the resolver fails, times out or finds nothing to play.
    pub async fn resolve(&self, url: &str) -> Result<PlayObject> {
        if let Some(cached) = self.get(url) {
            trace!("cache hit for {url}");
            return Ok(cached);
        }

        let object = self.extract(url).await?.into_play_object(url)?;
        debug!("resolved {object}");

        self.entries()
            .entry(url.to_owned())
            .or_insert_with(|| object.snapshot());
        self.flush().await;

        Ok(object)
    }

    /// Resolves a fresh stream source for the track at `url`, bypassing and
    /// leaving untouched the cache.
    ///
    /// # Errors
    ///
    /// Fails when the resolver fails or returns no stream source.
    pub async fn refresh_stream(&self, url: &str) -> Result<String> {
        let info = self.extract(url).await?;
        if info.is_playlist() {
            return Err(Error::invalid_argument(format!(
                "{url} is a playlist, not a track"
            )));
        }

        info.url
            .ok_or_else(|| Error::not_found(format!("no stream source for {url}")))
    }

    /// Searches for `query` with the same timeout as resolution.
    ///
    /// # Errors
    ///
    /// Fails when the search fails or times out.
    pub async fn search(&self, query: &str) -> Result<Option<String>> {
        let resolver = Arc::clone(&self.resolver);
        let target = query.to_owned();
        let task = tokio::spawn(async move { resolver.search(&target).await });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => Err(Error::deadline_exceeded(format!(
                "searching for \"{query}\" took longer than {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    /// Evicts the entry at `url`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when `url` is not cached.
    pub async fn evict(&self, url: &str) -> Result<()> {
        if self.entries().remove(url).is_none() {
            return Err(Error::not_found(format!("{url} is not cached")));
        }

        info!("evicted {url} from the cache");
        self.flush().await;
        self.purge_resolver_cache().await;
        Ok(())
    }

    /// Evicts everything.
    pub async fn clear(&self) {
        let count = {
            let mut entries = self.entries();
            let count = entries.len();
            entries.clear();
            count
        };

        info!("cleared {count} objects from the cache");
        self.flush().await;
        self.purge_resolver_cache().await;
    }

    async fn purge_resolver_cache(&self) {
        if let Err(e) = self.resolver.purge_cache().await {
            warn!("could not purge resolver cache: {e}");
        }
    }

    /// Persists the current entries.
    async fn flush(&self) {
        let document: BTreeMap<String, CachedObject> = self
            .entries()
            .iter()
            .map(|(url, object)| (url.clone(), CachedObject::from(object)))
            .collect();

        if let Err(e) = self.store.save(Store::AUDIO_CACHE, &document).await {
            warn!("could not save cache: {e}");
        }
    }
}
