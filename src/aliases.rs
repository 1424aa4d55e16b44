//! Saved URL aliases: short names per guild for frequently played URLs.
//!
//! Many names may point at the same URL. The map is persisted after every
//! change.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
    chat::GuildId,
    error::{Error, Result},
    store::Store,
};

type Document = BTreeMap<GuildId, BTreeMap<String, String>>;

pub struct Aliases {
    store: Store,
    names: Mutex<Document>,
}

impl Aliases {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            store,
            names: Mutex::new(Document::new()),
        }
    }

    /// Creates the map from its persisted document.
    pub async fn load(store: Store) -> Self {
        let names: Document = store.load(Store::SAVED_URLS).await;
        debug!("loaded saved urls of {} guilds", names.len());
        Self {
            store,
            names: Mutex::new(names),
        }
    }

    fn names(&self) -> MutexGuard<'_, Document> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The URL saved as `name`.
    #[must_use]
    pub fn lookup(&self, guild: GuildId, name: &str) -> Option<String> {
        self.names()
            .get(&guild)
            .and_then(|names| names.get(name))
            .cloned()
    }

    /// Saves `url` as `name`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` when `name` is taken.
    pub async fn insert(&self, guild: GuildId, name: &str, url: &str) -> Result<()> {
        {
            let mut names = self.names();
            let guild_names = names.entry(guild).or_default();
            if let Some(existing) = guild_names.get(name) {
                return Err(Error::already_exists(format!(
                    "{name} already points at {existing}"
                )));
            }
            guild_names.insert(name.to_owned(), url.to_owned());
        }

        info!("guild {guild}: saved {url} as {name}");
        self.persist().await;
        Ok(())
    }

    /// Forgets `name` and returns the URL it pointed at.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when nothing is saved as `name`.
    pub async fn remove(&self, guild: GuildId, name: &str) -> Result<String> {
        let url = self
            .names()
            .get_mut(&guild)
            .and_then(|names| names.remove(name))
            .ok_or_else(|| Error::not_found(format!("no saved url named {name}")))?;

        info!("guild {guild}: forgot {name}");
        self.persist().await;
        Ok(url)
    }

    /// All names pointing at `url`, in order.
    #[must_use]
    pub fn names_for(&self, guild: GuildId, url: &str) -> Vec<String> {
        self.names()
            .get(&guild)
            .map(|names| {
                names
                    .iter()
                    .filter(|(_, saved)| *saved == url)
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every saved URL with the names pointing at it.
    #[must_use]
    pub fn urls(&self, guild: GuildId) -> BTreeMap<String, Vec<String>> {
        let mut urls = BTreeMap::<String, Vec<String>>::new();
        if let Some(names) = self.names().get(&guild) {
            for (name, url) in names {
                urls.entry(url.clone()).or_default().push(name.clone());
            }
        }
        urls
    }

    /// Names starting with `prefix`, for autocompletion.
    #[must_use]
    pub fn complete(&self, guild: GuildId, prefix: &str) -> Vec<String> {
        self.names()
            .get(&guild)
            .map(|names| {
                names
                    .keys()
                    .filter(|name| name.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn persist(&self) {
        let document = self.names().clone();
        if let Err(e) = self.store.save(Store::SAVED_URLS, &document).await {
            warn!("could not save urls: {e}");
        }
    }
}
