//! Designated (DJ) channels: the text channel per guild where the bot
//! announces playback and treats plain messages as play requests.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
    chat::{ChannelId, GuildId},
    store::Store,
};

type Document = BTreeMap<GuildId, ChannelId>;

pub struct DjChannels {
    store: Store,
    channels: Mutex<Document>,
}

impl DjChannels {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            store,
            channels: Mutex::new(Document::new()),
        }
    }

    pub async fn load(store: Store) -> Self {
        let channels: Document = store.load(Store::DJ_CHANNELS).await;
        debug!("loaded {} designated channels", channels.len());
        Self {
            store,
            channels: Mutex::new(channels),
        }
    }

    fn channels(&self) -> MutexGuard<'_, Document> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get(&self, guild: GuildId) -> Option<ChannelId> {
        self.channels().get(&guild).copied()
    }

    /// Whether `channel` is the designated channel of `guild`.
    #[must_use]
    pub fn is_designated(&self, guild: GuildId, channel: ChannelId) -> bool {
        self.get(guild) == Some(channel)
    }

    pub async fn set(&self, guild: GuildId, channel: ChannelId) {
        self.channels().insert(guild, channel);
        info!("guild {guild}: designated channel {channel}");
        self.persist().await;
    }

    /// Removes the designation and returns the channel it was on.
    pub async fn remove(&self, guild: GuildId) -> Option<ChannelId> {
        let channel = self.channels().remove(&guild)?;
        info!("guild {guild}: removed designated channel {channel}");
        self.persist().await;
        Some(channel)
    }

    async fn persist(&self) {
        let document = self.channels().clone();
        if let Err(e) = self.store.save(Store::DJ_CHANNELS, &document).await {
            warn!("could not save designated channels: {e}");
        }
    }
}
