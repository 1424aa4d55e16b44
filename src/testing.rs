//! In-memory collaborators for tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    chat::{ChannelId, Chat, GuildId, Message, MessageId, Prompt, UserId},
    error::{Error, Result},
    http::Probe,
    resolver::{Info, Resolver},
    voice::{PlaybackState, TransportOptions, VoiceConnection, VoiceGateway},
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Sent {
        channel: ChannelId,
        id: MessageId,
        message: Message,
    },
    Edited {
        channel: ChannelId,
        id: MessageId,
        message: Message,
    },
    Deleted {
        channel: ChannelId,
        id: MessageId,
    },
    Prompted {
        channel: ChannelId,
        user: UserId,
        prompt: Prompt,
    },
}

/// Records every message operation and answers prompts from a script.
#[derive(Default)]
pub struct FakeChat {
    next_id: AtomicU64,
    events: Mutex<Vec<ChatEvent>>,
    answers: Mutex<VecDeque<Option<usize>>>,
}

impl FakeChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ChatEvent> {
        lock(&self.events).clone()
    }

    /// Messages sent so far, in order.
    pub fn sent(&self) -> Vec<Message> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                ChatEvent::Sent { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|message| message.text).collect()
    }

    pub fn deletions(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|event| matches!(event, ChatEvent::Deleted { .. }))
            .count()
    }

    /// Scripts the answer to the next prompt. `None` leaves it unanswered
    /// until the asker gives up. Unscripted prompts are declined at once.
    pub fn answer(&self, choice: Option<usize>) {
        lock(&self.answers).push_back(choice);
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                ChatEvent::Prompted { prompt, .. } => Some(prompt.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn forget(&self) {
        lock(&self.events).clear();
    }
}

#[async_trait]
impl Chat for FakeChat {
    async fn send(&self, channel: ChannelId, message: Message) -> Result<MessageId> {
        let id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        lock(&self.events).push(ChatEvent::Sent {
            channel,
            id,
            message,
        });
        Ok(id)
    }

    async fn edit(&self, channel: ChannelId, id: MessageId, message: Message) -> Result<()> {
        lock(&self.events).push(ChatEvent::Edited {
            channel,
            id,
            message,
        });
        Ok(())
    }

    async fn delete(&self, channel: ChannelId, id: MessageId) -> Result<()> {
        lock(&self.events).push(ChatEvent::Deleted { channel, id });
        Ok(())
    }

    async fn prompt(&self, channel: ChannelId, user: UserId, prompt: Prompt) -> Result<Option<usize>> {
        lock(&self.events).push(ChatEvent::Prompted {
            channel,
            user,
            prompt,
        });

        let answer = lock(&self.answers).pop_front();
        match answer {
            Some(Some(choice)) => Ok(Some(choice)),
            Some(None) => std::future::pending().await,
            None => Ok(None),
        }
    }
}

/// A voice connection whose streams end only when told to.
pub struct FakeConnection {
    channel: ChannelId,
    state: watch::Sender<PlaybackState>,
    plays: watch::Sender<Vec<String>>,
    failures: Arc<AtomicUsize>,
    stops: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeConnection {
    fn new(channel: ChannelId, failures: Arc<AtomicUsize>) -> Self {
        Self {
            channel,
            state: watch::Sender::new(PlaybackState::Idle),
            plays: watch::Sender::new(Vec::new()),
            failures,
            stops: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Stream sources started so far, failed starts included.
    pub fn plays(&self) -> Vec<String> {
        self.plays.borrow().clone()
    }

    /// Waits until at least `count` streams were started.
    pub async fn played(&self, count: usize) {
        let mut plays = self.plays.subscribe();
        plays
            .wait_for(|plays| plays.len() >= count)
            .await
            .expect("connection dropped");
    }

    /// Ends the current stream as if it ran out.
    pub fn finish(&self) {
        self.state.send_replace(PlaybackState::Idle);
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::Relaxed)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn channel(&self) -> ChannelId {
        self.channel
    }

    async fn play(&self, source: &str, _options: &TransportOptions) -> Result<()> {
        let failed = self
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok();

        if !failed {
            self.state.send_replace(PlaybackState::Playing);
        }
        self.plays.send_modify(|plays| plays.push(source.to_owned()));

        if failed {
            Err(Error::unavailable(format!("cannot open {source}")))
        } else {
            Ok(())
        }
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::Relaxed);
        self.state.send_replace(PlaybackState::Idle);
    }

    fn pause(&self) {
        self.state.send_if_modified(|state| {
            let playing = *state == PlaybackState::Playing;
            if playing {
                *state = PlaybackState::Paused;
            }
            playing
        });
    }

    fn resume(&self) {
        self.state.send_if_modified(|state| {
            let paused = *state == PlaybackState::Paused;
            if paused {
                *state = PlaybackState::Playing;
            }
            paused
        });
    }

    fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.subscribe()
    }

    async fn disconnect(&self, _force: bool) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        self.state.send_replace(PlaybackState::Idle);
        Ok(())
    }
}

/// Voice gateway with scripted channel membership.
#[derive(Default)]
pub struct FakeVoice {
    members: Mutex<HashMap<(GuildId, UserId), ChannelId>>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    mutes: Mutex<Vec<bool>>,
    refuse: AtomicBool,
    failures: Arc<AtomicUsize>,
}

impl FakeVoice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts `user` into a voice channel.
    pub fn join(&self, guild: GuildId, user: UserId, channel: ChannelId) {
        lock(&self.members).insert((guild, user), channel);
    }

    /// Makes the next `count` stream starts fail.
    pub fn fail_plays(&self, count: usize) {
        self.failures.store(count, Ordering::Release);
    }

    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::Release);
    }

    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        lock(&self.connections).clone()
    }

    pub fn last_connection(&self) -> Option<Arc<FakeConnection>> {
        lock(&self.connections).last().cloned()
    }

    /// Self-mute changes so far.
    pub fn mutes(&self) -> Vec<bool> {
        lock(&self.mutes).clone()
    }
}

#[async_trait]
impl VoiceGateway for FakeVoice {
    async fn connect(
        &self,
        _guild: GuildId,
        channel: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>> {
        if self.refuse.load(Ordering::Acquire) {
            return Err(Error::unavailable("voice gateway refused the connection"));
        }

        let connection = Arc::new(FakeConnection::new(channel, Arc::clone(&self.failures)));
        lock(&self.connections).push(Arc::clone(&connection));
        Ok(connection)
    }

    fn voice_channel(&self, guild: GuildId, user: UserId) -> Option<ChannelId> {
        lock(&self.members).get(&(guild, user)).copied()
    }

    async fn set_self_mute(&self, _guild: GuildId, mute: bool) -> Result<()> {
        lock(&self.mutes).push(mute);
        Ok(())
    }
}

/// Resolver answering from a fixed table.
#[derive(Default)]
pub struct FakeResolver {
    infos: HashMap<String, Info>,
    searches: HashMap<String, String>,
    delay: Option<Duration>,
    extractions: Mutex<Vec<String>>,
    purges: AtomicUsize,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(mut self, url: &str, title: &str, stream: &str) -> Self {
        self.infos.insert(
            url.to_owned(),
            Info {
                original_url: Some(url.to_owned()),
                title: Some(title.to_owned()),
                url: Some(stream.to_owned()),
                ..Info::default()
            },
        );
        self
    }

    pub fn with_playlist(mut self, url: &str, title: &str, entries: &[(&str, &str, &str)]) -> Self {
        let entries = entries
            .iter()
            .map(|(url, title, stream)| {
                Some(Info {
                    original_url: Some((*url).to_owned()),
                    title: Some((*title).to_owned()),
                    url: Some((*stream).to_owned()),
                    ..Info::default()
                })
            })
            .collect();

        self.infos.insert(
            url.to_owned(),
            Info {
                kind: Some("playlist".to_owned()),
                original_url: Some(url.to_owned()),
                title: Some(title.to_owned()),
                entries: Some(entries),
                ..Info::default()
            },
        );
        self
    }

    pub fn with_search(mut self, query: &str, url: &str) -> Self {
        self.searches.insert(query.to_owned(), url.to_owned());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// URLs extracted so far, in order.
    pub fn extractions(&self) -> Vec<String> {
        lock(&self.extractions).clone()
    }

    pub fn purges(&self) -> usize {
        self.purges.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn extract(&self, url: &str) -> Result<Info> {
        lock(&self.extractions).push(url.to_owned());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.infos
            .get(url)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("unsupported url {url}")))
    }

    async fn search(&self, query: &str) -> Result<Option<String>> {
        Ok(self.searches.get(query).cloned())
    }

    async fn purge_cache(&self) -> Result<()> {
        self.purges.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Probe treating every source as live unless marked dead.
#[derive(Default)]
pub struct FakeProbe {
    dead: Mutex<HashSet<String>>,
    probed: Mutex<Vec<String>>,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill(&self, url: &str) {
        lock(&self.dead).insert(url.to_owned());
    }

    pub fn probed(&self) -> Vec<String> {
        lock(&self.probed).clone()
    }
}

#[async_trait]
impl Probe for FakeProbe {
    async fn is_live(&self, url: &str) -> bool {
        lock(&self.probed).push(url.to_owned());
        !lock(&self.dead).contains(url)
    }
}
