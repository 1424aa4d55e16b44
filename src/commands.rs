//! The command layer.
//!
//! A [`Jukebox`] receives commands from a chat transport, together with the
//! guild, channel and user they came from, and drives the player, the saved
//! aliases, the designated channels and the resolver cache accordingly.
//!
//! Commands that fail with a user error are answered privately with the
//! error's details. Anything else is logged and answered with a generic
//! notice.

use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::{
    aliases::Aliases,
    channels::DjChannels,
    chat::{
        Attachment, Button, ChannelId, Chat, GuildId, Message, MessageId, Prompt, Tone, UserId,
    },
    error::{Error, ErrorKind, Result},
    links,
    model::{PlayObject, Track},
    player::Player,
    queue::Placement,
    reaper,
    registry::Sessions,
    session::Session,
};

/// Where a command came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Invocation {
    pub guild: GuildId,
    pub channel: ChannelId,
    pub user: UserId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Resolves a comma-separated list of URLs, saved names and search
    /// queries plus attached files, and queues the results.
    Play {
        request: String,
        attachments: Vec<Attachment>,
        placement: Placement,
        shuffle: bool,
    },
    Next,
    Previous,
    Pause,
    Stop,
    /// A press on the control panel.
    Press(Button),
    Save {
        url: String,
        name: String,
    },
    Forget {
        name: String,
    },
    Names {
        url_or_name: String,
    },
    Tracklist,
    ClearCache {
        url_or_name: Option<String>,
    },
    /// Designates a channel, the invoking one by default.
    SetChannel {
        channel: Option<ChannelId>,
    },
    RemoveChannel,
}

pub struct Jukebox {
    chat: Arc<dyn Chat>,
    player: Arc<Player>,
    sessions: Sessions,
    aliases: Aliases,
    channels: DjChannels,
    idle_timeout: Duration,
}

impl Jukebox {
    /// Summaries longer than this show only the first [`Self::SUMMARY_ENTRIES`].
    const SUMMARY_LIMIT: usize = 1700;
    const SUMMARY_ENTRIES: usize = 10;

    /// Upper bound of a single tracklist message.
    const CHUNK_LIMIT: usize = 1800;

    const FAILURE_NOTICE_TTL: Duration = Duration::from_secs(30);

    /// Answers to the placement question, in [`Placement`] order, then
    /// cancel.
    const PLACEMENT_CHOICES: [&str; 4] =
        ["Add to the queue", "Play next", "Mix with the queue", "Cancel"];
    const PLACEMENT_TIMEOUT: Duration = Duration::from_secs(15);
    const SHUFFLE_TIMEOUT: Duration = Duration::from_secs(7);
    const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

    const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

    #[must_use]
    pub fn new(
        chat: Arc<dyn Chat>,
        player: Arc<Player>,
        aliases: Aliases,
        channels: DjChannels,
    ) -> Self {
        Self {
            chat,
            player,
            sessions: Sessions::new(),
            aliases,
            channels,
            idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn player(&self) -> &Arc<Player> {
        &self.player
    }

    #[must_use]
    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    #[must_use]
    pub fn aliases(&self) -> &Aliases {
        &self.aliases
    }

    #[must_use]
    pub fn channels(&self) -> &DjChannels {
        &self.channels
    }

    /// Saved names starting with `prefix`.
    #[must_use]
    pub fn complete(&self, guild: GuildId, prefix: &str) -> Vec<String> {
        self.aliases.complete(guild, prefix)
    }

    async fn send(&self, channel: ChannelId, message: Message) -> Option<MessageId> {
        match self.chat.send(channel, message).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("could not send message to channel {channel}: {e}");
                None
            }
        }
    }

    async fn reply(&self, invocation: &Invocation, message: Message) {
        self.send(invocation.channel, message).await;
    }

    /// Executes `command` and answers failures in the invoking channel.
    pub async fn dispatch(&self, invocation: &Invocation, command: Command) {
        debug!("{invocation:?}: {command:?}");

        let Err(e) = self.execute(invocation, command).await else {
            return;
        };

        let message = match e.kind {
            ErrorKind::InvalidArgument
            | ErrorKind::NotFound
            | ErrorKind::AlreadyExists
            | ErrorKind::FailedPrecondition => {
                debug!("guild {}: {e}", invocation.guild);
                Message::error(e.error.to_string())
            }
            _ => {
                error!("guild {}: command failed: {e}", invocation.guild);
                Message::error("Command failed")
            }
        };
        self.reply(invocation, message.private()).await;
    }

    /// Executes `command`.
    ///
    /// Playback controls from users outside the bot's voice channel are
    /// ignored without an answer.
    ///
    /// # Errors
    ///
    /// Fails when the command cannot be carried out.
    pub async fn execute(&self, invocation: &Invocation, command: Command) -> Result<()> {
        let session = || self.sessions.get_or_create(invocation.guild);
        let user = invocation.user;

        match command {
            Command::Play {
                request,
                attachments,
                placement,
                shuffle,
            } => {
                self.play(invocation, &request, &attachments, placement, shuffle)
                    .await
            }
            Command::Next => {
                self.player.next(&session(), user).await;
                Ok(())
            }
            Command::Previous => {
                self.player.previous(&session(), user).await;
                Ok(())
            }
            Command::Pause => {
                self.player.toggle_pause(&session(), user).await;
                Ok(())
            }
            Command::Stop => {
                self.player.stop(&session(), user).await;
                Ok(())
            }
            Command::Press(button) => {
                self.player.press(&session(), user, button).await;
                Ok(())
            }
            Command::Save { url, name } => self.save(invocation, &url, &name).await,
            Command::Forget { name } => {
                let url = self.aliases.remove(invocation.guild, &name).await?;
                self.reply(
                    invocation,
                    Message::new(format!("Forgot `{name}` (<{url}>)"), Tone::Neutral),
                )
                .await;
                Ok(())
            }
            Command::Names { url_or_name } => self.names(invocation, &url_or_name).await,
            Command::Tracklist => {
                self.tracklist(invocation).await;
                Ok(())
            }
            Command::ClearCache { url_or_name } => {
                self.clear_cache(invocation, url_or_name.as_deref()).await
            }
            Command::SetChannel { channel } => {
                let channel = channel.unwrap_or(invocation.channel);
                self.channels.set(invocation.guild, channel).await;
                self.reply(
                    invocation,
                    Message::new(format!("DJ channel set to <#{channel}>"), Tone::Success),
                )
                .await;
                Ok(())
            }
            Command::RemoveChannel => {
                let channel = self
                    .channels
                    .remove(invocation.guild)
                    .await
                    .ok_or_else(|| Error::not_found("No DJ channel is set"))?;
                self.reply(
                    invocation,
                    Message::new(format!("<#{channel}> is no longer the DJ channel"), Tone::Neutral),
                )
                .await;
                Ok(())
            }
        }
    }

    /// Treats a plain message in the designated channel as a play request.
    ///
    /// Every message in that channel is deleted. Requests from users outside
    /// voice go no further. Otherwise the sender is asked to confirm searches,
    /// whether to shuffle several tracks, and where to place the request when
    /// more tracks are waiting. Returns whether a request was made.
    pub async fn message(
        &self,
        invocation: &Invocation,
        id: MessageId,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> bool {
        if !self
            .channels
            .is_designated(invocation.guild, invocation.channel)
        {
            return false;
        }

        if let Err(e) = self.chat.delete(invocation.channel, id).await {
            debug!("could not delete request message: {e}");
        }

        if self
            .player
            .voice()
            .voice_channel(invocation.guild, invocation.user)
            .is_none()
        {
            trace!(
                "guild {}: ignoring message of {} outside voice",
                invocation.guild,
                invocation.user
            );
            return false;
        }

        let Some(command) = self.interpret(invocation, text, attachments).await else {
            return false;
        };
        self.dispatch(invocation, command).await;
        true
    }

    /// Turns a message into a play command, asking the sender what the
    /// message leaves open. `None` when there is nothing to do.
    async fn interpret(
        &self,
        invocation: &Invocation,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Option<Command> {
        let guild = invocation.guild;
        let mention = self.chat.mention(invocation.user);

        let items = links::split_request(text);
        let files: Vec<_> = attachments
            .iter()
            .filter(|attachment| attachment.is_playable())
            .map(|attachment| attachment.filename.as_str())
            .collect();
        if items.is_empty() && files.is_empty() {
            return None;
        }

        let several = items.len() + files.len() > 1;
        let known = !files.is_empty()
            || several
            || items
                .iter()
                .all(|item| links::is_url(item) || self.aliases.lookup(guild, item).is_some());

        let mut shuffle = false;
        if !known {
            let question = format!("{mention}, search for `{text}`?");
            if !self.confirm(invocation, question, Self::SEARCH_TIMEOUT).await {
                debug!("guild {guild}: search for \"{text}\" declined");
                return None;
            }
        } else if several || items.iter().any(|item| self.is_playlist(guild, item)) {
            let question = format!("{mention}, shuffle the tracks?");
            shuffle = self.confirm(invocation, question, Self::SHUFFLE_TIMEOUT).await;
        }

        let mut placement = Placement::Append;
        if self.has_upcoming(guild) {
            let prompt = Prompt::new(
                format!(
                    "{mention}, how should `{}` be queued?",
                    self.request_title(guild, text, &files)
                ),
                Self::PLACEMENT_CHOICES,
                Self::PLACEMENT_TIMEOUT,
            );
            placement = match self.ask(invocation, prompt).await {
                Some(1) => Placement::InsertNext,
                Some(2) => Placement::MixWithQueue,
                Some(3) => {
                    debug!("guild {guild}: request cancelled");
                    return None;
                }
                _ => Placement::Append,
            };
        }

        Some(Command::Play {
            request: text.to_owned(),
            attachments,
            placement,
            shuffle,
        })
    }

    /// Asks the invoking user and waits up to the prompt's timeout.
    async fn ask(&self, invocation: &Invocation, prompt: Prompt) -> Option<usize> {
        let timeout = prompt.timeout;
        let asking = self.chat.prompt(invocation.channel, invocation.user, prompt);
        match tokio::time::timeout(timeout, asking).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                warn!("guild {}: could not ask {}: {e}", invocation.guild, invocation.user);
                None
            }
            Err(_) => {
                debug!("guild {}: {} did not answer", invocation.guild, invocation.user);
                None
            }
        }
    }

    /// Whether the user answers "Yes". Silence means no.
    async fn confirm(&self, invocation: &Invocation, question: String, timeout: Duration) -> bool {
        self.ask(invocation, Prompt::yes_no(question, timeout)).await == Some(0)
    }

    /// Whether something is playing with more tracks after it.
    fn has_upcoming(&self, guild: GuildId) -> bool {
        self.sessions.get(guild).is_some_and(|session| {
            let state = session.state();
            state.started && state.queue.has_upcoming()
        })
    }

    fn is_playlist(&self, guild: GuildId, item: &str) -> bool {
        let url = self.url_for(guild, item);
        self.player
            .cache()
            .is_playlist(&url)
            .unwrap_or_else(|| links::looks_like_playlist(&url))
    }

    /// A short description of a request: the cached title of a single URL or
    /// name, and the names of attached files.
    fn request_title(&self, guild: GuildId, text: &str, files: &[&str]) -> String {
        let files = files.join(", ");
        let text = text.trim();
        if text.is_empty() {
            return files;
        }

        let mut title = self
            .player
            .cache()
            .title(&self.url_for(guild, text))
            .unwrap_or_else(|| text.to_owned());
        if !files.is_empty() {
            title.push_str(" and ");
            title.push_str(&files);
        }
        title
    }

    /// Tracks how many members the bot's voice channel in `guild` has,
    /// counting the bot. Starts an idle watcher when the bot is alone.
    pub fn voice_state_update(&self, guild: GuildId, members: usize) -> Option<JoinHandle<bool>> {
        let session = self.sessions.get(guild)?;
        session.set_occupancy(members);
        if members != 1 || session.connection().is_none() {
            return None;
        }

        Some(tokio::spawn(reaper::watch(
            Arc::clone(&self.player),
            session,
            self.idle_timeout,
        )))
    }

    /// Resets every session.
    pub async fn shutdown(&self) {
        let sessions = self.sessions.all();
        info!("resetting {} sessions", sessions.len());
        join_all(sessions.iter().map(|session| self.player.reset(session))).await;
        self.sessions.collect_garbage();
    }

    /// The canonical URL an item stands for: a saved name's URL, the first
    /// search hit or the item itself.
    async fn locate(&self, guild: GuildId, item: &str) -> Result<String> {
        if let Some(url) = self.aliases.lookup(guild, item) {
            return Ok(url);
        }

        if links::is_url(item) {
            return Ok(self.canonicalize(item));
        }

        self.player
            .cache()
            .search(item)
            .await?
            .ok_or_else(|| Error::not_found(format!("nothing found for \"{item}\"")))
    }

    fn canonicalize(&self, url: &str) -> String {
        let is_playlist = self
            .player
            .cache()
            .is_playlist(url)
            .unwrap_or_else(|| links::looks_like_playlist(url));
        links::canonicalize(url, is_playlist)
    }

    /// A saved name's URL or the canonical form of `url_or_name`.
    fn url_for(&self, guild: GuildId, url_or_name: &str) -> String {
        self.aliases
            .lookup(guild, url_or_name)
            .unwrap_or_else(|| self.canonicalize(url_or_name))
    }

    async fn play(
        &self,
        invocation: &Invocation,
        request: &str,
        attachments: &[Attachment],
        placement: Placement,
        shuffle: bool,
    ) -> Result<()> {
        let guild = invocation.guild;
        let dj = self
            .channels
            .get(guild)
            .ok_or_else(|| Error::failed_precondition("Set a DJ channel first with /set_channel"))?;
        let voice_channel = self
            .player
            .voice()
            .voice_channel(guild, invocation.user)
            .ok_or_else(|| Error::failed_precondition("Join a voice channel first"))?;

        let items = links::split_request(request);
        let files: Vec<_> = attachments
            .iter()
            .filter(|attachment| attachment.is_playable())
            .collect();
        if items.is_empty() && files.is_empty() {
            return Err(Error::invalid_argument("Nothing to play"));
        }

        let session = self.sessions.get_or_create(guild);
        session.set_channel(Some(dj));
        let announcement = self.send(dj, Message::new("Loading...", Tone::Neutral)).await;

        let mut tracks = Vec::new();
        let mut titles = Vec::new();
        let mut failures = Vec::new();
        for item in items {
            match self.resolve(guild, &item).await {
                Ok((url, object)) => {
                    titles.push(self.describe(guild, &url, &object));
                    tracks.extend(object.into_tracks());
                }
                Err(e) => {
                    warn!("guild {guild}: could not load {item}: {e}");
                    failures.push(format!("{item}: {}", e.error));
                }
            }
        }

        for file in files {
            tracks.push(Track::attachment(&file.url, &file.filename));
            titles.push(file.filename.clone());
        }

        if !failures.is_empty() {
            let message = Message::error(format!("Could not load:\n{}", failures.join("\n")))
                .expiring(Self::FAILURE_NOTICE_TTL);
            self.send(dj, message).await;
        }

        if tracks.is_empty() {
            if let Some(id) = announcement {
                if let Err(e) = self.chat.delete(dj, id).await {
                    debug!("could not delete announcement: {e}");
                }
            }
            return Ok(());
        }

        if shuffle {
            fastrand::shuffle(&mut tracks);
        }

        let idle = !session.is_started();
        let verb = match placement {
            _ if idle => "plays",
            Placement::Append => "adds",
            Placement::InsertNext => "inserts next",
            Placement::MixWithQueue => "mixes into the queue",
        };
        info!("guild {guild}: {} {verb} {} tracks", invocation.user, tracks.len());
        session.state().queue.enqueue(tracks, placement);

        let text = format!(
            "{} {verb}:\n{}",
            self.chat.mention(invocation.user),
            Self::summarize(&titles)
        );
        let message = Message::new(text, if idle { Tone::Success } else { Tone::Notice });
        match announcement {
            Some(id) => {
                if let Err(e) = self.chat.edit(dj, id, message).await {
                    warn!("guild {guild}: could not edit announcement: {e}");
                }
            }
            None => {
                self.send(dj, message).await;
            }
        }

        self.player.connect(&session, voice_channel).await?;
        self.player.play_music(&session).await;
        Ok(())
    }

    async fn resolve(&self, guild: GuildId, item: &str) -> Result<(String, PlayObject)> {
        let url = self.locate(guild, item).await?;
        let object = self.player.cache().resolve(&url).await?;
        Ok((url, object))
    }

    /// One summary line, with saved names as quick-start hints.
    fn describe(&self, guild: GuildId, url: &str, object: &PlayObject) -> String {
        let mut line = match object {
            PlayObject::Track(track) => track.title().to_owned(),
            PlayObject::Playlist(playlist) => {
                format!("{} ({} tracks)", playlist.title, playlist.entries.len())
            }
        };

        let names = self.aliases.names_for(guild, url);
        if !names.is_empty() {
            line.push_str(&format!(" [`{}`]", names.join("`, `")));
        }
        line
    }

    fn summarize(titles: &[String]) -> String {
        let lines: Vec<_> = titles.iter().map(|title| format!("- {title}")).collect();
        let summary = lines.join("\n");
        if summary.len() <= Self::SUMMARY_LIMIT {
            return summary;
        }

        let mut short = lines[..Self::SUMMARY_ENTRIES.min(lines.len())].join("\n");
        short.push_str("\n...");
        short
    }

    async fn save(&self, invocation: &Invocation, url: &str, name: &str) -> Result<()> {
        let guild = invocation.guild;
        if let Some(existing) = self.aliases.lookup(guild, name) {
            return Err(Error::already_exists(format!(
                "`{name}` already points at <{existing}>"
            )));
        }

        if !links::is_url(url) {
            return Err(Error::invalid_argument(format!("{url} is not a URL")));
        }

        let url = self.canonicalize(url);
        let object = self.player.cache().resolve(&url).await?;
        self.aliases.insert(guild, name, &url).await?;

        let text = format!("Saved {} as `{name}`", object.title());
        self.reply(invocation, Message::new(text, Tone::Success)).await;
        Ok(())
    }

    async fn names(&self, invocation: &Invocation, url_or_name: &str) -> Result<()> {
        let url = self.url_for(invocation.guild, url_or_name);
        let names = self.aliases.names_for(invocation.guild, &url);
        if names.is_empty() {
            return Err(Error::not_found(format!("No names are saved for <{url}>")));
        }

        let text = format!("<{url}> is saved as `{}`", names.join("`, `"));
        self.reply(invocation, Message::new(text, Tone::Neutral)).await;
        Ok(())
    }

    async fn tracklist(&self, invocation: &Invocation) {
        let urls = self.aliases.urls(invocation.guild);
        if urls.is_empty() {
            self.reply(invocation, Message::new("No saved URLs", Tone::Neutral))
                .await;
            return;
        }

        let lines: Vec<_> = urls
            .into_iter()
            .map(|(url, names)| {
                let title = self.player.cache().title(&url).unwrap_or_else(|| url.clone());
                format!("[{title}](<{url}>): `{}`", names.join("`, `"))
            })
            .collect();

        for chunk in chunk(&lines, Self::CHUNK_LIMIT) {
            self.reply(invocation, Message::new(chunk, Tone::Neutral))
                .await;
        }
    }

    async fn clear_cache(&self, invocation: &Invocation, url_or_name: Option<&str>) -> Result<()> {
        let cache = self.player.cache();
        let text = match url_or_name {
            Some(url_or_name) => {
                let url = self.url_for(invocation.guild, url_or_name);
                cache.evict(&url).await?;
                format!("Removed <{url}> from the cache")
            }
            None => {
                cache.clear().await;
                "Cleared the cache".to_owned()
            }
        };

        self.reply(invocation, Message::new(text, Tone::Neutral)).await;
        Ok(())
    }

    /// The session of `guild`, if any command has touched it.
    #[must_use]
    pub fn session(&self, guild: GuildId) -> Option<Arc<Session>> {
        self.sessions.get(guild)
    }
}

/// Joins `lines` into chunks no longer than `limit`. Longer lines get a
/// chunk of their own.
fn chunk(lines: &[String], limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in lines {
        if !current.is_empty() && current.len() + 1 + line.len() > limit {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
