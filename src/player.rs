//! The playback driver.
//!
//! [`Player::play_music`] starts one playback loop per session. The loop
//! consumes the queue sequentially: it renders the control panel, acquires a
//! stream source for the current track, streams it into the voice connection
//! and waits until the stream is neither playing nor paused. Then it advances
//! the cursor by one, unconditionally.
//!
//! Skips work by moving the cursor and stopping the stream: the loop wakes
//! up and performs its usual advance. A skip to the next track on the last
//! one wraps the cursor to `-1`, so playback continues at the start.
//!
//! Failures to acquire or start a stream count against a budget of
//! [`Player::MAX_FAILURES`] per run. When the budget is exhausted, or the
//! cursor runs past the end of the queue, the session is reset.

use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle};

use crate::{
    cache::ResolverCache,
    chat::{Button, ChannelId, Chat, Message, Tone, UserId},
    control::Controls,
    error::{Error, Result},
    http::Probe,
    model::Track,
    session::{Run, Session, Teardown},
    voice::{PlaybackState, TransportOptions, VoiceConnection, VoiceGateway},
};

pub struct Player {
    chat: Arc<dyn Chat>,
    voice: Arc<dyn VoiceGateway>,
    cache: Arc<ResolverCache>,
    probe: Arc<dyn Probe>,
    transport: TransportOptions,
    controls: Controls,
}

/// Resolves once the stream is neither playing nor paused.
async fn until_idle(mut playback: watch::Receiver<PlaybackState>) {
    // The sender lives as long as the connection does.
    let _ = playback.wait_for(|state| !state.is_active()).await;
}

impl Player {
    /// Failed tracks after which a run gives up.
    pub const MAX_FAILURES: usize = 3;

    const SKIP_NOTICE_TTL: Duration = Duration::from_secs(60);
    const FAILURE_NOTICE_TTL: Duration = Duration::from_secs(10);

    #[must_use]
    pub fn new(
        chat: Arc<dyn Chat>,
        voice: Arc<dyn VoiceGateway>,
        cache: Arc<ResolverCache>,
        probe: Arc<dyn Probe>,
    ) -> Self {
        Self {
            controls: Controls::new(Arc::clone(&chat)),
            chat,
            voice,
            cache,
            probe,
            transport: TransportOptions::default(),
        }
    }

    #[must_use]
    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    #[must_use]
    pub fn voice(&self) -> &Arc<dyn VoiceGateway> {
        &self.voice
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ResolverCache> {
        &self.cache
    }

    /// Sends `message` to the session's text channel.
    async fn notify(&self, session: &Session, message: Message) {
        let Some(channel) = session.channel() else {
            debug!("guild {}: no channel to notify", session.guild());
            return;
        };

        if let Err(e) = self.chat.send(channel, message).await {
            warn!("guild {}: could not send message: {e}", session.guild());
        }
    }

    /// Starts the playback loop of `session`. When one is running already,
    /// only refreshes the control panel.
    ///
    /// Returns the handle of a newly started loop.
    pub async fn play_music(self: &Arc<Self>, session: &Arc<Session>) -> Option<JoinHandle<()>> {
        let Some(run) = session.start() else {
            self.controls.render(session).await;
            return None;
        };

        let player = Arc::clone(self);
        let session = Arc::clone(session);
        Some(tokio::spawn(async move {
            player.consume(&session, run).await;
        }))
    }

    async fn consume(&self, session: &Session, run: Run) {
        let guild = session.guild();
        debug!("guild {guild}: playback started");

        let mut failures = 0;
        let (teardown, connecting) = loop {
            let (index, track, connection, skips) = {
                // Held while ending, so a new request joins only after the
                // old connection is gone.
                let connecting = session.connecting().await;
                let mut state = session.state();
                if state.generation != run.generation {
                    return;
                }

                state.queue.rewind_if_wrapped();
                let current = state.queue.position().zip(state.connection.clone());
                match current {
                    Some((index, connection)) if failures < Self::MAX_FAILURES => (
                        index,
                        state.queue.entries()[index].clone(),
                        connection,
                        state.skips,
                    ),
                    // Released under the lock that saw the end. Tracks queued
                    // from here on start a new run.
                    _ => {
                        let teardown = state.release();
                        drop(state);
                        break (teardown, connecting);
                    }
                }
            };

            self.controls.render(session).await;
            if let Err(e) = self.voice.set_self_mute(guild, false).await {
                debug!("guild {guild}: could not unmute: {e}");
            }

            let acquired = tokio::select! {
                () = run.token.cancelled() => return,
                source = self.acquire(&track) => source,
            };

            let started = match acquired {
                Ok(source) => {
                    let skipped = {
                        let mut state = session.state();
                        if state.generation != run.generation {
                            return;
                        }
                        state.queue.set_stream(index, track.url(), &source);
                        state.skips != skips
                    };

                    if skipped {
                        debug!("guild {guild}: {track} was skipped while loading");
                        Ok(false)
                    } else {
                        info!("guild {guild}: playing {track}");
                        connection.play(&source, &self.transport).await.map(|()| true)
                    }
                }
                Err(e) => Err(e),
            };

            match started {
                Ok(true) => {
                    // A skip between loading and starting found nothing to stop.
                    if session.state().skips != skips {
                        connection.stop();
                    }

                    tokio::select! {
                        () = run.token.cancelled() => return,
                        () = until_idle(connection.subscribe()) => {}
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    failures += 1;
                    warn!(
                        "guild {guild}: could not play {track} ({failures}/{}): {e}",
                        Self::MAX_FAILURES
                    );
                    let message = Message::error(format!("Could not play {}", track.link()))
                        .expiring(Self::FAILURE_NOTICE_TTL);
                    self.notify(session, message).await;
                    connection.stop();
                }
            }

            let mut state = session.state();
            if state.generation != run.generation {
                return;
            }
            state.queue.advance();
        };

        if failures >= Self::MAX_FAILURES {
            error!("guild {guild}: giving up after {failures} failed tracks");
            let message = Message::error(format!(
                "Playback stopped after {failures} tracks failed to play"
            ));
            self.notify(session, message).await;
        } else {
            debug!("guild {guild}: end of queue");
        }

        self.detach(session, teardown, false).await;
        drop(connecting);
    }

    /// Returns a stream source for `track`: its own when still live,
    /// otherwise a fresh one from the resolver. Uploaded files are never
    /// resolved.
    async fn acquire(&self, track: &Track) -> Result<String> {
        if let Some(stream) = track.stream() {
            if track.is_attachment() || self.probe.is_live(stream).await {
                return Ok(stream.to_owned());
            }
            debug!("stream source of {track} expired");
        }

        if track.is_attachment() {
            return Err(Error::unavailable(format!("{track} has no source")));
        }

        self.cache.refresh_stream(track.url()).await
    }

    /// Joins `channel` unless the session is connected already. A failed
    /// attempt resets the session.
    ///
    /// # Errors
    ///
    /// Returns the voice gateway's error.
    pub async fn connect(&self, session: &Session, channel: ChannelId) -> Result<()> {
        let _connecting = session.connecting().await;
        if session.connection().is_some() {
            return Ok(());
        }

        match self.voice.connect(session.guild(), channel).await {
            Ok(connection) => {
                info!("guild {}: joined voice channel {channel}", session.guild());
                session.attach(connection);
                Ok(())
            }
            Err(e) => {
                self.teardown(session, true).await;
                Err(e)
            }
        }
    }

    /// Clears the queue, stops playback, leaves the voice channel and deletes
    /// the control panel. Resetting a reset session does nothing.
    pub async fn reset(&self, session: &Session) {
        self.teardown(session, false).await;
    }

    async fn teardown(&self, session: &Session, force: bool) {
        let Some(teardown) = session.teardown(None) else {
            return;
        };
        self.detach(session, teardown, force).await;
    }

    /// Leaves the voice channel and deletes the control panel.
    async fn detach(&self, session: &Session, teardown: Teardown, force: bool) {
        if let Some(connection) = teardown.connection {
            connection.stop();
            if let Err(e) = connection.disconnect(force).await {
                warn!("guild {}: could not disconnect: {e}", session.guild());
            }
            info!("guild {}: left voice channel", session.guild());
        }

        self.controls.delete(session).await;
    }

    /// The session's connection, if `user` is in the same voice channel.
    fn authorize(&self, session: &Session, user: UserId) -> Option<Arc<dyn VoiceConnection>> {
        let connection = session.connection()?;
        let channel = self.voice.voice_channel(session.guild(), user)?;
        if channel == connection.channel() {
            Some(connection)
        } else {
            trace!("guild {}: ignoring {user} outside channel {channel}", session.guild());
            None
        }
    }

    /// Skips to the next track. Returns whether the command applied.
    pub async fn next(&self, session: &Session, user: UserId) -> bool {
        let Some(connection) = self.authorize(session, user) else {
            return false;
        };

        {
            let mut state = session.state();
            state.queue.advance_to_next();
            state.skips += 1;
        }
        connection.stop();

        let text = format!("{} skips to the next track ⏩", self.chat.mention(user));
        let message = Message::new(text, Tone::Notice).expiring(Self::SKIP_NOTICE_TTL);
        self.notify(session, message).await;
        true
    }

    /// Skips back to the previous track. Returns whether the command applied.
    pub async fn previous(&self, session: &Session, user: UserId) -> bool {
        let Some(connection) = self.authorize(session, user) else {
            return false;
        };

        {
            let mut state = session.state();
            state.queue.advance_to_previous();
            state.skips += 1;
        }
        connection.stop();

        let text = format!("{} skips to the previous track ⏪", self.chat.mention(user));
        let message = Message::new(text, Tone::Notice).expiring(Self::SKIP_NOTICE_TTL);
        self.notify(session, message).await;
        true
    }

    /// Pauses or resumes, server-muting the bot while paused. Returns whether
    /// the command applied.
    pub async fn toggle_pause(&self, session: &Session, user: UserId) -> bool {
        let Some(connection) = self.authorize(session, user) else {
            return false;
        };

        if connection.state() == PlaybackState::Paused {
            connection.resume();
        } else {
            connection.pause();
        }

        let paused = connection.state() == PlaybackState::Paused;
        if let Err(e) = self.voice.set_self_mute(session.guild(), paused).await {
            debug!("guild {}: could not change mute: {e}", session.guild());
        }

        self.controls.refresh_pause(session, paused).await;
        true
    }

    /// Resets the session on behalf of `user`. Returns whether the command
    /// applied.
    pub async fn stop(&self, session: &Session, user: UserId) -> bool {
        if self.authorize(session, user).is_none() {
            return false;
        }

        self.reset(session).await;
        let text = format!("{} disconnected the bot ❌", self.chat.mention(user));
        self.notify(session, Message::new(text, Tone::Error)).await;
        true
    }

    /// Dispatches a press on the control panel.
    pub async fn press(&self, session: &Session, user: UserId, button: Button) -> bool {
        match button {
            Button::Previous => self.previous(session, user).await,
            Button::PlayPause => self.toggle_pause(session, user).await,
            Button::Stop => self.stop(session, user).await,
            Button::Next => self.next(session, user).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chat::{GuildId, Panel},
        error::ErrorKind,
        queue::Placement,
        store::Store,
        testing::{ChatEvent, FakeChat, FakeConnection, FakeProbe, FakeResolver, FakeVoice},
    };

    const GUILD: GuildId = GuildId(1);
    const TEXT: ChannelId = ChannelId(10);
    const VOICE: ChannelId = ChannelId(20);
    const ELSEWHERE: ChannelId = ChannelId(21);
    const LISTENER: UserId = UserId(100);
    const STRANGER: UserId = UserId(200);

    struct Harness {
        chat: Arc<FakeChat>,
        voice: Arc<FakeVoice>,
        resolver: Arc<FakeResolver>,
        probe: Arc<FakeProbe>,
        cache: Arc<ResolverCache>,
        player: Arc<Player>,
        session: Arc<Session>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new(resolver: FakeResolver) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let chat = Arc::new(FakeChat::new());
            let voice = Arc::new(FakeVoice::new());
            let resolver = Arc::new(resolver);
            let probe = Arc::new(FakeProbe::new());
            let cache = Arc::new(ResolverCache::new(
                resolver.clone(),
                Store::new(dir.path()),
                Duration::from_secs(180),
            ));
            let player = Arc::new(Player::new(
                chat.clone(),
                voice.clone(),
                cache.clone(),
                probe.clone(),
            ));

            voice.join(GUILD, LISTENER, VOICE);
            voice.join(GUILD, STRANGER, ELSEWHERE);

            let session = Arc::new(Session::new(GUILD));
            session.set_channel(Some(TEXT));

            Self {
                chat,
                voice,
                resolver,
                probe,
                cache,
                player,
                session,
                _dir: dir,
            }
        }

        /// Queues `count` tracks with live stream sources.
        fn enqueue(&self, count: usize) {
            let tracks = (0..count)
                .map(|i| {
                    Track::new(format!("https://youtu.be/{i}"), format!("track {i}"))
                        .with_stream(Some(format!("https://cdn/{i}")))
                })
                .collect();
            self.session.state().queue.enqueue(tracks, Placement::Append);
        }

        async fn connect(&self) -> Arc<FakeConnection> {
            self.player.connect(&self.session, VOICE).await.unwrap();
            self.voice.last_connection().unwrap()
        }
    }

    #[tokio::test]
    async fn single_track_plays_then_resets() {
        let h = Harness::new(FakeResolver::new());
        h.enqueue(1);
        let connection = h.connect().await;

        let run = h.player.play_music(&h.session).await.unwrap();
        connection.played(1).await;
        assert_eq!(connection.plays(), ["https://cdn/0"]);
        assert!(h.session.is_started());
        assert!(h.session.control_message().await.is_some());

        connection.finish();
        run.await.unwrap();

        assert!(h.session.is_dormant());
        assert!(!h.session.is_started());
        assert_eq!(connection.disconnects(), 1);
        assert!(h.session.control_message().await.is_none());
        assert_eq!(h.voice.mutes(), [false]);
    }

    #[tokio::test]
    async fn requests_while_ending_start_a_new_run() {
        let h = Harness::new(FakeResolver::new());
        h.enqueue(1);
        let first = h.connect().await;
        let run = h.player.play_music(&h.session).await.unwrap();
        first.played(1).await;

        // Stall the ending run on the control panel.
        let control = h.session.control().await;
        first.finish();
        while first.disconnects() == 0 {
            tokio::task::yield_now().await;
        }

        let request = {
            let player = Arc::clone(&h.player);
            let session = Arc::clone(&h.session);
            tokio::spawn(async move {
                let late = Track::new("https://youtu.be/late", "late")
                    .with_stream(Some("https://cdn/late".to_owned()));
                session.state().queue.enqueue(vec![late], Placement::Append);
                player.connect(&session, VOICE).await.unwrap();
                player.play_music(&session).await
            })
        };
        tokio::task::yield_now().await;
        drop(control);
        run.await.unwrap();

        let second_run = request.await.unwrap().unwrap();
        let second = h.voice.last_connection().unwrap();
        second.played(1).await;
        assert_eq!(second.plays(), ["https://cdn/late"]);
        assert_eq!(h.voice.connections().len(), 2);
        assert_eq!(h.session.queue().len(), 1);

        h.player.reset(&h.session).await;
        second_run.await.unwrap();
    }

    #[tokio::test]
    async fn next_in_the_middle_advances_by_one() {
        let h = Harness::new(FakeResolver::new());
        h.enqueue(5);
        let connection = h.connect().await;
        let run = h.player.play_music(&h.session).await.unwrap();

        for played in 1..=2 {
            connection.played(played).await;
            connection.finish();
        }
        connection.played(3).await;
        assert_eq!(h.session.cursor(), 2);

        assert!(h.player.next(&h.session, LISTENER).await);
        assert_eq!(h.session.cursor(), 2);
        assert_eq!(connection.stops(), 1);

        connection.played(4).await;
        assert_eq!(h.session.cursor(), 3);
        assert_eq!(connection.plays()[3], "https://cdn/3");
        assert!(h.chat.texts().iter().any(|text| text.contains("next track")));

        h.player.reset(&h.session).await;
        run.await.unwrap();
    }

    #[tokio::test]
    async fn next_on_the_last_track_starts_over() {
        let h = Harness::new(FakeResolver::new());
        h.enqueue(2);
        let connection = h.connect().await;
        let run = h.player.play_music(&h.session).await.unwrap();

        connection.played(1).await;
        connection.finish();
        connection.played(2).await;

        assert!(h.player.next(&h.session, LISTENER).await);
        assert_eq!(h.session.cursor(), -1);

        connection.played(3).await;
        assert_eq!(connection.plays()[2], "https://cdn/0");

        h.player.reset(&h.session).await;
        run.await.unwrap();
    }

    #[tokio::test]
    async fn three_failures_reset_the_session() {
        let h = Harness::new(FakeResolver::new());
        h.enqueue(5);
        h.voice.fail_plays(3);
        let connection = h.connect().await;

        let run = h.player.play_music(&h.session).await.unwrap();
        run.await.unwrap();

        assert_eq!(connection.plays().len(), 3);
        assert!(h.session.is_dormant());
        assert_eq!(connection.disconnects(), 1);

        let texts = h.chat.texts();
        let warnings = texts.iter().filter(|text| text.starts_with("Could not play")).count();
        assert_eq!(warnings, 3);
        assert!(texts.last().unwrap().starts_with("Playback stopped"));
    }

    #[tokio::test]
    async fn failures_are_skipped_within_budget() {
        let h = Harness::new(FakeResolver::new());
        h.enqueue(3);
        h.voice.fail_plays(2);
        let connection = h.connect().await;

        let run = h.player.play_music(&h.session).await.unwrap();
        connection.played(3).await;
        assert_eq!(h.session.cursor(), 2);
        assert!(h.session.is_started());

        connection.finish();
        run.await.unwrap();
        assert!(h.session.is_dormant());
    }

    #[tokio::test]
    async fn strangers_cannot_stop() {
        let h = Harness::new(FakeResolver::new());
        h.enqueue(3);
        let connection = h.connect().await;
        let run = h.player.play_music(&h.session).await.unwrap();
        connection.played(1).await;

        h.chat.forget();
        for button in Button::ALL {
            assert!(!h.player.press(&h.session, STRANGER, button).await);
        }

        assert!(h.chat.events().is_empty());
        assert_eq!(h.session.queue().len(), 3);
        assert_eq!(h.session.cursor(), 0);
        assert_eq!(connection.stops(), 0);
        assert_eq!(connection.disconnects(), 0);
        assert!(h.session.connection().is_some());

        h.player.reset(&h.session).await;
        run.await.unwrap();
    }

    #[tokio::test]
    async fn previous_before_playback_starts_at_the_beginning() {
        let h = Harness::new(FakeResolver::new());
        h.enqueue(3);
        let connection = h.connect().await;

        assert!(h.player.previous(&h.session, LISTENER).await);
        assert_eq!(h.session.cursor(), -1);

        let run = h.player.play_music(&h.session).await.unwrap();
        connection.played(1).await;
        assert_eq!(connection.plays(), ["https://cdn/0"]);
        assert_eq!(h.session.cursor(), 0);

        h.player.reset(&h.session).await;
        run.await.unwrap();
    }

    #[tokio::test]
    async fn second_play_only_refreshes_the_panel() {
        let h = Harness::new(FakeResolver::new());
        h.enqueue(2);
        let connection = h.connect().await;

        let run = h.player.play_music(&h.session).await.unwrap();
        connection.played(1).await;
        let panel = h.session.control_message().await.unwrap();

        assert!(h.player.play_music(&h.session).await.is_none());
        assert_ne!(h.session.control_message().await.unwrap(), panel);
        assert_eq!(connection.plays().len(), 1);

        h.player.reset(&h.session).await;
        run.await.unwrap();
    }

    #[tokio::test]
    async fn expired_streams_are_refreshed_onto_the_queue_only() {
        let h = Harness::new(FakeResolver::new().with_track(
            "https://youtu.be/0",
            "track 0",
            "https://cdn/fresh",
        ));
        h.enqueue(1);
        h.probe.kill("https://cdn/0");
        let connection = h.connect().await;

        let run = h.player.play_music(&h.session).await.unwrap();
        connection.played(1).await;

        assert_eq!(connection.plays(), ["https://cdn/fresh"]);
        assert_eq!(h.probe.probed(), ["https://cdn/0"]);
        assert_eq!(
            h.session.queue().entries()[0].stream(),
            Some("https://cdn/fresh")
        );
        assert!(h.cache.is_empty());

        connection.finish();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn attachments_are_never_resolved() {
        let h = Harness::new(FakeResolver::new());
        h.session.state().queue.enqueue(
            vec![Track::attachment("https://cdn.example/song.mp3", "song.mp3")],
            Placement::Append,
        );
        let connection = h.connect().await;

        let run = h.player.play_music(&h.session).await.unwrap();
        connection.played(1).await;
        assert_eq!(connection.plays(), ["https://cdn.example/song.mp3"]);
        assert!(h.probe.probed().is_empty());
        assert!(h.resolver.extractions().is_empty());

        connection.finish();
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn skips_while_loading_are_honored() {
        let h = Harness::new(
            FakeResolver::new()
                .with_track("https://youtu.be/slow", "slow", "https://cdn/slow")
                .with_delay(Duration::from_secs(5)),
        );
        h.session.state().queue.enqueue(
            vec![Track::new("https://youtu.be/slow", "slow")],
            Placement::Append,
        );
        h.enqueue(1);
        let connection = h.connect().await;

        let run = h.player.play_music(&h.session).await.unwrap();
        while h.resolver.extractions().is_empty() {
            tokio::task::yield_now().await;
        }

        assert!(h.player.next(&h.session, LISTENER).await);
        connection.played(1).await;
        assert_eq!(connection.plays(), ["https://cdn/0"]);
        assert_eq!(h.session.cursor(), 1);

        h.player.reset(&h.session).await;
        run.await.unwrap();
    }

    #[tokio::test]
    async fn pause_toggles_mute_and_label() {
        let h = Harness::new(FakeResolver::new());
        h.enqueue(1);
        let connection = h.connect().await;
        let run = h.player.play_music(&h.session).await.unwrap();
        connection.played(1).await;

        assert!(h.player.toggle_pause(&h.session, LISTENER).await);
        assert_eq!(connection.state(), PlaybackState::Paused);
        assert_eq!(h.voice.mutes().last(), Some(&true));
        let edited = h.chat.events().into_iter().any(|event| {
            matches!(event, ChatEvent::Edited { message, .. } if message.panel == Some(Panel { paused: true }))
        });
        assert!(edited);

        assert!(h.player.toggle_pause(&h.session, LISTENER).await);
        assert_eq!(connection.state(), PlaybackState::Playing);
        assert_eq!(h.voice.mutes().last(), Some(&false));

        h.player.reset(&h.session).await;
        run.await.unwrap();
    }

    #[tokio::test]
    async fn stop_resets_and_announces() {
        let h = Harness::new(FakeResolver::new());
        h.enqueue(2);
        let connection = h.connect().await;
        let run = h.player.play_music(&h.session).await.unwrap();
        connection.played(1).await;

        assert!(h.player.stop(&h.session, LISTENER).await);
        run.await.unwrap();

        assert!(h.session.is_dormant());
        assert_eq!(connection.disconnects(), 1);
        assert_eq!(connection.plays().len(), 1);
        let last = h.chat.sent().pop().unwrap();
        assert_eq!(last.tone, Tone::Error);
        assert!(last.text.contains("disconnected"));
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let h = Harness::new(FakeResolver::new());
        h.enqueue(2);
        let connection = h.connect().await;

        h.player.reset(&h.session).await;
        let once = (h.session.queue(), h.session.is_started());
        h.player.reset(&h.session).await;

        assert_eq!((h.session.queue(), h.session.is_started()), once);
        assert_eq!(connection.disconnects(), 1);
        assert!(h.session.is_dormant());
    }

    #[tokio::test]
    async fn failed_connections_reset() {
        let h = Harness::new(FakeResolver::new());
        h.enqueue(2);
        h.voice.refuse_connections();

        let err = h.player.connect(&h.session, VOICE).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert!(h.session.is_dormant());
    }
}
