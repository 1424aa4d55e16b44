//! Per-guild playback state.
//!
//! A [`Session`] owns the queue, the voice connection and the bookkeeping
//! that keeps exactly one playback loop running per guild:
//!
//! * `started` is set while a loop consumes the queue.
//! * Every reset bumps the run generation and cancels the loop's token. A
//!   loop only touches state while its generation is current.
//! * Every skip bumps the skip count, so a loop that was busy acquiring a
//!   stream notices that its track was skipped meanwhile.
//!
//! Renders of the control panel are serialized by the control lock, which
//! also holds the handle of the live control message.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    chat::{ChannelId, GuildId, MessageId},
    queue::Queue,
    voice::{PlaybackState, VoiceConnection},
};

/// The live "now playing" message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ControlMessage {
    pub channel: ChannelId,
    pub id: MessageId,
    pub text: String,
}

/// A playback loop's claim on the session.
#[derive(Clone, Debug)]
pub struct Run {
    pub generation: u64,
    pub token: CancellationToken,
}

/// What a reset detached from the session.
pub struct Teardown {
    pub connection: Option<Arc<dyn VoiceConnection>>,
}

pub(crate) struct State {
    pub queue: Queue,
    pub started: bool,
    /// Text channel for announcements and the control panel.
    pub channel: Option<ChannelId>,
    pub connection: Option<Arc<dyn VoiceConnection>>,
    pub generation: u64,
    pub token: CancellationToken,
    pub skips: u64,
}

impl State {
    /// Clears the queue, ends the current run and detaches the voice
    /// connection.
    pub(crate) fn release(&mut self) -> Teardown {
        self.token.cancel();
        self.token = CancellationToken::new();
        self.generation += 1;
        self.skips += 1;
        self.queue.clear();
        self.started = false;

        Teardown {
            connection: self.connection.take(),
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self {
            queue: Queue::new(),
            started: false,
            channel: None,
            connection: None,
            generation: 0,
            token: CancellationToken::new(),
            skips: 0,
        }
    }
}

pub struct Session {
    guild: GuildId,
    state: Mutex<State>,
    control: tokio::sync::Mutex<Option<ControlMessage>>,
    connecting: tokio::sync::Mutex<()>,
    pending_leave: AtomicBool,
    occupancy: watch::Sender<usize>,
}

impl Session {
    #[must_use]
    pub fn new(guild: GuildId) -> Self {
        Self {
            guild,
            state: Mutex::new(State::default()),
            control: tokio::sync::Mutex::new(None),
            connecting: tokio::sync::Mutex::new(()),
            pending_leave: AtomicBool::new(false),
            occupancy: watch::Sender::new(0),
        }
    }

    #[must_use]
    pub fn guild(&self) -> GuildId {
        self.guild
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the queue and its cursor.
    #[must_use]
    pub fn queue(&self) -> Queue {
        self.state().queue.clone()
    }

    #[must_use]
    pub fn cursor(&self) -> isize {
        self.state().queue.cursor()
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state().started
    }

    #[must_use]
    pub fn channel(&self) -> Option<ChannelId> {
        self.state().channel
    }

    pub fn set_channel(&self, channel: Option<ChannelId>) {
        self.state().channel = channel;
    }

    #[must_use]
    pub fn connection(&self) -> Option<Arc<dyn VoiceConnection>> {
        self.state().connection.clone()
    }

    /// Playback state of the voice connection; `Idle` without one.
    #[must_use]
    pub fn playback(&self) -> PlaybackState {
        self.connection()
            .map_or(PlaybackState::Idle, |connection| connection.state())
    }

    /// Whether the session holds nothing worth keeping: no queue and no voice
    /// connection.
    #[must_use]
    pub fn is_dormant(&self) -> bool {
        let state = self.state();
        state.queue.is_empty() && state.connection.is_none()
    }

    /// Claims the session for a new playback loop, unless one is running.
    pub(crate) fn start(&self) -> Option<Run> {
        let mut state = self.state();
        if state.started {
            return None;
        }

        state.started = true;
        Some(Run {
            generation: state.generation,
            token: state.token.clone(),
        })
    }

    /// Clears the queue, releases the loop and detaches the voice connection.
    ///
    /// With `generation`, only tears down when that run is still current, so
    /// a finishing loop cannot reset a session that was restarted meanwhile.
    pub(crate) fn teardown(&self, generation: Option<u64>) -> Option<Teardown> {
        let mut state = self.state();
        if generation.is_some_and(|generation| generation != state.generation) {
            return None;
        }

        Some(state.release())
    }

    /// The token the next reset cancels, while the session is connected.
    pub(crate) fn until_reset(&self) -> Option<CancellationToken> {
        let state = self.state();
        state.connection.as_ref().map(|_| state.token.clone())
    }

    pub(crate) fn attach(&self, connection: Arc<dyn VoiceConnection>) {
        self.state().connection = Some(connection);
    }

    /// The control lock, guarding the handle of the control message.
    pub(crate) async fn control(&self) -> tokio::sync::MutexGuard<'_, Option<ControlMessage>> {
        self.control.lock().await
    }

    /// Serializes voice connection attempts.
    pub(crate) async fn connecting(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.connecting.lock().await
    }

    /// The id of the control message, if one is shown.
    pub async fn control_message(&self) -> Option<MessageId> {
        self.control().await.as_ref().map(|message| message.id)
    }

    /// Marks an idle watcher as pending. Returns `false` if one already is.
    pub(crate) fn begin_leave(&self) -> bool {
        self.pending_leave
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_leave(&self) {
        self.pending_leave.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_leave_pending(&self) -> bool {
        self.pending_leave.load(Ordering::Acquire)
    }

    /// Records how many members, the bot included, are in its voice channel.
    pub fn set_occupancy(&self, members: usize) {
        self.occupancy.send_replace(members);
    }

    pub(crate) fn occupancy(&self) -> watch::Receiver<usize> {
        self.occupancy.subscribe()
    }
}
