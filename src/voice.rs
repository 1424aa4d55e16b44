//! The audio sink contract.
//!
//! A [`VoiceGateway`] joins voice channels and knows who is in them. A
//! [`VoiceConnection`] streams one source at a time and publishes its
//! [`PlaybackState`] on a watch channel, which is how the playback loop
//! learns that a stream ended or was stopped.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    chat::{ChannelId, GuildId, UserId},
    error::Result,
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    /// Nothing is streaming: the stream ended, failed or was stopped.
    #[default]
    Idle,
    Playing,
    Paused,
}

impl PlaybackState {
    #[must_use]
    pub fn is_active(self) -> bool {
        self != Self::Idle
    }
}

/// Arguments for the audio pipe that reads the stream source.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransportOptions {
    /// Placed before the input, for options about reading the source.
    pub before: Vec<String>,
    /// Placed after the input, for options about the output.
    pub after: Vec<String>,
}

impl Default for TransportOptions {
    /// Reconnects dropped HTTP streams for up to five seconds and discards
    /// any video.
    fn default() -> Self {
        let args = |list: &[&str]| list.iter().map(|&arg| arg.to_owned()).collect();
        Self {
            before: args(&[
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "5",
            ]),
            after: args(&["-vn"]),
        }
    }
}

#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// The voice channel this connection streams into.
    fn channel(&self) -> ChannelId;

    /// Starts streaming `source`, replacing whatever was playing.
    async fn play(&self, source: &str, options: &TransportOptions) -> Result<()>;

    /// Stops the current stream. The state becomes `Idle`.
    fn stop(&self);

    fn pause(&self);

    fn resume(&self);

    fn state(&self) -> PlaybackState;

    /// Subscribes to playback state changes.
    fn subscribe(&self) -> watch::Receiver<PlaybackState>;

    /// Leaves the voice channel. `force` skips any graceful handshake.
    async fn disconnect(&self, force: bool) -> Result<()>;
}

#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(&self, guild: GuildId, channel: ChannelId)
        -> Result<Arc<dyn VoiceConnection>>;

    /// The voice channel `user` is currently in, if any.
    fn voice_channel(&self, guild: GuildId, user: UserId) -> Option<ChannelId>;

    /// Server-mutes or unmutes the bot itself.
    async fn set_self_mute(&self, guild: GuildId, mute: bool) -> Result<()>;
}
