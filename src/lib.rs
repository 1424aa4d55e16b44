//! A chat-bot jukebox.
//!
//! Every guild (server) gets one playback [`session::Session`] holding a
//! queue of tracks and a voice connection. Users request URLs, saved names or
//! search queries through a chat transport; the [`commands::Jukebox`] resolves
//! them through the [`cache::ResolverCache`], queues the results and lets the
//! [`player::Player`] stream them into the users' voice channel, one at a
//! time, while a "now playing" control panel offers previous, play/pause,
//! stop and next buttons.
//!
//! The chat platform, the voice gateway and the resolver are traits:
//! [`chat::Chat`], [`voice::VoiceGateway`] and [`resolver::Resolver`]. The
//! crate ships reference implementations that play on the local speaker
//! ([`speaker::Speaker`]) and resolve with `yt-dlp` ([`resolver::YtDlp`]).
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod aliases;
pub mod cache;
pub mod channels;
pub mod chat;
pub mod commands;
pub mod config;
#[cfg(feature = "binary")]
pub mod console;
pub mod control;
pub mod error;
pub mod http;
pub mod links;
pub mod model;
pub mod player;
pub mod queue;
pub mod reaper;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod signal;
pub mod speaker;
pub mod store;
pub mod voice;

#[cfg(test)]
mod testing;
