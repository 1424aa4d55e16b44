//! The "now playing" control panel.
//!
//! There is at most one control message per session. Every render replaces
//! it: the old message is deleted before the new one is sent, under the
//! session's control lock.

use std::sync::Arc;

use crate::{
    chat::{Chat, Message, Panel, Tone},
    model::Track,
    session::{ControlMessage, Session},
    voice::PlaybackState,
};

pub struct Controls {
    chat: Arc<dyn Chat>,
}

impl Controls {
    pub const END_OF_QUEUE: &'static str = "*End of queue*";

    #[must_use]
    pub fn new(chat: Arc<dyn Chat>) -> Self {
        Self { chat }
    }

    fn describe(current: &Track, next: Option<&Track>) -> String {
        let next = next.map_or_else(|| Self::END_OF_QUEUE.to_owned(), Track::link);
        format!("**Now playing: {}**\nNext: {next}", current.link())
    }

    /// Replaces the control message with one showing the current and next
    /// track. Does nothing for a session without voice connection and queue.
    pub async fn render(&self, session: &Session) {
        let mut control = session.control().await;

        let (channel, text, paused) = {
            let state = session.state();
            if state.connection.is_none() && state.queue.is_empty() {
                return;
            }

            let (current, next) = state.queue.on_display();
            let Some(current) = current else {
                trace!("guild {}: nothing to show", session.guild());
                return;
            };

            let Some(channel) = state.channel else {
                debug!("guild {}: no channel for the control panel", session.guild());
                return;
            };

            let paused = state
                .connection
                .as_ref()
                .is_some_and(|connection| connection.state() == PlaybackState::Paused);
            (channel, Self::describe(current, next), paused)
        };

        if let Some(old) = control.take() {
            if let Err(e) = self.chat.delete(old.channel, old.id).await {
                debug!("could not delete control message {}: {e}", old.id);
            }
        }

        let message = Message::new(&text, Tone::Player).with_panel(Panel { paused });
        match self.chat.send(channel, message).await {
            Ok(id) => *control = Some(ControlMessage { channel, id, text }),
            Err(e) => warn!("guild {}: could not send control panel: {e}", session.guild()),
        }
    }

    /// Updates the play/pause label of the control message in place.
    pub async fn refresh_pause(&self, session: &Session, paused: bool) {
        let control = session.control().await;
        let Some(current) = control.as_ref() else {
            return;
        };

        let message = Message::new(&current.text, Tone::Player).with_panel(Panel { paused });
        if let Err(e) = self.chat.edit(current.channel, current.id, message).await {
            debug!("could not update control message {}: {e}", current.id);
        }
    }

    /// Deletes the control message, if any.
    pub async fn delete(&self, session: &Session) {
        let Some(old) = session.control().await.take() else {
            return;
        };

        if let Err(e) = self.chat.delete(old.channel, old.id).await {
            debug!("could not delete control message {}: {e}", old.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chat::{ChannelId, GuildId},
        queue::Placement,
        testing::{ChatEvent, FakeChat},
    };

    fn session(titles: &[&str]) -> Session {
        let session = Session::new(GuildId(1));
        session.set_channel(Some(ChannelId(10)));
        session.state().queue.enqueue(
            titles
                .iter()
                .map(|title| Track::new(format!("https://example.com/{title}"), *title))
                .collect(),
            Placement::Append,
        );
        session
    }

    #[tokio::test]
    async fn render_replaces_the_previous_message() {
        let chat = Arc::new(FakeChat::new());
        let controls = Controls::new(chat.clone());
        let session = session(&["a", "b"]);

        controls.render(&session).await;
        let first = session.control_message().await.unwrap();
        controls.render(&session).await;
        let second = session.control_message().await.unwrap();

        assert_ne!(first, second);
        let events = chat.events();
        assert!(matches!(events[1], ChatEvent::Deleted { id, .. } if id == first));
        assert!(matches!(events[2], ChatEvent::Sent { id, .. } if id == second));
    }

    #[tokio::test]
    async fn render_shows_current_and_next() {
        let chat = Arc::new(FakeChat::new());
        let controls = Controls::new(chat.clone());

        let session = session(&["a", "b"]);
        controls.render(&session).await;
        let text = &chat.sent()[0].text;
        assert!(text.contains("[a](https://example.com/a)"));
        assert!(text.contains("[b](https://example.com/b)"));

        let session = self::session(&["last"]);
        controls.render(&session).await;
        assert!(chat.sent()[1].text.contains(Controls::END_OF_QUEUE));
        assert_eq!(chat.sent()[1].panel, Some(Panel { paused: false }));
    }

    #[tokio::test]
    async fn empty_sessions_render_nothing() {
        let chat = Arc::new(FakeChat::new());
        let controls = Controls::new(chat.clone());

        controls.render(&session(&[])).await;
        assert!(chat.events().is_empty());
    }

    #[tokio::test]
    async fn pause_label_is_edited_in_place() {
        let chat = Arc::new(FakeChat::new());
        let controls = Controls::new(chat.clone());
        let session = session(&["a"]);

        controls.render(&session).await;
        let id = session.control_message().await.unwrap();
        controls.refresh_pause(&session, true).await;

        let events = chat.events();
        let ChatEvent::Edited { id: edited, message, .. } = &events[1] else {
            panic!("expected an edit, got {:?}", events[1]);
        };
        assert_eq!(*edited, id);
        assert_eq!(message.panel, Some(Panel { paused: true }));
    }
}
