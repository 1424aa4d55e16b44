//! The chat transport contract.
//!
//! A chat platform delivers commands and renders messages. The core only
//! needs to send, edit and delete messages in a text channel; everything else
//! (slash command registration, interaction plumbing) belongs to the
//! transport.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

macro_rules! id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

id!(
    /// A guild (server). Every guild has at most one playback session.
    GuildId
);
id!(
    /// A text or voice channel.
    ChannelId
);
id!(UserId);
id!(MessageId);

/// Visual tone of a message, rendered by the transport as a color.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Tone {
    #[default]
    Neutral,
    /// Playback starts.
    Success,
    /// The queue changes while something is playing.
    Notice,
    Error,
    /// The "now playing" panel.
    Player,
}

/// The four controls on the "now playing" panel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Button {
    Previous,
    PlayPause,
    Stop,
    Next,
}

impl Button {
    /// Buttons in display order.
    pub const ALL: [Button; 4] = [Self::Previous, Self::PlayPause, Self::Stop, Self::Next];

    /// Emoji label. The play/pause button shows "play" while paused.
    #[must_use]
    pub fn label(self, paused: bool) -> &'static str {
        match self {
            Self::Previous => "⏪",
            Self::PlayPause if paused => "▶️",
            Self::PlayPause => "⏸",
            Self::Stop => "⏹",
            Self::Next => "⏩",
        }
    }
}

/// Interactive controls attached to a message.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Panel {
    pub paused: bool,
}

impl Panel {
    /// Labels in display order.
    #[must_use]
    pub fn labels(&self) -> [&'static str; 4] {
        Button::ALL.map(|button| button.label(self.paused))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Message {
    pub text: String,
    pub tone: Tone,
    /// Delete the message after this long.
    pub expires_after: Option<Duration>,
    /// Only visible to the invoking user, where the platform supports it.
    pub private: bool,
    pub panel: Option<Panel>,
}

impl Message {
    #[must_use]
    pub fn new(text: impl Into<String>, tone: Tone) -> Self {
        Self {
            text: text.into(),
            tone,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, Tone::Error)
    }

    #[must_use]
    pub fn expiring(mut self, after: Duration) -> Self {
        self.expires_after = Some(after);
        self
    }

    #[must_use]
    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    #[must_use]
    pub fn with_panel(mut self, panel: Panel) -> Self {
        self.panel = Some(panel);
        self
    }
}

/// A question with a fixed set of answers, asked of a single user.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Prompt {
    pub text: String,
    pub choices: Vec<String>,
    /// How long the asker waits for an answer before falling back to its
    /// default.
    pub timeout: Duration,
}

impl Prompt {
    #[must_use]
    pub fn new<I, S>(text: impl Into<String>, choices: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text: text.into(),
            choices: choices.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    /// A question answered with "Yes" (0) or "No" (1).
    #[must_use]
    pub fn yes_no(text: impl Into<String>, timeout: Duration) -> Self {
        Self::new(text, ["Yes", "No"], timeout)
    }
}

/// A file attached to a chat message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
}

impl Attachment {
    /// Whether the attachment is audio or video that can be played.
    #[must_use]
    pub fn is_playable(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|typ| typ.contains("audio") || typ.contains("video"))
    }
}

#[async_trait]
pub trait Chat: Send + Sync {
    /// Sends a message and returns its id.
    async fn send(&self, channel: ChannelId, message: Message) -> Result<MessageId>;

    /// Replaces the contents of a message in place.
    async fn edit(&self, channel: ChannelId, id: MessageId, message: Message) -> Result<()>;

    async fn delete(&self, channel: ChannelId, id: MessageId) -> Result<()>;

    /// Asks `user` to pick one of the prompt's choices in `channel` and
    /// returns the index of the answer, or `None` if nobody answered.
    ///
    /// Callers bound the wait by the prompt's timeout. Transports without
    /// interactive components never get an answer.
    async fn prompt(&self, channel: ChannelId, user: UserId, prompt: Prompt) -> Result<Option<usize>> {
        trace!("channel {channel}: cannot ask {user} \"{}\"", prompt.text);
        Ok(None)
    }

    /// Mentions a user in message text.
    fn mention(&self, user: UserId) -> String {
        format!("<@{user}>")
    }
}
