//! A line-based chat transport on standard input and output.
//!
//! The console is a single guild with a single text channel and a single
//! user, who is always in the speaker's voice channel. Typed lines are parsed
//! as commands; messages are printed as they are sent or edited.
//!
//! ```text
//! > play never gonna give you up, https://youtu.be/dQw4w9WgXcQ
//! > next
//! > save https://youtu.be/dQw4w9WgXcQ rick
//! > quit
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{
    chat::{Button, ChannelId, Chat, GuildId, Message, MessageId, Tone, UserId},
    commands::{Command, Invocation, Jukebox},
    error::Result,
    queue::Placement,
};

/// A typed line.
#[derive(Clone, Debug, PartialEq, Eq, Parser)]
#[command(multicall = true)]
enum Line {
    /// Queue URLs, saved names or search queries, separated by commas
    #[command(alias = "p")]
    Play {
        /// Play right after the current track
        #[arg(long, conflicts_with = "mix")]
        next: bool,

        /// Mix into the rest of the queue
        #[arg(long)]
        mix: bool,

        /// Shuffle the new tracks
        #[arg(long)]
        shuffle: bool,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        request: Vec<String>,
    },
    /// Skip to the next track
    #[command(alias = "n")]
    Next,
    /// Skip back to the previous track
    Previous,
    /// Pause or resume
    Pause,
    /// Stop playback and clear the queue
    Stop,
    /// Save a URL under a short name
    Save { url: String, name: String },
    /// Forget a saved name
    Forget { name: String },
    /// Show the names saved for a URL
    Names { url_or_name: String },
    /// List every saved URL
    Tracklist,
    /// Evict a URL from the cache, or everything
    ClearCache { url_or_name: Option<String> },
    /// Show saved names starting with a prefix
    Complete {
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Show the queue
    Queue,
    /// Leave the voice channel, leaving the bot alone
    Leave,
    /// Rejoin the voice channel
    Join,
    #[command(alias = "exit")]
    Quit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Action {
    Run(Command),
    Complete(String),
    Queue,
    Occupancy(usize),
    Quit,
}

impl From<Line> for Action {
    fn from(line: Line) -> Self {
        let command = match line {
            Line::Play {
                next,
                mix,
                shuffle,
                request,
            } => {
                let placement = if next {
                    Placement::InsertNext
                } else if mix {
                    Placement::MixWithQueue
                } else {
                    Placement::Append
                };
                Command::Play {
                    request: request.join(" "),
                    attachments: Vec::new(),
                    placement,
                    shuffle,
                }
            }
            Line::Next => Command::Press(Button::Next),
            Line::Previous => Command::Press(Button::Previous),
            Line::Pause => Command::Press(Button::PlayPause),
            Line::Stop => Command::Press(Button::Stop),
            Line::Save { url, name } => Command::Save { url, name },
            Line::Forget { name } => Command::Forget { name },
            Line::Names { url_or_name } => Command::Names { url_or_name },
            Line::Tracklist => Command::Tracklist,
            Line::ClearCache { url_or_name } => Command::ClearCache { url_or_name },
            Line::Complete { prefix } => return Self::Complete(prefix),
            Line::Queue => return Self::Queue,
            Line::Leave => return Self::Occupancy(1),
            Line::Join => return Self::Occupancy(2),
            Line::Quit => return Self::Quit,
        };
        Self::Run(command)
    }
}

fn parse(line: &str) -> std::result::Result<Action, clap::Error> {
    Line::try_parse_from(line.split_whitespace()).map(Action::from)
}

fn render(message: &Message) -> String {
    let marker = match message.tone {
        Tone::Neutral => "",
        Tone::Success => "+ ",
        Tone::Notice => "~ ",
        Tone::Error => "! ",
        Tone::Player => "> ",
    };

    let mut rendered = format!("{marker}{}", message.text);
    if let Some(panel) = message.panel {
        rendered.push_str("\n[ ");
        rendered.push_str(&panel.labels().join(" "));
        rendered.push_str(" ]");
    }
    rendered
}

#[derive(Default)]
pub struct Console {
    next_id: AtomicU64,
}

impl Console {
    pub const GUILD: GuildId = GuildId(0);
    pub const CHANNEL: ChannelId = ChannelId(1);
    pub const USER: UserId = UserId(1);

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn invocation() -> Invocation {
        Invocation {
            guild: Self::GUILD,
            channel: Self::CHANNEL,
            user: Self::USER,
        }
    }

    /// Designates the console as the DJ channel unless one is set.
    pub async fn prepare(&self, jukebox: &Jukebox) {
        if jukebox.channels().get(Self::GUILD).is_none() {
            jukebox.channels().set(Self::GUILD, Self::CHANNEL).await;
        }
    }

    /// Reads commands until standard input closes or `quit` is typed.
    ///
    /// # Errors
    ///
    /// Fails when standard input cannot be read.
    pub async fn run(&self, jukebox: &Jukebox) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            match parse(&line) {
                Ok(Action::Quit) => break,
                Ok(action) => self.perform(jukebox, action).await,
                Err(e) => println!("{}", e.render()),
            }
        }
        Ok(())
    }

    async fn perform(&self, jukebox: &Jukebox, action: Action) {
        match action {
            Action::Run(command) => jukebox.dispatch(&Self::invocation(), command).await,
            Action::Complete(prefix) => {
                println!("{}", jukebox.complete(Self::GUILD, &prefix).join(" "));
            }
            Action::Queue => {
                let Some(session) = jukebox.session(Self::GUILD) else {
                    println!("{}", crate::control::Controls::END_OF_QUEUE);
                    return;
                };
                let queue = session.queue();
                for (index, track) in queue.entries().iter().enumerate() {
                    let marker = if queue.position() == Some(index) { '>' } else { ' ' };
                    println!("{marker} {:>3}. {}", index + 1, track.title());
                }
            }
            Action::Occupancy(members) => {
                // The watcher runs detached.
                let _ = jukebox.voice_state_update(Self::GUILD, members);
            }
            Action::Quit => {}
        }
    }
}

#[async_trait]
impl Chat for Console {
    async fn send(&self, _channel: ChannelId, message: Message) -> Result<MessageId> {
        let id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        println!("{}", render(&message));
        Ok(id)
    }

    async fn edit(&self, _channel: ChannelId, id: MessageId, message: Message) -> Result<()> {
        trace!("editing message {id}");
        println!("{}", render(&message));
        Ok(())
    }

    async fn delete(&self, _channel: ChannelId, id: MessageId) -> Result<()> {
        trace!("deleting message {id}");
        Ok(())
    }

    fn mention(&self, _user: UserId) -> String {
        "You".to_owned()
    }
}
