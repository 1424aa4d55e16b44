//! The per-guild track queue and its cursor.
//!
//! The queue is a plain value: it holds no locks and performs no I/O. The
//! session guards it, the playback loop advances it and commands reorder it.
//!
//! The cursor points at the current (or about-to-play) track. A cursor of
//! `-1` means "wrapped": the next unconditional advance of the playback loop
//! moves it back to the start of the queue.

use crate::model::Track;

/// Where enqueued tracks go.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Placement {
    /// At the end of the queue.
    #[default]
    Append,

    /// Right after the current track.
    InsertNext,

    /// Shuffled together with everything after the next track. History,
    /// the current and the next track keep their order.
    MixWithQueue,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Queue {
    entries: Vec<Track>,
    cursor: isize,
}

impl Queue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn cursor(&self) -> isize {
        self.cursor
    }

    #[must_use]
    pub fn entries(&self) -> &[Track] {
        &self.entries
    }

    #[expect(clippy::cast_possible_wrap)]
    fn end(&self) -> isize {
        self.entries.len() as isize
    }

    /// Index into the queue after `offset` tracks from the cursor, clamped to
    /// the queue bounds.
    #[expect(clippy::cast_sign_loss)]
    fn split_point(&self, offset: isize) -> usize {
        (self.cursor + offset).clamp(0, self.end()) as usize
    }

    /// Adds `tracks` to the queue. Enqueuing nothing is a no-op.
    pub fn enqueue(&mut self, tracks: Vec<Track>, placement: Placement) {
        if tracks.is_empty() {
            return;
        }

        match placement {
            Placement::Append => self.entries.extend(tracks),
            Placement::InsertNext => {
                let at = self.split_point(1);
                self.entries.splice(at..at, tracks);
            }
            Placement::MixWithQueue => {
                let at = self.split_point(2);
                let mut remainder = self.entries.split_off(at);
                remainder.extend(tracks);
                fastrand::shuffle(&mut remainder);
                self.entries.extend(remainder);
            }
        }
    }

    /// Prepares a skip to the next track. When the current track is the last
    /// one, the cursor wraps so that playback restarts at the beginning.
    ///
    /// Returns whether the cursor wrapped.
    pub fn advance_to_next(&mut self) -> bool {
        let wraps = self.cursor + 1 >= self.end();
        if wraps {
            self.cursor = -1;
        }
        wraps
    }

    /// Prepares a skip to the previous track, compensating for the advance
    /// that follows the stop of the current stream.
    pub fn advance_to_previous(&mut self) {
        self.cursor = (self.cursor - 2).max(-1);
    }

    /// The unconditional advance after a track finished or failed.
    pub fn advance(&mut self) {
        self.cursor += 1;
    }

    /// Moves a wrapped cursor back onto the first track.
    pub fn rewind_if_wrapped(&mut self) {
        if self.cursor < 0 {
            self.cursor = 0;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    /// Index of the current track, if the cursor points into the queue.
    #[must_use]
    #[expect(clippy::cast_sign_loss)]
    pub fn position(&self) -> Option<usize> {
        (0..self.end())
            .contains(&self.cursor)
            .then_some(self.cursor as usize)
    }

    /// Whether tracks follow the one under the cursor. A wrapped cursor has
    /// the whole queue ahead.
    #[must_use]
    pub fn has_upcoming(&self) -> bool {
        self.cursor + 1 < self.end()
    }

    #[must_use]
    pub fn current(&self) -> Option<&Track> {
        self.position().and_then(|index| self.entries.get(index))
    }

    /// The track shown as current on the control panel and the one after it.
    /// A wrapped cursor shows the first track.
    #[must_use]
    #[expect(clippy::cast_sign_loss)]
    pub fn on_display(&self) -> (Option<&Track>, Option<&Track>) {
        let index = self.cursor.max(0) as usize;
        (self.entries.get(index), self.entries.get(index + 1))
    }

    /// Writes a freshly acquired stream source onto the entry at `index`, as
    /// long as it still holds the track with `url`.
    pub fn set_stream(&mut self, index: usize, url: &str, stream: &str) -> bool {
        match self.entries.get_mut(index) {
            Some(track) if track.url() == url => {
                track.set_stream(stream);
                true
            }
            _ => false,
        }
    }
}
