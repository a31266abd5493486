//! Music playlist

use std::collections::VecDeque;

/// Ordered list of music keys waiting to play.
///
/// Every key ever enqueued is also remembered in playlist order, so a
/// looping queue can start over once it runs dry.
#[derive(Debug, Default, Clone)]
pub struct MusicQueue {
    pending: VecDeque<String>,
    playlist: Vec<String>,
    looping: bool,
}

impl MusicQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, key: impl Into<String>) {
        let key = key.into();
        self.playlist.push(key.clone());
        self.pending.push_back(key);
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Take the next key, refilling from the playlist when looping.
    pub fn next_key(&mut self) -> Option<String> {
        if self.pending.is_empty() && self.looping {
            self.pending.extend(self.playlist.iter().cloned());
        }
        self.pending.pop_front()
    }

    /// Keys still to play in this pass
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Keys remembered for looping
    pub fn playlist_len(&self) -> usize {
        self.playlist.len()
    }

    /// Forget every key, including the loop playlist
    pub fn clear(&mut self) {
        self.pending.clear();
        self.playlist.clear();
    }
}
