//! Mixer lifecycle events
//!
//! The mixer thread publishes an event each time a voice leaves it. The
//! engine's queue watcher and tests subscribe to these instead of polling
//! voice handles.

use crate::playback::voice::{StopReason, VoiceCategory, VoiceId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixerEvent {
    /// A voice was retired from the active set
    VoiceStopped {
        id: VoiceId,
        category: VoiceCategory,
        reason: StopReason,
    },

    /// The mixer thread has exited
    Stopped,
}

/// Fan-out of mixer events to any number of subscribers.
///
/// Subscribers that have dropped their receiver are pruned on the next
/// publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<MixerEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<MixerEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: MixerEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
