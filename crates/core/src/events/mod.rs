use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{AnalysisSnapshot, Parameter, StageRef, Track};

/// Everything the core reports to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum PlayerEvent {
    ParameterChanged {
        stage: StageRef,
        parameter: Parameter,
        value: f32,
    },
    TrackSelected {
        index: usize,
        track: Track,
    },
    AnalysisSnapshot(AnalysisSnapshot),
}

/// Events a subscriber may leave unread before new ones are dropped for it.
/// Roughly four seconds of analysis snapshots at 60 Hz.
pub const SUBSCRIBER_CAPACITY: usize = 256;

/// Publish/subscribe hub. Clones share the same subscriber list, so the
/// graph, the playlist controller and the sampler can each hold one.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<PlayerEvent>>>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber. Dropping the receiver unsubscribes it.
    ///
    /// The receiver buffers at most [`SUBSCRIBER_CAPACITY`] events; while it
    /// is full, newer events are dropped for that subscriber only.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = bounded(SUBSCRIBER_CAPACITY);
        self.lock().push(tx);
        rx
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Delivers `event` to every subscriber without blocking.
    pub fn publish(&self, event: PlayerEvent) {
        self.lock()
            .retain(|subscriber| match subscriber.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    trace!("subscriber queue full, dropping event");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    // A panic while holding the list cannot leave it half-updated.
    fn lock(&self) -> MutexGuard<'_, Vec<Sender<PlayerEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selected(index: usize) -> PlayerEvent {
        PlayerEvent::TrackSelected {
            index,
            track: Track::new("a.mp3"),
        }
    }

    #[test]
    fn fans_out_to_every_subscriber() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.clone().subscribe();

        bus.publish(selected(0));

        assert_eq!(first.try_recv().unwrap(), selected(0));
        assert_eq!(second.try_recv().unwrap(), selected(0));
    }

    #[test]
    fn drops_disconnected_subscribers() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.publish(selected(1));

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_iter().count(), 1);
    }

    #[test]
    fn stalled_subscriber_stays_bounded() {
        let bus = EventBus::new();
        let stalled = bus.subscribe();
        let active = bus.subscribe();

        for index in 0..SUBSCRIBER_CAPACITY + 10 {
            bus.publish(selected(index));
            assert_eq!(active.try_recv().unwrap(), selected(index));
        }

        assert_eq!(bus.subscriber_count(), 2);
        assert_eq!(stalled.len(), SUBSCRIBER_CAPACITY);
        assert_eq!(stalled.try_recv().unwrap(), selected(0));

        bus.publish(selected(999));
        assert_eq!(stalled.try_iter().last().unwrap(), selected(999));
    }

    #[test]
    fn serialises_with_event_tag() {
        let json = serde_json::to_value(selected(2)).unwrap();
        assert_eq!(json["event"], "track-selected");
        assert_eq!(json["index"], 2);
        assert_eq!(json["track"]["src"], "a.mp3");
    }
}
