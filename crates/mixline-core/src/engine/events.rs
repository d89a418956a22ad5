//! Playback lifecycle notifications
//!
//! The mixing thread never runs user callbacks. It pushes [`Notification`]s
//! into an unbounded crossbeam channel (a send never blocks) and the
//! `mixline-events` dispatcher thread invokes per-sequence listeners, then
//! fans the event out to [`EventBus`] subscribers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::sequence::{SequenceListener, TrackSequence};
use crate::types::SequenceId;

/// Lifecycle events published by the mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A sequence was mixed for the first time
    Started { sequence: SequenceId },
    /// A sequence left the schedule; `final_frame` is its last rendered frame
    Stopped { sequence: SequenceId, final_frame: u64 },
    /// The mixing thread acquired the device
    EngineStarted { session: u64 },
    /// The mixing thread released the device and exited
    EngineStopped { session: u64 },
}

impl PlaybackEvent {
    /// Sequence the event concerns, if any
    pub fn sequence(&self) -> Option<SequenceId> {
        match *self {
            PlaybackEvent::Started { sequence } | PlaybackEvent::Stopped { sequence, .. } => {
                Some(sequence)
            }
            _ => None,
        }
    }
}

/// An event plus the listener of the sequence it concerns
pub(crate) struct Notification {
    pub event: PlaybackEvent,
    pub listener: Option<Arc<dyn SequenceListener>>,
}

impl Notification {
    pub fn engine(event: PlaybackEvent) -> Self {
        Self {
            event,
            listener: None,
        }
    }

    pub fn sequence(track: &TrackSequence, event: PlaybackEvent) -> Self {
        Self {
            event,
            listener: track.listener().cloned(),
        }
    }
}

/// Fan-out of playback events to any number of subscribers
///
/// Each subscriber gets its own bounded channel. A subscriber that falls
/// behind loses events rather than stalling the others; dropped receivers
/// are pruned on the next publish.
pub struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<Sender<PlaybackEvent>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = channel::bounded(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Deliver `event` to all live subscribers; returns how many received it
    pub fn publish(&self, event: PlaybackEvent) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let mut delivered = 0;
        subscribers.retain(|tx| match tx.try_send(event) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                log::debug!("Event subscriber lagging, dropped {:?}", event);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Owns the notification thread
///
/// The thread exits once every sender (the dispatcher's and the engines')
/// has been dropped.
pub(crate) struct NotificationDispatcher {
    sender: Sender<Notification>,
    _handle: JoinHandle<()>,
}

impl NotificationDispatcher {
    pub fn spawn(bus: Arc<EventBus>) -> std::io::Result<Self> {
        let (sender, receiver) = channel::unbounded::<Notification>();
        let handle = thread::Builder::new()
            .name("mixline-events".into())
            .spawn(move || {
                for notification in receiver {
                    deliver(&bus, notification);
                }
                log::debug!("Notification dispatcher exiting");
            })?;
        Ok(Self {
            sender,
            _handle: handle,
        })
    }

    pub fn sender(&self) -> Sender<Notification> {
        self.sender.clone()
    }
}

fn deliver(bus: &EventBus, notification: Notification) {
    let Notification { event, listener } = notification;

    if let Some(listener) = listener {
        let outcome = catch_unwind(AssertUnwindSafe(|| match event {
            PlaybackEvent::Started { sequence } => listener.on_started(sequence),
            PlaybackEvent::Stopped {
                sequence,
                final_frame,
            } => listener.on_stopped(sequence, final_frame),
            _ => {}
        }));
        if outcome.is_err() {
            log::error!("Sequence listener panicked handling {:?}", event);
        }
    }

    bus.publish(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[test]
    fn test_event_bus_fans_out() {
        let bus = EventBus::new(16);
        let a = bus.subscribe();
        let b = bus.subscribe();

        let delivered = bus.publish(PlaybackEvent::Started { sequence: 7 });
        assert_eq!(delivered, 2);
        assert_eq!(a.recv().unwrap(), PlaybackEvent::Started { sequence: 7 });
        assert_eq!(b.recv().unwrap().sequence(), Some(7));
    }

    #[test]
    fn test_event_bus_prunes_dropped_subscribers() {
        let bus = EventBus::new(4);
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(PlaybackEvent::EngineStarted { session: 1 });
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.recv().unwrap(), PlaybackEvent::EngineStarted { session: 1 });
    }

    #[test]
    fn test_lagging_subscriber_drops_events() {
        let bus = EventBus::new(1);
        let rx = bus.subscribe();
        bus.publish(PlaybackEvent::EngineStarted { session: 1 });
        assert_eq!(bus.publish(PlaybackEvent::EngineStopped { session: 1 }), 0);
        assert_eq!(rx.try_iter().count(), 1);
    }

    struct Recorder {
        stopped_at: AtomicU64,
    }

    impl SequenceListener for Recorder {
        fn on_stopped(&self, _sequence: SequenceId, final_frame: u64) {
            self.stopped_at.store(final_frame, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_dispatcher_runs_listener_before_publishing() {
        let bus = Arc::new(EventBus::new(8));
        let rx = bus.subscribe();
        let dispatcher = NotificationDispatcher::spawn(Arc::clone(&bus)).unwrap();
        let recorder = Arc::new(Recorder {
            stopped_at: AtomicU64::new(0),
        });

        dispatcher
            .sender()
            .send(Notification {
                event: PlaybackEvent::Stopped {
                    sequence: 3,
                    final_frame: 2047,
                },
                listener: Some(recorder.clone()),
            })
            .unwrap();

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, PlaybackEvent::Stopped { sequence: 3, final_frame: 2047 });
        assert_eq!(recorder.stopped_at.load(Ordering::SeqCst), 2047);
    }
}
