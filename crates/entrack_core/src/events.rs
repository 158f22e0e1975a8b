//! Tracker event feed.
//!
//! The tracker emits an event whenever it starts tracking an instance or
//! changes an entry's state, including the transition to `Detached`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let events = session.subscribe();
//! session.add(blog)?;
//! while let Ok(event) = events.try_recv() {
//!     println!("{event:?}");
//! }
//! ```

use crate::entry::EntityState;
use crate::types::ObjectId;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEventKind {
    /// The instance started being tracked.
    Tracked {
        /// Initial state.
        state: EntityState,
    },
    /// The entry moved between states.
    StateChanged {
        /// Previous state.
        from: EntityState,
        /// New state.
        to: EntityState,
    },
}

/// A single tracker event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerEvent {
    /// Position of the event in the feed, starting at 1.
    pub sequence: u64,
    /// The instance concerned.
    pub object: ObjectId,
    /// Concrete entity type name.
    pub entity_type: String,
    /// What happened.
    pub kind: TrackerEventKind,
}

/// Distributes tracker events to subscribers and keeps a bounded history.
pub struct EventFeed {
    subscribers: RwLock<Vec<Sender<TrackerEvent>>>,
    history: RwLock<VecDeque<TrackerEvent>>,
    capacity: usize,
    next_sequence: AtomicU64,
}

impl EventFeed {
    /// Creates a feed remembering the last `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Returns a receiver for all future events.
    pub fn subscribe(&self) -> Receiver<TrackerEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event, assigning it the next sequence number.
    pub fn emit(&self, object: ObjectId, entity_type: &str, kind: TrackerEventKind) {
        let event = TrackerEvent {
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            object,
            entity_type: entity_type.to_string(),
            kind,
        };

        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());

        let mut history = self.history.write();
        if self.capacity == 0 {
            return;
        }
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Returns up to `limit` events with a sequence greater than `cursor`.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<TrackerEvent> {
        self.history
            .read()
            .iter()
            .skip_while(|event| event.sequence <= cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Sequence number of the most recent event, or 0 before any event.
    pub fn latest_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::Relaxed) - 1
    }

    /// Number of receivers still connected as of the last emit.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

impl std::fmt::Debug for EventFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFeed")
            .field("subscribers", &self.subscriber_count())
            .field("remembered", &self.history.read().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tracked() -> TrackerEventKind {
        TrackerEventKind::Tracked {
            state: EntityState::Added,
        }
    }

    #[test]
    fn subscribers_receive_events() {
        let feed = EventFeed::default();
        let rx = feed.subscribe();
        feed.emit(ObjectId::new(1), "Root", tracked());

        let event = rx.try_recv().unwrap();
        assert_eq!(event.sequence, 1);
        assert_eq!(event.entity_type, "Root");
        assert_eq!(event.kind, tracked());
    }

    #[test]
    fn only_recent_transitions_are_remembered() {
        let feed = EventFeed::with_capacity(2);
        let object = ObjectId::new(7);
        feed.emit(object, "Blog", tracked());
        for (from, to) in [
            (EntityState::Added, EntityState::Unchanged),
            (EntityState::Unchanged, EntityState::Deleted),
            (EntityState::Deleted, EntityState::Detached),
        ] {
            feed.emit(object, "Blog", TrackerEventKind::StateChanged { from, to });
        }

        let remembered: Vec<TrackerEventKind> = feed.poll(0, usize::MAX).into_iter().map(|e| e.kind).collect();
        assert_eq!(
            remembered,
            vec![
                TrackerEventKind::StateChanged {
                    from: EntityState::Unchanged,
                    to: EntityState::Deleted,
                },
                TrackerEventKind::StateChanged {
                    from: EntityState::Deleted,
                    to: EntityState::Detached,
                },
            ]
        );
        assert_eq!(feed.latest_sequence(), 4);
    }

    #[test]
    fn zero_capacity_still_delivers_to_subscribers() {
        let feed = EventFeed::with_capacity(0);
        let rx = feed.subscribe();
        feed.emit(ObjectId::new(0), "Blog", tracked());

        assert!(feed.poll(0, 8).is_empty());
        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(feed.latest_sequence(), 1);
    }

    #[test]
    fn dropped_subscribers_are_removed() {
        let feed = EventFeed::default();
        drop(feed.subscribe());
        let _live = feed.subscribe();
        feed.emit(ObjectId::new(0), "Root", tracked());
        assert_eq!(feed.subscriber_count(), 1);
    }

    #[test]
    fn poll_respects_cursor_and_limit() {
        let feed = EventFeed::default();
        for i in 0..4 {
            feed.emit(ObjectId::new(i), "Root", tracked());
        }
        let events = feed.poll(1, 2);
        assert_eq!(events.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![2, 3]);
    }

    proptest! {
        #[test]
        fn poll_returns_a_contiguous_window(
            capacity in 0usize..16,
            emitted in 0u64..32,
            cursor in 0u64..40,
            limit in 0usize..20,
        ) {
            let feed = EventFeed::with_capacity(capacity);
            for i in 0..emitted {
                feed.emit(ObjectId::new(i as u32), "Blog", tracked());
            }

            let sequences: Vec<u64> = feed.poll(cursor, limit).iter().map(|e| e.sequence).collect();

            let oldest = emitted.saturating_sub(capacity as u64) + 1;
            let first = oldest.max(cursor + 1);
            let expected: Vec<u64> = (first..=emitted).take(limit).collect();
            prop_assert_eq!(sequences, expected);
            prop_assert_eq!(feed.latest_sequence(), emitted);
        }
    }
}
