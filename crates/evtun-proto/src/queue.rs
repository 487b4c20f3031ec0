//! Mutex-guarded FIFO of events
//!
//! Producers and consumers never block on emptiness: a consumer checks the
//! queue, and if nothing is there it sleeps for its own idle interval.
//! Multi-step operations ("check, then drain") are composed while holding the
//! guard returned by [`EventQueue::lock`]; dropping the guard unlocks.

use crate::event::Event;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Ordered queue of events; insertion order is delivery order
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
}

/// Exclusive access to an [`EventQueue`] for the lifetime of the guard
pub struct EventQueueGuard<'a> {
    events: MutexGuard<'a, VecDeque<Event>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the queue. The queue is unlocked when the guard is dropped.
    pub fn lock(&self) -> EventQueueGuard<'_> {
        // A panic while holding the lock cannot leave the deque half-updated
        EventQueueGuard {
            events: self.events.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn push(&self, event: Event) {
        self.lock().push(event);
    }

    /// Append a whole batch in one critical section
    pub fn push_all(&self, events: impl IntoIterator<Item = Event>) {
        self.lock().push_all(events);
    }

    /// Remove and return everything queued
    pub fn drain_all(&self) -> Vec<Event> {
        self.lock().drain(None)
    }

    /// Remove and return at most `limit` of the oldest events
    pub fn drain_up_to(&self, limit: usize) -> Vec<Event> {
        self.lock().drain(Some(limit))
    }

    /// Put previously drained events back at the head, in their original order
    pub fn recovery(&self, events: Vec<Event>) {
        self.lock().recovery(events);
    }

    /// Discard everything queued, returning how many events were dropped
    pub fn clear(&self) -> usize {
        let mut guard = self.lock();
        let count = guard.count();
        guard.events.clear();
        count
    }

    pub fn count(&self) -> usize {
        self.lock().count()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl EventQueueGuard<'_> {
    pub fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub fn push_all(&mut self, events: impl IntoIterator<Item = Event>) {
        self.events.extend(events);
    }

    /// Remove the oldest event
    pub fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Oldest event, without removing it
    pub fn front(&self) -> Option<&Event> {
        self.events.front()
    }

    pub fn count(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drain the oldest events; `None` drains everything
    pub fn drain(&mut self, limit: Option<usize>) -> Vec<Event> {
        let take = limit.map_or(self.events.len(), |n| n.min(self.events.len()));
        self.events.drain(..take).collect()
    }

    /// Re-insert `events` before anything currently queued, keeping their order
    pub fn recovery(&mut self, events: Vec<Event>) {
        for event in events.into_iter().rev() {
            self.events.push_front(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn data(from: &str, n: u8) -> Event {
        Event::data(from, "peer", vec![n])
    }

    #[test]
    fn test_fifo_order() {
        let queue = EventQueue::new();
        for n in 0..5 {
            queue.push(data("a", n));
        }

        let mut guard = queue.lock();
        assert_eq!(guard.count(), 5);
        assert_eq!(guard.front().unwrap().payload, Some(vec![0]));
        for n in 0..5 {
            assert_eq!(guard.pop().unwrap().payload, Some(vec![n]));
        }
        assert!(guard.is_empty());
        assert!(guard.pop().is_none());
        assert!(guard.front().is_none());
    }

    #[test]
    fn test_recovery_prepends_in_order() {
        let queue = EventQueue::new();
        queue.push_all((0..3).map(|n| data("a", n)));

        let drained = queue.drain_all();
        assert!(queue.is_empty());

        // Pushed while the drained batch was in flight
        queue.push(data("a", 3));
        queue.push(data("a", 4));

        queue.recovery(drained);

        let order: Vec<u8> = queue
            .drain_all()
            .into_iter()
            .map(|e| e.payload.unwrap()[0])
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_recovery_into_empty_queue() {
        let queue = EventQueue::new();
        queue.recovery(vec![data("a", 1), data("a", 2)]);
        assert_eq!(queue.count(), 2);
        assert_eq!(queue.lock().front().unwrap().payload, Some(vec![1]));
    }

    #[test]
    fn test_drain_up_to() {
        let queue = EventQueue::new();
        queue.push_all((0..10).map(|n| data("a", n)));

        let first = queue.drain_up_to(4);
        assert_eq!(first.len(), 4);
        assert_eq!(first[3].payload, Some(vec![3]));
        assert_eq!(queue.count(), 6);

        let rest = queue.drain_up_to(100);
        assert_eq!(rest.len(), 6);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear() {
        let queue = EventQueue::new();
        queue.push_all((0..3).map(|n| data("a", n)));
        assert_eq!(queue.clear(), 3);
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn test_check_then_drain_under_one_lock() {
        let queue = EventQueue::new();
        queue.push(data("a", 1));

        let mut guard = queue.lock();
        let drained = if guard.is_empty() {
            Vec::new()
        } else {
            guard.drain(None)
        };
        drop(guard);

        assert_eq!(drained.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_producers_preserve_per_producer_order() {
        let queue = Arc::new(EventQueue::new());
        let producers = 4;
        let per_producer = 500u32;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..per_producer {
                        queue.push(Event::data(
                            format!("producer-{}", p),
                            "peer",
                            i.to_be_bytes().to_vec(),
                        ));
                    }
                })
            })
            .collect();

        // Consume concurrently with the producers
        let mut seen = Vec::new();
        while seen.len() < (producers * per_producer) as usize {
            seen.extend(queue.drain_all());
            thread::yield_now();
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(queue.is_empty());

        let mut last: Vec<Option<u32>> = vec![None; producers as usize];
        let mut unique = HashSet::new();
        for event in &seen {
            let producer: usize = event.from.trim_start_matches("producer-").parse().unwrap();
            let bytes: [u8; 4] = event.payload.clone().unwrap().try_into().unwrap();
            let seq = u32::from_be_bytes(bytes);

            if let Some(prev) = last[producer] {
                assert!(seq > prev, "producer {} out of order", producer);
            }
            last[producer] = Some(seq);
            assert!(unique.insert((producer, seq)), "duplicate event");
        }
        assert_eq!(unique.len(), (producers * per_producer) as usize);
    }
}
