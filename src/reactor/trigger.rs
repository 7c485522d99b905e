//! Bounded trigger-event queue.
//!
//! A trigger event is an arbitrary closure posted from any thread to run
//! on one scheduler's thread — the only sanctioned way to mutate an
//! [`RtpConnection`](crate::rtp::RtpConnection)'s state from a producer
//! thread (see the module doc on [`crate::reactor`]).

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Ring buffer capacity. Matches the upstream design's bound — enough to
/// absorb a burst of pushed frames without unbounded memory growth when a
/// scheduler thread stalls.
pub const CAPACITY: usize = 50_000;

pub type TriggerEvent = Box<dyn FnMut() + Send>;

/// Multiple-producer, single-consumer bounded queue of trigger events.
///
/// A single mutex serializes producers; the scheduler thread is the only
/// consumer, draining the whole queue each loop iteration.
pub struct TriggerQueue {
    events: Mutex<VecDeque<TriggerEvent>>,
}

impl Default for TriggerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerQueue {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(64)),
        }
    }

    /// Enqueue a closure. Returns `false` if the queue is saturated —
    /// the caller (e.g. `RtpConnection::send_rtp_packet`) decides whether
    /// to drop or retry.
    pub fn push(&self, event: TriggerEvent) -> bool {
        let mut q = self.events.lock();
        if q.len() >= CAPACITY {
            return false;
        }
        q.push_back(event);
        true
    }

    /// Drain and run every queued event, in FIFO order. New events pushed
    /// by a running callback are not executed until the next drain.
    pub fn drain(&self) {
        let drained: Vec<TriggerEvent> = {
            let mut q = self.events.lock();
            q.drain(..).collect()
        };
        for mut event in drained {
            event();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn drains_in_order() {
        let q = TriggerQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            q.push(Box::new(move || order.lock().push(i)));
        }
        q.drain();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn rejects_when_full() {
        let q = TriggerQueue::new();
        for _ in 0..CAPACITY {
            assert!(q.push(Box::new(|| {})));
        }
        assert!(!q.push(Box::new(|| {})));
    }

    #[test]
    fn counts_runs() {
        let q = TriggerQueue::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        q.push(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!q.is_empty());
        q.drain();
        assert!(q.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
