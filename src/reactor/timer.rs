//! Timer min-heap.
//!
//! Timer callback polymorphism is a tagged variant, not a class
//! hierarchy: a timer is either [`TimerKind::Once`] or
//! [`TimerKind::Periodic`], and its callback returns a `bool` — "keep
//! rescheduling?" — that only has an effect on a periodic timer.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Opaque handle returned by [`TimerHeap::add`], used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Whether a timer fires once or repeats on its own period.
#[derive(Debug, Clone, Copy)]
pub enum TimerKind {
    Once,
    Periodic(Duration),
}

pub type TimerCallback = Box<dyn FnMut() -> bool + Send>;

struct Entry {
    id: TimerId,
    deadline: Instant,
    kind: TimerKind,
    callback: TimerCallback,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for Entry {}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest deadline on top.
        other.deadline.cmp(&self.deadline)
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of pending timers plus a cancellation set.
///
/// Canceling a timer id removes it from the heap if not yet popped; if
/// it is mid-fire (already popped, callback running), cancellation only
/// prevents the *next* reschedule.
#[derive(Default)]
pub struct TimerHeap {
    heap: BinaryHeap<Entry>,
    cancelled: std::collections::HashSet<u64>,
    next_id: u64,
}

impl TimerHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: TimerKind, delay: Duration, callback: TimerCallback) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.heap.push(Entry {
            id,
            deadline: Instant::now() + delay,
            kind,
            callback,
        });
        id
    }

    pub fn remove(&mut self, id: TimerId) {
        self.cancelled.insert(id.0);
    }

    /// Fire every timer whose deadline has passed, rescheduling periodic
    /// ones whose callback returned `true`.
    pub fn handle_expired(&mut self) {
        let now = Instant::now();
        let mut to_reschedule = Vec::new();

        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let mut entry = self.heap.pop().unwrap();
            if self.cancelled.remove(&entry.id.0) {
                continue;
            }
            let keep_going = (entry.callback)();
            if keep_going {
                if let TimerKind::Periodic(period) = entry.kind {
                    entry.deadline = now + period;
                    to_reschedule.push(entry);
                }
            }
        }

        for entry in to_reschedule {
            self.heap.push(entry);
        }
    }

    /// Milliseconds until the next deadline, clamped to `[0, i32::MAX]`.
    /// `None` means no pending timers — the caller should wait
    /// indefinitely (until the next trigger event or I/O readiness).
    pub fn time_remaining_ms(&self) -> Option<i32> {
        let top = self.heap.peek()?;
        let now = Instant::now();
        if top.deadline <= now {
            return Some(0);
        }
        let ms = (top.deadline - now).as_millis();
        Some(ms.min(i32::MAX as u128) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::sync::Arc;

    #[test]
    fn once_timer_fires_single_time() {
        let mut heap = TimerHeap::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        heap.add(
            TimerKind::Once,
            Duration::from_millis(0),
            Box::new(move || {
                c.fetch_add(1, AtomicOrdering::SeqCst);
                true // ignored: Once never reschedules
            }),
        );
        std::thread::sleep(Duration::from_millis(5));
        heap.handle_expired();
        heap.handle_expired();
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn cancel_before_fire_suppresses_callback() {
        let mut heap = TimerHeap::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let id = heap.add(
            TimerKind::Once,
            Duration::from_millis(0),
            Box::new(move || {
                c.fetch_add(1, AtomicOrdering::SeqCst);
                false
            }),
        );
        heap.remove(id);
        std::thread::sleep(Duration::from_millis(5));
        heap.handle_expired();
        assert_eq!(count.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn time_remaining_none_when_empty() {
        let heap = TimerHeap::new();
        assert!(heap.time_remaining_ms().is_none());
    }
}
