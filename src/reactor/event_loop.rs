//! [`EventLoop`] owns the pool of [`TaskScheduler`] worker threads.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::scheduler::TaskScheduler;

/// A pool of reactor worker threads, each running one [`TaskScheduler`].
///
/// Scheduler `0` is the *control* scheduler: the listener lives there,
/// and it's what [`EventLoop`]'s own `update_channel`/`add_timer`
/// convenience methods target. Per-connection work is pinned to
/// whichever scheduler [`Self::pick_scheduler`] handed out at accept
/// time — round-robin starting at index 1 when there is more than one
/// worker thread, or scheduler 0 itself in the single-threaded case.
pub struct EventLoop {
    schedulers: Vec<Arc<TaskScheduler>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
}

use parking_lot::Mutex;

impl EventLoop {
    /// `num_threads` is clamped to at least 1.
    pub fn new(num_threads: u32) -> io::Result<Self> {
        let count = num_threads.max(1);
        let mut schedulers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            schedulers.push(TaskScheduler::new()?);
        }
        Ok(Self {
            schedulers,
            threads: Mutex::new(Vec::new()),
            next: AtomicUsize::new(1),
        })
    }

    /// Spawn one OS thread per scheduler and block the calling thread
    /// returns immediately; each worker runs until `quit` is called.
    pub fn start(&self) {
        let mut threads = self.threads.lock();
        for (idx, scheduler) in self.schedulers.iter().enumerate() {
            let scheduler = scheduler.clone();
            let handle = std::thread::Builder::new()
                .name(format!("rtsp-reactor-{idx}"))
                .spawn(move || {
                    if let Err(err) = scheduler.run() {
                        tracing::error!(worker = idx, %err, "reactor worker exited with error");
                    }
                })
                .expect("spawning reactor worker thread");
            threads.push(handle);
        }
    }

    pub fn quit(&self) {
        for scheduler in &self.schedulers {
            scheduler.stop();
        }
        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }

    /// The control scheduler (index 0): listener and cross-thread
    /// channel/timer housekeeping live here.
    pub fn control_scheduler(&self) -> Arc<TaskScheduler> {
        self.schedulers[0].clone()
    }

    /// Pick a scheduler for a newly accepted connection. Single-threaded
    /// deployments get the control scheduler; multi-threaded ones get a
    /// round-robin pick starting at index 1, so the control scheduler
    /// only ever does listener and cross-thread work.
    pub fn pick_scheduler(&self) -> Arc<TaskScheduler> {
        if self.schedulers.len() == 1 {
            return self.schedulers[0].clone();
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed);
        let idx = 1 + (idx - 1) % (self.schedulers.len() - 1);
        self.schedulers[idx].clone()
    }

    pub fn worker_count(&self) -> usize {
        self.schedulers.len()
    }
}
