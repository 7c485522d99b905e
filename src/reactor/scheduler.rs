//! [`TaskScheduler`] — one per reactor worker thread.
//!
//! Each iteration of [`TaskScheduler::run`] performs, in order: drain
//! pending trigger events, fire expired timers, wait on epoll for the
//! earliest remaining deadline (or indefinitely), dispatch ready
//! channels. This ordering matters: a trigger event queued just before a
//! timer fires is always visible to that timer's callback, and newly
//! registered channels from either are picked up by the same `epoll_wait`
//! that would otherwise have blocked past their deadline.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::channel::Channel;
use super::poller::Poller;
use super::timer::{TimerCallback, TimerHeap, TimerId, TimerKind};
use super::trigger::TriggerQueue;
use crate::error::{Result, RtspError};

/// Shared, lockable handle to a registered [`Channel`].
pub type ChannelHandle = Arc<Mutex<Channel>>;

/// One event-loop worker: an epoll instance, a channel table, a timer
/// heap, and a trigger-event queue, all driven from a single OS thread.
///
/// Safe to hand out as `Arc<TaskScheduler>` and share across threads:
/// every method that mutates shared state takes its own lock internally,
/// but the channel *callbacks* themselves only ever run on this
/// scheduler's own thread (see [`Self::run`]).
pub struct TaskScheduler {
    poller: Poller,
    channels: Mutex<HashMap<RawFd, ChannelHandle>>,
    timers: Mutex<TimerHeap>,
    triggers: TriggerQueue,
    running: AtomicBool,
    wakeup_fd: RawFd,
}

fn eventfd() -> io::Result<RawFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

impl TaskScheduler {
    pub fn new() -> io::Result<Arc<Self>> {
        let poller = Poller::new()?;
        let wakeup_fd = eventfd()?;

        let scheduler = Arc::new(Self {
            poller,
            channels: Mutex::new(HashMap::new()),
            timers: Mutex::new(TimerHeap::new()),
            triggers: TriggerQueue::new(),
            running: AtomicBool::new(true),
            wakeup_fd,
        });

        // The wakeup channel's only job is to drain the eventfd counter;
        // the actual work it signals already sits in the trigger queue.
        let mut wakeup_channel = Channel::new(wakeup_fd);
        let drain_fd = wakeup_fd;
        wakeup_channel.set_read_callback(Box::new(move || {
            let mut buf = [0u8; 8];
            loop {
                let rc = unsafe {
                    libc::read(drain_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
                };
                if rc <= 0 {
                    break;
                }
            }
        }));
        wakeup_channel.enable_reading();
        scheduler.register(wakeup_channel)?;

        Ok(scheduler)
    }

    fn register(&self, channel: Channel) -> io::Result<()> {
        let fd = channel.fd();
        let events = channel.events();
        self.poller.add(fd, events)?;
        self.channels.lock().insert(fd, Arc::new(Mutex::new(channel)));
        Ok(())
    }

    /// Register or re-register a channel's interest set. A channel whose
    /// events become `EVENT_NONE` is removed instead of re-armed with an
    /// empty mask.
    pub fn update_channel(&self, channel: Channel) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        let fd = channel.fd();
        let events = channel.events();
        if channel.is_none_event() {
            self.remove_channel(fd);
            return Ok(());
        }
        let mut table = self.channels.lock();
        if table.contains_key(&fd) {
            self.poller.modify(fd, events)?;
            table.insert(fd, Arc::new(Mutex::new(channel)));
        } else {
            self.poller.add(fd, events)?;
            table.insert(fd, Arc::new(Mutex::new(channel)));
        }
        Ok(())
    }

    /// Re-arm an already-registered channel's interest set in place,
    /// without replacing its callbacks. Used for write-buffer draining,
    /// which toggles `EVENT_OUT` far more often than it changes handlers.
    pub fn rearm(&self, fd: RawFd, events: u32) -> Result<()> {
        self.poller.modify(fd, events)?;
        Ok(())
    }

    pub fn channel(&self, fd: RawFd) -> Option<ChannelHandle> {
        self.channels.lock().get(&fd).cloned()
    }

    pub fn remove_channel(&self, fd: RawFd) {
        if let Some(_chan) = self.channels.lock().remove(&fd) {
            let _ = self.poller.remove(fd);
        }
    }

    /// Post a closure to run on this scheduler's own thread. Returns
    /// `false` (never panics, never blocks) when the bounded queue is
    /// saturated — the caller decides the drop policy.
    pub fn add_trigger_event(&self, event: Box<dyn FnMut() + Send>) -> bool {
        if !self.triggers.push(event) {
            return false;
        }
        self.wake();
        true
    }

    pub fn add_timer(&self, kind: TimerKind, delay: Duration, callback: TimerCallback) -> TimerId {
        let id = self.timers.lock().add(kind, delay, callback);
        self.wake();
        id
    }

    pub fn remove_timer(&self, id: TimerId) {
        self.timers.lock().remove(id);
    }

    fn wake(&self) {
        let one: u64 = 1;
        unsafe {
            libc::write(
                self.wakeup_fd,
                &one as *const u64 as *const libc::c_void,
                8,
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.wake();
    }

    /// The scheduler's main loop. Blocks the calling thread until
    /// [`Self::stop`] is called.
    pub fn run(&self) -> Result<()> {
        while self.running.load(Ordering::Acquire) {
            self.triggers.drain();
            self.timers.lock().handle_expired();

            let timeout_ms = self
                .timers
                .lock()
                .time_remaining_ms()
                .unwrap_or(1000)
                .max(0);

            let ready = match self.poller.wait(timeout_ms) {
                Ok(r) => r,
                Err(e) => return Err(RtspError::Io(e)),
            };

            for (fd, revents) in ready {
                let handle = self.channels.lock().get(&fd).cloned();
                if let Some(handle) = handle {
                    handle.lock().handle_event(revents);
                }
            }
        }
        Ok(())
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        let fds: Vec<RawFd> = self.channels.lock().keys().copied().collect();
        for fd in fds {
            let _ = self.poller.remove(fd);
        }
        unsafe {
            libc::close(self.wakeup_fd);
        }
    }
}
