//! Thin epoll wrapper. The only OS readiness primitive this reactor uses.

use std::io;
use std::os::unix::io::RawFd;

use super::channel::{EVENT_ERR, EVENT_HUP, EVENT_IN, EVENT_OUT, EVENT_PRI};

const MAX_EVENTS: usize = 512;

fn to_epoll_bits(events: u32) -> u32 {
    let mut bits = 0u32;
    if events & EVENT_IN != 0 {
        bits |= libc::EPOLLIN as u32;
    }
    if events & EVENT_PRI != 0 {
        bits |= libc::EPOLLPRI as u32;
    }
    if events & EVENT_OUT != 0 {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}

fn from_epoll_bits(bits: u32) -> u32 {
    let mut events = 0u32;
    if bits & (libc::EPOLLIN as u32) != 0 {
        events |= EVENT_IN;
    }
    if bits & (libc::EPOLLPRI as u32) != 0 {
        events |= EVENT_PRI;
    }
    if bits & (libc::EPOLLOUT as u32) != 0 {
        events |= EVENT_OUT;
    }
    if bits & (libc::EPOLLHUP as u32) != 0 {
        events |= EVENT_HUP;
    }
    if bits & (libc::EPOLLERR as u32) != 0 {
        events |= EVENT_ERR;
    }
    if bits & (libc::EPOLLRDHUP as u32) != 0 {
        events |= EVENT_HUP;
    }
    events
}

/// Owns one `epoll` instance. Registration keys events by raw fd rather
/// than a pointer into the channel table, so dispatch never touches
/// unmanaged memory across the FFI boundary.
pub struct Poller {
    epfd: RawFd,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { epfd })
    }

    fn ctl(&self, op: i32, fd: RawFd, events: u32) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: to_epoll_bits(events),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn add(&self, fd: RawFd, events: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, events)
    }

    pub fn modify(&self, fd: RawFd, events: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, events)
    }

    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        let mut ev = libc::epoll_event { events: 0, u64: 0 };
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Block for up to `timeout_ms` (negative = forever) and return the
    /// `(fd, revents)` pairs that became ready. Retries transparently on
    /// `EINTR`.
    pub fn wait(&self, timeout_ms: i32) -> io::Result<Vec<(RawFd, u32)>> {
        let mut events: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        loop {
            let n = unsafe {
                libc::epoll_wait(self.epfd, events.as_mut_ptr(), MAX_EVENTS as i32, timeout_ms)
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            let mut ready = Vec::with_capacity(n as usize);
            for ev in &events[..n as usize] {
                ready.push((ev.u64 as RawFd, from_epoll_bits(ev.events)));
            }
            return Ok(ready);
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}
