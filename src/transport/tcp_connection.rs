//! [`TcpConnection`] — a non-blocking socket with a buffered, reactor-driven
//! write path.
//!
//! Reads are delivered by the owner's own read callback (registered
//! separately, since the RTSP framing differs from a generic byte
//! stream); this type only owns the write side, because every writer —
//! RTSP responses, interleaved RTP/RTCP frames — needs the same
//! non-blocking-write-then-buffer-the-rest behavior.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::reactor::{Channel, TaskScheduler};

/// Buffered non-blocking writer for one TCP socket.
///
/// A write first attempts a direct `send`; whatever doesn't fit is
/// appended to `write_buf` and `EVENT_OUT` is armed on the scheduler so
/// the reactor calls back in to drain it as the socket becomes writable
/// again. This is the same opportunistic-write-then-buffer pattern every
/// non-blocking TCP server needs; past here the RTSP- or RTP-specific
/// layers only ever call [`TcpConnection::write`].
pub struct TcpConnection {
    stream: Mutex<TcpStream>,
    write_buf: Mutex<Vec<u8>>,
    scheduler: Arc<TaskScheduler>,
    fd: RawFd,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, scheduler: Arc<TaskScheduler>) -> Arc<Self> {
        let fd = stream.as_raw_fd();
        Arc::new(Self {
            stream: Mutex::new(stream),
            write_buf: Mutex::new(Vec::new()),
            scheduler,
            fd,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Queue `data` for the peer. Tries a direct write first; anything
    /// left over (or everything, if the buffer already held bytes) is
    /// appended and flushed opportunistically from the reactor thread.
    pub fn write(self: &Arc<Self>, data: &[u8]) {
        let mut buf = self.write_buf.lock();
        if buf.is_empty() {
            match self.try_write(data) {
                WriteOutcome::Complete => return,
                WriteOutcome::Partial(written) => {
                    buf.extend_from_slice(&data[written..]);
                }
                WriteOutcome::WouldBlock => {
                    buf.extend_from_slice(data);
                }
                WriteOutcome::Closed => return,
            }
        } else {
            buf.extend_from_slice(data);
        }
        drop(buf);
        self.arm_writable();
    }

    /// Called from the reactor thread when the socket becomes writable;
    /// drains as much of `write_buf` as the kernel will currently accept.
    pub fn drain(self: &Arc<Self>) {
        let mut buf = self.write_buf.lock();
        if buf.is_empty() {
            return;
        }
        match self.try_write(&buf) {
            WriteOutcome::Complete => {
                buf.clear();
                drop(buf);
                self.disarm_writable();
            }
            WriteOutcome::Partial(written) => {
                buf.drain(..written);
            }
            WriteOutcome::WouldBlock | WriteOutcome::Closed => {}
        }
    }

    fn try_write(&self, data: &[u8]) -> WriteOutcome {
        if data.is_empty() {
            return WriteOutcome::Complete;
        }
        let mut stream = self.stream.lock();
        match stream.write(data) {
            Ok(n) if n == data.len() => WriteOutcome::Complete,
            Ok(n) => WriteOutcome::Partial(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => WriteOutcome::WouldBlock,
            Err(_) => WriteOutcome::Closed,
        }
    }

    fn arm_writable(self: &Arc<Self>) {
        let this = Arc::clone(self);
        if let Some(handle) = self.scheduler.channel(self.fd) {
            let mut chan = handle.lock();
            if !chan.is_writing() {
                chan.enable_writing();
                chan.set_write_callback(Box::new(move || this.drain()));
                let events = chan.events();
                drop(chan);
                let _ = self.scheduler.rearm(self.fd, events);
            }
        }
    }

    fn disarm_writable(self: &Arc<Self>) {
        if let Some(handle) = self.scheduler.channel(self.fd) {
            let mut chan = handle.lock();
            chan.disable_writing();
            let events = chan.events();
            drop(chan);
            let _ = self.scheduler.rearm(self.fd, events);
        }
    }

    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.stream.lock().peer_addr().ok()
    }

    /// Non-blocking read into `buf`. Surfaces `WouldBlock` like the
    /// underlying socket so the caller's read loop knows to stop.
    pub fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.lock().read(buf)
    }
}

enum WriteOutcome {
    Complete,
    Partial(usize),
    WouldBlock,
    Closed,
}

/// Build the initial [`Channel`] for a freshly-accepted socket: read
/// callback wired in by the caller (RTSP framing is protocol-specific),
/// write side left disabled until the first buffered write arms it.
pub fn register_channel(
    scheduler: &Arc<TaskScheduler>,
    fd: RawFd,
    read_callback: Box<dyn FnMut() + Send>,
    close_callback: Box<dyn FnMut() + Send>,
) {
    let mut channel = Channel::new(fd);
    channel.set_read_callback(read_callback);
    channel.set_close_callback(close_callback);
    channel.enable_reading();
    let _ = scheduler.update_channel(channel);
}
