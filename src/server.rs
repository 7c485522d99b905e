//! [`RtspServer`] — the library's public entry point (§4.8).
//!
//! Owns the reactor's [`EventLoop`], the [`SessionDirectory`], and the
//! listening socket. Everything past `start()` runs on reactor worker
//! threads; this type's own methods (`add_session`, `push_frame`, ...)
//! are safe to call from any thread, including the one driving a
//! capture/encode pipeline that has nothing to do with the reactor.

use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ServerConfig;
use crate::error::{Result, RtspError};
use crate::media::{Frame, MediaChannelId, Packetizer};
use crate::reactor::{Channel, EventLoop};
use crate::rtsp::connection::RtspConnection;
use crate::session::{MediaSession, SessionDirectory};
use crate::transport::listener;

/// Top-level RTSP/RTP streaming server.
///
/// One instance binds one TCP port and owns one [`SessionDirectory`];
/// running two instances in the same process (as integration tests do,
/// on ephemeral ports) is fully supported — nothing here is a process
/// singleton.
pub struct RtspServer {
    event_loop: Arc<EventLoop>,
    directory: Arc<SessionDirectory>,
    config: Arc<ServerConfig>,
    bind_addr: SocketAddr,
    listener: Mutex<Option<Arc<std::net::TcpListener>>>,
    running: AtomicBool,
}

impl RtspServer {
    pub fn new(bind_addr: SocketAddr) -> Result<Arc<Self>> {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    pub fn with_config(bind_addr: SocketAddr, config: ServerConfig) -> Result<Arc<Self>> {
        let config = Arc::new(config);
        let event_loop = Arc::new(EventLoop::new(config.worker_threads)?);
        let directory = Arc::new(SessionDirectory::new(&config));
        Ok(Arc::new(Self {
            event_loop,
            directory,
            config,
            bind_addr,
            listener: Mutex::new(None),
            running: AtomicBool::new(false),
        }))
    }

    /// Bind the listening socket and spawn the reactor worker threads.
    /// Returns [`RtspError::AlreadyRunning`] if already started.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = Arc::new(listener::bind(self.bind_addr)?);
        let fd = listener.as_raw_fd();
        *self.listener.lock() = Some(listener.clone());

        let event_loop = self.event_loop.clone();
        let directory = self.directory.clone();
        let config = self.config.clone();
        let weak_listener = Arc::downgrade(&listener);

        let mut channel = Channel::new(fd);
        channel.set_read_callback(Box::new(move || {
            let Some(listener) = weak_listener.upgrade() else {
                return;
            };
            loop {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        let scheduler = event_loop.pick_scheduler();
                        if let Err(err) = RtspConnection::accept(
                            stream,
                            scheduler,
                            directory.clone(),
                            config.clone(),
                        ) {
                            tracing::warn!(peer = %peer, %err, "failed to accept RTSP connection");
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "listener accept error");
                        break;
                    }
                }
            }
        }));
        channel.enable_reading();
        self.event_loop.control_scheduler().update_channel(channel)?;
        self.event_loop.start();

        tracing::info!(addr = %self.bind_addr, "RTSP server listening");
        Ok(())
    }

    /// Stop all reactor worker threads and drop the listening socket.
    /// Connections already accepted are not forcibly closed; they wind
    /// down on their own inactivity timers or client-initiated TEARDOWN.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.event_loop.quit();
        self.listener.lock().take();
        tracing::info!("RTSP server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Register a new mount point. `video`/`audio` may each be omitted
    /// for an audio-only or video-only stream; at least one must be
    /// present. Fails if `url_suffix` already has a session.
    pub fn add_session(
        &self,
        url_suffix: impl Into<String>,
        video: Option<Box<dyn Packetizer>>,
        audio: Option<Box<dyn Packetizer>>,
        wants_multicast: bool,
    ) -> Result<Arc<MediaSession>> {
        self.directory
            .add_session(url_suffix, video, audio, &self.config, wants_multicast)
    }

    pub fn remove_session(&self, session_id: u64) {
        self.directory.remove_session(session_id);
    }

    pub fn find_session(&self, url_suffix: &str) -> Option<Arc<MediaSession>> {
        self.directory.find_by_suffix(url_suffix)
    }

    /// Push one encoded access unit to every client currently attached
    /// to `url_suffix`'s `channel_id`. Returns `false` when the mount
    /// doesn't exist or has no live clients, so the caller can skip
    /// encoding work entirely (§4.8).
    pub fn push_frame(&self, url_suffix: &str, channel_id: MediaChannelId, frame: &Frame) -> bool {
        let Some(session) = self.directory.find_by_suffix(url_suffix) else {
            return false;
        };
        session.handle_frame(channel_id, frame)
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

impl Drop for RtspServer {
    fn drop(&mut self) {
        self.stop();
    }
}
