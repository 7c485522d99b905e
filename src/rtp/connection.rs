//! [`RtpConnection`] — one client's media transport.
//!
//! Holds a non-owning (weak) back-reference to the
//! [`RtspConnection`](crate::rtsp::connection::RtspConnection) that
//! negotiated it, which breaks the ownership cycle that would otherwise
//! form: the RTSP connection owns the RTP connection it SETUP'd, and the
//! RTP connection needs the RTSP connection's TCP socket for
//! TCP-interleaved delivery.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::Rng;

use crate::media::{MediaChannelId, MediaFragment};
use crate::reactor::{Channel, TaskScheduler};
use crate::rtp::packet::{INTERLEAVED_PREFIX_SIZE, RtpHeader, frame_interleaved};
use crate::rtsp::connection::RtspConnection;

/// How RTP/RTCP packets reach this client, chosen at SETUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    TcpInterleaved,
    UdpUnicast,
    UdpMulticast,
}

struct ChannelState {
    header: RtpHeader,
    is_setup: bool,
    is_active: bool,
    interleaved_rtp_channel: u8,
    interleaved_rtcp_channel: u8,
    rtp_socket: Option<UdpSocket>,
    rtcp_socket: Option<UdpSocket>,
    local_rtp_port: u16,
    local_rtcp_port: u16,
    peer_rtp_addr: Option<SocketAddr>,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            header: RtpHeader::with_random_ssrc(0),
            is_setup: false,
            is_active: false,
            interleaved_rtp_channel: 0,
            interleaved_rtcp_channel: 0,
            rtp_socket: None,
            rtcp_socket: None,
            local_rtp_port: 0,
            local_rtcp_port: 0,
            peer_rtp_addr: None,
        }
    }
}

/// One client's RTP/RTCP transport, set up by a `SETUP` request and torn
/// down on `TEARDOWN` or connection close.
pub struct RtpConnection {
    rtsp: Weak<RtspConnection>,
    scheduler: Arc<TaskScheduler>,
    transport_mode: Mutex<Option<TransportMode>>,
    is_multicast: AtomicBool,
    has_key_frame: AtomicBool,
    closed: AtomicBool,
    channels: Mutex<[ChannelState; 2]>,
}

impl RtpConnection {
    pub fn new(rtsp: Weak<RtspConnection>, scheduler: Arc<TaskScheduler>) -> Self {
        Self {
            rtsp,
            scheduler,
            transport_mode: Mutex::new(None),
            is_multicast: AtomicBool::new(false),
            has_key_frame: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            channels: Mutex::new([ChannelState::new(), ChannelState::new()]),
        }
    }

    pub fn set_clock_rate(&self, channel_id: MediaChannelId, _clock_rate: u32) {
        // Clock rate lives on the packetizer; RtpConnection does not need
        // it directly, but SETUP calls this to mirror the session's view
        // for future RTCP sender-report support.
        let _ = channel_id;
    }

    pub fn set_payload_type(&self, channel_id: MediaChannelId, payload_type: u8) {
        self.channels.lock()[channel_id.index()].header.payload_type = payload_type;
    }

    pub fn is_setup(&self, channel_id: MediaChannelId) -> bool {
        self.channels.lock()[channel_id.index()].is_setup
    }

    pub fn is_multicast(&self) -> bool {
        self.is_multicast.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn has_key_frame(&self) -> bool {
        self.has_key_frame.load(Ordering::Acquire)
    }

    pub fn transport_mode(&self) -> Option<TransportMode> {
        *self.transport_mode.lock()
    }

    /// Reuses the RTSP connection's own TCP socket; RTP/RTCP are
    /// multiplexed onto it with `$` framing (RFC 2326 §10.12).
    pub fn setup_rtp_over_tcp(
        &self,
        channel_id: MediaChannelId,
        rtp_channel: u8,
        rtcp_channel: u8,
    ) -> bool {
        let mut channels = self.channels.lock();
        let chan = &mut channels[channel_id.index()];
        chan.interleaved_rtp_channel = rtp_channel;
        chan.interleaved_rtcp_channel = rtcp_channel;
        chan.is_setup = true;
        *self.transport_mode.lock() = Some(TransportMode::TcpInterleaved);
        true
    }

    /// Binds a fresh local RTP/RTCP UDP socket pair (retrying up to 10
    /// times on a random even port, RTCP on the next odd one) and points
    /// them at the client's advertised `client_port` pair.
    pub fn setup_rtp_over_udp(
        &self,
        channel_id: MediaChannelId,
        peer_ip: IpAddr,
        peer_rtp_port: u16,
        peer_rtcp_port: u16,
    ) -> bool {
        let Some((rtp_socket, rtcp_socket, local_rtp_port, local_rtcp_port)) =
            bind_rtp_rtcp_pair()
        else {
            return false;
        };

        let _ = rtcp_socket.set_nonblocking(true);
        self.register_rtcp_keepalive(rtcp_socket.as_raw_fd());

        let mut channels = self.channels.lock();
        let chan = &mut channels[channel_id.index()];
        chan.rtp_socket = Some(rtp_socket);
        chan.rtcp_socket = Some(rtcp_socket);
        chan.local_rtp_port = local_rtp_port;
        chan.local_rtcp_port = local_rtcp_port;
        chan.peer_rtp_addr = Some(SocketAddr::new(peer_ip, peer_rtp_port));
        chan.is_setup = true;
        drop(channels);
        let _ = peer_rtcp_port;
        *self.transport_mode.lock() = Some(TransportMode::UdpUnicast);
        true
    }

    /// Points this channel at a session-wide multicast group; the local
    /// RTP socket is still per-client only for symmetry with the unicast
    /// path (sends never read from it).
    pub fn setup_rtp_over_multicast(
        &self,
        channel_id: MediaChannelId,
        multicast_ip: IpAddr,
        port: u16,
    ) -> bool {
        let Some(rtp_socket) = bind_udp_socket() else {
            return false;
        };
        let local_rtp_port = rtp_socket
            .local_addr()
            .map(|a| a.port())
            .unwrap_or_default();

        let mut channels = self.channels.lock();
        let chan = &mut channels[channel_id.index()];
        chan.rtp_socket = Some(rtp_socket);
        chan.local_rtp_port = local_rtp_port;
        chan.peer_rtp_addr = Some(SocketAddr::new(multicast_ip, port));
        chan.is_setup = true;
        drop(channels);

        self.is_multicast.store(true, Ordering::Release);
        *self.transport_mode.lock() = Some(TransportMode::UdpMulticast);
        true
    }

    pub fn local_rtp_port(&self, channel_id: MediaChannelId) -> u16 {
        self.channels.lock()[channel_id.index()].local_rtp_port
    }

    pub fn ssrc(&self, channel_id: MediaChannelId) -> u32 {
        self.channels.lock()[channel_id.index()].header.ssrc
    }

    pub fn local_rtcp_port(&self, channel_id: MediaChannelId) -> u16 {
        self.channels.lock()[channel_id.index()].local_rtcp_port
    }

    pub fn play(&self) {
        let mut channels = self.channels.lock();
        for chan in channels.iter_mut() {
            if chan.is_setup {
                chan.is_active = true;
            }
        }
    }

    pub fn teardown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut channels = self.channels.lock();
        for chan in channels.iter_mut() {
            chan.is_active = false;
            if let Some(rtcp_socket) = chan.rtcp_socket.take() {
                self.scheduler.remove_channel(rtcp_socket.as_raw_fd());
            }
        }
    }

    /// Builds the `RTP-Info` header value for a `PLAY` response, one
    /// `url=...;seq=...;rtptime=...` entry per SETUP channel.
    pub fn rtp_info(&self, rtsp_url: &str) -> String {
        let channels = self.channels.lock();
        let mut entries = Vec::new();
        for id in MediaChannelId::ALL {
            let chan = &channels[id.index()];
            if chan.is_setup {
                entries.push(format!(
                    "url={}/{};seq=0;rtptime=0",
                    rtsp_url,
                    id.track_name()
                ));
            }
        }
        entries.join(",")
    }

    /// Queues one media fragment for delivery. Marshals onto the owning
    /// scheduler's thread via a trigger event — the only sanctioned way
    /// to touch this connection's per-channel state from the producer
    /// thread calling `push_frame`. Returns `false` if the trigger queue
    /// was saturated (caller drops the fragment for this client).
    pub fn send_fragment(
        self: &Arc<Self>,
        channel_id: MediaChannelId,
        fragment: MediaFragment,
    ) -> bool {
        let this = Arc::clone(self);
        this_scheduler_add_trigger(&self.scheduler, move || {
            this.deliver_fragment(channel_id, &fragment);
        })
    }

    fn deliver_fragment(&self, channel_id: MediaChannelId, fragment: &MediaFragment) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if fragment.kind.is_key() {
            self.has_key_frame.store(true, Ordering::Release);
        }
        if !self.has_key_frame.load(Ordering::Acquire) {
            return;
        }

        let mode = *self.transport_mode.lock();
        let Some(mode) = mode else { return };

        let mut channels = self.channels.lock();
        let chan = &mut channels[channel_id.index()];
        if !chan.is_active {
            return;
        }
        let header_bytes = chan.header.write(fragment.is_last_fragment, fragment.timestamp);

        match mode {
            TransportMode::TcpInterleaved => {
                let Some(rtsp) = self.rtsp.upgrade() else {
                    drop(channels);
                    self.teardown();
                    return;
                };
                let mut packet = Vec::with_capacity(
                    INTERLEAVED_PREFIX_SIZE + header_bytes.len() + fragment.payload.len(),
                );
                packet.extend_from_slice(&header_bytes);
                packet.extend_from_slice(&fragment.payload);
                let framed = frame_interleaved(chan.interleaved_rtp_channel, &packet);
                drop(channels);
                rtsp.send_bytes(&framed);
            }
            TransportMode::UdpUnicast | TransportMode::UdpMulticast => {
                if let (Some(socket), Some(addr)) = (&chan.rtp_socket, chan.peer_rtp_addr) {
                    let mut packet =
                        Vec::with_capacity(header_bytes.len() + fragment.payload.len());
                    packet.extend_from_slice(&header_bytes);
                    packet.extend_from_slice(&fragment.payload);
                    let _ = socket.send_to(&packet, addr);
                }
            }
        }
    }

    fn register_rtcp_keepalive(&self, fd: RawFd) {
        let rtsp = self.rtsp.clone();
        let mut channel = Channel::new(fd);
        channel.set_read_callback(Box::new(move || {
            let mut buf = [0u8; 1500];
            loop {
                let n = unsafe {
                    libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
                };
                if n <= 0 {
                    break;
                }
                if let Some(rtsp) = rtsp.upgrade() {
                    rtsp.keep_alive();
                }
            }
        }));
        channel.enable_reading();
        let _ = self.scheduler.update_channel(channel);
    }
}

fn this_scheduler_add_trigger(
    scheduler: &Arc<TaskScheduler>,
    f: impl FnMut() + Send + 'static,
) -> bool {
    scheduler.add_trigger_event(Box::new(f))
}

fn bind_udp_socket() -> Option<UdpSocket> {
    for _ in 0..10 {
        let port = rand::rng().random::<u16>() & 0xfffe;
        if let Ok(socket) = UdpSocket::bind(("0.0.0.0", port)) {
            let _ = socket.set_nonblocking(true);
            return Some(socket);
        }
    }
    None
}

/// Binds an RTP socket on a random even port and an RTCP socket on the
/// next odd one, matching the RFC 3550 §11 convention clients expect.
fn bind_rtp_rtcp_pair() -> Option<(UdpSocket, UdpSocket, u16, u16)> {
    for _ in 0..10 {
        let rtp_port = rand::rng().random::<u16>() & 0xfffe;
        let rtcp_port = rtp_port + 1;
        let Ok(rtp_socket) = UdpSocket::bind(("0.0.0.0", rtp_port)) else {
            continue;
        };
        let Ok(rtcp_socket) = UdpSocket::bind(("0.0.0.0", rtcp_port)) else {
            continue;
        };
        let _ = rtp_socket.set_nonblocking(true);
        return Some((rtp_socket, rtcp_socket, rtp_port, rtcp_port));
    }
    None
}
