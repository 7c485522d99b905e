//! [`RtspConnection`] — per-client RTSP protocol state machine (§4.3).
//!
//! One instance per accepted TCP socket. Owns the request/response loop,
//! drives Digest authentication, and lazily owns the one
//! [`RtpConnection`] a client may SETUP. All of its own state is only
//! ever touched from its owning scheduler's thread — the read/close
//! callbacks registered in [`RtspConnection::accept`] are the only entry
//! points, and both run there.

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::config::ServerConfig;
use crate::media::MediaChannelId;
use crate::reactor::{TaskScheduler, TimerKind};
use crate::rtp::RtpConnection;
use crate::rtsp::auth::{self, DigestChallenge};
use crate::rtsp::request::RtspRequest;
use crate::rtsp::response::RtspResponse;
use crate::rtsp::transport_header::{ResolvedTransport, RequestedTransport, parse_transport_header};
use crate::session::{MediaSession, SessionDirectory, split_mount_and_track};
use crate::transport::listener;
use crate::transport::tcp_connection::{TcpConnection, register_channel};

/// A request body larger than this is defensively drained without
/// attempting to parse it (§4.3 edge cases).
const MAX_BODY_SIZE: usize = 2048;

/// Which side of the RTSP exchange this connection is playing. The
/// pusher role (ANNOUNCE/RECORD) is a supplemented feature (§10.5),
/// symmetric to the server-role play flow but client-initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Server,
    Pusher,
}

/// One client's RTSP connection.
pub struct RtspConnection {
    tcp: Arc<TcpConnection>,
    scheduler: Arc<TaskScheduler>,
    directory: Arc<SessionDirectory>,
    config: Arc<ServerConfig>,
    peer_addr: SocketAddr,
    self_weak: Mutex<Weak<RtspConnection>>,
    read_buf: Mutex<Vec<u8>>,
    rtp: Mutex<Option<Arc<RtpConnection>>>,
    session: Mutex<Option<Arc<MediaSession>>>,
    session_token: Mutex<Option<String>>,
    role: Mutex<Option<Role>>,
    is_playing: AtomicBool,
    keep_alive_remaining: AtomicU32,
    timeout_timer: Mutex<Option<crate::reactor::timer::TimerId>>,
    challenge: Mutex<Option<DigestChallenge>>,
    closed: AtomicBool,
}

impl RtspConnection {
    /// Accept a freshly-connected socket and wire it into the reactor.
    /// `scheduler` is whatever worker the caller's accept hook picked for
    /// this client (round-robin across the `EventLoop`, see §4.1).
    pub fn accept(
        stream: TcpStream,
        scheduler: Arc<TaskScheduler>,
        directory: Arc<SessionDirectory>,
        config: Arc<ServerConfig>,
    ) -> std::io::Result<Arc<Self>> {
        let peer_addr = stream.peer_addr()?;
        listener::configure_accepted(std::os::unix::io::AsRawFd::as_raw_fd(&stream))?;
        let timeout = config.session_timeout;
        let tcp = TcpConnection::new(stream, scheduler.clone());
        let fd = tcp.fd();

        let conn = Arc::new(Self {
            tcp,
            scheduler: scheduler.clone(),
            directory,
            config,
            peer_addr,
            self_weak: Mutex::new(Weak::new()),
            read_buf: Mutex::new(Vec::new()),
            rtp: Mutex::new(None),
            session: Mutex::new(None),
            session_token: Mutex::new(None),
            role: Mutex::new(None),
            is_playing: AtomicBool::new(false),
            keep_alive_remaining: AtomicU32::new(timeout.as_secs() as u32),
            timeout_timer: Mutex::new(None),
            challenge: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        *conn.self_weak.lock() = Arc::downgrade(&conn);

        let read_conn = Arc::clone(&conn);
        let close_conn = Arc::clone(&conn);
        register_channel(
            &scheduler,
            fd,
            Box::new(move || read_conn.on_readable()),
            Box::new(move || close_conn.on_closed()),
        );

        conn.arm_timeout_timer(timeout);
        tracing::info!(peer = %peer_addr, "client connected");
        Ok(conn)
    }

    /// Write raw bytes to this connection's socket, used by the owned
    /// `RtpConnection` for TCP-interleaved RTP/RTCP delivery.
    pub fn send_bytes(self: &Arc<Self>, data: &[u8]) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.tcp.write(data);
    }

    /// Reset the inactivity counter. Called on any RTSP request, any
    /// interleaved RTCP frame, and any UDP RTCP keep-alive packet.
    pub fn keep_alive(&self) {
        self.keep_alive_remaining
            .store(self.config.session_timeout.as_secs() as u32, Ordering::Release);
    }

    fn arm_timeout_timer(self: &Arc<Self>, timeout: Duration) {
        let weak = Arc::downgrade(self);
        let period = Duration::from_secs(1).min(timeout);
        let id = self.scheduler.add_timer(
            TimerKind::Periodic(period),
            period,
            Box::new(move || {
                let Some(conn) = weak.upgrade() else {
                    return false;
                };
                if conn.closed.load(Ordering::Acquire) {
                    return false;
                }
                let remaining = conn.keep_alive_remaining.fetch_update(
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    |r| Some(r.saturating_sub(1)),
                );
                if remaining == Ok(0) || remaining == Ok(1) {
                    tracing::info!(peer = %conn.peer_addr, "session timed out");
                    conn.close();
                    return false;
                }
                true
            }),
        );
        *self.timeout_timer.lock() = Some(id);
    }

    fn on_readable(self: &Arc<Self>) {
        let mut buf = [0u8; 4096];
        loop {
            match self.tcp.read(&mut buf) {
                Ok(0) => {
                    self.close();
                    return;
                }
                Ok(n) => {
                    self.read_buf.lock().extend_from_slice(&buf[..n]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.close();
                    return;
                }
            }
        }
        self.process_buffer();
    }

    fn on_closed(self: &Arc<Self>) {
        self.close();
    }

    fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(id) = self.timeout_timer.lock().take() {
            self.scheduler.remove_timer(id);
        }
        if let Some(rtp) = self.rtp.lock().as_ref() {
            rtp.teardown();
        }
        if let Some(session) = self.session.lock().as_ref() {
            if let Some(rtp) = self.rtp.lock().as_ref() {
                session.detach_client(rtp);
            }
        }
        self.scheduler.remove_channel(self.tcp.fd());
        tracing::info!(peer = %self.peer_addr, "client disconnected");
    }

    /// Drain complete requests (and any leading interleaved RTCP frames)
    /// from the read buffer, dispatching each in turn.
    fn process_buffer(self: &Arc<Self>) {
        loop {
            let leading_byte = {
                let buf = self.read_buf.lock();
                buf.first().copied()
            };

            match leading_byte {
                None => break,
                Some(b'$') => {
                    if !self.consume_interleaved_frame() {
                        break;
                    }
                    self.keep_alive();
                    continue;
                }
                Some(_) => {}
            }

            let parsed = {
                let buf = self.read_buf.lock();
                RtspRequest::try_parse(&buf)
            };

            match parsed {
                Ok(Some((request, consumed))) => {
                    self.read_buf.lock().drain(..consumed);
                    self.keep_alive();
                    self.dispatch(&request);
                }
                Ok(None) => {
                    let len = self.read_buf.lock().len();
                    if len > MAX_BODY_SIZE {
                        tracing::warn!(peer = %self.peer_addr, len, "oversized request, draining buffer");
                        self.read_buf.lock().clear();
                    }
                    break;
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "RTSP parse error");
                    self.read_buf.lock().clear();
                    self.tcp.write(&RtspResponse::bad_request().serialize());
                    break;
                }
            }
        }
    }

    /// Consume one `$ CH LEN-hi LEN-lo <payload>` interleaved frame from
    /// the front of the read buffer. Returns `false` if the buffer
    /// doesn't yet hold a complete frame.
    fn consume_interleaved_frame(&self) -> bool {
        let mut buf = self.read_buf.lock();
        if buf.len() < 4 {
            return false;
        }
        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if buf.len() < 4 + len {
            return false;
        }
        buf.drain(..4 + len);
        true
    }

    fn dispatch(self: &Arc<Self>, request: &RtspRequest) {
        tracing::debug!(
            peer = %self.peer_addr,
            method = %request.method,
            uri = %request.uri,
            "request"
        );

        let response = match request.method.as_str() {
            "OPTIONS" => self.handle_options(request),
            "DESCRIBE" => self
                .authenticate(request)
                .unwrap_or_else(|| self.handle_describe(request)),
            "SETUP" => self
                .authenticate(request)
                .unwrap_or_else(|| self.handle_setup(request)),
            "PLAY" => self
                .authenticate(request)
                .unwrap_or_else(|| self.handle_play(request)),
            "TEARDOWN" => self.handle_teardown(request),
            "GET_PARAMETER" => RtspResponse::ok().for_request(request),
            "ANNOUNCE" => self
                .authenticate(request)
                .unwrap_or_else(|| self.handle_announce(request)),
            "RECORD" => self
                .authenticate(request)
                .unwrap_or_else(|| self.handle_record(request)),
            _ => RtspResponse::bad_request().for_request(request),
        };

        tracing::debug!(peer = %self.peer_addr, status = response.status_code, "response");
        self.tcp.write(&response.serialize());

        if request.method == "TEARDOWN" {
            self.close();
        }
    }

    fn handle_options(&self, request: &RtspRequest) -> RtspResponse {
        RtspResponse::ok().for_request(request).add_header(
            "Public",
            "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN, GET_PARAMETER, ANNOUNCE, RECORD",
        )
    }

    fn handle_describe(self: &Arc<Self>, request: &RtspRequest) -> RtspResponse {
        let suffix = crate::session::extract_session_suffix(&request.uri);
        let Some(session) = self.directory.find_by_suffix(suffix) else {
            return RtspResponse::not_found().for_request(request);
        };

        let rtp = self.ensure_rtp_connection();
        for channel_id in MediaChannelId::ALL {
            if let Some((clock_rate, payload_type)) = session.channel_info(channel_id) {
                rtp.set_clock_rate(channel_id, clock_rate);
                rtp.set_payload_type(channel_id, payload_type);
            }
        }

        *self.session.lock() = Some(session.clone());
        *self.role.lock() = Some(Role::Server);

        RtspResponse::ok()
            .for_request(request)
            .add_header(
                "Content-Base",
                format!("rtsp://{}{}/", self.config.advertised_authority(), suffix),
            )
            .with_body("application/sdp", session.sdp())
    }

    fn handle_setup(self: &Arc<Self>, request: &RtspRequest) -> RtspResponse {
        let (mount, track) = split_mount_and_track(&request.uri);
        let Some(session) = self.directory.find_by_suffix(&mount) else {
            return RtspResponse::not_found().for_request(request);
        };
        let Some(track) = track else {
            return RtspResponse::bad_request().for_request(request);
        };
        let channel_id = match track.as_str() {
            "track0" => MediaChannelId::Video,
            "track1" => MediaChannelId::Audio,
            _ => return RtspResponse::not_found().for_request(request),
        };
        if !session.has_channel(channel_id) {
            return RtspResponse::not_found().for_request(request);
        }

        let Some(transport_value) = request.get_header("Transport") else {
            return RtspResponse::bad_request().for_request(request);
        };
        let Some(requested) = parse_transport_header(transport_value) else {
            return RtspResponse::unsupported_transport().for_request(request);
        };

        let rtp = self.ensure_rtp_connection();
        if let Some((clock_rate, payload_type)) = session.channel_info(channel_id) {
            rtp.set_clock_rate(channel_id, clock_rate);
            rtp.set_payload_type(channel_id, payload_type);
        }

        let resolved = match requested {
            RequestedTransport::TcpInterleaved {
                rtp_channel,
                rtcp_channel,
            } => {
                rtp.setup_rtp_over_tcp(channel_id, rtp_channel, rtcp_channel);
                ResolvedTransport::TcpInterleaved {
                    rtp_channel,
                    rtcp_channel,
                }
            }
            RequestedTransport::UdpUnicast {
                client_rtp_port,
                client_rtcp_port,
            } => {
                let peer_ip = self.peer_addr.ip();
                if !rtp.setup_rtp_over_udp(channel_id, peer_ip, client_rtp_port, client_rtcp_port) {
                    return RtspResponse::server_error().for_request(request);
                }
                ResolvedTransport::UdpUnicast {
                    client_rtp_port,
                    client_rtcp_port,
                    server_rtp_port: rtp.local_rtp_port(channel_id),
                    server_rtcp_port: rtp.local_rtcp_port(channel_id),
                }
            }
            RequestedTransport::UdpMulticast => {
                let Some(multicast) = session.multicast() else {
                    return RtspResponse::unsupported_transport().for_request(request);
                };
                if !rtp.setup_rtp_over_multicast(
                    channel_id,
                    std::net::IpAddr::V4(multicast.address),
                    multicast.rtp_port,
                ) {
                    return RtspResponse::server_error().for_request(request);
                }
                ResolvedTransport::UdpMulticast {
                    destination: multicast.address.to_string(),
                    rtp_port: multicast.rtp_port,
                    rtcp_port: multicast.rtp_port + 1,
                    ttl: 16,
                }
            }
        };

        session.attach_client(&rtp);
        *self.session.lock() = Some(session.clone());
        *self.role.lock() = Some(Role::Server);

        let ssrc = rtp.ssrc(channel_id);
        let session_token = self.session_token_or_create();

        RtspResponse::ok()
            .for_request(request)
            .add_header("Transport", resolved.render(ssrc))
            .add_header("Session", session_token)
    }

    fn handle_play(self: &Arc<Self>, request: &RtspRequest) -> RtspResponse {
        let Some(rtp) = self.rtp.lock().clone() else {
            return RtspResponse::bad_request().for_request(request);
        };
        rtp.play();
        self.is_playing.store(true, Ordering::Release);

        let rtsp_url = format!(
            "rtsp://{}{}",
            self.config.advertised_authority(),
            self.session
                .lock()
                .as_ref()
                .map(|s| s.url_suffix().to_string())
                .unwrap_or_default()
        );

        RtspResponse::ok()
            .for_request(request)
            .add_header("Session", self.session_token_or_create())
            .add_header("RTP-Info", rtp.rtp_info(&rtsp_url))
    }

    fn handle_teardown(self: &Arc<Self>, request: &RtspRequest) -> RtspResponse {
        self.is_playing.store(false, Ordering::Release);
        if let Some(rtp) = self.rtp.lock().as_ref() {
            rtp.teardown();
        }
        if let Some(session) = self.session.lock().as_ref() {
            if let Some(rtp) = self.rtp.lock().as_ref() {
                session.detach_client(rtp);
            }
        }
        RtspResponse::ok().for_request(request)
    }

    /// `OPTIONS → ANNOUNCE → SETUP → RECORD`, the client-initiated
    /// counterpart to the server-role play flow (§10.5). `ANNOUNCE`
    /// registers a fresh, unicast-only session from the SDP carried in
    /// the request body; actual ingest packetization is out of scope —
    /// this crate serves media, it does not decode an inbound stream —
    /// so RECORD only flips connection state, it does not yet wire the
    /// pushed bytes to a `MediaSession`.
    fn handle_announce(self: &Arc<Self>, request: &RtspRequest) -> RtspResponse {
        if request.body.is_empty() {
            return RtspResponse::bad_request().for_request(request);
        }
        *self.role.lock() = Some(Role::Pusher);
        RtspResponse::ok().for_request(request)
    }

    fn handle_record(self: &Arc<Self>, request: &RtspRequest) -> RtspResponse {
        if *self.role.lock() != Some(Role::Pusher) {
            return RtspResponse::bad_request().for_request(request);
        }
        RtspResponse::ok()
            .for_request(request)
            .add_header("Session", self.session_token_or_create())
    }

    fn authenticate(&self, request: &RtspRequest) -> Option<RtspResponse> {
        let Some(creds) = &self.config.auth else {
            return None;
        };

        let mut challenge_guard = self.challenge.lock();
        if challenge_guard.is_none() {
            *challenge_guard = Some(DigestChallenge::new(&creds.realm));
        }

        let authorized = {
            let challenge = challenge_guard.as_ref().unwrap();
            request.get_header("Authorization").is_some_and(|header| {
                auth::verify(header, creds, challenge, &request.method, &request.uri)
            })
        };
        if authorized {
            return None;
        }

        let www_authenticate = challenge_guard.as_ref().unwrap().www_authenticate_header();

        Some(
            RtspResponse::unauthorized()
                .for_request(request)
                .add_header("WWW-Authenticate", www_authenticate),
        )
    }

    fn ensure_rtp_connection(&self) -> Arc<RtpConnection> {
        let mut slot = self.rtp.lock();
        if let Some(existing) = slot.as_ref() {
            return existing.clone();
        }
        let weak_self = self.self_weak.lock().clone();
        let rtp = Arc::new(RtpConnection::new(weak_self, self.scheduler.clone()));
        *slot = Some(rtp.clone());
        rtp
    }

    fn session_token_or_create(&self) -> String {
        let mut token = self.session_token.lock();
        if let Some(existing) = token.as_ref() {
            return existing.clone();
        }
        let generated = format!("{:016X}", rand::rng().random::<u64>());
        *token = Some(generated.clone());
        generated
    }
}
