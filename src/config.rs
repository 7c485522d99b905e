//! Server-wide configuration.
//!
//! Per the library's control surface (no CLI, no environment variables, no
//! persisted state), every knob the embedding application can turn is a
//! plain field on [`ServerConfig`] passed to [`Server::with_config`](crate::Server::with_config).

use std::time::Duration;

/// Digest authentication credentials (RFC 2069 / RFC 2617 as profiled for RTSP).
///
/// When absent from [`ServerConfig`], no authentication is required.
#[derive(Debug, Clone)]
pub struct DigestCredentials {
    pub realm: String,
    pub username: String,
    pub password: String,
}

/// Server-wide configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host advertised in SDP `o=`/`c=` lines. Not necessarily the bind
    /// address — useful behind NAT.
    pub public_host: String,

    /// Port advertised in `Content-Base` and `RTP-Info` URLs built from
    /// `public_host`. Not necessarily the bind port. `0` (the default)
    /// omits the port and leaves `public_host` to carry it, if needed —
    /// e.g. when the caller already set `public_host` to a `host:port`
    /// pair.
    pub public_port: u16,

    /// `o=` username token. Spec default is the literal `-`.
    pub sdp_username: String,

    /// Optional `s=` session name line. Omitted from SDP when `None`.
    pub sdp_session_name: Option<String>,

    /// Number of reactor worker threads. Default 1. Scheduler 0 is always
    /// the control scheduler (listener + cross-thread channel updates);
    /// connections are pinned to worker schedulers round-robin starting
    /// at index 1 when `worker_threads > 1`.
    pub worker_threads: u32,

    /// Inactivity timeout after which an RTSP connection with no RTSP I/O
    /// and no RTCP traffic is force-closed.
    pub session_timeout: Duration,

    /// Administratively-scoped multicast range to allocate session
    /// addresses from. Defaults to `232.0.1.0`..=`239.255.255.254`.
    pub multicast_range: (std::net::Ipv4Addr, std::net::Ipv4Addr),

    /// Digest authentication credentials. `None` disables authentication.
    pub auth: Option<DigestCredentials>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_host: "0.0.0.0".to_string(),
            public_port: 0,
            sdp_username: "-".to_string(),
            sdp_session_name: None,
            worker_threads: 1,
            session_timeout: Duration::from_secs(30),
            multicast_range: (
                std::net::Ipv4Addr::new(232, 0, 1, 0),
                std::net::Ipv4Addr::new(239, 255, 255, 254),
            ),
            auth: None,
        }
    }
}

impl ServerConfig {
    /// `public_host`, with `:public_port` appended when a nonzero port is
    /// configured. Used for the `Content-Base` and `RTP-Info` URLs built
    /// in `rtsp::connection`; SDP `o=`/`c=` lines use `public_host` alone
    /// (§4.7 has no port in the origin line).
    pub fn advertised_authority(&self) -> String {
        if self.public_port == 0 {
            self.public_host.clone()
        } else {
            format!("{}:{}", self.public_host, self.public_port)
        }
    }
}
