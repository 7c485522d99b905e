//! Error types for the RTSP server library.

use std::fmt;

/// Errors that can occur in the RTSP server library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP messages.
/// - **Transport**: [`Io`](Self::Io) — socket/network failures.
/// - **Session**: [`SessionNotFound`](Self::SessionNotFound),
///   [`MountCollision`](Self::MountCollision).
/// - **Setup**: [`TransportNotConfigured`](Self::TransportNotConfigured),
///   [`UnsupportedTransport`](Self::UnsupportedTransport),
///   [`PortRangeExhausted`](Self::PortRangeExhausted),
///   [`MulticastAddressExhausted`](Self::MulticastAddressExhausted).
/// - **Auth**: [`AuthRequired`](Self::AuthRequired).
/// - **Reactor**: [`TriggerQueueFull`](Self::TriggerQueueFull).
/// - **Server**: [`NotStarted`](Self::NotStarted), [`AlreadyRunning`](Self::AlreadyRunning).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No session with the given URL suffix or id exists.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// `add_session` was called with a URL suffix that is already registered.
    #[error("mount already registered: {0}")]
    MountCollision(String),

    /// SETUP has not been completed for the requested channel.
    #[error("transport not configured for channel")]
    TransportNotConfigured,

    /// SETUP requested a `Transport` header this server cannot satisfy
    /// (e.g. multicast on a session that never called `start_multicast`).
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// Authentication is required or the supplied credentials were rejected.
    #[error("authentication required")]
    AuthRequired,

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Server-side UDP port allocation exhausted its retry budget.
    #[error("port range exhausted after retrying bind")]
    PortRangeExhausted,

    /// The multicast address pool has no free addresses left to allocate.
    #[error("multicast address pool exhausted")]
    MulticastAddressExhausted,

    /// A scheduler's trigger-event ring buffer is at capacity.
    #[error("trigger event queue is full")]
    TriggerQueueFull,
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// A `Transport` header could not be parsed into a known mode.
    InvalidTransport,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidTransport => write!(f, "invalid transport header"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
