//! TCP socket plumbing: raw-socket listener setup and a buffered,
//! reactor-driven connection writer shared by RTSP responses and
//! TCP-interleaved RTP/RTCP framing.

pub mod listener;
pub mod tcp_connection;

pub use tcp_connection::TcpConnection;
