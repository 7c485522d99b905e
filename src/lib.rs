//! # rtsp — low-latency RTSP/RTP screen-sharing streaming server
//!
//! A Rust library for publishing a live H.264 video + AAC audio capture
//! to multiple RTSP clients over the Real-Time Streaming Protocol.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Packet header format, SSRC generation, sequence/timestamp semantics |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Session description generation for DESCRIBE responses |
//! | [RFC 6184](https://tools.ietf.org/html/rfc6184) | H.264 RTP payload | NAL unit packetization, FU-A fragmentation, SDP fmtp attributes |
//! | [RFC 3640](https://tools.ietf.org/html/rfc3640) | AAC RTP payload | `mpeg4-generic` packetization, SDP fmtp attributes |
//! | [RFC 2617](https://tools.ietf.org/html/rfc2617) | HTTP Digest auth | Challenge/response authentication on the RTSP control channel |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  RtspServer    — public API, orchestrator │
//! │  SessionDirectory — named stream mounts   │
//! ├──────────────────────────────────────────┤
//! │  rtsp          — request/response, SDP,   │
//! │                  connection state machine │
//! │  rtp           — per-client RTP/RTCP       │
//! ├──────────────────────────────────────────┤
//! │  reactor       — epoll event loop, timers │
//! │  transport     — raw-socket TCP listener  │
//! │  media         — packetizers (H.264, AAC) │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use rtsp::{RtspServer, ServerConfig};
//! use rtsp::media::h264::H264Packetizer;
//!
//! let server = RtspServer::with_config(
//!     "0.0.0.0:8554".parse().unwrap(),
//!     ServerConfig::default(),
//! ).unwrap();
//! server.start().unwrap();
//! server.add_session("/screen", Some(Box::new(H264Packetizer::new())), None, false).unwrap();
//!
//! // Push H.264 Annex B NAL units — the server packetizes and fans out via RTP.
//! // server.push_frame("/screen", rtsp::media::MediaChannelId::Video, &frame);
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — [`RtspServer`], the library's public entry point.
//! - [`config`] — [`config::ServerConfig`] and [`config::DigestCredentials`].
//! - [`rtsp`] — request/response parsing, `Transport:` header, Digest
//!   auth, and [`rtsp::RtspConnection`]'s method dispatch.
//! - [`rtp`] — [`rtp::RtpConnection`], one client's RTP/RTCP transport.
//! - [`session`] — [`session::MediaSession`] and [`session::SessionDirectory`].
//! - [`media`] — [`media::Packetizer`] trait and the H.264/AAC framers.
//! - [`reactor`] — epoll-based event loop, timers, cross-thread triggers.
//! - [`transport`] — raw-socket TCP listener and buffered writer.
//! - [`error`] — [`RtspError`] and [`Result`].

pub mod config;
pub mod error;
pub mod media;
pub mod reactor;
pub mod rtp;
pub mod rtsp;
pub mod server;
pub mod session;
pub mod transport;

pub use config::ServerConfig;
pub use error::{Result, RtspError};
pub use media::Packetizer;
pub use server::RtspServer;
