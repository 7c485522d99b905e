//! RTP/RTCP delivery to a single client: TCP-interleaved, UDP unicast, or
//! UDP multicast, chosen by the `Transport` header negotiated at SETUP.

pub mod connection;
pub mod packet;

pub use connection::{RtpConnection, TransportMode};
pub use packet::{RtpHeader, frame_interleaved};
