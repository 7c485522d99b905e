//! RTP fixed header (RFC 3550 §5.1) and TCP-interleaved framing (RFC 2326 §10.12).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use rand::Rng;

pub const RTP_HEADER_SIZE: usize = 12;
const RTP_VERSION: u8 = 2;

/// `$` channel len — a 4-byte prefix RFC 2326 §10.12 stamps in front of
/// an RTP or RTCP packet when it is interleaved onto the RTSP TCP
/// connection instead of a dedicated UDP socket.
pub const INTERLEAVED_PREFIX_SIZE: usize = 4;

/// Per-channel RTP header state: sequence counter and SSRC, one per
/// [`crate::rtp::RtpConnection`] channel.
#[derive(Debug)]
pub struct RtpHeader {
    pub payload_type: u8,
    pub ssrc: u32,
    sequence: u16,
}

impl RtpHeader {
    pub fn new(payload_type: u8, ssrc: u32) -> Self {
        Self {
            payload_type,
            ssrc,
            sequence: 0,
        }
    }

    /// Create with a random SSRC and initial sequence number, per RFC
    /// 3550 §8.1 (minimize the chance of collision between sessions).
    pub fn with_random_ssrc(payload_type: u8) -> Self {
        let mut rng = rand::rng();
        let mut header = Self::new(payload_type, rng.random::<u32>());
        header.sequence = rng.random::<u16>();
        header
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Serialize a 12-byte RTP fixed header and advance the sequence
    /// number. `marker` is set on the last packet of an access unit.
    pub fn write(&mut self, marker: bool, timestamp: u32) -> [u8; RTP_HEADER_SIZE] {
        let mut header = [0u8; RTP_HEADER_SIZE];
        header[0] = RTP_VERSION << 6;
        header[1] = ((marker as u8) << 7) | (self.payload_type & 0x7f);
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        self.sequence = self.sequence.wrapping_add(1);
        header
    }
}

/// Prepend the `$ channel len` framing prefix used for TCP-interleaved
/// delivery. `payload` is the complete RTP (header + payload) packet.
pub fn frame_interleaved(channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(INTERLEAVED_PREFIX_SIZE + payload.len());
    framed.push(b'$');
    framed.push(channel);
    framed.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}
