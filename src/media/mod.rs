//! Codec framers: turn encoded access units into RTP payload fragments.
//!
//! A framer never touches an RTP sequence number, SSRC, or socket — that
//! state is per-client and lives on [`RtpConnection`](crate::rtp::RtpConnection).
//! A framer only knows how to split one codec's access units into
//! payload-sized pieces and compute their timestamps; see
//! [`Packetizer`].

pub mod aac;
pub mod h264;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Media session channels are fixed: one video, one audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaChannelId {
    Video,
    Audio,
}

impl MediaChannelId {
    pub const ALL: [MediaChannelId; 2] = [MediaChannelId::Video, MediaChannelId::Audio];

    pub fn index(self) -> usize {
        match self {
            MediaChannelId::Video => 0,
            MediaChannelId::Audio => 1,
        }
    }

    pub fn track_name(self) -> &'static str {
        match self {
            MediaChannelId::Video => "track0",
            MediaChannelId::Audio => "track1",
        }
    }
}

/// What kind of access unit a [`Frame`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// H.264 IDR / key frame (or an SPS/PPS/SEI NAL carried alongside one).
    VideoKey,
    /// H.264 non-key (P/B) frame.
    VideoDelta,
    /// AAC access unit.
    Audio,
}

impl FrameKind {
    /// Per §6: a key frame is `video-I`, or — conservatively — any audio
    /// frame, since audio carries no GOP structure to wait out.
    pub fn is_key(self) -> bool {
        matches!(self, FrameKind::VideoKey | FrameKind::Audio)
    }
}

/// One encoded access unit pushed in from outside the crate: an Annex-B
/// NAL unit (video) or a raw AAC access unit (audio), already stripped
/// of start codes / ADTS headers.
///
/// `timestamp` is in the codec's clock rate (90 kHz for video, the AAC
/// sample rate for audio). A timestamp of `0` asks the framer to
/// substitute the current wall-clock-derived value (§6).
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: Vec<u8>) -> Self {
        Self {
            kind,
            timestamp: 0,
            payload,
        }
    }

    pub fn with_timestamp(kind: FrameKind, timestamp: u32, payload: Vec<u8>) -> Self {
        Self {
            kind,
            timestamp,
            payload,
        }
    }
}

/// A framed RTP payload fragment, ready for a per-client RTP header to
/// be stamped over it. See [`crate::rtp::RtpPacket`].
///
/// `payload` is an immutable shared byte slice rather than an owned
/// `Vec`: the session fan-out hands the same fragment to every attached
/// client, so cloning a `MediaFragment` to queue it per client is a
/// refcount bump, not a buffer copy (§9 design notes).
#[derive(Debug, Clone)]
pub struct MediaFragment {
    pub kind: FrameKind,
    pub timestamp: u32,
    pub is_last_fragment: bool,
    pub payload: Arc<[u8]>,
}

/// Per-codec framer. One instance lives per channel of a `MediaSession`
/// for as long as the session does.
pub trait Packetizer: Send {
    /// Split one access unit into ordered RTP payload fragments.
    fn packetize(&mut self, frame: &Frame) -> Vec<MediaFragment>;
    fn codec_name(&self) -> &'static str;
    fn clock_rate(&self) -> u32;
    fn payload_type(&self) -> u8;
    /// SDP media-level attribute lines for this channel (rtpmap, fmtp,
    /// control), not including the `m=` line itself.
    fn sdp_attributes(&self, channel: MediaChannelId) -> Vec<String>;
}

/// Video timestamp clock per §6: monotonic milliseconds × 90.
pub fn video_timestamp_now() -> u32 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    (millis as u64).wrapping_mul(90) as u32
}
