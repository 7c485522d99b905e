//! AAC framer (RFC 3640, `mpeg4-generic` / AAC-hbr mode).
//!
//! One AAC access unit (raw, no ADTS header — the encoder wrapper is
//! expected to strip that) becomes exactly one RTP packet: a 4-byte
//! AU-header-section followed by the access unit bytes verbatim. Unlike
//! H.264, §4.6 specifies no fragmentation path — an AAC frame comfortably
//! fits the RTP MTU, so every packetize call emits a single fragment.

use std::sync::Arc;

use super::{Frame, FrameKind, MediaChannelId, MediaFragment, Packetizer};

/// Typical AAC-LC samples per access unit; used to advance the running
/// sample-count clock when the caller doesn't supply an explicit
/// timestamp.
const SAMPLES_PER_FRAME: u32 = 1024;

/// AAC raw access unit → RTP framer.
///
/// `config` is the AudioSpecificConfig blob (ISO 14496-3 §1.6.2.1) the
/// encoder produced alongside the bitstream; it is advertised verbatim
/// (hex-encoded) in the SDP `fmtp` line so a client's decoder can be
/// initialized without an out-of-band channel.
pub struct AacPacketizer {
    sample_rate: u32,
    config: Vec<u8>,
    sample_count: u32,
}

impl AacPacketizer {
    pub fn new(sample_rate: u32, audio_specific_config: Vec<u8>) -> Self {
        Self {
            sample_rate,
            config: audio_specific_config,
            sample_count: 0,
        }
    }

    fn config_hex(&self) -> String {
        self.config.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl Packetizer for AacPacketizer {
    fn packetize(&mut self, frame: &Frame) -> Vec<MediaFragment> {
        if frame.payload.is_empty() {
            return Vec::new();
        }

        let timestamp = if frame.timestamp == 0 {
            self.sample_count
        } else {
            frame.timestamp
        };
        self.sample_count = timestamp.wrapping_add(SAMPLES_PER_FRAME);

        // AU-headers-length (16 bits, value = 16: one 16-bit AU-header
        // follows) then the AU-header itself: size<<3 | index(=0).
        let au_size = (frame.payload.len() as u16) << 3;
        let mut payload = Vec::with_capacity(4 + frame.payload.len());
        payload.extend_from_slice(&16u16.to_be_bytes());
        payload.extend_from_slice(&au_size.to_be_bytes());
        payload.extend_from_slice(&frame.payload);

        vec![MediaFragment {
            kind: FrameKind::Audio,
            timestamp,
            is_last_fragment: true,
            payload: Arc::from(payload),
        }]
    }

    fn codec_name(&self) -> &'static str {
        "AAC"
    }

    fn clock_rate(&self) -> u32 {
        self.sample_rate
    }

    fn payload_type(&self) -> u8 {
        97
    }

    /// `mpeg4-generic`/AAC-hbr per RFC 3640 §4.1; `config` carries the
    /// AudioSpecificConfig so the client never needs an out-of-band ASC.
    fn sdp_attributes(&self, channel: MediaChannelId) -> Vec<String> {
        vec![
            format!(
                "a=rtpmap:{} mpeg4-generic/{}",
                self.payload_type(),
                self.clock_rate()
            ),
            format!(
                "a=fmtp:{} streamtype=5;profile-level-id=1;mode=AAC-hbr;config={};sizelength=13;indexlength=3;indexdeltalength=3",
                self.payload_type(),
                self.config_hex()
            ),
            format!("a=control:{}", channel.track_name()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packetizer() -> AacPacketizer {
        AacPacketizer::new(44100, vec![0x12, 0x10])
    }

    #[test]
    fn single_au_produces_one_fragment() {
        let mut p = make_packetizer();
        let frame = Frame::new(FrameKind::Audio, vec![0xAA; 100]);
        let fragments = p.packetize(&frame);
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].is_last_fragment);
    }

    #[test]
    fn au_header_section_encodes_size() {
        let mut p = make_packetizer();
        let frame = Frame::new(FrameKind::Audio, vec![0xBB; 50]);
        let fragments = p.packetize(&frame);
        let payload = &fragments[0].payload;
        assert_eq!(u16::from_be_bytes([payload[0], payload[1]]), 16);
        let au_header = u16::from_be_bytes([payload[2], payload[3]]);
        assert_eq!(au_header >> 3, 50);
        assert_eq!(au_header & 0x7, 0);
        assert_eq!(&payload[4..], &[0xBB; 50][..]);
    }

    #[test]
    fn timestamp_advances_by_samples_per_frame() {
        let mut p = make_packetizer();
        let frame = Frame::new(FrameKind::Audio, vec![0x01; 10]);
        let first = p.packetize(&frame);
        let second = p.packetize(&frame);
        assert_eq!(first[0].timestamp, 0);
        assert_eq!(second[0].timestamp, SAMPLES_PER_FRAME);
    }

    #[test]
    fn explicit_timestamp_is_honored() {
        let mut p = make_packetizer();
        let frame = Frame::with_timestamp(FrameKind::Audio, 99_000, vec![0x01; 10]);
        let fragments = p.packetize(&frame);
        assert_eq!(fragments[0].timestamp, 99_000);
    }

    #[test]
    fn empty_payload_produces_no_fragment() {
        let mut p = make_packetizer();
        let frame = Frame::new(FrameKind::Audio, Vec::new());
        assert!(p.packetize(&frame).is_empty());
    }

    #[test]
    fn sdp_advertises_mpeg4_generic_and_config() {
        let p = make_packetizer();
        let attrs = p.sdp_attributes(MediaChannelId::Audio);
        assert!(attrs[0].contains("mpeg4-generic/44100"));
        assert!(attrs[1].contains("config=1210"));
        assert!(attrs[1].contains("mode=AAC-hbr"));
    }

    #[test]
    fn codec_metadata() {
        let p = make_packetizer();
        assert_eq!(p.codec_name(), "AAC");
        assert_eq!(p.payload_type(), 97);
    }
}
