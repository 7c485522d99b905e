//! H.264 framer (RFC 6184).
//!
//! Converts H.264 Annex B NAL units into RTP payload fragments. Supports
//! both packetization modes from RFC 6184:
//!
//! - **Single NAL Unit** (§5.6): NALs that fit within the MTU are a
//!   single fragment, payload verbatim.
//! - **FU-A Fragmentation** (§5.8): larger NALs are split across
//!   fragments, each carrying a 2-byte FU header:
//!
//!   ```text
//!   FU indicator:  [F|NRI|Type=28]     (1 byte)
//!   FU header:     [S|E|R|NAL_Type]    (1 byte)
//!   Fragment data: [...]               (up to MTU - 2 bytes)
//!   ```
//!
//! RTP sequence numbers, SSRC, and the 12-byte RTP header itself are not
//! this module's concern — they are stamped per client by
//! [`crate::rtp::RtpConnection`]. This module only produces ordered,
//! correctly-sized payload fragments and their timestamps.

use std::sync::Arc;

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::{Frame, FrameKind, MediaChannelId, MediaFragment, Packetizer, video_timestamp_now};

/// RFC 6184 leaves headroom for the FU-A 2-byte header within a 1420-byte
/// RTP payload budget (§6 `MAX_RTP_PAYLOAD_SIZE`).
const MAX_RTP_PAYLOAD_SIZE: usize = 1420;

/// A NAL is a key frame per §6 if its type is IDR, SPS, PPS, or SEI.
fn is_key_nal_type(nal_type: u8) -> bool {
    matches!(nal_type, 5 | 6 | 7 | 8)
}

/// H.264 Annex-B → RTP framer.
#[derive(Debug, Default)]
pub struct H264Packetizer {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H264Packetizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive `profile-level-id` from SPS bytes 1–3 (RFC 6184 §8.1).
    fn profile_level_id(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        if sps.len() < 4 {
            return None;
        }
        Some(format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
    }

    fn sprop_parameter_sets(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        let pps = self.pps.as_deref()?;
        Some(format!(
            "{},{}",
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        ))
    }

    /// Extract NAL units from an Annex-B bitstream, handling mixed
    /// 3-byte (`00 00 01`) and 4-byte (`00 00 00 01`) start codes.
    pub fn extract_nal_units(data: &[u8]) -> Vec<Vec<u8>> {
        let mut nal_units = Vec::new();
        let mut i = 0usize;
        let mut start_entries: Vec<(usize, usize)> = Vec::new();

        while i < data.len() {
            if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
                start_entries.push((i + 4, 4));
                i += 4;
            } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
                start_entries.push((i + 3, 3));
                i += 3;
            } else {
                i += 1;
            }
        }

        for (idx, &(start, _)) in start_entries.iter().enumerate() {
            let end = if idx + 1 < start_entries.len() {
                let (next_start, next_sc_len) = start_entries[idx + 1];
                next_start - next_sc_len
            } else {
                data.len()
            };
            if start < end {
                nal_units.push(data[start..end].to_vec());
            }
        }

        nal_units
    }

    fn fragment_nal(nal_unit: &[u8], timestamp: u32, is_last_nal: bool) -> Vec<MediaFragment> {
        let mut fragments = Vec::new();
        if nal_unit.is_empty() {
            return fragments;
        }

        if nal_unit.len() <= MAX_RTP_PAYLOAD_SIZE {
            let nal_type = nal_unit[0] & 0x1f;
            fragments.push(MediaFragment {
                kind: if is_key_nal_type(nal_type) {
                    FrameKind::VideoKey
                } else {
                    FrameKind::VideoDelta
                },
                timestamp,
                is_last_fragment: is_last_nal,
                payload: Arc::from(nal_unit),
            });
            return fragments;
        }

        // FU-A fragmentation (RFC 6184 §5.8).
        let nal_header = nal_unit[0];
        let nal_type = nal_header & 0x1f;
        let nri = nal_header & 0x60;
        let fu_indicator = nri | 28;
        let payload = &nal_unit[1..];
        let max_fragment = MAX_RTP_PAYLOAD_SIZE - 2;

        let kind = if is_key_nal_type(nal_type) {
            FrameKind::VideoKey
        } else {
            FrameKind::VideoDelta
        };

        let mut offset = 0usize;
        let mut first = true;
        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let last_fragment_of_nal = remaining <= max_fragment;
            let chunk_size = remaining.min(max_fragment);
            let chunk = &payload[offset..offset + chunk_size];

            let start_bit = if first { 0x80 } else { 0x00 };
            let end_bit = if last_fragment_of_nal { 0x40 } else { 0x00 };
            let fu_header = start_bit | end_bit | nal_type;

            let mut fragment_payload = Vec::with_capacity(2 + chunk.len());
            fragment_payload.push(fu_indicator);
            fragment_payload.push(fu_header);
            fragment_payload.extend_from_slice(chunk);

            fragments.push(MediaFragment {
                kind,
                timestamp,
                is_last_fragment: is_last_nal && last_fragment_of_nal,
                payload: Arc::from(fragment_payload),
            });

            offset += chunk_size;
            first = false;
        }

        tracing::trace!(
            nal_type,
            nal_size = nal_unit.len(),
            fragments = fragments.len(),
            "FU-A fragmented NAL unit"
        );
        fragments
    }
}

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, frame: &Frame) -> Vec<MediaFragment> {
        let nal_units = Self::extract_nal_units(&frame.payload);

        if self.sps.is_none() || self.pps.is_none() {
            for nal in &nal_units {
                if nal.is_empty() {
                    continue;
                }
                let nal_type = nal[0] & 0x1f;
                if nal_type == 7 && self.sps.is_none() {
                    self.sps = Some(nal.clone());
                    tracing::debug!("H.264 SPS captured from bitstream ({} bytes)", nal.len());
                } else if nal_type == 8 && self.pps.is_none() {
                    self.pps = Some(nal.clone());
                    tracing::debug!("H.264 PPS captured from bitstream ({} bytes)", nal.len());
                }
            }
        }

        let timestamp = if frame.timestamp == 0 {
            video_timestamp_now()
        } else {
            frame.timestamp
        };

        let mut fragments = Vec::new();
        for (i, nal) in nal_units.iter().enumerate() {
            let is_last = i == nal_units.len() - 1;
            fragments.extend(Self::fragment_nal(nal, timestamp, is_last));
        }
        fragments
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }

    /// 90 kHz clock rate (RFC 6184 §8.1).
    fn clock_rate(&self) -> u32 {
        90000
    }

    fn payload_type(&self) -> u8 {
        96
    }

    /// `a=rtpmap` must precede `a=fmtp` (RFC 6184 §8.2.1) — some clients
    /// parse attributes sequentially and expect this ordering.
    fn sdp_attributes(&self, channel: MediaChannelId) -> Vec<String> {
        let mut fmtp = format!("a=fmtp:{} packetization-mode=1", self.payload_type());
        if let Some(pl) = self.profile_level_id() {
            fmtp.push_str(&format!(";profile-level-id={}", pl));
        }
        if let Some(sprop) = self.sprop_parameter_sets() {
            fmtp.push_str(&format!(";sprop-parameter-sets={}", sprop));
        }

        vec![
            format!(
                "a=rtpmap:{} {}/{}",
                self.payload_type(),
                self.codec_name(),
                self.clock_rate()
            ),
            fmtp,
            format!("a=control:{}", channel.track_name()),
        ]
    }
}
