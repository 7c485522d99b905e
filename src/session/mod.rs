//! [`MediaSession`] and [`SessionDirectory`] — the URL-suffix-keyed
//! directory of streams and their per-channel fan-out (§4.7, §4.8).

pub mod multicast;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::config::ServerConfig;
use crate::error::{Result, RtspError};
use crate::media::{Frame, MediaChannelId, Packetizer};
use crate::rtp::RtpConnection;
use multicast::{MulticastAddrPool, MulticastAllocation};

/// Sentinel meaning "not yet registered with a [`SessionDirectory`]".
const UNASSIGNED_ID: u64 = 0;

struct ChannelSlot {
    packetizer: Mutex<Box<dyn Packetizer>>,
}

/// A directory entry: one stream, keyed by URL suffix, with up to two
/// media channels (video, audio) and the set of clients currently
/// attached to it.
pub struct MediaSession {
    id: AtomicU64,
    url_suffix: String,
    public_host: String,
    sdp_username: String,
    sdp_session_name: Option<String>,
    channels: [Option<ChannelSlot>; 2],
    multicast: Option<MulticastAllocation>,
    clients: Mutex<HashMap<usize, Weak<RtpConnection>>>,
    sdp_cache: Mutex<Option<String>>,
}

impl MediaSession {
    pub fn new(
        url_suffix: impl Into<String>,
        video: Option<Box<dyn Packetizer>>,
        audio: Option<Box<dyn Packetizer>>,
        config: &ServerConfig,
        multicast: Option<MulticastAllocation>,
    ) -> Self {
        Self {
            id: AtomicU64::new(UNASSIGNED_ID),
            url_suffix: url_suffix.into(),
            public_host: config.public_host.clone(),
            sdp_username: config.sdp_username.clone(),
            sdp_session_name: config.sdp_session_name.clone(),
            channels: [
                video.map(|p| ChannelSlot {
                    packetizer: Mutex::new(p),
                }),
                audio.map(|p| ChannelSlot {
                    packetizer: Mutex::new(p),
                }),
            ],
            multicast,
            clients: Mutex::new(HashMap::new()),
            sdp_cache: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.id.load(Ordering::Acquire)
    }

    fn assign_id(&self, id: u64) {
        self.id.store(id, Ordering::Release);
    }

    pub fn url_suffix(&self) -> &str {
        &self.url_suffix
    }

    pub fn has_channel(&self, channel_id: MediaChannelId) -> bool {
        self.channels[channel_id.index()].is_some()
    }

    pub fn multicast(&self) -> Option<MulticastAllocation> {
        self.multicast
    }

    /// `(clock_rate, payload_type)` for a channel, as advertised in SDP
    /// and stamped onto the client's `RtpConnection` at DESCRIBE/SETUP.
    pub fn channel_info(&self, channel_id: MediaChannelId) -> Option<(u32, u8)> {
        self.channels[channel_id.index()].as_ref().map(|slot| {
            let pz = slot.packetizer.lock();
            (pz.clock_rate(), pz.payload_type())
        })
    }

    /// Attach a client; fan-out delivers to it from the next pushed
    /// frame onward. Keyed by the `Arc`'s address so repeated
    /// attach/detach of the same connection is idempotent.
    pub fn attach_client(&self, connection: &Arc<RtpConnection>) {
        let key = Arc::as_ptr(connection) as usize;
        self.clients.lock().insert(key, Arc::downgrade(connection));
    }

    pub fn detach_client(&self, connection: &Arc<RtpConnection>) {
        let key = Arc::as_ptr(connection) as usize;
        self.clients.lock().remove(&key);
    }

    pub fn client_count(&self) -> usize {
        let mut clients = self.clients.lock();
        clients.retain(|_, weak| weak.strong_count() > 0);
        clients.len()
    }

    /// Packetize `frame` and fan it out to every attached client on
    /// `channel_id`. Returns `false` (no-op) when the session has no
    /// live clients — the caller is expected to skip the encode-side
    /// work entirely in that case (§4.8).
    pub fn handle_frame(&self, channel_id: MediaChannelId, frame: &Frame) -> bool {
        let Some(slot) = &self.channels[channel_id.index()] else {
            return false;
        };

        let live: Vec<Arc<RtpConnection>> = {
            let mut clients = self.clients.lock();
            clients.retain(|_, weak| weak.strong_count() > 0);
            clients.values().filter_map(Weak::upgrade).collect()
        };
        if live.is_empty() {
            return false;
        }

        let fragments = slot.packetizer.lock().packetize(frame);
        for fragment in &fragments {
            for client in &live {
                if !client.send_fragment(channel_id, fragment.clone()) {
                    tracing::warn!(
                        session_id = self.session_id(),
                        "trigger queue saturated, dropped fragment for client"
                    );
                }
            }
        }
        true
    }

    /// Build (or return the cached) SDP body for a DESCRIBE response.
    pub fn sdp(&self) -> String {
        if let Some(cached) = self.sdp_cache.lock().as_ref() {
            return cached.clone();
        }

        let unix_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut lines = vec![
            "v=0".to_string(),
            format!(
                "o={} {} 1 IN IP4 {}",
                self.sdp_username, unix_seconds, self.public_host
            ),
        ];
        if let Some(name) = &self.sdp_session_name {
            lines.push(format!("s={}", name));
        }
        lines.push("t=0 0".to_string());
        lines.push("a=control:*".to_string());

        for channel_id in MediaChannelId::ALL {
            let Some(slot) = &self.channels[channel_id.index()] else {
                continue;
            };
            let pz = slot.packetizer.lock();
            let media_type = match channel_id {
                MediaChannelId::Video => "video",
                MediaChannelId::Audio => "audio",
            };
            let port = self.multicast.map(|m| m.rtp_port).unwrap_or(0);
            lines.push(format!("m={} {} RTP/AVP {}", media_type, port, pz.payload_type()));
            if let Some(multicast) = self.multicast {
                lines.push(format!("c=IN IP4 {}/255", multicast.address));
            }
            lines.extend(pz.sdp_attributes(channel_id));
        }

        let sdp = format!("{}\r\n", lines.join("\r\n"));
        *self.sdp_cache.lock() = Some(sdp.clone());
        sdp
    }
}

/// URL-suffix-keyed directory of live streams.
///
/// Owns the [`MulticastAddrPool`] so two directories in one process (as
/// in tests spinning up multiple servers) never share an address pool.
pub struct SessionDirectory {
    by_suffix: Mutex<HashMap<String, Arc<MediaSession>>>,
    by_id: Mutex<HashMap<u64, Arc<MediaSession>>>,
    next_id: AtomicU64,
    multicast_pool: Arc<MulticastAddrPool>,
}

impl SessionDirectory {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            by_suffix: Mutex::new(HashMap::new()),
            by_id: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            multicast_pool: Arc::new(MulticastAddrPool::new(config.multicast_range)),
        }
    }

    /// Register a session, assigning it a process-unique, monotonically
    /// increasing id. Fails if the URL suffix is already registered.
    pub fn add_session(
        &self,
        url_suffix: impl Into<String>,
        video: Option<Box<dyn Packetizer>>,
        audio: Option<Box<dyn Packetizer>>,
        config: &ServerConfig,
        wants_multicast: bool,
    ) -> Result<Arc<MediaSession>> {
        let url_suffix = url_suffix.into();
        let mut by_suffix = self.by_suffix.lock();
        if by_suffix.contains_key(&url_suffix) {
            return Err(RtspError::MountCollision(url_suffix));
        }

        let multicast = if wants_multicast {
            Some(self.multicast_pool.allocate()?)
        } else {
            None
        };

        let session = Arc::new(MediaSession::new(
            url_suffix.clone(),
            video,
            audio,
            config,
            multicast,
        ));
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        session.assign_id(id);

        by_suffix.insert(url_suffix, session.clone());
        self.by_id.lock().insert(id, session.clone());

        tracing::info!(session_id = id, "session registered");
        Ok(session)
    }

    pub fn remove_session(&self, session_id: u64) {
        let Some(session) = self.by_id.lock().remove(&session_id) else {
            return;
        };
        self.by_suffix.lock().remove(session.url_suffix());
        if let Some(multicast) = session.multicast() {
            self.multicast_pool.release(multicast);
        }
        tracing::info!(session_id, "session removed");
    }

    pub fn find_by_suffix(&self, url_suffix: &str) -> Option<Arc<MediaSession>> {
        self.by_suffix.lock().get(url_suffix).cloned()
    }

    pub fn find_by_id(&self, session_id: u64) -> Option<Arc<MediaSession>> {
        self.by_id.lock().get(&session_id).cloned()
    }
}

/// Extract the full request path from a request URI, e.g.
/// `rtsp://host:554/live/track0` → `/live/track0`.
pub fn extract_session_suffix(uri: &str) -> &str {
    let without_scheme = uri
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(uri);
    match without_scheme.find('/') {
        Some(idx) => &without_scheme[idx..],
        None => "/",
    }
}

/// Split a SETUP request URI into its session mount suffix and, if
/// present, trailing `trackN` component — `/live/track0` → (`/live`,
/// `Some("track0")`), `/live` → (`/live`, `None`).
pub fn split_mount_and_track(uri: &str) -> (String, Option<String>) {
    let path = extract_session_suffix(uri);
    let trimmed = path.trim_end_matches('/');
    if let Some(idx) = trimmed.rfind('/') {
        let (mount, rest) = trimmed.split_at(idx);
        let track = &rest[1..];
        if track.starts_with("track") {
            return (mount.to_string(), Some(track.to_string()));
        }
    }
    (trimmed.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::h264::H264Packetizer;

    fn config() -> ServerConfig {
        ServerConfig {
            public_host: "192.168.1.100".to_string(),
            sdp_session_name: Some("Test Session".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn add_session_assigns_unique_ids() {
        let dir = SessionDirectory::new(&config());
        let s1 = dir
            .add_session("/a", Some(Box::new(H264Packetizer::new())), None, &config(), false)
            .unwrap();
        let s2 = dir
            .add_session("/b", Some(Box::new(H264Packetizer::new())), None, &config(), false)
            .unwrap();
        assert_ne!(s1.session_id(), s2.session_id());
    }

    #[test]
    fn add_session_rejects_suffix_collision() {
        let dir = SessionDirectory::new(&config());
        dir.add_session("/live", Some(Box::new(H264Packetizer::new())), None, &config(), false)
            .unwrap();
        let err = dir
            .add_session("/live", Some(Box::new(H264Packetizer::new())), None, &config(), false)
            .unwrap_err();
        assert!(matches!(err, RtspError::MountCollision(_)));
    }

    #[test]
    fn remove_session_frees_suffix_for_reuse() {
        let dir = SessionDirectory::new(&config());
        let session = dir
            .add_session("/live", Some(Box::new(H264Packetizer::new())), None, &config(), false)
            .unwrap();
        dir.remove_session(session.session_id());
        assert!(dir.find_by_suffix("/live").is_none());
        assert!(
            dir.add_session("/live", Some(Box::new(H264Packetizer::new())), None, &config(), false)
                .is_ok()
        );
    }

    #[test]
    fn handle_frame_with_no_clients_returns_false() {
        let session = MediaSession::new(
            "/live",
            Some(Box::new(H264Packetizer::new())),
            None,
            &config(),
            None,
        );
        let frame = Frame::new(crate::media::FrameKind::VideoKey, vec![0x65, 1, 2, 3]);
        assert!(!session.handle_frame(MediaChannelId::Video, &frame));
    }

    #[test]
    fn sdp_is_cached_across_calls() {
        let session = MediaSession::new(
            "/live",
            Some(Box::new(H264Packetizer::new())),
            None,
            &config(),
            None,
        );
        assert_eq!(session.sdp(), session.sdp());
    }

    #[test]
    fn sdp_includes_session_level_fields_before_media() {
        let session = MediaSession::new(
            "/live",
            Some(Box::new(H264Packetizer::new())),
            None,
            &config(),
            None,
        );
        let sdp = session.sdp();
        assert!(sdp.contains("s=Test Session\r\n"));
        assert!(sdp.contains("o=- "));
        let control_idx = sdp.find("a=control:*").unwrap();
        let m_idx = sdp.find("m=video").unwrap();
        assert!(control_idx < m_idx);
    }

    #[test]
    fn extract_session_suffix_strips_scheme_and_host() {
        assert_eq!(
            extract_session_suffix("rtsp://127.0.0.1:8554/live"),
            "/live"
        );
        assert_eq!(extract_session_suffix("rtsp://127.0.0.1:8554/"), "/");
    }

    #[test]
    fn split_mount_and_track_separates_trailing_track() {
        assert_eq!(
            split_mount_and_track("rtsp://127.0.0.1:8554/live/track0"),
            ("/live".to_string(), Some("track0".to_string()))
        );
        assert_eq!(
            split_mount_and_track("rtsp://127.0.0.1:8554/live"),
            ("/live".to_string(), None)
        );
    }
}
