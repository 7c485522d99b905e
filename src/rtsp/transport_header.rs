//! `Transport:` header parsing and rendering (RFC 2326 §12.39).
//!
//! A client's SETUP request offers a transport spec; the server picks
//! the first one it can honor and echoes back a concrete transport
//! (with bound ports / multicast destination / ssrc filled in).

/// What a client's SETUP request asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedTransport {
    /// `RTP/AVP/TCP;interleaved=<rtp>-<rtcp>`
    TcpInterleaved { rtp_channel: u8, rtcp_channel: u8 },
    /// `RTP/AVP;unicast;client_port=<rtp>-<rtcp>`
    UdpUnicast { client_rtp_port: u16, client_rtcp_port: u16 },
    /// `RTP/AVP;multicast` (client asks the server to pick a group).
    UdpMulticast,
}

/// Parse a `Transport:` header value, taking the first spec this server
/// can honor (RFC 2326 §12.39 permits a comma-separated list of
/// acceptable transports; a client orders it by preference).
pub fn parse_transport_header(value: &str) -> Option<RequestedTransport> {
    for spec in value.split(',') {
        if let Some(t) = parse_one_spec(spec.trim()) {
            return Some(t);
        }
    }
    None
}

fn parse_one_spec(spec: &str) -> Option<RequestedTransport> {
    let mut fields = spec.split(';');
    let proto = fields.next()?.trim();
    if !proto.eq_ignore_ascii_case("RTP/AVP/TCP") && !proto.eq_ignore_ascii_case("RTP/AVP") {
        return None;
    }

    let mut interleaved: Option<(u8, u8)> = None;
    let mut client_port: Option<(u16, u16)> = None;
    let mut is_multicast = false;

    for field in fields {
        let field = field.trim();
        if let Some(range) = field.strip_prefix("interleaved=") {
            interleaved = parse_range(range);
        } else if let Some(range) = field.strip_prefix("client_port=") {
            client_port = parse_range(range);
        } else if field.eq_ignore_ascii_case("multicast") {
            is_multicast = true;
        }
    }

    if proto.eq_ignore_ascii_case("RTP/AVP/TCP") {
        let (rtp_channel, rtcp_channel) = interleaved?;
        return Some(RequestedTransport::TcpInterleaved {
            rtp_channel,
            rtcp_channel,
        });
    }

    if is_multicast {
        return Some(RequestedTransport::UdpMulticast);
    }

    let (client_rtp_port, client_rtcp_port) = client_port?;
    Some(RequestedTransport::UdpUnicast {
        client_rtp_port,
        client_rtcp_port,
    })
}

fn parse_range<T: std::str::FromStr>(range: &str) -> Option<(T, T)> {
    let mut parts = range.split('-');
    let a = parts.next()?.parse().ok()?;
    let b = parts.next()?.parse().ok()?;
    Some((a, b))
}

/// Build the `Transport:` header value for a SETUP 200 response.
pub enum ResolvedTransport {
    TcpInterleaved {
        rtp_channel: u8,
        rtcp_channel: u8,
    },
    UdpUnicast {
        client_rtp_port: u16,
        client_rtcp_port: u16,
        server_rtp_port: u16,
        server_rtcp_port: u16,
    },
    UdpMulticast {
        destination: String,
        rtp_port: u16,
        rtcp_port: u16,
        ttl: u8,
    },
}

impl ResolvedTransport {
    pub fn render(&self, ssrc: u32) -> String {
        match self {
            ResolvedTransport::TcpInterleaved {
                rtp_channel,
                rtcp_channel,
            } => format!(
                "RTP/AVP/TCP;unicast;interleaved={}-{};ssrc={:08X}",
                rtp_channel, rtcp_channel, ssrc
            ),
            ResolvedTransport::UdpUnicast {
                client_rtp_port,
                client_rtcp_port,
                server_rtp_port,
                server_rtcp_port,
            } => format!(
                "RTP/AVP;unicast;client_port={}-{};server_port={}-{};ssrc={:08X}",
                client_rtp_port, client_rtcp_port, server_rtp_port, server_rtcp_port, ssrc
            ),
            ResolvedTransport::UdpMulticast {
                destination,
                rtp_port,
                rtcp_port,
                ttl,
            } => format!(
                "RTP/AVP;multicast;destination={};port={}-{};ttl={};ssrc={:08X}",
                destination, rtp_port, rtcp_port, ttl, ssrc
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_interleaved() {
        let t = parse_transport_header("RTP/AVP/TCP;unicast;interleaved=0-1").unwrap();
        assert_eq!(
            t,
            RequestedTransport::TcpInterleaved {
                rtp_channel: 0,
                rtcp_channel: 1
            }
        );
    }

    #[test]
    fn parses_udp_unicast() {
        let t = parse_transport_header("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(
            t,
            RequestedTransport::UdpUnicast {
                client_rtp_port: 5000,
                client_rtcp_port: 5001
            }
        );
    }

    #[test]
    fn parses_udp_multicast() {
        let t = parse_transport_header("RTP/AVP;multicast").unwrap();
        assert_eq!(t, RequestedTransport::UdpMulticast);
    }

    #[test]
    fn picks_first_supported_spec_from_list() {
        let t =
            parse_transport_header("RTP/AVP/UDP;unsupported, RTP/AVP;unicast;client_port=4-5")
                .unwrap();
        assert_eq!(
            t,
            RequestedTransport::UdpUnicast {
                client_rtp_port: 4,
                client_rtcp_port: 5
            }
        );
    }

    #[test]
    fn rejects_tcp_without_interleaved_range() {
        assert!(parse_transport_header("RTP/AVP/TCP;unicast").is_none());
    }

    #[test]
    fn renders_tcp_transport_header() {
        let rendered = ResolvedTransport::TcpInterleaved {
            rtp_channel: 0,
            rtcp_channel: 1,
        }
        .render(0xdeadbeef);
        assert_eq!(
            rendered,
            "RTP/AVP/TCP;unicast;interleaved=0-1;ssrc=DEADBEEF"
        );
    }

    #[test]
    fn renders_udp_unicast_transport_header() {
        let rendered = ResolvedTransport::UdpUnicast {
            client_rtp_port: 5000,
            client_rtcp_port: 5001,
            server_rtp_port: 6000,
            server_rtcp_port: 6001,
        }
        .render(1);
        assert!(rendered.contains("client_port=5000-5001"));
        assert!(rendered.contains("server_port=6000-6001"));
    }
}
