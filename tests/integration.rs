//! End-to-end RTSP/RTP scenarios driving a real [`RtspServer`] over real
//! TCP and UDP sockets on an ephemeral `127.0.0.1` port.

use std::io::{Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::time::Duration;

use rtsp::config::ServerConfig;
use rtsp::media::h264::H264Packetizer;
use rtsp::media::{Frame, FrameKind, MediaChannelId};
use rtsp::RtspServer;

fn start_server() -> (std::sync::Arc<RtspServer>, std::net::SocketAddr) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ServerConfig {
        public_host: addr.to_string(),
        ..ServerConfig::default()
    };
    let server = RtspServer::with_config(addr, config).expect("construct server");
    server.start().expect("server start");
    (server, addr)
}

fn send_request(stream: &mut TcpStream, request: &str) -> String {
    stream.write_all(request.as_bytes()).unwrap();
    stream.flush().unwrap();
    read_response(stream)
}

fn read_response(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).unwrap();
        assert_ne!(n, 0, "connection closed before a full response arrived");
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    let head = String::from_utf8(buf.clone()).unwrap();
    if let Some(len) = head
        .lines()
        .find(|l| l.to_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        if len > 0 {
            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).unwrap();
            return head + &String::from_utf8_lossy(&body);
        }
    }
    head
}

fn session_id(response: &str) -> String {
    response
        .lines()
        .find(|l| l.to_lowercase().starts_with("session:"))
        .and_then(|l| l.split(':').nth(1))
        .map(|v| v.trim().split(';').next().unwrap_or("").trim().to_string())
        .expect("Session header present")
}

fn connect(addr: std::net::SocketAddr) -> TcpStream {
    let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream.set_write_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
}

fn idr_frame() -> Frame {
    let mut payload = vec![0, 0, 0, 1, 0x65];
    payload.extend(vec![0xAA; 32]);
    Frame::new(FrameKind::VideoKey, payload)
}

/// S1 — OPTIONS/DESCRIBE/SETUP/PLAY over TCP-interleaved, then a pushed
/// key frame arrives as an interleaved `$` packet on the same socket.
#[test]
fn s1_tcp_interleaved_handshake_and_delivery() {
    let (server, addr) = start_server();
    server
        .add_session("/live", Some(Box::new(H264Packetizer::new())), None, false)
        .unwrap();

    let mut stream = connect(addr);
    let base_uri = format!("rtsp://{}/live", addr);

    let opt = send_request(&mut stream, &format!("OPTIONS {base_uri} RTSP/1.0\r\nCSeq: 1\r\n\r\n"));
    assert!(opt.starts_with("RTSP/1.0 200 OK"));
    assert!(opt.contains("OPTIONS"));
    assert!(opt.contains("PLAY"));

    let desc = send_request(
        &mut stream,
        &format!("DESCRIBE {base_uri} RTSP/1.0\r\nCSeq: 2\r\n\r\n"),
    );
    assert!(desc.starts_with("RTSP/1.0 200 OK"));
    assert!(desc.contains("Content-Type: application/sdp"));
    assert!(desc.contains("m=video 0 RTP/AVP 96"));

    let setup = send_request(
        &mut stream,
        &format!(
            "SETUP {base_uri}/track0 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n"
        ),
    );
    assert!(setup.starts_with("RTSP/1.0 200 OK"));
    assert!(setup.contains("interleaved=0-1"));
    let sid = session_id(&setup);

    let play = send_request(
        &mut stream,
        &format!("PLAY {base_uri} RTSP/1.0\r\nCSeq: 4\r\nSession: {sid}\r\n\r\n"),
    );
    assert!(play.starts_with("RTSP/1.0 200 OK"));
    assert!(play.contains("RTP-Info:"));
    assert!(play.contains(&format!("url=rtsp://{}/live/track0", addr)));

    std::thread::sleep(Duration::from_millis(50));
    assert!(server.push_frame("/live", MediaChannelId::Video, &idr_frame()));

    let mut marker = [0u8; 1];
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream.read_exact(&mut marker).unwrap();
    assert_eq!(marker[0], b'$');
    let mut rest = [0u8; 3];
    stream.read_exact(&mut rest).unwrap();
    assert_eq!(rest[0], 0); // rtp channel
}

/// S2 — UDP unicast SETUP echoes an even/odd server port pair, and a
/// pushed key frame produces a datagram on the client's chosen port.
#[test]
fn s2_udp_unicast_delivery() {
    let (server, addr) = start_server();
    server
        .add_session("/cam", Some(Box::new(H264Packetizer::new())), None, false)
        .unwrap();

    let client_rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let client_port = client_rtp.local_addr().unwrap().port();
    client_rtp.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let mut stream = connect(addr);
    let base_uri = format!("rtsp://{}/cam", addr);
    send_request(&mut stream, &format!("DESCRIBE {base_uri} RTSP/1.0\r\nCSeq: 1\r\n\r\n"));

    let setup = send_request(
        &mut stream,
        &format!(
            "SETUP {base_uri}/track0 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP;unicast;client_port={client_port}-{}\r\n\r\n",
            client_port + 1
        ),
    );
    assert!(setup.starts_with("RTSP/1.0 200 OK"));
    assert!(setup.contains("server_port="));
    let sid = session_id(&setup);

    send_request(
        &mut stream,
        &format!("PLAY {base_uri} RTSP/1.0\r\nCSeq: 3\r\nSession: {sid}\r\n\r\n"),
    );

    std::thread::sleep(Duration::from_millis(50));
    assert!(server.push_frame("/cam", MediaChannelId::Video, &idr_frame()));

    let mut buf = [0u8; 2048];
    let (n, _) = client_rtp.recv_from(&mut buf).expect("datagram on client_port");
    assert!(n >= 12);
    assert_eq!(buf[0] >> 6, 2); // RTP version
}

/// S6 — after TEARDOWN, a subsequent push_frame sees zero live clients.
#[test]
fn s6_teardown_drops_client_from_fanout() {
    let (server, addr) = start_server();
    server
        .add_session("/gone", Some(Box::new(H264Packetizer::new())), None, false)
        .unwrap();

    let mut stream = connect(addr);
    let base_uri = format!("rtsp://{}/gone", addr);
    send_request(&mut stream, &format!("DESCRIBE {base_uri} RTSP/1.0\r\nCSeq: 1\r\n\r\n"));
    let setup = send_request(
        &mut stream,
        &format!(
            "SETUP {base_uri}/track0 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n"
        ),
    );
    let sid = session_id(&setup);
    send_request(
        &mut stream,
        &format!("PLAY {base_uri} RTSP/1.0\r\nCSeq: 3\r\nSession: {sid}\r\n\r\n"),
    );

    std::thread::sleep(Duration::from_millis(50));
    assert!(server.push_frame("/gone", MediaChannelId::Video, &idr_frame()));

    send_request(
        &mut stream,
        &format!("TEARDOWN {base_uri} RTSP/1.0\r\nCSeq: 4\r\nSession: {sid}\r\n\r\n"),
    );

    std::thread::sleep(Duration::from_millis(50));
    assert!(!server.push_frame("/gone", MediaChannelId::Video, &idr_frame()));
}

/// S5 — three clients attached; dropping one mid-stream must not disturb
/// delivery to the remaining two.
#[test]
fn s5_multi_client_fanout_survives_one_drop() {
    let (server, addr) = start_server();
    server
        .add_session("/room", Some(Box::new(H264Packetizer::new())), None, false)
        .unwrap();
    let base_uri = format!("rtsp://{}/room", addr);

    let mut streams = Vec::new();
    for i in 0..3u32 {
        let mut stream = connect(addr);
        send_request(
            &mut stream,
            &format!("DESCRIBE {base_uri} RTSP/1.0\r\nCSeq: {}\r\n\r\n", i * 10 + 1),
        );
        let setup = send_request(
            &mut stream,
            &format!(
                "SETUP {base_uri}/track0 RTSP/1.0\r\nCSeq: {}\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n",
                i * 10 + 2
            ),
        );
        let sid = session_id(&setup);
        send_request(
            &mut stream,
            &format!(
                "PLAY {base_uri} RTSP/1.0\r\nCSeq: {}\r\nSession: {sid}\r\n\r\n",
                i * 10 + 3
            ),
        );
        streams.push(stream);
    }

    std::thread::sleep(Duration::from_millis(50));
    assert!(server.push_frame("/room", MediaChannelId::Video, &idr_frame()));

    for stream in &mut streams {
        let mut marker = [0u8; 1];
        stream.read_exact(&mut marker).unwrap();
        assert_eq!(marker[0], b'$');
    }

    // Drop client index 1 and confirm the remaining two still receive.
    drop(streams.remove(1));
    std::thread::sleep(Duration::from_millis(50));
    assert!(server.push_frame("/room", MediaChannelId::Video, &idr_frame()));

    for stream in &mut streams {
        let mut marker = [0u8; 1];
        stream.read_exact(&mut marker).unwrap();
        assert_eq!(marker[0], b'$');
    }
}
