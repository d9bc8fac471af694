//! End-to-end test: two synthetic cameras through config, RTSP handshake
//! (OPTIONS → DESCRIBE → SETUP → PLAY), RTP delivery to a client UDP
//! socket, and shutdown back to Idle.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::thread;
use std::time::Duration;

use livecam::capture::TaskState;
use livecam::config::{CameraSpec, Rational, RootConfig, ServerSpec};
use livecam::engine::SyntheticEngine;
use livecam::server::Server;

/// Fixed port for the integration test; the config carries it, so the
/// client can dial a known address.
const TEST_PORT: u16 = 18554;

fn two_camera_config() -> RootConfig {
    let mut server = ServerSpec::default();
    server.session_port = TEST_PORT;
    assert!(server.add_topic("front", "front-cam"));
    assert!(server.add_topic("rear", "rear-cam"));

    let mut config = RootConfig::new(server);
    for name in ["front", "rear"] {
        let mut spec = CameraSpec::new(name, "synthetic://pattern");
        spec.output.frame_rate = Rational::new(50, 1);
        assert!(config.add_camera_spec(spec));
        assert!(config.add_active_camera(name));
    }
    config
}

fn rtsp_request(stream: &mut TcpStream, request: &str) -> std::io::Result<String> {
    stream.write_all(request.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        response.push_str(&line);
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    // Read the body if Content-Length announces one.
    if let Some(len) = response
        .lines()
        .find(|l| l.to_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse::<usize>().ok())
        && len > 0
    {
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;
        response.push_str(&String::from_utf8_lossy(&body));
    }

    Ok(response)
}

fn header_value(response: &str, name: &str) -> Option<String> {
    response
        .lines()
        .find(|l| l.to_lowercase().starts_with(&format!("{}:", name.to_lowercase())))
        .and_then(|l| l.split(':').nth(1))
        .map(|v| v.trim().to_string())
}

#[test]
fn two_cameras_handshake_delivery_and_shutdown() {
    let config = two_camera_config();
    let mut server = Server::from_config(config, SyntheticEngine::factory()).expect("server built");

    // Exactly two streams, with the configured topics, each backed by its
    // own capture task.
    let infos = server.stream_infos();
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].name, "front");
    assert_eq!(infos[0].topic, "front-cam");
    assert_eq!(infos[1].name, "rear");
    assert_eq!(infos[1].topic, "rear-cam");

    server.start().expect("server start");
    let shutdown = server.shutdown_handle();
    let streams = server.camera_streams();
    assert!(
        streams
            .iter()
            .all(|s| s.task_state() == TaskState::Running),
        "both capture tasks run independently"
    );

    let runner = thread::spawn(move || {
        server.run().expect("delivery loop");
        server
    });

    let addr = format!("127.0.0.1:{TEST_PORT}")
        .to_socket_addrs()
        .unwrap()
        .next()
        .unwrap();
    let mut control =
        TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect to server");
    control
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    control
        .set_write_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let base_uri = format!("rtsp://127.0.0.1:{TEST_PORT}/front-cam");

    // OPTIONS
    let resp = rtsp_request(
        &mut control,
        &format!("OPTIONS {base_uri} RTSP/1.0\r\nCSeq: 1\r\n\r\n"),
    )
    .expect("OPTIONS response");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "OPTIONS: {resp}");
    assert!(resp.contains("Public:"));

    // DESCRIBE
    let resp = rtsp_request(
        &mut control,
        &format!("DESCRIBE {base_uri} RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n"),
    )
    .expect("DESCRIBE response");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "DESCRIBE: {resp}");
    assert!(resp.contains("Content-Type: application/sdp"));
    assert!(resp.contains("v=0"));
    assert!(resp.contains("s=front"));
    assert!(resp.contains("m=video"));
    assert!(resp.contains("a=rtpmap:96 H264/90000"));

    // SETUP, receiving RTP on a local UDP socket
    let rtp_socket = UdpSocket::bind("127.0.0.1:0").expect("client RTP socket");
    rtp_socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let rtp_port = rtp_socket.local_addr().unwrap().port();

    let resp = rtsp_request(
        &mut control,
        &format!(
            "SETUP {base_uri}/track1 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP;unicast;client_port={}-{}\r\n\r\n",
            rtp_port,
            rtp_port.wrapping_add(1)
        ),
    )
    .expect("SETUP response");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP: {resp}");
    let session_id = header_value(&resp, "Session")
        .map(|v| v.split(';').next().unwrap_or("").trim().to_string())
        .expect("Session header");
    assert!(!session_id.is_empty());
    assert!(header_value(&resp, "Transport").unwrap().contains("server_port="));

    // PLAY
    let resp = rtsp_request(
        &mut control,
        &format!("PLAY {base_uri} RTSP/1.0\r\nCSeq: 4\r\nSession: {session_id}\r\n\r\n"),
    )
    .expect("PLAY response");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "PLAY: {resp}");
    assert!(resp.contains("RTP-Info:"));

    // RTP packets arrive on the negotiated port.
    let mut buf = [0u8; 2048];
    let (n, _) = rtp_socket.recv_from(&mut buf).expect("RTP packet");
    assert!(n >= 12, "RTP packet shorter than fixed header");
    assert_eq!(buf[0] >> 6, 2, "RTP version");
    assert_eq!(buf[1] & 0x7f, 96, "payload type");

    // TEARDOWN
    let resp = rtsp_request(
        &mut control,
        &format!("TEARDOWN {base_uri} RTSP/1.0\r\nCSeq: 5\r\nSession: {session_id}\r\n\r\n"),
    )
    .expect("TEARDOWN response");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "TEARDOWN: {resp}");

    // Shutdown: both capture tasks are Idle before the server returns.
    shutdown.request();
    let server = runner.join().expect("delivery loop thread");
    assert!(!server.is_running());
    for stream in server.camera_streams() {
        assert_eq!(stream.task_state(), TaskState::Idle);
    }
}
