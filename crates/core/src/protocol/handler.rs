//! Per-connection RTSP method routing.
//!
//! One [`MethodHandler`] exists per TCP connection. It resolves streams
//! from request URIs, manages the session lifecycle (SETUP creates a
//! session and attaches a replicator cursor; TEARDOWN detaches it), and
//! remembers which sessions this connection created so a disconnect can
//! clean them up.

use std::net::SocketAddr;

use crate::protocol::message::{RtspRequest, RtspResponse};
use crate::protocol::sdp;
use crate::session::transport::TransportHeader;
use crate::session::{SessionRegistry, SessionState, Transport};
use crate::stream::StreamRegistry;

pub struct MethodHandler {
    sessions: SessionRegistry,
    streams: StreamRegistry,
    client_addr: SocketAddr,
    /// Session IDs created on this connection, for disconnect cleanup.
    session_ids: Vec<String>,
}

impl MethodHandler {
    pub fn new(
        sessions: SessionRegistry,
        streams: StreamRegistry,
        client_addr: SocketAddr,
    ) -> Self {
        MethodHandler {
            sessions,
            streams,
            client_addr,
            session_ids: Vec::new(),
        }
    }

    /// Sessions owned by this connection (for cleanup on disconnect).
    pub fn session_ids(&self) -> &[String] {
        &self.session_ids
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0");

        match request.method.as_str() {
            "OPTIONS" => self.handle_options(cseq),
            "DESCRIBE" => self.handle_describe(cseq, &request.uri),
            "SETUP" => self.handle_setup(cseq, request),
            "PLAY" => self.handle_play(cseq, request),
            "PAUSE" => self.handle_pause(cseq, request),
            "TEARDOWN" => self.handle_teardown(cseq, request),
            "GET_PARAMETER" => self.handle_get_parameter(cseq, request),
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unsupported RTSP method");
                RtspResponse::new(501, "Not Implemented").add_header("CSeq", cseq)
            }
        }
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        RtspResponse::ok().add_header("CSeq", cseq).add_header(
            "Public",
            "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER",
        )
    }

    /// Host for SDP connection lines: taken from the request URI, falling
    /// back to the client's own address when the URI has none.
    fn host_from_uri_or_client(&self, uri: &str) -> String {
        if let Some(after_scheme) = uri
            .strip_prefix("rtsp://")
            .or_else(|| uri.strip_prefix("rtsps://"))
        {
            let host = after_scheme
                .split('/')
                .next()
                .and_then(|host_port| host_port.split(':').next())
                .unwrap_or("")
                .trim();
            if !host.is_empty() {
                return host.to_string();
            }
        }
        self.client_addr.ip().to_string()
    }

    fn handle_describe(&self, cseq: &str, uri: &str) -> RtspResponse {
        let Some(stream) = self.streams.resolve_from_uri(uri) else {
            tracing::warn!(uri, "DESCRIBE for unknown stream");
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };

        let host = self.host_from_uri_or_client(uri);
        let sdp = sdp::generate_sdp(&stream, &host);

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", uri)
            .with_body(sdp)
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(stream) = self.streams.resolve_from_uri(&request.uri) else {
            tracing::warn!(uri = %request.uri, "SETUP for unknown stream");
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };

        let Some(transport_header) = request.get_header("Transport") else {
            tracing::warn!(%cseq, "SETUP missing Transport header");
            return RtspResponse::bad_request().add_header("CSeq", cseq);
        };

        // Only RTP/AVP over UDP is implemented; interleaved TCP transport
        // (RFC 2326 §10.12) is not.
        if transport_header.contains("RTP/AVP/TCP") || transport_header.contains("interleaved=") {
            tracing::warn!(%cseq, transport = %transport_header, "client requested TCP transport");
            return RtspResponse::new(461, "Unsupported Transport")
                .add_header("CSeq", cseq)
                .add_header("Unsupported", "RTP/AVP/TCP (interleaved); use RTP/AVP (UDP)");
        }

        let Some(client_transport) = TransportHeader::parse(transport_header) else {
            tracing::warn!(%cseq, transport_header, "SETUP invalid Transport header");
            return RtspResponse::bad_request().add_header("CSeq", cseq);
        };

        let (server_rtp_port, server_rtcp_port) = match self.sessions.allocate_server_ports() {
            Ok(ports) => ports,
            Err(e) => {
                tracing::error!(error = %e, "failed to allocate server ports");
                return RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq);
            }
        };

        let session = self.sessions.create(&request.uri, stream.path());
        let session_id = session.id.clone();
        let client_rtp_addr =
            SocketAddr::new(self.client_addr.ip(), client_transport.client_rtp_port);

        session.set_transport(Transport {
            client_rtp_port: client_transport.client_rtp_port,
            client_rtcp_port: client_transport.client_rtcp_port,
            server_rtp_port,
            server_rtcp_port,
            client_addr: client_rtp_addr,
        });

        stream.attach_session(&session_id);
        self.session_ids.push(session_id.clone());

        tracing::info!(
            session_id,
            stream = %stream.path(),
            client_rtp = %client_rtp_addr,
            server_rtp_port,
            "session created via SETUP"
        );

        let transport_response = format!(
            "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
            client_transport.client_rtp_port,
            client_transport.client_rtcp_port,
            server_rtp_port,
            server_rtcp_port
        );

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Transport", &transport_response)
            .add_header("Session", &session.header_value())
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session_id) = request.session_id() else {
            tracing::warn!(%cseq, "PLAY missing Session header");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        let Some(session) = self.sessions.get(session_id) else {
            tracing::warn!(session_id, "PLAY for unknown session");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        session.set_state(SessionState::Playing);
        tracing::info!(session_id, stream = %session.stream_path, "session playing");

        let mut resp = RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &session.header_value())
            .add_header("Range", "npt=0.000-");

        if let Some(stream) = self.streams.resolve_from_uri(&session.uri) {
            let rtp_info = format!(
                "url={};seq={};rtptime={}",
                session.uri,
                stream.next_sequence(),
                stream.next_rtp_timestamp()
            );
            resp = resp.add_header("RTP-Info", &rtp_info);
        }

        resp
    }

    fn handle_pause(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session_id) = request.session_id() else {
            tracing::warn!(%cseq, "PAUSE missing Session header");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        match self.sessions.get(session_id) {
            Some(session) => {
                session.set_state(SessionState::Paused);
                tracing::info!(session_id, "session paused");
                RtspResponse::ok()
                    .add_header("CSeq", cseq)
                    .add_header("Session", &session.header_value())
            }
            None => {
                tracing::warn!(session_id, "PAUSE for unknown session");
                RtspResponse::session_not_found().add_header("CSeq", cseq)
            }
        }
    }

    fn handle_teardown(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session_id) = request.session_id() else {
            tracing::warn!(%cseq, "TEARDOWN missing Session header");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        match self.sessions.remove(session_id) {
            Some(_) => {
                self.streams.detach_session_everywhere(session_id);
                self.session_ids.retain(|id| id != session_id);
                tracing::info!(session_id, "session terminated via TEARDOWN");
                RtspResponse::ok().add_header("CSeq", cseq)
            }
            None => {
                tracing::warn!(session_id, "TEARDOWN for unknown session");
                RtspResponse::session_not_found().add_header("CSeq", cseq)
            }
        }
    }

    /// GET_PARAMETER doubles as a client keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let mut resp = RtspResponse::ok().add_header("CSeq", cseq);
        if let Some(id) = request.session_id()
            && self.sessions.get(id).is_some()
        {
            resp = resp.add_header("Session", id);
        }
        resp
    }
}
