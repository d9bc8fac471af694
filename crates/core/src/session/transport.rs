use std::net::SocketAddr;

/// Negotiated RTP/RTCP transport parameters for a session (RFC 2326 §12.39).
///
/// Built during SETUP from the client's `Transport` header plus the
/// server's allocated port pair:
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP;unicast;client_port=8000-8001
///
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001
/// ```
///
/// RTP packets are addressed to `client_addr` (client IP + RTP port).
#[derive(Debug, Clone)]
pub struct Transport {
    pub client_rtp_port: u16,
    /// Typically `client_rtp_port + 1`.
    pub client_rtcp_port: u16,
    /// Advertised to the client; media goes out a shared ephemeral socket.
    pub server_rtp_port: u16,
    pub server_rtcp_port: u16,
    /// Full address for RTP delivery.
    pub client_addr: SocketAddr,
}

/// Client-side parameters parsed from the `Transport` request header.
///
/// Only `RTP/AVP;unicast` with a `client_port` pair is understood —
/// interleaved TCP and multicast are rejected earlier by the handler.
#[derive(Debug, Clone)]
pub struct TransportHeader {
    pub client_rtp_port: u16,
    pub client_rtcp_port: u16,
}

impl TransportHeader {
    /// Parse the `Transport` header value (RFC 2326 §12.39), looking for
    /// `client_port=RTP-RTCP` among the semicolon-separated parameters.
    ///
    /// ```
    /// use livecam::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th.client_rtp_port, 8000);
    /// assert_eq!(th.client_rtcp_port, 8001);
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        for part in header.split(';') {
            if let Some(ports) = part.trim().strip_prefix("client_port=") {
                let (rtp, rtcp) = ports.split_once('-')?;
                return Some(TransportHeader {
                    client_rtp_port: rtp.parse().ok()?,
                    client_rtcp_port: rtcp.parse().ok()?,
                });
            }
        }
        None
    }
}
