//! SDP session descriptions (RFC 4566 / RFC 8866) for DESCRIBE.
//!
//! ```text
//! v=0                                ← protocol version
//! o=- 0 0 IN IP4 <addr>              ← origin
//! s=<camera name>                    ← session name
//! i=<topic>                          ← operator-facing topic
//! c=IN IP4 <addr>                    ← connection address
//! t=0 0                              ← timing (live stream)
//! a=tool:livecam-rs
//! a=sendonly
//! m=video 0 RTP/AVP 96               ← media description
//! b=AS:<kbps>                        ← bandwidth hint (RFC 8866 §5.8)
//! a=rtpmap:96 H264/90000             ← codec/clock rate
//! a=fmtp:96 packetization-mode=1...  ← codec parameters
//! a=control:track1                   ← track control URL
//! ```

use crate::stream::CameraStream;

/// Generate the SDP body for one camera stream.
///
/// The bandwidth line carries the camera's configured bitrate so players
/// can size their jitter buffers; codec attributes come from the stream's
/// packetizer (including `sprop-parameter-sets` once SPS/PPS have passed
/// through).
pub fn generate_sdp(stream: &CameraStream, host: &str) -> String {
    let mut sdp: Vec<String> = vec![
        "v=0".to_string(),
        format!("o=- 0 0 IN IP4 {host}"),
        format!("s={}", stream.name()),
        format!("i={}", stream.topic()),
        format!("c=IN IP4 {host}"),
        "t=0 0".to_string(),
        "a=tool:livecam-rs".to_string(),
        "a=sendonly".to_string(),
        format!("m=video 0 RTP/AVP {}", stream.payload_type()),
        format!("b=AS:{}", stream.estimated_bitrate_kbps()),
    ];
    sdp.extend(stream.sdp_attributes());

    format!("{}\r\n", sdp.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::WakeSignal;
    use crate::config::{CameraSpec, Rational, ServerSpec};
    use crate::engine::SyntheticEngine;
    use crate::stream::StreamRegistry;

    fn test_stream() -> (StreamRegistry, std::sync::Arc<CameraStream>) {
        let mut server = ServerSpec::default();
        server.add_topic("front", "front-cam");
        let mut spec = CameraSpec::new("front", "synthetic://pattern");
        spec.output.frame_rate = Rational::new(100, 1);
        spec.encoder.bitrate_kbps = 250;

        let registry = StreamRegistry::new();
        let factory = SyntheticEngine::factory();
        let stream = registry
            .add_camera(&spec, &server, factory.as_ref(), WakeSignal::new())
            .unwrap();
        (registry, stream)
    }

    #[test]
    fn generates_complete_description() {
        let (registry, stream) = test_stream();
        let sdp = generate_sdp(&stream, "192.168.1.100");

        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains("o=- 0 0 IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("s=front\r\n"));
        assert!(sdp.contains("i=front-cam\r\n"));
        assert!(sdp.contains("c=IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("a=sendonly\r\n"));
        assert!(sdp.contains("m=video 0 RTP/AVP 96\r\n"));
        assert!(sdp.contains("b=AS:250\r\n"));
        assert!(sdp.contains("a=rtpmap:96 H264/90000\r\n"));
        assert!(sdp.contains("a=fmtp:96 packetization-mode=1"));
        assert!(sdp.contains("a=control:track1\r\n"));
        assert!(sdp.ends_with("\r\n"));

        // rtpmap must precede fmtp (RFC 6184 §8.2.1); session attributes
        // must precede the media section.
        let rtpmap = sdp.find("a=rtpmap").unwrap();
        let fmtp = sdp.find("a=fmtp").unwrap();
        let m_line = sdp.find("m=video").unwrap();
        assert!(rtpmap < fmtp);
        assert!(sdp.find("a=sendonly").unwrap() < m_line);
        assert!(fmtp > m_line);

        registry.stop_all();
    }
}
