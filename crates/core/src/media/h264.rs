//! H.264 RTP payload format (RFC 6184).
//!
//! Input is one start-code-free NAL unit per call — the capture side
//! strips Annex B framing before units enter the pipeline. Two modes:
//!
//! - **Single NAL Unit** (§5.6): units that fit the configured packet
//!   size travel as-is in one RTP packet.
//! - **FU-A fragmentation** (§5.8): larger units are split, each fragment
//!   carrying the two-byte FU indicator/header:
//!
//!   ```text
//!   FU indicator:  [F|NRI|Type=28]     (1 byte)
//!   FU header:     [S|E|R|NAL_Type]    (1 byte)
//!   ```
//!
//! SPS/PPS units are recognized by NAL type as they pass through and
//! retained, so DESCRIBE responses can advertise `profile-level-id` and
//! `sprop-parameter-sets` (§8.1) once the encoder has produced them.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::{Packetizer, RtpHeader};

const NAL_TYPE_SLICE_MIN: u8 = 1;
const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_FU_A: u8 = 28;

/// True if the unit is a VCL NAL (a coded slice) — the units that
/// consume frame time on the RTP clock.
pub fn is_vcl_unit(unit: &[u8]) -> bool {
    !unit.is_empty() && (NAL_TYPE_SLICE_MIN..=NAL_TYPE_IDR).contains(&(unit[0] & 0x1f))
}

/// H.264 packetizer with persistent RTP state for one stream.
#[derive(Debug)]
pub struct H264Packetizer {
    header: RtpHeader,
    /// Maximum bytes of NAL payload per RTP packet.
    max_payload: usize,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H264Packetizer {
    /// Create with explicit payload type and SSRC. `max_packet_size` is
    /// the transport datagram bound from the server configuration; the
    /// 12-byte RTP header is budgeted out of it.
    pub fn new(pt: u8, ssrc: u32, max_packet_size: usize) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc),
            max_payload: max_packet_size.saturating_sub(12).max(64),
            sps: None,
            pps: None,
        }
    }

    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn with_random_ssrc(pt: u8, max_packet_size: usize) -> Self {
        Self {
            header: RtpHeader::with_random_ssrc(pt),
            max_payload: max_packet_size.saturating_sub(12).max(64),
            sps: None,
            pps: None,
        }
    }

    fn remember_parameter_sets(&mut self, unit: &[u8]) {
        match unit[0] & 0x1f {
            NAL_TYPE_SPS if self.sps.is_none() => {
                tracing::debug!(len = unit.len(), "SPS captured from stream");
                self.sps = Some(unit.to_vec());
            }
            NAL_TYPE_PPS if self.pps.is_none() => {
                tracing::debug!(len = unit.len(), "PPS captured from stream");
                self.pps = Some(unit.to_vec());
            }
            _ => {}
        }
    }

    /// profile-level-id from the SPS: profile_idc, constraint flags,
    /// level_idc (RFC 6184 §8.1).
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

    fn packetize_single(&mut self, unit: &[u8]) -> Vec<u8> {
        let hdr = self.header.write(true);
        let mut packet = Vec::with_capacity(12 + unit.len());
        packet.extend_from_slice(&hdr);
        packet.extend_from_slice(unit);
        packet
    }

    fn packetize_fragmented(&mut self, unit: &[u8]) -> Vec<Vec<u8>> {
        let nal_header = unit[0];
        let nal_type = nal_header & 0x1f;
        let fu_indicator = (nal_header & 0x60) | NAL_TYPE_FU_A;

        let payload = &unit[1..];
        let max_fragment = self.max_payload - 2; // FU indicator + FU header
        let mut packets = Vec::new();
        let mut offset = 0usize;
        let mut first = true;

        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let last = remaining <= max_fragment;
            let chunk = &payload[offset..offset + remaining.min(max_fragment)];

            let start_bit = if first { 0x80 } else { 0x00 };
            let end_bit = if last { 0x40 } else { 0x00 };
            let hdr = self.header.write(last);

            let mut packet = Vec::with_capacity(12 + 2 + chunk.len());
            packet.extend_from_slice(&hdr);
            packet.push(fu_indicator);
            packet.push(start_bit | end_bit | nal_type);
            packet.extend_from_slice(chunk);
            packets.push(packet);

            offset += chunk.len();
            first = false;
        }

        tracing::trace!(
            nal_type,
            unit_len = unit.len(),
            fragments = packets.len(),
            "FU-A fragmented unit"
        );
        packets
    }
}

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, unit: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>> {
        if unit.is_empty() {
            return Vec::new();
        }

        self.remember_parameter_sets(unit);

        let packets = if unit.len() <= self.max_payload {
            vec![self.packetize_single(unit)]
        } else {
            self.packetize_fragmented(unit)
        };

        self.header.advance_timestamp(timestamp_increment);
        packets
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }

    /// 90 kHz per RFC 6184 §8.1.
    fn clock_rate(&self) -> u32 {
        90000
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    /// SDP attributes per RFC 6184 §8.2.1. `a=rtpmap` must precede
    /// `a=fmtp`, which references its payload type.
    fn sdp_attributes(&self) -> Vec<String> {
        let mut fmtp = format!("a=fmtp:{} packetization-mode=1", self.header.pt);
        if let Some(pl) = self.profile_level_id() {
            fmtp.push_str(&format!(";profile-level-id={pl}"));
        }
        if let Some(sprop) = self.sprop_parameter_sets() {
            fmtp.push_str(&format!(";sprop-parameter-sets={sprop}"));
        }

        vec![
            format!(
                "a=rtpmap:{} {}/{}",
                self.payload_type(),
                self.codec_name(),
                self.clock_rate()
            ),
            fmtp,
            "a=control:track1".to_string(),
        ]
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.header.timestamp() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packetizer() -> H264Packetizer {
        H264Packetizer::new(96, 0xAABBCCDD, 1412)
    }

    #[test]
    fn small_unit_single_packet_with_marker() {
        let mut p = make_packetizer();
        let packets = p.packetize(&[0x65, 0xAA, 0xBB, 0xCC], 18000);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 12 + 4);
        assert_eq!(packets[0][1] & 0x80, 0x80, "marker on last packet");
        assert_eq!(packets[0][12], 0x65, "payload starts at NAL header");
    }

    #[test]
    fn large_unit_fragmented() {
        let mut p = make_packetizer();
        let mut unit = vec![0x65];
        unit.extend(vec![0xAA; 3000]);
        let packets = p.packetize(&unit, 18000);
        assert!(packets.len() > 1);

        assert_eq!(packets[0][12] & 0x1f, NAL_TYPE_FU_A);
        assert_eq!(packets[0][13] & 0x80, 0x80, "start bit on first fragment");
        assert_eq!(packets[0][13] & 0x1f, 5, "original NAL type in FU header");
        assert_eq!(packets[0][1] & 0x80, 0, "no marker mid-unit");

        let last = packets.last().unwrap();
        assert_eq!(last[13] & 0x40, 0x40, "end bit on last fragment");
        assert_eq!(last[1] & 0x80, 0x80, "marker on last fragment");
    }

    #[test]
    fn fragments_respect_packet_bound() {
        let mut p = H264Packetizer::new(96, 1, 200);
        let mut unit = vec![0x41];
        unit.extend(vec![0x11; 1000]);
        for packet in p.packetize(&unit, 0) {
            assert!(packet.len() <= 200);
        }
    }

    #[test]
    fn empty_unit_produces_nothing() {
        let mut p = make_packetizer();
        assert!(p.packetize(&[], 18000).is_empty());
    }

    #[test]
    fn sequence_runs_across_units() {
        let mut p = make_packetizer();
        p.packetize(&[0x65, 0x01], 18000);
        p.packetize(&[0x41, 0x02], 18000);
        assert_eq!(p.next_sequence(), 2);
        assert_eq!(p.next_rtp_timestamp(), 36000);
    }

    #[test]
    fn zero_increment_leaves_timestamp() {
        let mut p = make_packetizer();
        p.packetize(&[0x67, 0x42, 0x00, 0x1e], 0);
        assert_eq!(p.next_rtp_timestamp(), 0);
    }

    #[test]
    fn parameter_sets_surface_in_sdp() {
        let mut p = make_packetizer();
        assert!(!p.sdp_attributes().iter().any(|a| a.contains("sprop")));

        p.packetize(&[0x67, 0x42, 0x00, 0x1e], 0); // SPS
        p.packetize(&[0x68, 0xce, 0x38, 0x80], 0); // PPS

        let attrs = p.sdp_attributes();
        let fmtp = attrs.iter().find(|a| a.starts_with("a=fmtp:")).unwrap();
        assert!(fmtp.contains("profile-level-id=42001e"));
        assert!(fmtp.contains("sprop-parameter-sets="));

        let rtpmap_idx = attrs.iter().position(|a| a.starts_with("a=rtpmap")).unwrap();
        let fmtp_idx = attrs.iter().position(|a| a.starts_with("a=fmtp")).unwrap();
        assert!(rtpmap_idx < fmtp_idx, "rtpmap precedes fmtp");
    }

    #[test]
    fn vcl_detection() {
        assert!(is_vcl_unit(&[0x65]));
        assert!(is_vcl_unit(&[0x41]));
        assert!(!is_vcl_unit(&[0x67]));
        assert!(!is_vcl_unit(&[0x68]));
        assert!(!is_vcl_unit(&[]));
    }
}
