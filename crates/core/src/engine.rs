//! Transcoding engine contract.
//!
//! The decode/convert/encode pipeline itself lives outside this crate
//! (FFmpeg, GStreamer, a hardware encoder). This module defines the seam:
//! an engine blocks on its capture source and hands back encoded units,
//! one raw frame at a time. Units are self-contained access units with
//! any start-code framing already stripped — the RTP packetizer relies
//! on that.
//!
//! [`SyntheticEngine`] is a hardware-free implementation used by the test
//! suite and for smoke-testing a deployment without cameras attached.

use std::sync::Arc;
use std::time::Duration;

use crate::config::CameraSpec;

/// Failures inside an engine.
///
/// [`Open`](Self::Open) is fatal for the camera it concerns (the server
/// keeps serving other cameras). Per-unit capture/encode failures are
/// recoverable: the capture loop logs them and moves on to the next frame.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The capture source could not be opened.
    #[error("cannot open capture source '{resource}': {reason}")]
    Open { resource: String, reason: String },

    /// Capturing a raw frame failed.
    #[error("capture failed: {0}")]
    Capture(String),

    /// Encoding a raw frame failed.
    #[error("encode failed: {0}")]
    Encode(String),
}

/// A running transcoding pipeline for one camera.
///
/// Implementations own the capture device. [`next_units`](Self::next_units)
/// blocks until the next raw frame has been captured and transcoded, then
/// returns the resulting encoded units — zero or more, since an encoder
/// may buffer frames or emit parameter sets alongside a keyframe.
pub trait TranscodeEngine: Send {
    fn next_units(&mut self) -> Result<Vec<Vec<u8>>, EngineError>;
}

/// Constructor for engines, called once per active camera. An `Err` means
/// the camera cannot start; the error is surfaced as a camera start
/// failure and other cameras are unaffected.
pub type EngineFactory =
    dyn Fn(&CameraSpec) -> Result<Box<dyn TranscodeEngine>, EngineError> + Send + Sync;

const SYNTHETIC_UNIT_LEN: usize = 1200;

// Plausible parameter sets so SDP generation sees real NAL types.
const SYNTHETIC_SPS: [u8; 4] = [0x67, 0x42, 0x00, 0x1e];
const SYNTHETIC_PPS: [u8; 4] = [0x68, 0xce, 0x38, 0x80];

/// A camera-less engine producing H.264-shaped units at the camera's
/// configured streaming rate.
///
/// The first frame carries SPS + PPS + an IDR unit; subsequent frames
/// carry one non-IDR slice each. Payload bytes encode the frame index so
/// tests can assert ordering.
pub struct SyntheticEngine {
    name: String,
    frame_interval: Duration,
    frame_index: u64,
}

impl SyntheticEngine {
    pub fn new(spec: &CameraSpec) -> Self {
        let rate = spec.output.frame_rate;
        let frame_interval = Duration::from_secs_f64(rate.den as f64 / rate.num.max(1) as f64);
        Self {
            name: spec.name.clone(),
            frame_interval,
            frame_index: 0,
        }
    }

    /// An [`EngineFactory`] producing a synthetic engine per camera.
    pub fn factory() -> Arc<EngineFactory> {
        Arc::new(|spec| {
            let engine: Box<dyn TranscodeEngine> = Box::new(SyntheticEngine::new(spec));
            Ok(engine)
        })
    }

    fn slice_unit(&self, nal_header: u8) -> Vec<u8> {
        let mut unit = Vec::with_capacity(SYNTHETIC_UNIT_LEN);
        unit.push(nal_header);
        unit.extend_from_slice(&self.frame_index.to_be_bytes());
        while unit.len() < SYNTHETIC_UNIT_LEN {
            unit.push((unit.len() % 251) as u8);
        }
        unit
    }
}

impl TranscodeEngine for SyntheticEngine {
    fn next_units(&mut self) -> Result<Vec<Vec<u8>>, EngineError> {
        std::thread::sleep(self.frame_interval);

        let units = if self.frame_index == 0 {
            tracing::debug!(camera = %self.name, "synthetic stream started");
            vec![
                SYNTHETIC_SPS.to_vec(),
                SYNTHETIC_PPS.to_vec(),
                self.slice_unit(0x65), // IDR
            ]
        } else {
            vec![self.slice_unit(0x41)] // non-IDR slice
        };

        self.frame_index += 1;
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_spec() -> CameraSpec {
        let mut spec = CameraSpec::new("test", "synthetic://pattern");
        spec.output.frame_rate = crate::config::Rational::new(100, 1);
        spec
    }

    #[test]
    fn first_frame_carries_parameter_sets() {
        let mut engine = SyntheticEngine::new(&fast_spec());
        let units = engine.next_units().unwrap();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0][0] & 0x1f, 7); // SPS
        assert_eq!(units[1][0] & 0x1f, 8); // PPS
        assert_eq!(units[2][0] & 0x1f, 5); // IDR
    }

    #[test]
    fn subsequent_frames_are_single_slices() {
        let mut engine = SyntheticEngine::new(&fast_spec());
        engine.next_units().unwrap();
        let units = engine.next_units().unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0][0] & 0x1f, 1);
    }

    #[test]
    fn payload_encodes_frame_index() {
        let mut engine = SyntheticEngine::new(&fast_spec());
        engine.next_units().unwrap();
        let second = engine.next_units().unwrap();
        let third = engine.next_units().unwrap();
        assert_eq!(second[0][1..9], 1u64.to_be_bytes());
        assert_eq!(third[0][1..9], 2u64.to_be_bytes());
    }
}
