//! Declarative configuration model: cameras, server parameters, topics.
//!
//! The model is built once at startup (programmatically or through the
//! YAML [`loader`]), checked with [`RootConfig::validate`], and never
//! mutated afterwards. The structural invariants it enforces gate which
//! streams may exist:
//!
//! 1. Every active camera has a camera definition.
//! 2. Every active camera has a topic mapping.
//! 3. Camera names are unique (duplicate inserts are rejected, not merged).

pub mod loader;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default RTSP port.
pub const DEFAULT_SESSION_PORT: u16 = 8554;
/// Default transport packet (UDP datagram) size in bytes.
pub const DEFAULT_MAX_PACKET_SIZE: u16 = 1500;
/// Default per-cursor delivery buffer size in bytes. Encoded units larger
/// than this are truncated at delivery, never rejected.
pub const DEFAULT_MAX_BUF_SIZE: u32 = 2_000_000;
/// Default cap on units pending in a delivery bridge before the oldest
/// is evicted.
pub const DEFAULT_MAX_PENDING_UNITS: usize = 16;

const DEFAULT_FRAME_WIDTH: u16 = 744;
const DEFAULT_FRAME_HEIGHT: u16 = 480;
const DEFAULT_CAPTURE_FRAMERATE: u32 = 15;
const DEFAULT_STREAMING_FRAMERATE: u32 = 5;
const DEFAULT_PIXEL_FORMAT: &str = "bayer_grbg8";
const DEFAULT_STREAMING_PIXEL_FORMAT: &str = "yuv420p";
const DEFAULT_BITRATE_KBPS: u32 = 100;
const DEFAULT_VBV_BUFSIZE: u32 = 512;

/// A frame rate as an exact ratio (e.g. 30000/1001 for NTSC).
///
/// Deserializes from either a whole number (`fps: 15`) or an explicit
/// `{ num, den }` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "RationalRepr")]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RationalRepr {
    Whole(u32),
    Ratio { num: u32, den: u32 },
}

impl From<RationalRepr> for Rational {
    fn from(repr: RationalRepr) -> Self {
        match repr {
            RationalRepr::Whole(num) => Rational::new(num, 1),
            RationalRepr::Ratio { num, den } => Rational::new(num, den),
        }
    }
}

impl Rational {
    pub fn new(num: u32, den: u32) -> Self {
        Self {
            num,
            den: den.max(1),
        }
    }

    /// Frames per second as a float (display only).
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Frame geometry and rate shared by the capture (input) and streaming
/// (output) sides of a camera.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoParams {
    pub frame_rate: Rational,
    pub width: u16,
    pub height: u16,
    pub pixel_format: String,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            frame_rate: Rational::new(DEFAULT_CAPTURE_FRAMERATE, 1),
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            pixel_format: DEFAULT_PIXEL_FORMAT.to_string(),
        }
    }
}

impl VideoParams {
    /// Defaults for the post-transcode side: lower rate, codec pixel format.
    pub fn streaming_default() -> Self {
        Self {
            frame_rate: Rational::new(DEFAULT_STREAMING_FRAMERATE, 1),
            pixel_format: DEFAULT_STREAMING_PIXEL_FORMAT.to_string(),
            ..Self::default()
        }
    }
}

/// Encoder tuning for one camera.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncoderParams {
    pub bitrate_kbps: u32,
    pub vbv_buf_size: u32,
    pub preset: String,
    pub tune: String,
    pub slices: u16,
    pub intra_refresh: bool,
}

impl Default for EncoderParams {
    fn default() -> Self {
        Self {
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            vbv_buf_size: DEFAULT_VBV_BUFSIZE,
            preset: "ultrafast".to_string(),
            tune: "zerolatency".to_string(),
            slices: 1,
            intra_refresh: false,
        }
    }
}

impl EncoderParams {
    /// Render the x264 private options string handed to the encoder.
    pub fn x264_opts(&self) -> String {
        format!(
            "slices={}:intra-refresh={}:vbv-maxrate={}:vbv-bufsize={}",
            self.slices, self.intra_refresh as u8, self.bitrate_kbps, self.vbv_buf_size
        )
    }
}

/// Full description of one capture device: identity, locator, capture and
/// streaming geometry, encoder tuning. Immutable after construction.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraSpec {
    /// Unique camera name. Filled from the map key by the YAML loader.
    #[serde(default)]
    pub name: String,
    /// Opaque resource locator (e.g. a V4L2 device path).
    pub resource: String,
    #[serde(default)]
    pub input: VideoParams,
    #[serde(default = "VideoParams::streaming_default")]
    pub output: VideoParams,
    #[serde(default)]
    pub encoder: EncoderParams,
}

impl CameraSpec {
    /// A spec with the given identity and all parameters at their defaults.
    pub fn new(name: &str, resource: &str) -> Self {
        Self {
            name: name.to_string(),
            resource: resource.to_string(),
            input: VideoParams::default(),
            output: VideoParams::streaming_default(),
            encoder: EncoderParams::default(),
        }
    }
}

/// Server-wide parameters: ports, packet sizing, topic naming.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSpec {
    /// Maximum transport packet size in bytes (RTP packets never exceed it).
    pub max_packet_size_bytes: u16,
    /// RTSP listening port.
    pub session_port: u16,
    /// Optional prefix prepended to every topic path (e.g. `live` gives
    /// `/live/front-cam`). Empty for no prefix.
    pub topic_prefix: String,
    /// Per-cursor delivery buffer size; larger units are truncated.
    pub max_buf_size_bytes: u32,
    /// RTSP-over-HTTP tunneling toggle. Carried in the model for operator
    /// configs, but tunneling is not implemented; enabling it logs a
    /// warning and is otherwise ignored.
    pub tunneling_enabled: bool,
    pub tunneling_port: Option<u16>,
    /// Cap on units pending in each camera's delivery bridge.
    pub max_pending_units: usize,
    /// Camera name → operator-facing topic string. Keys are unique.
    pub topic_mappings: HashMap<String, String>,
}

impl Default for ServerSpec {
    fn default() -> Self {
        Self {
            max_packet_size_bytes: DEFAULT_MAX_PACKET_SIZE,
            session_port: DEFAULT_SESSION_PORT,
            topic_prefix: String::new(),
            max_buf_size_bytes: DEFAULT_MAX_BUF_SIZE,
            tunneling_enabled: false,
            tunneling_port: None,
            max_pending_units: DEFAULT_MAX_PENDING_UNITS,
            topic_mappings: HashMap::new(),
        }
    }
}

impl ServerSpec {
    /// Map a camera name to a topic. Returns false (and changes nothing)
    /// if the camera already has a mapping — callers must check.
    pub fn add_topic(&mut self, camera: &str, topic: &str) -> bool {
        if self.topic_mappings.contains_key(camera) {
            return false;
        }
        self.topic_mappings
            .insert(camera.to_string(), topic.to_string());
        true
    }

    pub fn topic_for(&self, camera: &str) -> Option<&str> {
        self.topic_mappings.get(camera).map(String::as_str)
    }

    /// URI path for a camera's stream: `/<prefix>/<topic>`, or `/<topic>`
    /// when no prefix is configured.
    pub fn topic_path(&self, camera: &str) -> Option<String> {
        let topic = self.topic_for(camera)?;
        if self.topic_prefix.is_empty() {
            Some(format!("/{topic}"))
        } else {
            Some(format!("/{}/{}", self.topic_prefix.trim_matches('/'), topic))
        }
    }
}

/// The validated root of the configuration tree.
///
/// Duplicate names are rejected at insertion (the insert returns false
/// rather than overwriting); [`validate`](Self::validate) then checks the
/// cross-references before any stream is built.
#[derive(Debug, Clone, Default)]
pub struct RootConfig {
    active_cameras: BTreeSet<String>,
    cameras: HashMap<String, CameraSpec>,
    server: ServerSpec,
}

impl RootConfig {
    pub fn new(server: ServerSpec) -> Self {
        Self {
            active_cameras: BTreeSet::new(),
            cameras: HashMap::new(),
            server,
        }
    }

    /// Mark a camera active. Returns false if it was already active.
    pub fn add_active_camera(&mut self, name: &str) -> bool {
        self.active_cameras.insert(name.to_string())
    }

    /// Register a camera definition under its own name. Returns false
    /// (and changes nothing) if a definition with that name exists.
    pub fn add_camera_spec(&mut self, spec: CameraSpec) -> bool {
        if self.cameras.contains_key(&spec.name) {
            return false;
        }
        self.cameras.insert(spec.name.clone(), spec);
        true
    }

    pub fn active_cameras(&self) -> &BTreeSet<String> {
        &self.active_cameras
    }

    pub fn camera_spec(&self, name: &str) -> Option<&CameraSpec> {
        self.cameras.get(name)
    }

    pub fn server(&self) -> &ServerSpec {
        &self.server
    }

    /// Override the RTSP port (e.g. from a CLI flag) before the server
    /// is built.
    pub fn set_session_port(&mut self, port: u16) {
        self.server.session_port = port;
    }

    /// Check the structural invariants, failing fast with the first
    /// violation rather than partially constructing a stream tree.
    ///
    /// No side effects besides the check.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for (key, spec) in &self.cameras {
            // A definition stored under one key but naming another camera
            // means two definitions claim the same name.
            if spec.name != *key || !seen.insert(spec.name.clone()) {
                return Err(ConfigError::DuplicateCamera(spec.name.clone()));
            }
        }

        for name in &self.active_cameras {
            if !self.cameras.contains_key(name) {
                return Err(ConfigError::MissingCameraSpec(name.clone()));
            }
            if self.server.topic_for(name).is_none() {
                return Err(ConfigError::MissingTopicMapping(name.clone()));
            }
        }

        Ok(())
    }
}
