//! YAML configuration loader.
//!
//! File layout:
//!
//! ```yaml
//! config:
//!   server:
//!     session_port: 8554
//!     topic_prefix: live
//!     topic_mappings:
//!       front: front-cam
//!   cameras:
//!     front:
//!       resource: /dev/video0
//!       input: { frame_rate: 15, width: 744, height: 480 }
//!       output: { frame_rate: 5 }
//!       encoder: { bitrate_kbps: 100, vbv_buf_size: 512 }
//! active_cameras:
//!   - front
//! ```
//!
//! `active_cameras` accepts either a single name or a sequence. Camera
//! names come from the `cameras` map keys. The loaded tree is validated
//! before it is returned, so a successfully loaded configuration is
//! always a usable one.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::{CameraSpec, RootConfig, ServerSpec};
use crate::error::ConfigError;

#[derive(Deserialize)]
struct RawFile {
    config: RawConfig,
    active_cameras: ActiveCameras,
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    server: ServerSpec,
    #[serde(default)]
    cameras: HashMap<String, CameraSpec>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ActiveCameras {
    One(String),
    Many(Vec<String>),
}

impl ActiveCameras {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(name) => vec![name],
            Self::Many(names) => names,
        }
    }
}

/// Load and validate a configuration from a YAML file.
pub fn load_path(path: &Path) -> Result<RootConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_str(&text, &path.display().to_string())
}

/// Load and validate a configuration from YAML text. `origin` names the
/// source in diagnostics (a file path, or `"<inline>"` in tests).
pub fn load_str(text: &str, origin: &str) -> Result<RootConfig, ConfigError> {
    let raw: RawFile = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
        path: origin.to_string(),
        source,
    })?;

    let mut config = RootConfig::new(raw.config.server);

    for (name, mut spec) in raw.config.cameras {
        spec.name = name.clone();
        if !config.add_camera_spec(spec) {
            return Err(ConfigError::DuplicateCamera(name));
        }
    }

    for name in raw.active_cameras.into_vec() {
        config.add_active_camera(&name);
    }

    config.validate()?;

    tracing::debug!(
        origin,
        active = config.active_cameras().len(),
        "configuration loaded"
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
config:
  server:
    session_port: 9554
    max_packet_size_bytes: 1400
    topic_prefix: live
    topic_mappings:
      front: front-cam
      rear: rear-cam
  cameras:
    front:
      resource: /dev/video0
      input:
        frame_rate: 15
        width: 744
        height: 480
        pixel_format: bayer_grbg8
      output:
        frame_rate: 5
      encoder:
        bitrate_kbps: 200
        vbv_buf_size: 1024
        slices: 4
        intra_refresh: true
    rear:
      resource: /dev/video1
active_cameras:
  - front
  - rear
"#;

    #[test]
    fn loads_full_config() {
        let config = load_str(FULL, "<inline>").unwrap();
        assert_eq!(config.active_cameras().len(), 2);

        let front = config.camera_spec("front").unwrap();
        assert_eq!(front.name, "front");
        assert_eq!(front.resource, "/dev/video0");
        assert_eq!(front.input.frame_rate.num, 15);
        assert_eq!(front.output.frame_rate.num, 5);
        assert_eq!(front.encoder.bitrate_kbps, 200);
        assert_eq!(front.encoder.slices, 4);
        assert!(front.encoder.intra_refresh);

        // Unspecified camera sections fall back to defaults.
        let rear = config.camera_spec("rear").unwrap();
        assert_eq!(rear.input.width, 744);
        assert_eq!(rear.encoder.bitrate_kbps, 100);

        assert_eq!(config.server().session_port, 9554);
        assert_eq!(
            config.server().topic_path("front").as_deref(),
            Some("/live/front-cam")
        );
    }

    #[test]
    fn scalar_active_camera() {
        let text = r#"
config:
  server:
    topic_mappings:
      front: front-cam
  cameras:
    front:
      resource: /dev/video0
active_cameras: front
"#;
        let config = load_str(text, "<inline>").unwrap();
        assert!(config.active_cameras().contains("front"));
    }

    #[test]
    fn missing_config_key_is_parse_error() {
        let err = load_str("active_cameras: front\n", "<inline>").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_topic_mapping_rejected_at_load() {
        let text = r#"
config:
  cameras:
    front:
      resource: /dev/video0
active_cameras: front
"#;
        let err = load_str(text, "<inline>").unwrap_err();
        assert!(matches!(err, ConfigError::MissingTopicMapping(name) if name == "front"));
    }

    #[test]
    fn missing_camera_spec_rejected_at_load() {
        let text = r#"
config:
  server:
    topic_mappings:
      ghost: ghost-cam
  cameras: {}
active_cameras: ghost
"#;
        let err = load_str(text, "<inline>").unwrap_err();
        assert!(matches!(err, ConfigError::MissingCameraSpec(name) if name == "ghost"));
    }
}
