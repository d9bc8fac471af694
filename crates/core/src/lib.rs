//! Live camera streaming server.
//!
//! Streams live video from capture devices to many simultaneous RTSP
//! clients, transcoding each source once regardless of client count.
//! Per camera: a dedicated capture/encode thread publishes into a
//! [`DeliveryBridge`], a [`Replicator`] fans the stream out to
//! independent per-session cursors, and the single-threaded
//! [`Server`] delivery loop packetizes and sends RTP.

pub mod bridge;
pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod media;
pub mod protocol;
pub mod replicator;
pub mod server;
pub mod session;
pub mod stream;
pub mod transport;

pub use bridge::{DeliveryBridge, EncodedUnit, WakeSignal};
pub use capture::{CaptureTask, TaskState};
pub use config::{CameraSpec, RootConfig, ServerSpec};
pub use engine::{EngineError, EngineFactory, SyntheticEngine, TranscodeEngine};
pub use error::{ConfigError, Result, ServerError};
pub use replicator::{ReplicaCursor, Replicator};
pub use server::{Server, ShutdownHandle};
pub use stream::{CameraStream, StreamInfo, StreamRegistry};
