//! Per-camera streams and the stream registry.
//!
//! A [`CameraStream`] is one named, client-attachable endpoint bound to
//! one camera. It owns the whole per-camera pipeline: the capture/encode
//! task on its dedicated thread, the delivery bridge it publishes into,
//! the replicator fanning the stream out, the RTP packetizer, and the
//! cursors of the sessions currently attached.
//!
//! The [`StreamRegistry`] maps active cameras to streams and enforces
//! that at most one capture task exists per camera name.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};

use crate::bridge::{DeliveryBridge, WakeSignal};
use crate::capture::{CaptureTask, TaskState};
use crate::config::{CameraSpec, ServerSpec};
use crate::engine::EngineFactory;
use crate::error::{ConfigError, Result, ServerError};
use crate::media::h264::{self, H264Packetizer};
use crate::media::Packetizer;
use crate::replicator::{ReplicaCursor, Replicator};

/// Dynamic RTP payload type used for H.264 (RFC 3551 convention).
const RTP_PAYLOAD_TYPE: u8 = 96;

/// Operator-facing description of one stream.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub name: String,
    pub topic: String,
    pub playback_url: String,
}

/// One camera's streaming endpoint.
pub struct CameraStream {
    name: String,
    topic: String,
    path: String,
    estimated_bitrate_kbps: u32,
    /// RTP clock ticks consumed by one output frame.
    frame_ticks: u32,
    bridge: Arc<DeliveryBridge>,
    replicator: Replicator,
    task: Arc<CaptureTask>,
    worker: Mutex<Option<JoinHandle<()>>>,
    packetizer: Mutex<Box<dyn Packetizer>>,
    /// Session ID → that session's private read cursor.
    cursors: Mutex<HashMap<String, ReplicaCursor>>,
}

impl std::fmt::Debug for CameraStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraStream")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CameraStream {
    /// Open the camera's engine and start its capture thread.
    ///
    /// An engine open failure is fatal for this camera only; the error
    /// carries the camera name so the caller can keep serving others.
    pub(crate) fn start(
        spec: &CameraSpec,
        topic: &str,
        path: &str,
        server: &ServerSpec,
        factory: &EngineFactory,
        wake: Arc<WakeSignal>,
    ) -> Result<Arc<Self>> {
        let engine = factory(spec).map_err(|source| ServerError::CameraStart {
            name: spec.name.clone(),
            source,
        })?;

        let bridge = DeliveryBridge::new(&spec.name, server.max_pending_units, wake);
        let replicator = Replicator::new(
            bridge.clone(),
            server.max_pending_units,
            server.max_buf_size_bytes as usize,
        );

        let task = Arc::new(CaptureTask::new(&spec.name, engine));
        {
            let bridge = bridge.clone();
            task.set_on_unit(move |unit| bridge.publish(unit));
        }
        let worker = {
            let task = task.clone();
            std::thread::spawn(move || task.run())
        };

        let rate = spec.output.frame_rate;
        let frame_ticks = (90_000u64 * rate.den as u64 / rate.num.max(1) as u64) as u32;

        tracing::info!(camera = %spec.name, topic, path, "camera stream started");

        Ok(Arc::new(Self {
            name: spec.name.clone(),
            topic: topic.to_string(),
            path: path.to_string(),
            estimated_bitrate_kbps: spec.encoder.bitrate_kbps,
            frame_ticks,
            bridge,
            replicator,
            task,
            worker: Mutex::new(Some(worker)),
            packetizer: Mutex::new(Box::new(H264Packetizer::with_random_ssrc(
                RTP_PAYLOAD_TYPE,
                server.max_packet_size_bytes as usize,
            ))),
            cursors: Mutex::new(HashMap::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Bitrate hint for transport tuning and the SDP bandwidth line.
    pub fn estimated_bitrate_kbps(&self) -> u32 {
        self.estimated_bitrate_kbps
    }

    pub fn playback_url(&self, host: &str, port: u16) -> String {
        format!("rtsp://{host}:{port}{}", self.path)
    }

    pub fn task_state(&self) -> TaskState {
        self.task.state()
    }

    /// Units evicted from the bridge by backpressure since start.
    pub fn dropped_units(&self) -> u64 {
        self.bridge.dropped_units()
    }

    /// Attach a session's read cursor (SETUP). Idempotent: attaching an
    /// already-attached session keeps its existing cursor.
    pub fn attach_session(&self, session_id: &str) {
        let mut cursors = self.cursors.lock();
        if !cursors.contains_key(session_id) {
            cursors.insert(session_id.to_string(), self.replicator.attach());
            tracing::debug!(stream = %self.path, session_id, "session attached");
        }
    }

    /// Detach a session's cursor (TEARDOWN or disconnect). Other attached
    /// sessions are unaffected.
    pub fn detach_session(&self, session_id: &str) {
        if let Some(cursor) = self.cursors.lock().remove(session_id) {
            self.replicator.detach(cursor);
            tracing::debug!(stream = %self.path, session_id, "session detached");
        }
    }

    pub fn session_count(&self) -> usize {
        self.cursors.lock().len()
    }

    /// Drain the bridge into the attached cursors. Delivery-loop side.
    pub fn pump(&self) -> usize {
        self.replicator.pump()
    }

    /// Packetize one delivered unit. Parameter sets carry no frame time,
    /// so only coded slices advance the RTP clock.
    pub fn packetize_unit(&self, unit: &[u8]) -> Vec<Vec<u8>> {
        let increment = if h264::is_vcl_unit(unit) {
            self.frame_ticks
        } else {
            0
        };
        self.packetizer.lock().packetize(unit, increment)
    }

    /// Run `f` over the attached cursors (delivery loop).
    pub(crate) fn with_cursors<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, ReplicaCursor>) -> R,
    ) -> R {
        f(&mut self.cursors.lock())
    }

    /// SDP media attributes from the packetizer (DESCRIBE).
    pub fn sdp_attributes(&self) -> Vec<String> {
        self.packetizer.lock().sdp_attributes()
    }

    pub fn payload_type(&self) -> u8 {
        self.packetizer.lock().payload_type()
    }

    /// Next RTP sequence number (RTP-Info header).
    pub fn next_sequence(&self) -> u16 {
        self.packetizer.lock().next_sequence()
    }

    /// Next RTP timestamp (RTP-Info header).
    pub fn next_rtp_timestamp(&self) -> u32 {
        self.packetizer.lock().next_rtp_timestamp()
    }

    /// Stop the capture task (blocking) and release all cursors.
    ///
    /// The task must be Idle before the bridge can be torn down, so the
    /// capture thread never publishes into a released bridge.
    pub fn stop(&self) {
        self.task.stop();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!(camera = %self.name, "capture thread panicked");
            }
        }
        let mut cursors = self.cursors.lock();
        for (_, cursor) in cursors.drain() {
            self.replicator.detach(cursor);
        }
        tracing::info!(camera = %self.name, dropped = self.bridge.dropped_units(), "camera stream stopped");
    }
}

/// Registry of camera streams, keyed by camera name.
#[derive(Clone)]
pub struct StreamRegistry {
    streams: Arc<RwLock<HashMap<String, Arc<CameraStream>>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create the full pipeline for one camera and register its stream.
    ///
    /// At most one capture task may exist per camera name; a second add
    /// for the same name fails with
    /// [`DuplicateSession`](ServerError::DuplicateSession).
    pub fn add_camera(
        &self,
        spec: &CameraSpec,
        server: &ServerSpec,
        factory: &EngineFactory,
        wake: Arc<WakeSignal>,
    ) -> Result<Arc<CameraStream>> {
        let topic = server
            .topic_for(&spec.name)
            .ok_or_else(|| ConfigError::MissingTopicMapping(spec.name.clone()))
            .map_err(ServerError::Config)?
            .to_string();
        let path = server
            .topic_path(&spec.name)
            .ok_or_else(|| ConfigError::MissingTopicMapping(spec.name.clone()))
            .map_err(ServerError::Config)?;

        let mut streams = self.streams.write();
        if streams.contains_key(&spec.name) {
            return Err(ServerError::DuplicateSession(spec.name.clone()));
        }

        let stream = CameraStream::start(spec, &topic, &path, server, factory, wake)?;
        streams.insert(spec.name.clone(), stream.clone());
        Ok(stream)
    }

    /// Tear one camera down: blocking-stop its task, then drop the stream.
    pub fn remove_camera(&self, name: &str) -> Result<()> {
        let stream = self
            .streams
            .write()
            .remove(name)
            .ok_or_else(|| ServerError::StreamNotFound(name.to_string()))?;
        stream.stop();
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<CameraStream>> {
        self.streams.read().get(name).cloned()
    }

    /// Resolve a stream from an RTSP request URI by its topic path.
    pub fn resolve_from_uri(&self, uri: &str) -> Option<Arc<CameraStream>> {
        let path = extract_stream_path(uri);
        self.streams
            .read()
            .values()
            .find(|s| s.path() == path)
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<CameraStream>> {
        self.streams.read().values().cloned().collect()
    }

    /// Operator listing: (name, topic, playback URL) per stream, in name
    /// order.
    pub fn infos(&self, host: &str, port: u16) -> Vec<StreamInfo> {
        let mut infos: Vec<StreamInfo> = self
            .streams
            .read()
            .values()
            .map(|s| StreamInfo {
                name: s.name().to_string(),
                topic: s.topic().to_string(),
                playback_url: s.playback_url(host, port),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Detach a session's cursor from every stream (disconnect cleanup).
    pub fn detach_session_everywhere(&self, session_id: &str) {
        for stream in self.streams.read().values() {
            stream.detach_session(session_id);
        }
    }

    /// Stop every capture task (each a blocking stop) and clear the
    /// registry.
    pub fn stop_all(&self) {
        let streams: Vec<Arc<CameraStream>> = {
            let mut map = self.streams.write();
            map.drain().map(|(_, s)| s).collect()
        };
        for stream in streams {
            stream.stop();
        }
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the stream path from an RTSP URI.
///
/// `rtsp://host:8554/front-cam/track1` → `/front-cam`
/// `rtsp://host:8554/front-cam`        → `/front-cam`
/// `rtsp://host:8554`                  → `/`
/// `/front-cam`                        → `/front-cam`
pub fn extract_stream_path(uri: &str) -> &str {
    let path = if let Some(after) = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        match after.find('/') {
            Some(slash) => &after[slash..],
            None => "/",
        }
    } else if uri.starts_with('/') {
        uri
    } else {
        "/"
    };

    // Strip track suffix: /front-cam/track1 → /front-cam
    match path.rfind("/track") {
        Some(pos) if pos > 0 => &path[..pos],
        _ => path,
    }
}
