//! The server: stream construction, delivery loop, graceful shutdown.
//!
//! [`Server::run`] is the single-threaded cooperative delivery loop. Each
//! iteration is bounded: it pumps every camera's replicator, hands at
//! most a fixed number of units per playing session to the UDP transport,
//! checks the shutdown flag, and parks on the shared wake signal when
//! there is nothing to deliver. Capture threads never touch sockets; the
//! loop never blocks on capture.
//!
//! Shutdown is a single atomic flag. [`ShutdownHandle::request`] only
//! stores it — no allocation, no locks — so it is safe to call from a
//! signal handler. Teardown order: stop accepting new connections, close
//! client sessions, blocking-stop every capture task, release the
//! bridges and the transport.

use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::bridge::WakeSignal;
use crate::config::RootConfig;
use crate::engine::EngineFactory;
use crate::error::{Result, ServerError};
use crate::session::SessionRegistry;
use crate::stream::{CameraStream, StreamInfo, StreamRegistry};
use crate::transport::{UdpTransport, tcp};

/// How long the delivery loop parks when no bridge has data. Bounds the
/// latency of shutdown-flag observation.
const LOOP_PARK_TIMEOUT: Duration = Duration::from_millis(20);

/// Units handed to one session per loop iteration, keeping every
/// iteration bounded even against a bursty encoder.
const MAX_UNITS_PER_SESSION_PER_TICK: usize = 8;

/// Host advertised in operator-facing playback URLs.
const ADVERTISED_HOST: &str = "127.0.0.1";

/// Cloneable handle that requests server shutdown.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Request shutdown. One atomic store: safe from any thread or from
    /// a signal handler; never allocates, locks, or blocks.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Live camera streaming server.
pub struct Server {
    config: RootConfig,
    sessions: SessionRegistry,
    streams: StreamRegistry,
    wake: Arc<WakeSignal>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    udp: Option<UdpTransport>,
    accept_worker: Option<JoinHandle<()>>,
    bound_port: Option<u16>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("bound_port", &self.bound_port)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Build a server from a validated configuration, starting one
    /// capture pipeline per active camera.
    ///
    /// Configuration errors abort construction before anything is bound.
    /// A camera that fails to start is logged and skipped — the server
    /// comes up with the streams that did start.
    pub fn from_config(config: RootConfig, factory: Arc<EngineFactory>) -> Result<Self> {
        config.validate()?;

        if config.server().tunneling_enabled {
            tracing::warn!("RTSP-over-HTTP tunneling is not supported; ignoring");
        }

        let wake = WakeSignal::new();
        let streams = StreamRegistry::new();

        for name in config.active_cameras() {
            let Some(spec) = config.camera_spec(name) else {
                continue;
            };
            match streams.add_camera(spec, config.server(), factory.as_ref(), wake.clone()) {
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(camera = %name, error = %e, "camera failed to start; continuing without it");
                }
            }
        }

        Ok(Self {
            config,
            sessions: SessionRegistry::new(),
            streams,
            wake,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            udp: None,
            accept_worker: None,
            bound_port: None,
        })
    }

    /// Bind the RTSP and RTP sockets and start accepting clients.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        self.udp = Some(UdpTransport::bind()?);

        let listener = TcpListener::bind(("0.0.0.0", self.config.server().session_port))?;
        listener.set_nonblocking(true)?;
        self.bound_port = Some(listener.local_addr()?.port());

        self.running.store(true, Ordering::SeqCst);

        let sessions = self.sessions.clone();
        let streams = self.streams.clone();
        let running = self.running.clone();
        self.accept_worker = Some(std::thread::spawn(move || {
            tcp::accept_loop(listener, sessions, streams, running);
        }));

        tracing::info!(port = self.bound_port, "RTSP server listening");
        for info in self.stream_infos() {
            tracing::info!(
                camera = %info.name,
                topic = %info.topic,
                url = %info.playback_url,
                "stream available"
            );
        }

        Ok(())
    }

    /// A handle for requesting shutdown from another thread or a signal
    /// handler.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    /// Run the delivery loop on the calling thread until shutdown is
    /// requested, then tear the server down.
    pub fn run(&mut self) -> Result<()> {
        if self.udp.is_none() {
            return Err(ServerError::NotStarted);
        }

        tracing::debug!("delivery loop started");

        {
            let udp = self.udp.as_ref().ok_or(ServerError::NotStarted)?;

            while !self.shutdown.load(Ordering::SeqCst) {
                let mut delivered = 0usize;

                for stream in self.streams.all() {
                    stream.pump();
                    stream.with_cursors(|cursors| {
                        for (session_id, cursor) in cursors.iter_mut() {
                            let Some(session) = self.sessions.get(session_id) else {
                                continue;
                            };
                            if !session.is_playing() {
                                continue;
                            }
                            let Some(transport) = session.get_transport() else {
                                continue;
                            };

                            for _ in 0..MAX_UNITS_PER_SESSION_PER_TICK {
                                let Some(unit) = cursor.deliver_next() else {
                                    break;
                                };
                                let packets = stream.packetize_unit(unit);
                                if udp.send_burst(&packets, transport.client_addr).is_err() {
                                    break;
                                }
                                delivered += 1;
                            }
                        }
                    });
                }

                if delivered == 0 {
                    self.wake.wait_timeout(LOOP_PARK_TIMEOUT);
                }
            }
        }

        tracing::debug!("delivery loop exiting");
        self.stop();
        Ok(())
    }

    /// Tear the server down in dependency order: stop accepting, close
    /// client sessions, blocking-stop every capture task, release the
    /// transport.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.accept_worker.take() {
            if worker.join().is_err() {
                tracing::error!("accept thread panicked");
            }
        }

        let closed = self.sessions.drain();
        for session in &closed {
            self.streams.detach_session_everywhere(&session.id);
        }
        if !closed.is_empty() {
            tracing::info!(closed = closed.len(), "client sessions closed");
        }

        self.streams.stop_all();
        self.udp = None;
        self.bound_port = None;

        tracing::info!("server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The actually bound RTSP port, once started.
    pub fn local_port(&self) -> Option<u16> {
        self.bound_port
    }

    /// Operator listing of available streams.
    pub fn stream_infos(&self) -> Vec<StreamInfo> {
        let port = self
            .bound_port
            .unwrap_or(self.config.server().session_port);
        self.streams.infos(ADVERTISED_HOST, port)
    }

    pub fn camera_streams(&self) -> Vec<Arc<CameraStream>> {
        self.streams.all()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }
}
