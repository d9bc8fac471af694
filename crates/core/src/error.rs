//! Error types for the live camera streaming server.

use std::fmt;

use crate::engine::EngineError;

/// Configuration errors, all fatal at startup.
///
/// Raised by [`RootConfig::validate`](crate::config::RootConfig::validate)
/// and by the YAML loader before any camera is opened or any port is bound.
/// The process is expected to print the diagnostic and exit non-zero.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A name in `active_cameras` has no entry in the camera table.
    #[error("active camera '{0}' has no camera definition")]
    MissingCameraSpec(String),

    /// A name in `active_cameras` has no topic mapping on the server side.
    #[error("active camera '{0}' has no topic mapping")]
    MissingTopicMapping(String),

    /// Two camera definitions claim the same name.
    #[error("duplicate camera name '{0}'")]
    DuplicateCamera(String),

    /// The configuration file could not be read.
    #[error("cannot read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("cannot parse configuration file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors that can occur while building or running the server.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Startup**: [`Config`](Self::Config) — invalid configuration,
///   [`CameraStart`](Self::CameraStart) — one camera failed to open
///   (fatal for that camera only; the server keeps serving the others).
/// - **Streams**: [`DuplicateSession`](Self::DuplicateSession),
///   [`StreamNotFound`](Self::StreamNotFound).
/// - **Sessions**: [`SessionNotFound`](Self::SessionNotFound),
///   [`SessionAttach`](Self::SessionAttach),
///   [`PortRangeExhausted`](Self::PortRangeExhausted).
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP messages.
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning), [`Io`](Self::Io).
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The camera's capture source or transcoder could not be opened.
    #[error("camera '{name}' failed to start: {source}")]
    CameraStart {
        name: String,
        #[source]
        source: EngineError,
    },

    /// A stream (and its capture task) already exists for this camera name.
    #[error("a stream for camera '{0}' already exists")]
    DuplicateSession(String),

    /// No stream registered at the requested path.
    #[error("no stream at path '{0}'")]
    StreamNotFound(String),

    /// No session with the given ID exists in the registry.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A client session could not be wired to the stream's replicator.
    #[error("cannot attach session to stream '{0}'")]
    SessionAttach(String),

    /// Server-side UDP port allocation exhausted the 5000–65534 range.
    #[error("port range exhausted (tried to allocate beyond u16 range)")]
    PortRangeExhausted,

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, ServerError>`.
pub type Result<T> = std::result::Result<T, ServerError>;
