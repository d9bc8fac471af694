//! RTSP signaling (RFC 2326).
//!
//! Text-based request/response protocol over TCP. [`message`] parses
//! requests and serializes responses, [`sdp`] produces the session
//! description returned by DESCRIBE, and [`handler`] routes methods to
//! the stream registry and session registry.
//!
//! Supported methods:
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery |
//! | DESCRIBE | §10.2 | Retrieve SDP session description |
//! | SETUP | §10.4 | Negotiate transport, attach a stream cursor |
//! | PLAY | §10.5 | Start media delivery |
//! | PAUSE | §10.6 | Suspend media delivery |
//! | TEARDOWN | §10.7 | Destroy session, detach its cursor |
//! | GET_PARAMETER | §10.8 | Keepalive |

pub mod handler;
pub mod message;
pub mod sdp;

pub use handler::MethodHandler;
pub use message::{RtspRequest, RtspResponse};
