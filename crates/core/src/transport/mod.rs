//! Network transports.
//!
//! RTSP uses a split transport model:
//!
//! - **TCP** ([`tcp`]): RTSP signaling. One connection per client, one
//!   thread per connection, plus a non-blocking accept loop.
//! - **UDP** ([`udp`]): outbound RTP media. One shared ephemeral socket
//!   for all sessions, driven by the delivery loop.

pub mod tcp;
pub mod udp;

pub use udp::UdpTransport;
