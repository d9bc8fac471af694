use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

/// Outbound RTP sender.
///
/// Binds one ephemeral socket (`0.0.0.0:0`) shared by every session; the
/// delivery loop resolves each session's negotiated address before
/// calling in. Deliberately address-only — this layer knows nothing of
/// sessions or streams.
pub struct UdpTransport {
    socket: UdpSocket,
    packets_sent: AtomicU64,
}

impl UdpTransport {
    pub fn bind() -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket,
            packets_sent: AtomicU64::new(0),
        })
    }

    /// Send one packet to a client address.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        let sent = self.socket.send_to(payload, addr)?;
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        Ok(sent)
    }

    /// Send a burst of packets (one packetized unit) to a client address.
    /// Returns how many packets went out; a send error aborts the burst.
    pub fn send_burst(&self, packets: &[Vec<u8>], addr: SocketAddr) -> Result<usize> {
        for (i, packet) in packets.iter().enumerate() {
            if let Err(e) = self.send_to(packet, addr) {
                tracing::warn!(error = %e, %addr, sent = i, of = packets.len(), "RTP burst aborted");
                return Err(e);
            }
        }
        Ok(packets.len())
    }

    /// Total RTP packets sent since bind.
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }
}
