//! Transport Boundary
//!
//! What the replication core needs from a peer transport: unicast to one
//! peer, broadcast to every client, membership queries, and a bounded
//! drain of whatever arrived since the last tick. Delivery may duplicate
//! or reorder messages; nothing above this trait assumes otherwise.

use std::io;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::core::ids::PeerId;
use super::session::SessionError;

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes from a peer.
    Message {
        /// Sender.
        from: PeerId,
        /// Raw envelope.
        bytes: Vec<u8>,
    },
    /// A client joined (host only).
    PeerJoined(PeerId),
    /// A client left (host only).
    PeerLeft(PeerId),
    /// The connection to the host is gone (client only).
    HostLost,
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No such connected peer.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// Operation needs the host side.
    #[error("not the host")]
    NotHost,

    /// Not connected to anyone.
    #[error("not connected")]
    NotConnected,

    /// The transport was shut down.
    #[error("transport closed")]
    Closed,

    /// The host turned the connection away.
    #[error("refused by host: {0}")]
    Refused(SessionError),

    /// Socket error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// WebSocket protocol error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// A message bus between this peer and the others in the session.
pub trait Transport {
    /// Whether this end accepts clients.
    fn is_host(&self) -> bool;

    /// Whether this end is attached to a session.
    fn is_connected(&self) -> bool;

    /// The host peer, as seen from a client.
    fn host_peer(&self) -> Option<PeerId>;

    /// Clients currently connected, as seen from the host.
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Send to one peer.
    fn send_unicast(&self, peer: PeerId, bytes: &[u8]) -> Result<(), TransportError>;

    /// Send to every connected client. Host only. Returns how many peers it reached.
    fn send_broadcast(&self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Take up to `max` pending events, oldest first.
    fn drain(&mut self, max: usize) -> Vec<TransportEvent>;
}
