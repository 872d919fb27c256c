//! In-Process Transport
//!
//! A hub that connects one host and any number of clients inside a single
//! process. Each endpoint owns an unbounded `mpsc` inbox that is drained
//! with `try_recv`, so no async runtime is needed to drive it. The hub
//! also counts what each endpoint sent, which tests use to check fan-out.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::core::ids::PeerId;
use super::transport::{Transport, TransportError, TransportEvent};

/// Per-endpoint send counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendLog {
    /// Unicasts sent.
    pub unicasts: u64,
    /// Broadcasts sent (one per call, regardless of fan-out).
    pub broadcasts: u64,
}

#[derive(Default)]
struct HubState {
    host: Option<PeerId>,
    inboxes: BTreeMap<PeerId, UnboundedSender<TransportEvent>>,
    sent: HashMap<PeerId, SendLog>,
    next_peer: u64,
}

impl HubState {
    fn deliver(&self, to: PeerId, event: TransportEvent) -> Result<(), TransportError> {
        let inbox = self.inboxes.get(&to).ok_or(TransportError::UnknownPeer(to))?;
        inbox.send(event).map_err(|_| TransportError::Closed)
    }

    fn clients(&self) -> Vec<PeerId> {
        self.inboxes.keys().copied().filter(|p| Some(*p) != self.host).collect()
    }
}

/// Shared switchboard for loopback endpoints.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    /// Empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attach(&self, as_host: bool) -> LoopbackTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let peer = PeerId(state.next_peer);
        state.next_peer += 1;
        state.inboxes.insert(peer, tx);
        if as_host {
            state.host = Some(peer);
        } else if let Some(host) = state.host {
            let _ = state.deliver(host, TransportEvent::PeerJoined(peer));
        }
        debug!(%peer, as_host, "Loopback endpoint attached");

        LoopbackTransport {
            peer,
            hub: self.clone(),
            inbox: rx,
        }
    }

    /// Create the host endpoint. Replaces any previous host.
    pub fn host(&self) -> LoopbackTransport {
        self.attach(true)
    }

    /// Create a client endpoint. The host, if any, sees it join.
    pub fn connect(&self) -> LoopbackTransport {
        self.attach(false)
    }

    /// Remove an endpoint, notifying the others.
    pub fn detach(&self, peer: PeerId) {
        let mut state = self.lock();
        if state.inboxes.remove(&peer).is_none() {
            return;
        }
        if state.host == Some(peer) {
            state.host = None;
            for client in state.clients() {
                let _ = state.deliver(client, TransportEvent::HostLost);
            }
        } else if let Some(host) = state.host {
            let _ = state.deliver(host, TransportEvent::PeerLeft(peer));
        }
        debug!(%peer, "Loopback endpoint detached");
    }

    /// What an endpoint has sent so far.
    pub fn sent_by(&self, peer: PeerId) -> SendLog {
        self.lock().sent.get(&peer).copied().unwrap_or_default()
    }
}

/// One endpoint on a [`LoopbackHub`].
pub struct LoopbackTransport {
    peer: PeerId,
    hub: LoopbackHub,
    inbox: UnboundedReceiver<TransportEvent>,
}

impl LoopbackTransport {
    /// This endpoint's peer id.
    pub fn peer_id(&self) -> PeerId {
        self.peer
    }

    /// The hub this endpoint lives on.
    pub fn hub(&self) -> &LoopbackHub {
        &self.hub
    }
}

impl Transport for LoopbackTransport {
    fn is_host(&self) -> bool {
        self.hub.lock().host == Some(self.peer)
    }

    fn is_connected(&self) -> bool {
        let state = self.hub.lock();
        state.inboxes.contains_key(&self.peer) && state.host.is_some()
    }

    fn host_peer(&self) -> Option<PeerId> {
        self.hub.lock().host.filter(|host| *host != self.peer)
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        let state = self.hub.lock();
        if state.host == Some(self.peer) {
            state.clients()
        } else {
            Vec::new()
        }
    }

    fn send_unicast(&self, peer: PeerId, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.hub.lock();
        state.deliver(peer, TransportEvent::Message { from: self.peer, bytes: bytes.to_vec() })?;
        state.sent.entry(self.peer).or_default().unicasts += 1;
        Ok(())
    }

    fn send_broadcast(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.hub.lock();
        if state.host != Some(self.peer) {
            return Err(TransportError::NotHost);
        }
        let clients = state.clients();
        for client in &clients {
            let message = TransportEvent::Message { from: self.peer, bytes: bytes.to_vec() };
            state.deliver(*client, message)?;
        }
        state.sent.entry(self.peer).or_default().broadcasts += 1;
        Ok(clients.len())
    }

    fn drain(&mut self, max: usize) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while events.len() < max {
            match self.inbox.try_recv() {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        events
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.hub.detach(self.peer);
    }
}
