//! WebSocket Transport
//!
//! A [`Transport`] over WebSockets for sessions across machines. The host
//! listens and spawns one task per peer; each peer connection is split into
//! a writer task fed by an unbounded channel and a reader loop that
//! forwards binary frames into a single inbound queue. The simulation
//! thread never awaits: sends enqueue, `drain` uses `try_recv`.
//!
//! Admission happens in the handshake. A client offers its password hash
//! as the `key` query parameter; the host answers 503 when the lobby is
//! full and 403 when the key is wrong.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{self, http::StatusCode, Message};
use tokio_tungstenite::{accept_hdr_async, connect_async};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::config::HostSettings;
use crate::core::ids::PeerId;
use super::lobby::{hash_password, LobbyMetadata};
use super::session::SessionError;
use super::transport::{Transport, TransportError, TransportEvent};

/// Peer id the host uses for itself, and clients use for the host.
pub const HOST_PEER: PeerId = PeerId(0);

type PeerMap = Arc<Mutex<BTreeMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>>>;

fn lock(peers: &PeerMap) -> MutexGuard<'_, BTreeMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>> {
    peers.lock().unwrap_or_else(PoisonError::into_inner)
}

fn drain_inbox(
    inbox: &mut mpsc::UnboundedReceiver<TransportEvent>,
    max: usize,
) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    while events.len() < max {
        match inbox.try_recv() {
            Ok(event) => events.push(event),
            Err(_) => break,
        }
    }
    events
}

/// What a joining peer is checked against during the handshake.
#[derive(Clone)]
struct Admission {
    peers: PeerMap,
    max_lobby_size: usize,
    password_hash: String,
}

impl Admission {
    /// Reserve a slot for `peer` if the lobby has room and the key matches.
    fn admit(
        &self,
        peer: PeerId,
        offered_hash: &str,
        outbox: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<(), SessionError> {
        let mut peers = lock(&self.peers);
        let lobby = LobbyMetadata {
            // The host occupies one slot.
            player_count: peers.len() + 1,
            max_players: self.max_lobby_size,
            password_hash: self.password_hash.clone(),
            ..Default::default()
        };
        lobby.admit(offered_hash)?;
        peers.insert(peer, outbox);
        Ok(())
    }
}

fn offered_key(request: &Request) -> String {
    request
        .uri()
        .query()
        .unwrap_or_default()
        .split('&')
        .find_map(|pair| pair.strip_prefix("key="))
        .unwrap_or_default()
        .to_string()
}

fn refusal_response(refusal: &SessionError) -> ErrorResponse {
    let status = match refusal {
        SessionError::SessionFull => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::FORBIDDEN,
    };
    let mut response = ErrorResponse::new(Some(refusal.to_string()));
    *response.status_mut() = status;
    response
}

/// Map a handshake refusal back to the reason the host gave.
fn refused(error: tungstenite::Error) -> TransportError {
    let status = match &error {
        tungstenite::Error::Http(response) => Some(response.status()),
        _ => None,
    };
    match status {
        Some(StatusCode::SERVICE_UNAVAILABLE) => TransportError::Refused(SessionError::SessionFull),
        Some(StatusCode::FORBIDDEN) => TransportError::Refused(SessionError::WrongPassword),
        _ => TransportError::WebSocket(error),
    }
}

/// `url` with the password hash attached as the `key` query parameter.
fn with_key(url: &str, key: &str) -> String {
    if key.is_empty() {
        return url.to_string();
    }
    let base = match url.split_once("://") {
        Some((_, rest)) if !rest.contains('/') => format!("{}/", url),
        _ => url.to_string(),
    };
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", base, separator, key)
}

// =============================================================================
// HOST
// =============================================================================

/// Listening side of a WebSocket session.
pub struct WsHost {
    local_addr: SocketAddr,
    peers: PeerMap,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WsHost {
    /// Bind the listener and start accepting peers.
    #[instrument(skip(settings), fields(bind_addr = %settings.bind_addr))]
    pub async fn bind(settings: &HostSettings) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(&settings.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Session host listening on {}", local_addr);

        let peers: PeerMap = Arc::new(Mutex::new(BTreeMap::new()));
        let (event_tx, inbound) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let admission = Admission {
            peers: peers.clone(),
            max_lobby_size: settings.max_lobby_size,
            password_hash: hash_password(&settings.password),
        };
        if !admission.password_hash.is_empty() {
            info!("Lobby is password protected");
        }

        tokio::spawn(Self::accept_loop(listener, admission, event_tx, shutdown_tx.subscribe()));

        Ok(Self {
            local_addr,
            peers,
            inbound,
            shutdown_tx,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the listener and every peer connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn accept_loop(
        listener: TcpListener,
        admission: Admission,
        events: mpsc::UnboundedSender<TransportEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut next_peer = HOST_PEER.0 + 1;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let peer = PeerId(next_peer);
                            next_peer += 1;

                            info!("New connection from {} as {}", addr, peer);
                            tokio::spawn(Self::serve_peer(
                                stream,
                                addr,
                                peer,
                                admission.clone(),
                                events.clone(),
                                shutdown_rx.resubscribe(),
                            ));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Session host shutting down");
                    break;
                }
            }
        }
    }

    async fn serve_peer(
        stream: TcpStream,
        addr: SocketAddr,
        peer: PeerId,
        admission: Admission,
        events: mpsc::UnboundedSender<TransportEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let (outbox_tx, mut outbox) = mpsc::unbounded_channel();
        let check = |request: &Request, response: Response| {
            match admission.admit(peer, &offered_key(request), outbox_tx) {
                Ok(()) => Ok(response),
                Err(refusal) => {
                    warn!("Refusing {}: {}", addr, refusal);
                    Err(refusal_response(&refusal))
                }
            }
        };
        let peers = admission.peers.clone();
        let ws_stream = match accept_hdr_async(stream, check).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!("WebSocket handshake with {} ended: {}", addr, e);
                lock(&peers).remove(&peer);
                return;
            }
        };

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let _ = events.send(TransportEvent::PeerJoined(peer));

        let sender_task = tokio::spawn(async move {
            while let Some(bytes) = outbox.recv().await {
                if ws_sender.send(Message::Binary(bytes)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(bytes))) => {
                            let _ = events.send(TransportEvent::Message { from: peer, bytes });
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Peer {} disconnected", peer);
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("WebSocket error for {}: {}", peer, e);
                            break;
                        }
                        _ => {}
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        sender_task.abort();
        lock(&peers).remove(&peer);
        let _ = events.send(TransportEvent::PeerLeft(peer));
        info!("Peer {} cleaned up", peer);
    }
}

impl Transport for WsHost {
    fn is_host(&self) -> bool {
        true
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn host_peer(&self) -> Option<PeerId> {
        None
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        lock(&self.peers).keys().copied().collect()
    }

    fn send_unicast(&self, peer: PeerId, bytes: &[u8]) -> Result<(), TransportError> {
        let peers = lock(&self.peers);
        let outbox = peers.get(&peer).ok_or(TransportError::UnknownPeer(peer))?;
        outbox.send(bytes.to_vec()).map_err(|_| TransportError::Closed)
    }

    fn send_broadcast(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        let peers = lock(&self.peers);
        Ok(peers
            .values()
            .filter(|outbox| outbox.send(bytes.to_vec()).is_ok())
            .count())
    }

    fn drain(&mut self, max: usize) -> Vec<TransportEvent> {
        drain_inbox(&mut self.inbound, max)
    }
}

impl Drop for WsHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Joining side of a WebSocket session.
pub struct WsClient {
    outbox: mpsc::UnboundedSender<Vec<u8>>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    connected: Arc<AtomicBool>,
    tasks: [JoinHandle<()>; 2],
}

impl WsClient {
    /// Connect to an open lobby at `url` (for example `ws://127.0.0.1:11000`).
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        Self::connect_with_password(url, "").await
    }

    /// Connect with a lobby password. A refusal comes back as
    /// [`TransportError::Refused`].
    #[instrument(skip(password))]
    pub async fn connect_with_password(url: &str, password: &str) -> Result<Self, TransportError> {
        let request_url = with_key(url, &hash_password(password));
        let (ws_stream, _) = connect_async(request_url.as_str()).await.map_err(refused)?;
        info!("Connected to host at {}", url);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (event_tx, inbound) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let sender_task = tokio::spawn(async move {
            while let Some(bytes) = outbox_rx.recv().await {
                if ws_sender.send(Message::Binary(bytes)).await.is_err() {
                    break;
                }
            }
        });

        let reader_connected = connected.clone();
        let receiver_task = tokio::spawn(async move {
            loop {
                match ws_receiver.next().await {
                    Some(Ok(Message::Binary(bytes))) => {
                        let _ = event_tx.send(TransportEvent::Message { from: HOST_PEER, bytes });
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Host closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from host: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            let _ = event_tx.send(TransportEvent::HostLost);
        });

        Ok(Self {
            outbox,
            inbound,
            connected,
            tasks: [sender_task, receiver_task],
        })
    }
}

impl Transport for WsClient {
    fn is_host(&self) -> bool {
        false
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn host_peer(&self) -> Option<PeerId> {
        self.is_connected().then_some(HOST_PEER)
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        Vec::new()
    }

    fn send_unicast(&self, peer: PeerId, bytes: &[u8]) -> Result<(), TransportError> {
        if peer != HOST_PEER {
            return Err(TransportError::UnknownPeer(peer));
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.outbox.send(bytes.to_vec()).map_err(|_| TransportError::Closed)
    }

    fn send_broadcast(&self, _bytes: &[u8]) -> Result<usize, TransportError> {
        Err(TransportError::NotHost)
    }

    fn drain(&mut self, max: usize) -> Vec<TransportEvent> {
        drain_inbox(&mut self.inbound, max)
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(max_lobby_size: usize) -> HostSettings {
        HostSettings {
            bind_addr: "127.0.0.1:0".to_string(),
            max_lobby_size,
            ..Default::default()
        }
    }

    async fn next_event(transport: &mut impl Transport) -> TransportEvent {
        for _ in 0..300 {
            if let Some(event) = transport.drain(1).pop() {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no transport event within 3s");
    }

    #[tokio::test]
    async fn test_host_and_client_exchange_frames() {
        let mut host = WsHost::bind(&settings(4)).await.unwrap();
        let url = format!("ws://{}", host.local_addr());
        let mut client = WsClient::connect(&url).await.unwrap();

        let TransportEvent::PeerJoined(peer) = next_event(&mut host).await else {
            panic!("expected join");
        };
        assert_eq!(host.connected_peers(), vec![peer]);
        assert_eq!(client.host_peer(), Some(HOST_PEER));

        client.send_unicast(HOST_PEER, b"to host").unwrap();
        assert_eq!(
            next_event(&mut host).await,
            TransportEvent::Message { from: peer, bytes: b"to host".to_vec() }
        );

        assert_eq!(host.send_broadcast(b"to all").unwrap(), 1);
        assert_eq!(
            next_event(&mut client).await,
            TransportEvent::Message { from: HOST_PEER, bytes: b"to all".to_vec() }
        );
    }

    #[tokio::test]
    async fn test_client_sees_host_shutdown() {
        let mut host = WsHost::bind(&settings(4)).await.unwrap();
        let url = format!("ws://{}", host.local_addr());
        let mut client = WsClient::connect(&url).await.unwrap();
        next_event(&mut host).await;

        host.shutdown();
        assert_eq!(next_event(&mut client).await, TransportEvent::HostLost);
        assert!(!client.is_connected());
        assert!(matches!(client.send_unicast(HOST_PEER, b"x"), Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_full_lobby_rejects_connection() {
        let mut host = WsHost::bind(&settings(2)).await.unwrap();
        let url = format!("ws://{}", host.local_addr());
        let _first = WsClient::connect(&url).await.unwrap();
        next_event(&mut host).await;

        assert!(matches!(
            WsClient::connect(&url).await,
            Err(TransportError::Refused(SessionError::SessionFull))
        ));
        assert_eq!(host.connected_peers().len(), 1);
    }

    #[tokio::test]
    async fn test_password_checked_in_handshake() {
        let settings = HostSettings { password: "hunter2".to_string(), ..settings(4) };
        let mut host = WsHost::bind(&settings).await.unwrap();
        let url = format!("ws://{}", host.local_addr());

        assert!(matches!(
            WsClient::connect(&url).await,
            Err(TransportError::Refused(SessionError::WrongPassword))
        ));
        assert!(matches!(
            WsClient::connect_with_password(&url, "hunter3").await,
            Err(TransportError::Refused(SessionError::WrongPassword))
        ));
        assert!(host.connected_peers().is_empty());

        let _client = WsClient::connect_with_password(&url, "hunter2").await.unwrap();
        assert!(matches!(next_event(&mut host).await, TransportEvent::PeerJoined(_)));
        assert_eq!(host.connected_peers().len(), 1);
    }

    #[test]
    fn test_key_is_appended_as_query() {
        assert_eq!(with_key("ws://10.0.0.2:11000", ""), "ws://10.0.0.2:11000");
        assert_eq!(with_key("ws://10.0.0.2:11000", "ab"), "ws://10.0.0.2:11000/?key=ab");
        assert_eq!(with_key("ws://h/lobby?v=1", "ab"), "ws://h/lobby?v=1&key=ab");
    }

    #[tokio::test]
    async fn test_client_only_talks_to_host() {
        let host = WsHost::bind(&settings(4)).await.unwrap();
        let url = format!("ws://{}", host.local_addr());
        let client = WsClient::connect(&url).await.unwrap();

        assert!(matches!(
            client.send_unicast(PeerId(7), b"x"),
            Err(TransportError::UnknownPeer(_))
        ));
        assert!(matches!(client.send_broadcast(b"x"), Err(TransportError::NotHost)));
    }
}
