//! Router
//!
//! Addresses outgoing envelopes under the host-authoritative model and
//! turns incoming transport events into envelopes:
//!
//! - a connected client only ever sends to the host;
//! - only the host sends to all clients;
//! - a client only accepts envelopes that came from the host.
//!
//! The "are we in a session" gate belongs to the callers, which check it
//! before building an envelope. The router still refuses sends that break
//! the role rules, so a misbehaving caller cannot leak traffic.

use thiserror::Error;
use tracing::{debug, error, trace};

use crate::core::ids::PeerId;
use crate::network::protocol::{CodecError, Envelope};
use crate::network::session::{Role, Session, SessionState};
use crate::network::transport::{Transport, TransportError, TransportEvent};

/// Routing errors.
#[derive(Debug, Error)]
pub enum RouteError {
    /// Send not allowed in the current session state.
    #[error("{operation} not allowed while {state}")]
    RoleViolation {
        /// Attempted operation.
        operation: &'static str,
        /// Session state at the time.
        state: SessionState,
    },

    /// Client has no host to send to.
    #[error("no host peer")]
    NoHost,

    /// Envelope could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Transport refused the send.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Decoded inbound traffic.
#[derive(Debug)]
pub enum Inbound {
    /// An envelope from a peer allowed to send it.
    Envelope {
        /// Sender.
        from: PeerId,
        /// Decoded envelope.
        envelope: Envelope,
    },
    /// Bytes that did not decode.
    Undecodable {
        /// Sender.
        from: PeerId,
        /// Why.
        error: CodecError,
    },
    /// An envelope a client received from someone other than the host.
    Unauthorized {
        /// Sender.
        from: PeerId,
    },
    /// Membership change.
    Membership(TransportEvent),
}

/// Role-checked sending and decoding on top of a [`Transport`].
pub struct Router<T> {
    transport: T,
}

impl<T: Transport> Router<T> {
    /// Wrap a transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Send to the host. Only a connected client may.
    pub fn send_to_host(&self, session: &Session, envelope: &Envelope) -> Result<(), RouteError> {
        if !session.is_connected() {
            return Err(violation("send_to_host", session));
        }
        let host = self.transport.host_peer().ok_or(RouteError::NoHost)?;
        let bytes = envelope.encode()?;
        trace_envelope("out", envelope);
        self.transport.send_unicast(host, &bytes)?;
        trace!(%host, kind = ?envelope.kind(), "Sent to host");
        Ok(())
    }

    /// Send to every connected client. Only the host may.
    pub fn send_to_all_clients(
        &self,
        session: &Session,
        envelope: &Envelope,
    ) -> Result<usize, RouteError> {
        if !session.is_host() {
            return Err(violation("send_to_all_clients", session));
        }
        let bytes = envelope.encode()?;
        trace_envelope("out", envelope);
        let reached = self.transport.send_broadcast(&bytes)?;
        trace!(reached, kind = ?envelope.kind(), "Broadcast to clients");
        Ok(reached)
    }

    /// Send along the single route the current role allows.
    pub fn route(&self, session: &Session, envelope: &Envelope) -> Result<(), RouteError> {
        match session.state() {
            SessionState::Hosting => self.send_to_all_clients(session, envelope).map(|_| ()),
            SessionState::Connected => self.send_to_host(session, envelope),
            _ => Err(violation("route", session)),
        }
    }

    /// Take up to `max` transport events and decode the messages among them.
    pub fn receive(&mut self, session: &Session, max: usize) -> Vec<Inbound> {
        let host = self.transport.host_peer();
        self.transport
            .drain(max)
            .into_iter()
            .map(|event| match event {
                TransportEvent::Message { from, bytes } => {
                    if session.role() == Some(Role::Client) && Some(from) != host {
                        return Inbound::Unauthorized { from };
                    }
                    match Envelope::decode(&bytes) {
                        Ok(envelope) => {
                            trace_envelope("in", &envelope);
                            Inbound::Envelope { from, envelope }
                        }
                        Err(error) => {
                            debug!(%from, %error, "Undecodable message");
                            Inbound::Undecodable { from, error }
                        }
                    }
                }
                other => Inbound::Membership(other),
            })
            .collect()
    }
}

fn violation(operation: &'static str, session: &Session) -> RouteError {
    error!(operation, state = %session.state(), "Role violation");
    RouteError::RoleViolation { operation, state: session.state() }
}

#[cfg(feature = "debug-tracing")]
fn trace_envelope(direction: &'static str, envelope: &Envelope) {
    match envelope.to_json() {
        Ok(json) => trace!(direction, %json, "Envelope"),
        Err(error) => trace!(direction, %error, "Envelope not dumpable"),
    }
}

#[cfg(not(feature = "debug-tracing"))]
fn trace_envelope(_direction: &'static str, _envelope: &Envelope) {}
