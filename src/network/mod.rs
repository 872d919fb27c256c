//! Network Layer
//!
//! Session lifecycle, the envelope wire format, role-checked routing and
//! the transports underneath. Nothing here touches simulation state;
//! everything it receives is handed to `replication/`.

pub mod lobby;
pub mod loopback;
pub mod poll;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;
pub mod transport;

pub use lobby::{
    hash_password, is_valid_password, JoinDecision, LobbyJoin, LobbyMetadata, MIN_PASSWORD_LEN,
};
pub use loopback::{LoopbackHub, LoopbackTransport, SendLog};
pub use poll::{PollOutcome, TimedPoll};
pub use protocol::{
    AssignmentEnvelope, ChoreAssignmentEnvelope, CodecError, ConfigEnvelope, ConfigType,
    Envelope, EnvelopeKind, MAX_ENVELOPE_BYTES, WIRE_VERSION,
};
pub use router::{Inbound, RouteError, Router};
pub use server::{WsClient, WsHost, HOST_PEER};
pub use session::{Role, Session, SessionError, SessionState, Transition};
pub use transport::{Transport, TransportError, TransportEvent};
