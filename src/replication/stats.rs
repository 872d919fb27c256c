//! Replication counters.

use serde::{Serialize, Deserialize};

/// Running totals for one peer. Drops are split by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationStats {
    /// Local changes turned into envelopes.
    pub captured: u64,
    /// Envelopes handed to the transport (a broadcast counts once).
    pub sent: u64,
    /// Messages taken from the transport.
    pub received: u64,
    /// Envelopes applied to the simulation.
    pub applied: u64,
    /// Client envelopes re-broadcast by the host.
    pub relayed: u64,
    /// Changes observed while replaying, not sent.
    pub echo_suppressed: u64,
    /// Changes or messages outside an active session.
    pub dropped_inactive: u64,
    /// Changes on objects this peer cannot name.
    pub dropped_unidentified: u64,
    /// Envelopes whose target is unknown, destroyed or moved.
    pub dropped_stale: u64,
    /// Envelopes for a field without a handler.
    pub dropped_unknown_field: u64,
    /// Envelopes whose payload or value was refused.
    pub dropped_rejected: u64,
    /// Bytes that did not decode.
    pub dropped_undecodable: u64,
    /// Envelopes from a peer with no authority to send them.
    pub dropped_unauthorized: u64,
    /// Sends the transport failed.
    pub send_failures: u64,
}

impl ReplicationStats {
    /// Sum of every drop counter.
    pub fn dropped(&self) -> u64 {
        self.dropped_inactive
            + self.dropped_unidentified
            + self.dropped_stale
            + self.dropped_unknown_field
            + self.dropped_rejected
            + self.dropped_undecodable
            + self.dropped_unauthorized
    }
}
