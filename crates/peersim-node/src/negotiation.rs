//! Capability negotiation bookkeeping.
//!
//! One REQUEST is sent per configured capability, numbered by its position in
//! the list. The connection is ready once every request has been ALLOWED.

use std::collections::{BTreeMap, BTreeSet};

use peersim_protocol::{Capability, NegotiationMessage};

#[derive(Debug, Clone)]
pub struct Negotiation {
    requested: BTreeMap<u64, Capability>,
    pending: BTreeSet<u64>,
    allowed: Vec<(Capability, u64)>,
}

impl Negotiation {
    pub fn new(capabilities: &[Capability]) -> Self {
        let requested: BTreeMap<u64, Capability> = capabilities
            .iter()
            .enumerate()
            .map(|(seq, cap)| (seq as u64, *cap))
            .collect();
        Self {
            pending: requested.keys().copied().collect(),
            requested,
            allowed: Vec::new(),
        }
    }

    /// REQUEST messages to send after the handshake ACK, in sequence order.
    pub fn requests(&self) -> Vec<NegotiationMessage> {
        self.requested
            .iter()
            .map(|(seq, cap)| NegotiationMessage::request(*seq, cap.name(), vec![cap.version()]))
            .collect()
    }

    /// Record an ALLOWED. Returns `None` when `seq` is not awaiting an answer,
    /// otherwise whether negotiation is now complete.
    pub fn on_allowed(&mut self, seq: u64, version: u64) -> Option<bool> {
        if !self.pending.remove(&seq) {
            return None;
        }
        let cap = self.requested[&seq];
        self.allowed.push((cap, version));
        Some(self.is_complete())
    }

    /// Capability refused by the peer, if `seq` was one of ours.
    pub fn on_denied(&mut self, seq: u64) -> Option<Capability> {
        if self.pending.remove(&seq) {
            self.requested.get(&seq).copied()
        } else {
            None
        }
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Capabilities the peer accepted, with the version it chose.
    pub fn allowed(&self) -> &[(Capability, u64)] {
        &self.allowed
    }
}
