//! Peersim Node -- impersonates one remote peer of a blockchain node.
//!
//! Re-exports all internal modules so integration tests and the `peersim`
//! binary can drive sessions, transports and scripted scenarios.

pub mod config;
pub mod negotiation;
pub mod p2p_layer;
pub mod session;
pub mod test_helper;

pub use config::HarnessConfig;
pub use negotiation::Negotiation;
pub use p2p_layer::{P2pError, P2pLayer, P2pOptions, SyncEvent, SyncEventKind, TransportState};
pub use session::{Session, SessionError, SessionOptions, SessionState};
pub use test_helper::TestHelper;
