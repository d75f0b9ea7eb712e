//! Integration test entry point for peersim-node.
//!
//! Run with: cargo test --test integration

mod harness;
mod handshake;
mod sync;
