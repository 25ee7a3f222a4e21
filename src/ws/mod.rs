//! WebSocket layer: upgrade, handshake and the per-connection session.
//!
//! The endpoint at `/ws` carries authenticated, bidirectional traffic:
//! inbound events answered with acknowledgements and outbound events
//! pushed from the connection's queue.

pub mod connection;
pub mod handler;
pub mod messages;
