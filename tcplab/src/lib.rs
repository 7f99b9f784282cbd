//! tcplab - Educational TCP Simulator
//!
//! High-level API over the protocol core and the virtual network: two
//! endpoints run a real TCP state machine (handshake with SYN cookies,
//! congestion control, RTO and fast retransmit, four-way teardown) across
//! an in-memory link with configurable delay, loss, and bandwidth.

pub use tcplab_net as net;
pub use tcplab_protocol as protocol;

// Re-export commonly used types
pub use net::{Endpoint, Link, LinkConfig, LinkStatus, Simulator, SimulatorConfig, TraceEvent};
pub use protocol::{
    Algorithm, Connection, ConnectionConfig, ConnectionState, Flags, Segment, SimTime,
};
