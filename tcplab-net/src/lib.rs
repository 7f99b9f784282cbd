//! Virtual Network for the tcplab Simulator
//!
//! This crate models the network between the two simulated endpoints: a
//! one-hop [`Link`] with delay, loss, and bandwidth-derived serialization,
//! and the [`Simulator`] harness that binds a client, a server, and the
//! link together on a stepped virtual clock.

pub mod link;
pub mod simulator;

pub use link::{Endpoint, Link, LinkConfig, LinkConfigError, LinkObserver, LinkStatus};
pub use simulator::{Simulator, SimulatorConfig, TraceEvent};
