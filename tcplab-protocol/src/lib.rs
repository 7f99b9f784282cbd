//! TCP Protocol Core for the tcplab Simulator
//!
//! This crate implements the protocol side of the educational TCP
//! simulator: the segment value type, the pluggable congestion-control
//! algorithms (Reno, NewReno, Cubic, BBR-lite), the RFC 6298 RTT/RTO
//! estimator, SYN cookies, and the per-endpoint connection state machine.
//!
//! Everything here is single-threaded and clock-explicit: the driver
//! supplies the simulated time on every call and nothing blocks.

pub mod congestion;
pub mod connection;
pub mod cookie;
pub mod rtt;
pub mod segment;
pub mod time;

pub use congestion::{
    Algorithm, BbrLite, BbrPhase, CongestionControl, CongestionPhase, CongestionVars, Cubic,
    LossKind, NewReno, RecoveryAck, Reno, UnknownAlgorithmError,
};
pub use connection::{
    Connection, ConnectionConfig, ConnectionError, ConnectionEvents, ConnectionState,
    ConnectionStats, Metric, UnackedEntry, UnackedKind,
};
pub use cookie::{CookieSecret, SLOT_SECS};
pub use rtt::RttEstimator;
pub use segment::{Flags, Segment, HEADER_SIZE};
pub use time::SimTime;
