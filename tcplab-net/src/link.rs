//! Virtual one-hop link
//!
//! Models the network between the two endpoints: a fixed propagation
//! delay, a bandwidth-derived serialization delay per segment, and
//! independent per-segment loss. Submitted segments sit in an in-flight
//! queue ordered by scheduled arrival; `tick` delivers everything due and
//! feeds any replies straight back onto the link in the opposite
//! direction.
//!
//! Loss is the only failure mode. The link never reorders beyond what
//! differing serialization times cause, and never corrupts.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tcplab_protocol::{Connection, Segment, SimTime};
use thiserror::Error;

/// Which endpoint a segment is headed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Client,
    Server,
}

impl Endpoint {
    /// The other endpoint.
    pub fn peer(self) -> Endpoint {
        match self {
            Endpoint::Client => Endpoint::Server,
            Endpoint::Server => Endpoint::Client,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Client => write!(f, "CLIENT"),
            Endpoint::Server => write!(f, "SERVER"),
        }
    }
}

/// Transmission lifecycle reported to the link observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Accepted onto the link; scheduled for delivery.
    Transmitting,
    /// Delivered to the destination endpoint.
    Arrived,
    /// Dropped by the loss model; will never arrive.
    Lost,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkStatus::Transmitting => write!(f, "TRANSMITTING"),
            LinkStatus::Arrived => write!(f, "ARRIVED"),
            LinkStatus::Lost => write!(f, "LOST"),
        }
    }
}

/// Link parameters.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    /// One-way propagation delay in seconds, within `[0, 5]`.
    pub delay_s: f64,
    /// Per-segment drop probability, within `[0, 1]`.
    pub loss_rate: f64,
    /// Bandwidth in kilobytes per second; must be positive.
    pub bandwidth_kb_per_s: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            delay_s: 0.1,
            loss_rate: 0.0,
            bandwidth_kb_per_s: 1000.0,
        }
    }
}

impl LinkConfig {
    /// Check the documented parameter ranges.
    pub fn validate(&self) -> Result<(), LinkConfigError> {
        if !(0.0..=5.0).contains(&self.delay_s) {
            return Err(LinkConfigError::Delay(self.delay_s));
        }
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(LinkConfigError::LossRate(self.loss_rate));
        }
        if self.bandwidth_kb_per_s <= 0.0 {
            return Err(LinkConfigError::Bandwidth(self.bandwidth_kb_per_s));
        }
        Ok(())
    }
}

/// Link configuration errors.
#[derive(Error, Debug)]
pub enum LinkConfigError {
    #[error("delay {0} outside [0, 5] seconds")]
    Delay(f64),

    #[error("loss rate {0} outside [0, 1]")]
    LossRate(f64),

    #[error("bandwidth must be positive, got {0}")]
    Bandwidth(f64),
}

/// Observer for segment transmission events.
pub type LinkObserver = Box<dyn FnMut(&Segment, Endpoint, LinkStatus)>;

/// A segment in flight.
#[derive(Debug, Clone)]
struct InFlight {
    segment: Segment,
    dest: Endpoint,
    arrival: SimTime,
}

/// The one-hop virtual network between client and server.
pub struct Link {
    config: LinkConfig,
    /// In-flight segments, kept in non-decreasing arrival order; ties keep
    /// submission order.
    queue: Vec<InFlight>,
    rng: StdRng,
    pub on_transmitted: Option<LinkObserver>,
}

impl Link {
    /// Create a link with an entropy-seeded loss draw.
    pub fn new(config: LinkConfig) -> Result<Self, LinkConfigError> {
        config.validate()?;
        Ok(Link {
            config,
            queue: Vec::new(),
            rng: StdRng::from_entropy(),
            on_transmitted: None,
        })
    }

    /// Create a link with a fixed seed, for reproducible loss patterns.
    pub fn with_seed(config: LinkConfig, seed: u64) -> Result<Self, LinkConfigError> {
        config.validate()?;
        Ok(Link {
            config,
            queue: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            on_transmitted: None,
        })
    }

    pub fn config(&self) -> LinkConfig {
        self.config
    }

    /// Segments currently in flight.
    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    /// Put a segment on the wire toward `dest`.
    ///
    /// The loss draw happens here: a dropped segment is reported as `Lost`
    /// and never enters the queue. Otherwise arrival is scheduled at
    /// `now + delay + wire_size/bandwidth` and the segment is reported as
    /// `Transmitting`.
    pub fn submit(&mut self, segment: Segment, dest: Endpoint, now: SimTime) {
        if self.rng.gen::<f64>() < self.config.loss_rate {
            self.observe(&segment, dest, LinkStatus::Lost);
            return;
        }

        let size_kb = segment.wire_size() as f64 / 1024.0;
        let serialize = size_kb / self.config.bandwidth_kb_per_s;
        let arrival = now + self.config.delay_s + serialize;

        // Insert after every entry due at or before this one, preserving
        // submission order among ties.
        let index = self.queue.partition_point(|e| e.arrival <= arrival);
        self.queue.insert(
            index,
            InFlight {
                segment: segment.clone(),
                dest,
                arrival,
            },
        );
        self.observe(&segment, dest, LinkStatus::Transmitting);
    }

    /// Deliver every segment whose arrival time has passed, in arrival
    /// order, and resubmit any replies the endpoints produce.
    ///
    /// Replies are submitted at `now`; with a nonzero delay they arrive in
    /// a later tick, mirroring the snapshot semantics of the queue.
    pub fn tick(&mut self, now: SimTime, client: &mut Connection, server: &mut Connection) {
        let due = self.queue.partition_point(|e| e.arrival <= now);
        let ready: Vec<InFlight> = self.queue.drain(..due).collect();

        for item in ready {
            self.observe(&item.segment, item.dest, LinkStatus::Arrived);
            let endpoint = match item.dest {
                Endpoint::Client => &mut *client,
                Endpoint::Server => &mut *server,
            };
            let replies = endpoint.deliver(item.segment, now);
            for reply in replies {
                self.submit(reply, item.dest.peer(), now);
            }
        }
    }

    fn observe(&mut self, segment: &Segment, dest: Endpoint, status: LinkStatus) {
        if let Some(cb) = &mut self.on_transmitted {
            cb(segment, dest, status);
        }
    }
}
