//! Simulation driver
//!
//! Binds one client [`Connection`], one server [`Connection`], and one
//! [`Link`]; wires the observer callbacks into a shared trace history; and
//! advances all three on a stepped virtual clock. Fast-retransmit requests
//! flow through per-endpoint outboxes rather than a back-pointer into the
//! link, so the connection/link/driver cycle stays acyclic.

use crate::link::{Endpoint, Link, LinkConfig, LinkConfigError, LinkStatus};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use tcplab_protocol::{
    Algorithm, Connection, ConnectionConfig, ConnectionError, ConnectionState, ConnectionStats,
    Metric, Segment, SimTime,
};

/// Simulation parameters.
#[derive(Debug, Clone, Copy)]
pub struct SimulatorConfig {
    pub link: LinkConfig,
    pub algorithm: Algorithm,
    pub client_port: u16,
    pub server_port: u16,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            link: LinkConfig::default(),
            algorithm: Algorithm::Reno,
            client_port: 5000,
            server_port: 8000,
        }
    }
}

/// One recorded observation.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    StateChange {
        endpoint: Endpoint,
        old: ConnectionState,
        new: ConnectionState,
        time: SimTime,
    },
    SegmentSent {
        endpoint: Endpoint,
        segment: Segment,
        time: SimTime,
    },
    SegmentReceived {
        endpoint: Endpoint,
        segment: Segment,
        time: SimTime,
    },
    Transmitted {
        segment: Segment,
        dest: Endpoint,
        status: LinkStatus,
        time: SimTime,
    },
    Metric {
        endpoint: Endpoint,
        metric: Metric,
        value: f64,
        time: SimTime,
    },
}

type History = Arc<RwLock<Vec<TraceEvent>>>;
type Outbox = Arc<RwLock<Vec<Segment>>>;
type Clock = Arc<RwLock<SimTime>>;

/// The client/server/link harness.
pub struct Simulator {
    client: Connection,
    server: Connection,
    link: Link,
    clock: Clock,
    history: History,
    client_retx: Outbox,
    server_retx: Outbox,
}

impl Simulator {
    /// Build a simulator with an entropy-seeded link.
    pub fn new(config: SimulatorConfig) -> Result<Self, LinkConfigError> {
        let link = Link::new(config.link)?;
        Ok(Self::assemble(config, link))
    }

    /// Build a simulator whose link loss draw is seeded, for reproducible
    /// runs.
    pub fn with_seed(config: SimulatorConfig, seed: u64) -> Result<Self, LinkConfigError> {
        let link = Link::with_seed(config.link, seed)?;
        Ok(Self::assemble(config, link))
    }

    fn assemble(config: SimulatorConfig, mut link: Link) -> Self {
        let clock: Clock = Arc::new(RwLock::new(SimTime::ZERO));
        let history: History = Arc::new(RwLock::new(Vec::new()));
        let client_retx: Outbox = Arc::new(RwLock::new(Vec::new()));
        let server_retx: Outbox = Arc::new(RwLock::new(Vec::new()));

        let mut client = Connection::new(ConnectionConfig {
            local_port: config.client_port,
            remote_port: config.server_port,
            is_server: false,
            algorithm: config.algorithm,
        });
        let mut server = Connection::new(ConnectionConfig {
            local_port: config.server_port,
            remote_port: config.client_port,
            is_server: true,
            algorithm: config.algorithm,
        });

        Self::wire(&mut client, Endpoint::Client, &history, &clock, &client_retx);
        Self::wire(&mut server, Endpoint::Server, &history, &clock, &server_retx);

        {
            let history = history.clone();
            let clock = clock.clone();
            link.on_transmitted = Some(Box::new(move |segment, dest, status| {
                history.write().push(TraceEvent::Transmitted {
                    segment: segment.clone(),
                    dest,
                    status,
                    time: *clock.read(),
                });
            }));
        }

        Simulator {
            client,
            server,
            link,
            clock,
            history,
            client_retx,
            server_retx,
        }
    }

    /// Attach the trace-recording callbacks to one endpoint.
    fn wire(
        connection: &mut Connection,
        endpoint: Endpoint,
        history: &History,
        clock: &Clock,
        retx: &Outbox,
    ) {
        {
            let history = history.clone();
            let clock = clock.clone();
            connection.events.on_state_change = Some(Box::new(move |old, new| {
                history.write().push(TraceEvent::StateChange {
                    endpoint,
                    old,
                    new,
                    time: *clock.read(),
                });
            }));
        }
        {
            let history = history.clone();
            let clock = clock.clone();
            connection.events.on_segment_sent = Some(Box::new(move |segment| {
                history.write().push(TraceEvent::SegmentSent {
                    endpoint,
                    segment: segment.clone(),
                    time: *clock.read(),
                });
            }));
        }
        {
            let history = history.clone();
            let clock = clock.clone();
            connection.events.on_segment_received = Some(Box::new(move |segment| {
                history.write().push(TraceEvent::SegmentReceived {
                    endpoint,
                    segment: segment.clone(),
                    time: *clock.read(),
                });
            }));
        }
        {
            let history = history.clone();
            connection.events.on_metric = Some(Box::new(move |metric, value, time| {
                history.write().push(TraceEvent::Metric {
                    endpoint,
                    metric,
                    value,
                    time,
                });
            }));
        }
        {
            let retx = retx.clone();
            connection.events.on_retransmit_needed = Some(Box::new(move |segment| {
                retx.write().push(segment.clone());
            }));
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        *self.clock.read()
    }

    pub fn client(&self) -> &Connection {
        &self.client
    }

    pub fn server(&self) -> &Connection {
        &self.server
    }

    /// Both endpoints in ESTABLISHED.
    pub fn established(&self) -> bool {
        self.client.state() == ConnectionState::Established
            && self.server.state() == ConnectionState::Established
    }

    /// Kick off the three-way handshake from the client.
    pub fn start_connection(&mut self) -> Result<(), ConnectionError> {
        let now = self.now();
        let syn = self.client.connect(now)?;
        self.link.submit(syn, Endpoint::Server, now);
        Ok(())
    }

    /// Send one payload from the chosen endpoint.
    pub fn send_data(&mut self, payload: Bytes, from_client: bool) {
        let now = self.now();
        let (connection, dest) = if from_client {
            (&mut self.client, Endpoint::Server)
        } else {
            (&mut self.server, Endpoint::Client)
        };
        if let Some(segment) = connection.send(payload, now) {
            self.link.submit(segment, dest, now);
        }
    }

    /// Begin teardown from the chosen endpoint.
    pub fn close_connection(&mut self, from_client: bool) {
        let now = self.now();
        let (connection, dest) = if from_client {
            (&mut self.client, Endpoint::Server)
        } else {
            (&mut self.server, Endpoint::Client)
        };
        if let Some(fin) = connection.close(now) {
            self.link.submit(fin, dest, now);
        }
    }

    /// Advance the clock by `step` seconds and run one round: deliver due
    /// segments, then let each endpoint retransmit on timeout, flush its
    /// fast-retransmit outbox, and pace one buffered payload out.
    pub fn update(&mut self, step: f64) {
        let now = {
            let mut clock = self.clock.write();
            *clock = *clock + step;
            *clock
        };

        self.link.tick(now, &mut self.client, &mut self.server);

        for segment in self.client.tick(now) {
            self.link.submit(segment, Endpoint::Server, now);
        }
        for segment in self.client_retx.write().drain(..) {
            self.link.submit(segment, Endpoint::Server, now);
        }
        if let Some(segment) = self.client.drain_paced(now) {
            self.link.submit(segment, Endpoint::Server, now);
        }

        for segment in self.server.tick(now) {
            self.link.submit(segment, Endpoint::Client, now);
        }
        for segment in self.server_retx.write().drain(..) {
            self.link.submit(segment, Endpoint::Client, now);
        }
        if let Some(segment) = self.server.drain_paced(now) {
            self.link.submit(segment, Endpoint::Client, now);
        }
    }

    /// Run `update` repeatedly for `duration` simulated seconds.
    pub fn run_for(&mut self, duration: f64, step: f64) {
        let end = self.now() + duration;
        while self.now() < end {
            self.update(step);
        }
    }

    /// Run until `predicate` holds or `max_secs` have elapsed; returns
    /// whether the predicate was met.
    pub fn run_until<F>(&mut self, mut predicate: F, step: f64, max_secs: f64) -> bool
    where
        F: FnMut(&Simulator) -> bool,
    {
        let deadline = self.now() + max_secs;
        while self.now() < deadline {
            if predicate(self) {
                return true;
            }
            self.update(step);
        }
        predicate(self)
    }

    /// Snapshot of every recorded event.
    pub fn history(&self) -> Vec<TraceEvent> {
        self.history.read().clone()
    }

    /// Sequence numbers and times of segments the link dropped.
    pub fn loss_events(&self) -> Vec<(u32, SimTime)> {
        self.history
            .read()
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Transmitted {
                    segment,
                    status: LinkStatus::Lost,
                    time,
                    ..
                } => Some((segment.seq, *time)),
                _ => None,
            })
            .collect()
    }

    /// Recorded samples of one metric for one endpoint, oldest first.
    pub fn metric_trace(&self, endpoint: Endpoint, metric: Metric) -> Vec<(f64, SimTime)> {
        self.history
            .read()
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Metric {
                    endpoint: e,
                    metric: m,
                    value,
                    time,
                } if *e == endpoint && *m == metric => Some((*value, *time)),
                _ => None,
            })
            .collect()
    }

    pub fn client_stats(&self) -> ConnectionStats {
        self.client.stats()
    }

    pub fn server_stats(&self) -> ConnectionStats {
        self.server.stats()
    }
}
