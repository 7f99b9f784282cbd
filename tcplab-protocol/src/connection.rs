//! TCP connection state machine
//!
//! One [`Connection`] models a single endpoint: handshake (with SYN-cookie
//! validation on the server side), data transfer under a congestion window,
//! duplicate-ACK tracking with fast retransmit, RTO-driven retransmission
//! with exponential backoff, paced draining of the send buffer, and the
//! four-way teardown.
//!
//! The connection mutates only inside its own operations (`connect`, `send`,
//! `close`, `deliver`, `tick`, `drain_paced`); the caller supplies the
//! simulated clock on every call. Replies returned from `deliver` are the
//! segments this endpoint wants on the wire immediately, in order.

use crate::congestion::{
    Algorithm, CongestionControl, CongestionPhase, CongestionVars, LossKind, RecoveryAck,
};
use crate::cookie::{self, CookieSecret};
use crate::rtt::RttEstimator;
use crate::segment::{Flags, Segment};
use crate::time::SimTime;
use bytes::Bytes;
use rand::Rng;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Minimum spacing between paced sends from the send buffer, in seconds.
pub const MIN_PACING_INTERVAL: f64 = 0.05;

/// Ceiling on the backed-off retransmission timeout, in seconds.
pub const MAX_BACKOFF_TIMEOUT: f64 = 60.0;

/// Advertised window for both directions.
pub const DEFAULT_WINDOW: u16 = 65535;

/// RTO for handshake segments, which have no RTT samples to draw on.
const HANDSHAKE_RTO: f64 = 3.0;

/// TCP connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Listen => "LISTEN",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::SynReceived => "SYN_RECEIVED",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::FinWait1 => "FIN_WAIT_1",
            ConnectionState::FinWait2 => "FIN_WAIT_2",
            ConnectionState::CloseWait => "CLOSE_WAIT",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::LastAck => "LAST_ACK",
            ConnectionState::TimeWait => "TIME_WAIT",
        };
        write!(f, "{name}")
    }
}

/// Connection errors raised to the caller. Protocol-level anomalies are
/// never errors; they are dropped silently per the state machine.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("cannot connect from state {0}")]
    IllegalState(ConnectionState),
}

/// Metric names reported through the observer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cwnd,
    Ssthresh,
    RtoEvent,
    FastRetxEvent,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cwnd => "cwnd",
            Metric::Ssthresh => "ssthresh",
            Metric::RtoEvent => "rto_event",
            Metric::FastRetxEvent => "fast_retx_event",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Discriminates the two unacked tables' entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnackedKind {
    /// Data segment awaiting cumulative acknowledgement.
    Data,
    /// Client SYN awaiting the SYN|ACK.
    Syn,
    /// Server SYN|ACK awaiting the cookie-bearing final ACK.
    SynAck { cookie: u32 },
}

/// Bookkeeping for one in-flight segment.
#[derive(Debug, Clone)]
pub struct UnackedEntry {
    /// The segment as originally sent; retransmissions clone it verbatim.
    pub segment: Segment,
    /// Time of the original send. Never advanced by retransmission; RTT
    /// samples are measured from here.
    pub first_send_time: SimTime,
    /// Time of the most recent (re)transmission.
    pub last_send_time: SimTime,
    /// Number of retransmissions so far.
    pub retransmit_count: u32,
    /// RTO snapshot at the original send; backoff doubles from this base.
    pub base_rto: f64,
    /// Which table this entry belongs to.
    pub kind: UnackedKind,
}

impl UnackedEntry {
    fn new(segment: Segment, now: SimTime, base_rto: f64, kind: UnackedKind) -> Self {
        UnackedEntry {
            segment,
            first_send_time: now,
            last_send_time: now,
            retransmit_count: 0,
            base_rto,
            kind,
        }
    }

    /// Cumulative-ACK threshold covering this entry.
    pub fn end_seq(&self) -> u32 {
        self.segment.end_seq()
    }

    /// Backed-off timeout currently in force for this entry.
    fn timeout(&self) -> f64 {
        MAX_BACKOFF_TIMEOUT.min(self.base_rto * 2f64.powi(self.retransmit_count as i32))
    }
}

/// Optional observer callbacks. Every hook may be left unset.
#[derive(Default)]
pub struct ConnectionEvents {
    pub on_state_change: Option<Box<dyn FnMut(ConnectionState, ConnectionState)>>,
    pub on_segment_sent: Option<Box<dyn FnMut(&Segment)>>,
    pub on_segment_received: Option<Box<dyn FnMut(&Segment)>>,
    pub on_metric: Option<Box<dyn FnMut(Metric, f64, SimTime)>>,
    /// Fired when fast retransmit selects a segment; the host wires this
    /// back to the link.
    pub on_retransmit_needed: Option<Box<dyn FnMut(&Segment)>>,
}

/// Per-connection counters.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub retransmissions: u64,
    pub duplicate_acks: u64,
}

/// Connection construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    pub local_port: u16,
    pub remote_port: u16,
    /// Servers start in LISTEN, clients in CLOSED.
    pub is_server: bool,
    pub algorithm: Algorithm,
}

/// One TCP endpoint.
pub struct Connection {
    local_port: u16,
    remote_port: u16,
    is_server: bool,

    state: ConnectionState,
    seq_num: u32,
    ack_num: u32,
    remote_seq: u32,
    remote_ack: u32,
    send_window: u16,
    receive_window: u16,

    congestion: Box<dyn CongestionControl>,
    rtt: RttEstimator,

    data_unacked: Vec<UnackedEntry>,
    handshake_unacked: Vec<UnackedEntry>,
    send_queue: VecDeque<Bytes>,
    receive_buffer: Vec<Bytes>,

    dup_ack_count: u32,
    last_ack_num: u32,
    /// Highest end_seq outstanding when the last fast retransmit fired;
    /// ACKs at or beyond this are "full" for NewReno.
    recover: u32,
    last_paced_send: Option<SimTime>,

    cookie_secret: CookieSecret,

    pub events: ConnectionEvents,
    stats: ConnectionStats,
}

impl Connection {
    /// Create an endpoint in its initial state: LISTEN for servers, CLOSED
    /// for clients.
    pub fn new(config: ConnectionConfig) -> Self {
        let state = if config.is_server {
            ConnectionState::Listen
        } else {
            ConnectionState::Closed
        };
        Connection {
            local_port: config.local_port,
            remote_port: config.remote_port,
            is_server: config.is_server,
            state,
            seq_num: 0,
            ack_num: 0,
            remote_seq: 0,
            remote_ack: 0,
            send_window: DEFAULT_WINDOW,
            receive_window: DEFAULT_WINDOW,
            congestion: config.algorithm.build(),
            rtt: RttEstimator::new(),
            data_unacked: Vec::new(),
            handshake_unacked: Vec::new(),
            send_queue: VecDeque::new(),
            receive_buffer: Vec::new(),
            dup_ack_count: 0,
            last_ack_num: 0,
            recover: 0,
            last_paced_send: None,
            cookie_secret: CookieSecret::random(),
            events: ConnectionEvents::default(),
            stats: ConnectionStats::default(),
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current `(cwnd, ssthresh, phase)`.
    pub fn congestion_vars(&self) -> CongestionVars {
        self.congestion.vars()
    }

    /// Name of the congestion algorithm in use.
    pub fn congestion_name(&self) -> &'static str {
        self.congestion.name()
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats.clone()
    }

    /// Payloads received in order of arrival.
    pub fn received(&self) -> &[Bytes] {
        &self.receive_buffer
    }

    /// Highest sequence number acknowledged by the peer.
    pub fn remote_ack(&self) -> u32 {
        self.remote_ack
    }

    /// Most recent sequence number seen from the peer.
    pub fn remote_seq(&self) -> u32 {
        self.remote_seq
    }

    /// Advertised send window.
    pub fn send_window(&self) -> u16 {
        self.send_window
    }

    /// Window advertised to the peer on every outgoing segment.
    pub fn receive_window(&self) -> u16 {
        self.receive_window
    }

    /// Number of data segments awaiting acknowledgement.
    pub fn unacked_data(&self) -> usize {
        self.data_unacked.len()
    }

    /// Number of handshake segments awaiting acknowledgement.
    pub fn unacked_handshake(&self) -> usize {
        self.handshake_unacked.len()
    }

    /// Payloads waiting in the send buffer for window space.
    pub fn queued(&self) -> usize {
        self.send_queue.len()
    }

    /// A connection is finished once it has returned to CLOSED and both
    /// unacked tables are empty.
    pub fn is_finished(&self) -> bool {
        self.state == ConnectionState::Closed
            && self.data_unacked.is_empty()
            && self.handshake_unacked.is_empty()
    }

    /// Initiate the three-way handshake (client side): pick a fresh ISN,
    /// send SYN, and move to SYN_SENT.
    ///
    /// Permitted from CLOSED, or from SYN_SENT to retry a failed attempt;
    /// any other state fails with [`ConnectionError::IllegalState`].
    pub fn connect(&mut self, now: SimTime) -> Result<Segment, ConnectionError> {
        match self.state {
            ConnectionState::Closed | ConnectionState::SynSent => {}
            state => return Err(ConnectionError::IllegalState(state)),
        }
        if self.state == ConnectionState::SynSent {
            self.set_state(ConnectionState::Closed, now);
        }

        self.seq_num = rand::thread_rng().gen_range(1000..10000);
        let syn = self.create_segment(Flags::SYN, Bytes::new(), now);
        self.set_state(ConnectionState::SynSent, now);
        self.record_sent(&syn);
        self.handshake_unacked = vec![UnackedEntry::new(
            syn.clone(),
            now,
            HANDSHAKE_RTO,
            UnackedKind::Syn,
        )];
        Ok(syn)
    }

    /// Queue or send one payload.
    ///
    /// In ESTABLISHED, the payload goes out immediately as a PSH|ACK segment
    /// if the congestion window has room, else it waits in the send buffer
    /// for [`Connection::drain_paced`] or an ACK-driven drain. Outside
    /// ESTABLISHED the payload is discarded and `None` is returned.
    pub fn send(&mut self, payload: Bytes, now: SimTime) -> Option<Segment> {
        if self.state != ConnectionState::Established {
            return None;
        }
        if self.data_unacked.len() >= self.cwnd_limit() {
            self.send_queue.push_back(payload);
            return None;
        }
        Some(self.send_data_segment(payload, now))
    }

    /// Begin teardown: FIN|ACK from ESTABLISHED (active close) or from
    /// CLOSE_WAIT (passive close). Returns `None` in any other state.
    pub fn close(&mut self, now: SimTime) -> Option<Segment> {
        match self.state {
            ConnectionState::Established => {
                let fin = self.create_segment(Flags::FIN | Flags::ACK, Bytes::new(), now);
                self.set_state(ConnectionState::FinWait1, now);
                self.record_sent(&fin);
                Some(fin)
            }
            ConnectionState::CloseWait => {
                let fin = self.create_segment(Flags::FIN | Flags::ACK, Bytes::new(), now);
                self.set_state(ConnectionState::LastAck, now);
                self.record_sent(&fin);
                Some(fin)
            }
            _ => None,
        }
    }

    /// Process one incoming segment and return the immediate replies.
    ///
    /// Segments for another port, and segments with no transition from the
    /// current state, are dropped silently: the observer still sees them,
    /// the state does not change, and no reply is produced.
    pub fn deliver(&mut self, segment: Segment, now: SimTime) -> Vec<Segment> {
        if segment.dst_port != self.local_port {
            return Vec::new();
        }

        self.stats.packets_received += 1;
        self.stats.bytes_received += segment.wire_size() as u64;
        if let Some(cb) = &mut self.events.on_segment_received {
            cb(&segment);
        }

        if segment.has_flag(Flags::SYN) || !segment.payload.is_empty() {
            self.remote_seq = segment.seq;
        }
        if segment.has_flag(Flags::ACK) {
            self.remote_ack = segment.ack;
        }

        match self.state {
            ConnectionState::Listen => self.deliver_listen(segment, now),
            ConnectionState::SynSent => self.deliver_syn_sent(segment, now),
            ConnectionState::SynReceived => self.deliver_syn_received(segment, now),
            ConnectionState::Established => self.deliver_established(segment, now),
            ConnectionState::FinWait1 => self.deliver_fin_wait_1(segment, now),
            ConnectionState::FinWait2 => self.deliver_fin_wait_2(segment, now),
            ConnectionState::Closing => {
                if segment.has_flag(Flags::ACK) {
                    self.set_state(ConnectionState::TimeWait, now);
                }
                Vec::new()
            }
            ConnectionState::LastAck => {
                if segment.has_flag(Flags::ACK) {
                    self.set_state(ConnectionState::Closed, now);
                }
                Vec::new()
            }
            // CLOSE_WAIT waits on the application; TIME_WAIT and CLOSED
            // accept nothing.
            ConnectionState::CloseWait | ConnectionState::TimeWait | ConnectionState::Closed => {
                Vec::new()
            }
        }
    }

    /// Retransmit every entry whose backed-off timeout has expired.
    ///
    /// Timeout on a data entry is a congestion signal (`on_loss(Timeout)`)
    /// and re-stamps `first_send_time` so the retransmitted copy cannot
    /// produce a misleading RTT sample. Returns the segments to resend.
    pub fn tick(&mut self, now: SimTime) -> Vec<Segment> {
        let mut retransmits = Vec::new();

        for entry in &mut self.handshake_unacked {
            if now - entry.last_send_time > entry.timeout() {
                entry.retransmit_count += 1;
                entry.last_send_time = now;
                retransmits.push(entry.segment.clone());
            }
        }
        let handshake_retx = retransmits.len() as u64;
        self.stats.retransmissions += handshake_retx;

        for i in 0..self.data_unacked.len() {
            let expired = {
                let entry = &self.data_unacked[i];
                now - entry.last_send_time > entry.timeout()
            };
            if !expired {
                continue;
            }
            let segment = {
                let entry = &mut self.data_unacked[i];
                entry.retransmit_count += 1;
                entry.last_send_time = now;
                // Karn: the original send time no longer measures anything.
                entry.first_send_time = now;
                entry.segment.clone()
            };
            self.congestion.on_loss(now, LossKind::Timeout);
            self.stats.retransmissions += 1;
            self.emit_metric(Metric::RtoEvent, segment.seq as f64, now);
            self.emit_window_metrics(now);
            retransmits.push(segment);
        }

        retransmits
    }

    /// Release at most one buffered payload, respecting both the congestion
    /// window and the minimum pacing interval.
    pub fn drain_paced(&mut self, now: SimTime) -> Option<Segment> {
        if self.state != ConnectionState::Established || self.send_queue.is_empty() {
            return None;
        }
        if self.data_unacked.len() >= self.cwnd_limit() {
            return None;
        }
        if let Some(last) = self.last_paced_send {
            if now - last < MIN_PACING_INTERVAL {
                return None;
            }
        }
        let payload = self.send_queue.pop_front()?;
        self.last_paced_send = Some(now);
        Some(self.send_data_segment(payload, now))
    }

    // ---- state handlers ------------------------------------------------

    fn deliver_listen(&mut self, segment: Segment, now: SimTime) -> Vec<Segment> {
        if !segment.has_flag(Flags::SYN) {
            return Vec::new();
        }
        let synack = self.make_syn_ack(&segment, now, 0);
        self.set_state(ConnectionState::SynReceived, now);
        vec![synack]
    }

    fn deliver_syn_sent(&mut self, segment: Segment, now: SimTime) -> Vec<Segment> {
        if segment.has_flag(Flags::SYN) && segment.has_flag(Flags::ACK) {
            self.ack_num = segment.seq.wrapping_add(1);
            let ack = self.create_segment(Flags::ACK, Bytes::new(), now);
            self.record_sent(&ack);
            self.handshake_unacked.clear();
            self.set_state(ConnectionState::Established, now);
            vec![ack]
        } else if segment.has_flag(Flags::SYN) {
            // Simultaneous open.
            self.ack_num = segment.seq.wrapping_add(1);
            let synack = self.create_segment(Flags::SYN | Flags::ACK, Bytes::new(), now);
            self.record_sent(&synack);
            self.set_state(ConnectionState::SynReceived, now);
            vec![synack]
        } else {
            Vec::new()
        }
    }

    fn deliver_syn_received(&mut self, segment: Segment, now: SimTime) -> Vec<Segment> {
        if segment.has_flag(Flags::SYN) {
            // Duplicate SYN: mint a fresh cookie and refresh the pending
            // SYN|ACK, counting it as a retransmission.
            let previous_retx = self
                .handshake_unacked
                .first()
                .map(|e| e.retransmit_count)
                .unwrap_or(0);
            let synack = self.make_syn_ack(&segment, now, previous_retx + 1);
            self.stats.retransmissions += 1;
            return vec![synack];
        }
        if segment.has_flag(Flags::ACK) {
            // The final ACK echoes our cookie ISN: ack-1 must be the cookie
            // minted for (client ISN, port pair) in this or the previous
            // time slot.
            let client_isn = segment.seq.wrapping_sub(1);
            let echoed = segment.ack.wrapping_sub(1);
            let valid = self.cookie_secret.validate(
                echoed,
                client_isn,
                segment.src_port,
                segment.dst_port,
                now,
            );
            if valid {
                self.handshake_unacked.clear();
                self.set_state(ConnectionState::Established, now);
            }
        }
        Vec::new()
    }

    fn deliver_established(&mut self, segment: Segment, now: SimTime) -> Vec<Segment> {
        // A delayed SYN|ACK means our final handshake ACK was lost; repeat
        // it without disturbing the connection.
        if segment.has_flag(Flags::SYN) && segment.has_flag(Flags::ACK) {
            let ack = self.create_segment(Flags::ACK, Bytes::new(), now);
            self.record_sent(&ack);
            return vec![ack];
        }

        let mut replies = Vec::new();
        if segment.has_flag(Flags::ACK) {
            replies.extend(self.handle_ack(segment.ack, now));
        }

        if segment.has_flag(Flags::FIN) {
            self.ack_num = segment.seq.wrapping_add(1);
            let ack = self.create_segment(Flags::ACK, Bytes::new(), now);
            self.record_sent(&ack);
            replies.push(ack);
            self.set_state(ConnectionState::CloseWait, now);
        } else if !segment.payload.is_empty() {
            self.receive_buffer.push(segment.payload.clone());
            self.ack_num = segment.seq.wrapping_add(segment.payload.len() as u32);
            if replies.is_empty() {
                let ack = self.create_segment(Flags::ACK, Bytes::new(), now);
                self.record_sent(&ack);
                replies.push(ack);
            }
        }
        replies
    }

    fn deliver_fin_wait_1(&mut self, segment: Segment, now: SimTime) -> Vec<Segment> {
        if segment.has_flag(Flags::ACK) {
            self.set_state(ConnectionState::FinWait2, now);
            Vec::new()
        } else if segment.has_flag(Flags::FIN) {
            // Simultaneous close.
            self.ack_num = segment.seq.wrapping_add(1);
            let ack = self.create_segment(Flags::ACK, Bytes::new(), now);
            self.record_sent(&ack);
            self.set_state(ConnectionState::Closing, now);
            vec![ack]
        } else {
            Vec::new()
        }
    }

    fn deliver_fin_wait_2(&mut self, segment: Segment, now: SimTime) -> Vec<Segment> {
        if !segment.has_flag(Flags::FIN) {
            return Vec::new();
        }
        self.ack_num = segment.seq.wrapping_add(1);
        let ack = self.create_segment(Flags::ACK, Bytes::new(), now);
        self.record_sent(&ack);
        self.set_state(ConnectionState::TimeWait, now);
        vec![ack]
    }

    // ---- ACK processing ------------------------------------------------

    /// Process an acknowledgement number in ESTABLISHED.
    ///
    /// Duplicate ACKs (same ack as before, with data outstanding) feed the
    /// fast-retransmit counter; the third in a row retransmits the oldest
    /// unacked segment through the retransmit observer and goes no further.
    /// A new cumulative ACK clears covered entries, samples RTT from
    /// first-transmission entries, advances the congestion window, and
    /// finally drains the send buffer into the freed window.
    fn handle_ack(&mut self, ack_num: u32, now: SimTime) -> Vec<Segment> {
        let is_duplicate =
            ack_num == self.last_ack_num && self.last_ack_num > 0 && !self.data_unacked.is_empty();

        if is_duplicate {
            self.dup_ack_count += 1;
            self.stats.duplicate_acks += 1;

            if self.dup_ack_count == 3 {
                self.fast_retransmit(now);
                return Vec::new();
            }
        } else if ack_num > self.last_ack_num {
            self.dup_ack_count = 0;
            self.last_ack_num = ack_num;
        } else if self.last_ack_num == 0 {
            self.last_ack_num = ack_num;
        }

        let old_count = self.data_unacked.len();
        let mut samples = Vec::new();
        self.data_unacked.retain(|entry| {
            if entry.end_seq() <= ack_num {
                // Karn: retransmitted segments yield no sample.
                if entry.retransmit_count == 0 {
                    samples.push(now - entry.first_send_time);
                }
                false
            } else {
                true
            }
        });
        for sample in &samples {
            self.rtt.update(*sample);
        }
        let rtt_sample = samples.last().copied();

        if self.data_unacked.len() < old_count {
            if self.congestion.vars().phase == CongestionPhase::FastRecovery {
                let ack = if ack_num >= self.recover {
                    RecoveryAck::Full
                } else {
                    RecoveryAck::Partial
                };
                self.congestion.on_recovery_ack(now, ack, rtt_sample);
            } else {
                self.congestion.on_ack(now, rtt_sample);
            }
        }
        self.emit_window_metrics(now);

        let mut sent = Vec::new();
        while self.data_unacked.len() < self.cwnd_limit() {
            let Some(payload) = self.send_queue.pop_front() else {
                break;
            };
            sent.push(self.send_data_segment(payload, now));
        }
        sent
    }

    /// Third duplicate ACK: resend the oldest outstanding segment and drop
    /// the window per the algorithm's fast-retransmit rule.
    fn fast_retransmit(&mut self, now: SimTime) {
        let oldest = self
            .data_unacked
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| entry.segment.seq)
            .map(|(i, _)| i);
        let Some(index) = oldest else {
            return;
        };

        self.recover = self
            .data_unacked
            .iter()
            .map(|entry| entry.end_seq())
            .max()
            .unwrap_or(self.seq_num);

        let segment = {
            let entry = &mut self.data_unacked[index];
            entry.retransmit_count += 1;
            entry.last_send_time = now;
            entry.segment.clone()
        };
        self.dup_ack_count = 0;
        self.stats.retransmissions += 1;

        self.congestion.on_loss(now, LossKind::FastRetransmit);
        self.emit_window_metrics(now);
        self.emit_metric(Metric::FastRetxEvent, segment.seq as f64, now);

        if let Some(cb) = &mut self.events.on_retransmit_needed {
            cb(&segment);
        }
    }

    // ---- internals -----------------------------------------------------

    fn cwnd_limit(&self) -> usize {
        self.congestion.vars().cwnd.floor() as usize
    }

    /// Build a segment from the current sequence state and consume the
    /// sequence space it occupies (one for SYN/FIN, payload length for
    /// data).
    fn create_segment(&mut self, flags: Flags, payload: Bytes, now: SimTime) -> Segment {
        let segment = Segment::new(
            self.local_port,
            self.remote_port,
            self.seq_num,
            self.ack_num,
            flags,
            self.receive_window,
            payload,
            now,
        );
        self.seq_num = self.seq_num.wrapping_add(segment.seq_consumed());
        segment
    }

    /// Send one data segment right now and track it in the unacked table.
    fn send_data_segment(&mut self, payload: Bytes, now: SimTime) -> Segment {
        let segment = self.create_segment(Flags::PSH | Flags::ACK, payload, now);
        self.data_unacked.push(UnackedEntry::new(
            segment.clone(),
            now,
            self.rtt.rto(),
            UnackedKind::Data,
        ));
        self.emit_window_metrics(now);
        self.record_sent(&segment);
        segment
    }

    /// Answer a SYN with a cookie-ISN SYN|ACK and (re)arm the handshake
    /// table.
    fn make_syn_ack(&mut self, syn: &Segment, now: SimTime, retransmit_count: u32) -> Segment {
        let slot = cookie::time_slot(now);
        let cookie = self
            .cookie_secret
            .generate(syn.seq, syn.src_port, syn.dst_port, slot);
        self.seq_num = cookie;
        self.ack_num = syn.seq.wrapping_add(1);

        let synack = self.create_segment(Flags::SYN | Flags::ACK, Bytes::new(), now);
        self.record_sent(&synack);

        let mut entry = UnackedEntry::new(
            synack.clone(),
            now,
            HANDSHAKE_RTO,
            UnackedKind::SynAck { cookie },
        );
        entry.retransmit_count = retransmit_count;
        self.handshake_unacked = vec![entry];
        synack
    }

    fn set_state(&mut self, new_state: ConnectionState, now: SimTime) {
        if self.state == new_state {
            return;
        }
        let old_state = self.state;
        self.state = new_state;
        if let Some(cb) = &mut self.events.on_state_change {
            cb(old_state, new_state);
        }
        if new_state == ConnectionState::Established {
            self.emit_window_metrics(now);
        }
    }

    fn record_sent(&mut self, segment: &Segment) {
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += segment.wire_size() as u64;
        if let Some(cb) = &mut self.events.on_segment_sent {
            cb(segment);
        }
    }

    fn emit_metric(&mut self, metric: Metric, value: f64, now: SimTime) {
        if let Some(cb) = &mut self.events.on_metric {
            cb(metric, value, now);
        }
    }

    fn emit_window_metrics(&mut self, now: SimTime) {
        let vars = self.congestion.vars();
        self.emit_metric(Metric::Cwnd, vars.cwnd, now);
        self.emit_metric(Metric::Ssthresh, vars.ssthresh, now);
    }
}
