//! Congestion-control algorithms
//!
//! Pluggable strategies sharing one contract: each ACK, loss, or recovery
//! exit mutates the `(cwnd, ssthresh, phase)` triple and returns the
//! updated values. The connection owns one boxed strategy, selected at
//! construction time through [`Algorithm`].
//!
//! Window units are MSS; `cwnd` is real-valued so congestion avoidance can
//! grow by fractional amounts per ACK.

use crate::time::SimTime;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Congestion window at connection start, in MSS.
pub const INITIAL_CWND: f64 = 1.0;

/// Initial slow-start threshold, in MSS. Deliberately low so a short
/// simulation run reaches congestion avoidance.
pub const INITIAL_SSTHRESH: f64 = 16.0;

/// Congestion-control phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionPhase {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

impl fmt::Display for CongestionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CongestionPhase::SlowStart => "slow_start",
            CongestionPhase::CongestionAvoidance => "congestion_avoidance",
            CongestionPhase::FastRecovery => "fast_recovery",
        };
        write!(f, "{name}")
    }
}

/// How a loss was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    /// Retransmission timer expired.
    Timeout,
    /// Three duplicate ACKs triggered a fast retransmit.
    FastRetransmit,
}

/// Classification of a new cumulative ACK arriving during fast recovery,
/// judged against the recovery high-water sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAck {
    /// Acknowledges some, but not all, data outstanding when recovery began.
    Partial,
    /// Acknowledges everything outstanding when recovery began.
    Full,
}

/// The `(cwnd, ssthresh, phase)` triple every strategy maintains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CongestionVars {
    /// Congestion window in MSS; never below 1.
    pub cwnd: f64,
    /// Slow-start threshold in MSS; never below 2.
    pub ssthresh: f64,
    /// Current phase.
    pub phase: CongestionPhase,
}

impl CongestionVars {
    fn initial() -> Self {
        CongestionVars {
            cwnd: INITIAL_CWND,
            ssthresh: INITIAL_SSTHRESH,
            phase: CongestionPhase::SlowStart,
        }
    }
}

/// Contract shared by all congestion-control strategies.
pub trait CongestionControl {
    /// Algorithm name as accepted by [`Algorithm::from_str`].
    fn name(&self) -> &'static str;

    /// Current `(cwnd, ssthresh, phase)`.
    fn vars(&self) -> CongestionVars;

    /// A new cumulative ACK arrived outside fast recovery. `rtt_sample` is
    /// the RTT measured from the newest segment the ACK covered, when one
    /// was taken.
    fn on_ack(&mut self, now: SimTime, rtt_sample: Option<f64>) -> CongestionVars;

    /// Loss detected.
    fn on_loss(&mut self, now: SimTime, kind: LossKind) -> CongestionVars;

    /// Leave fast recovery.
    fn on_fast_recovery_exit(&mut self, now: SimTime) -> CongestionVars;

    /// A new cumulative ACK arrived while in fast recovery, classified
    /// against the recovery high-water mark.
    ///
    /// The default treats any new ACK as ending recovery, which is the
    /// classic Reno behavior; NewReno overrides this to stay in recovery
    /// on partial ACKs.
    fn on_recovery_ack(
        &mut self,
        now: SimTime,
        _ack: RecoveryAck,
        _rtt_sample: Option<f64>,
    ) -> CongestionVars {
        self.on_fast_recovery_exit(now)
    }
}

/// Reno baseline shared by [`Reno`] and [`NewReno`]: slow-start and
/// congestion-avoidance growth, and the monotone-lowering ssthresh rule.
#[derive(Debug, Clone)]
struct RenoCore {
    vars: CongestionVars,
    /// Once ssthresh has been lowered it may only move further down.
    ssthresh_lowered: bool,
}

impl RenoCore {
    fn new() -> Self {
        RenoCore {
            vars: CongestionVars::initial(),
            ssthresh_lowered: false,
        }
    }

    fn grow_on_ack(&mut self) {
        match self.vars.phase {
            CongestionPhase::SlowStart => {
                self.vars.cwnd += 1.0;
                if self.vars.cwnd >= self.vars.ssthresh {
                    self.vars.phase = CongestionPhase::CongestionAvoidance;
                }
            }
            CongestionPhase::CongestionAvoidance => {
                self.vars.cwnd += 1.0 / self.vars.cwnd;
            }
            // A new ACK in fast recovery is handled by the recovery hooks.
            CongestionPhase::FastRecovery => {}
        }
    }

    fn lower_ssthresh(&mut self, candidate: f64) {
        if self.ssthresh_lowered {
            self.vars.ssthresh = self.vars.ssthresh.min(candidate);
        } else {
            self.vars.ssthresh = candidate;
            self.ssthresh_lowered = true;
        }
    }

    fn apply_loss(&mut self, kind: LossKind) {
        let candidate = (self.vars.cwnd / 2.0).max(2.0);
        self.lower_ssthresh(candidate);
        match kind {
            LossKind::Timeout => {
                self.vars.cwnd = 1.0;
                self.vars.phase = CongestionPhase::SlowStart;
            }
            LossKind::FastRetransmit => {
                self.vars.cwnd = self.vars.ssthresh + 3.0;
                self.vars.phase = CongestionPhase::FastRecovery;
            }
        }
    }

    fn exit_recovery(&mut self) {
        self.vars.cwnd = self.vars.ssthresh;
        self.vars.phase = CongestionPhase::CongestionAvoidance;
    }
}

/// Classic TCP Reno.
#[derive(Debug, Clone)]
pub struct Reno {
    core: RenoCore,
}

impl Reno {
    pub fn new() -> Self {
        Reno {
            core: RenoCore::new(),
        }
    }
}

impl Default for Reno {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionControl for Reno {
    fn name(&self) -> &'static str {
        "Reno"
    }

    fn vars(&self) -> CongestionVars {
        self.core.vars
    }

    fn on_ack(&mut self, _now: SimTime, _rtt_sample: Option<f64>) -> CongestionVars {
        self.core.grow_on_ack();
        self.core.vars
    }

    fn on_loss(&mut self, _now: SimTime, kind: LossKind) -> CongestionVars {
        self.core.apply_loss(kind);
        self.core.vars
    }

    fn on_fast_recovery_exit(&mut self, _now: SimTime) -> CongestionVars {
        self.core.exit_recovery();
        self.core.vars
    }
}

/// TCP NewReno: Reno with refined fast recovery.
///
/// A partial ACK keeps the connection in recovery and inflates the window
/// by one MSS; only a full ACK (covering everything outstanding when
/// recovery began) deflates to ssthresh and leaves recovery.
#[derive(Debug, Clone)]
pub struct NewReno {
    core: RenoCore,
}

impl NewReno {
    pub fn new() -> Self {
        NewReno {
            core: RenoCore::new(),
        }
    }
}

impl Default for NewReno {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionControl for NewReno {
    fn name(&self) -> &'static str {
        "NewReno"
    }

    fn vars(&self) -> CongestionVars {
        self.core.vars
    }

    fn on_ack(&mut self, _now: SimTime, _rtt_sample: Option<f64>) -> CongestionVars {
        self.core.grow_on_ack();
        self.core.vars
    }

    fn on_loss(&mut self, _now: SimTime, kind: LossKind) -> CongestionVars {
        self.core.apply_loss(kind);
        self.core.vars
    }

    fn on_fast_recovery_exit(&mut self, _now: SimTime) -> CongestionVars {
        self.core.exit_recovery();
        self.core.vars
    }

    fn on_recovery_ack(
        &mut self,
        now: SimTime,
        ack: RecoveryAck,
        _rtt_sample: Option<f64>,
    ) -> CongestionVars {
        match ack {
            RecoveryAck::Partial => {
                self.core.vars.cwnd += 1.0;
                self.core.vars
            }
            RecoveryAck::Full => self.on_fast_recovery_exit(now),
        }
    }
}

/// TCP Cubic: window growth follows a cubic curve anchored at the window
/// size where the last loss occurred.
#[derive(Debug, Clone)]
pub struct Cubic {
    vars: CongestionVars,
    /// Cubic scaling constant.
    c: f64,
    /// Multiplicative-decrease factor.
    beta: f64,
    /// Window size at the last loss event.
    w_max: f64,
    /// Time offset at which the cubic curve crosses `w_max`.
    k: f64,
    /// Start of the current congestion-avoidance epoch.
    epoch_start: Option<SimTime>,
}

impl Cubic {
    pub fn new() -> Self {
        Cubic {
            vars: CongestionVars::initial(),
            c: 0.4,
            beta: 0.7,
            w_max: 0.0,
            k: 0.0,
            epoch_start: None,
        }
    }

    /// Target window `W(t) = c*(t-k)^3 + w_max`.
    fn cubic_window(&self, t: f64) -> f64 {
        if self.w_max <= 0.0 {
            return self.vars.ssthresh;
        }
        self.c * (t - self.k).powi(3) + self.w_max
    }

    fn update_k(&mut self) {
        self.k = if self.w_max <= 0.0 {
            0.0
        } else {
            ((self.w_max * (1.0 - self.beta)) / self.c).cbrt()
        };
    }

    fn start_epoch(&mut self, now: SimTime) {
        self.epoch_start = Some(now);
        self.update_k();
    }
}

impl Default for Cubic {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionControl for Cubic {
    fn name(&self) -> &'static str {
        "Cubic"
    }

    fn vars(&self) -> CongestionVars {
        self.vars
    }

    fn on_ack(&mut self, now: SimTime, _rtt_sample: Option<f64>) -> CongestionVars {
        match self.vars.phase {
            CongestionPhase::SlowStart => {
                self.vars.cwnd += 1.0;
                if self.vars.cwnd >= self.vars.ssthresh {
                    self.vars.phase = CongestionPhase::CongestionAvoidance;
                    self.w_max = self.vars.cwnd;
                    self.start_epoch(now);
                }
            }
            CongestionPhase::CongestionAvoidance => {
                let t = now - self.epoch_start.unwrap_or(now);
                let target = self.cubic_window(t);
                if self.vars.cwnd < target {
                    let step = (target - self.vars.cwnd) / self.vars.cwnd;
                    self.vars.cwnd = target.min(self.vars.cwnd + step);
                } else {
                    self.vars.cwnd += 0.1 / self.vars.cwnd;
                }
            }
            CongestionPhase::FastRecovery => {}
        }
        self.vars
    }

    fn on_loss(&mut self, now: SimTime, kind: LossKind) -> CongestionVars {
        self.w_max = self.vars.cwnd;
        self.vars.ssthresh = (self.vars.cwnd * self.beta).max(2.0);
        match kind {
            LossKind::Timeout => {
                self.vars.cwnd = 1.0;
                self.vars.phase = CongestionPhase::SlowStart;
            }
            LossKind::FastRetransmit => {
                self.vars.cwnd = (self.vars.cwnd * self.beta).max(1.0);
                self.vars.phase = CongestionPhase::FastRecovery;
                self.start_epoch(now);
            }
        }
        self.vars
    }

    fn on_fast_recovery_exit(&mut self, now: SimTime) -> CongestionVars {
        self.vars.phase = CongestionPhase::CongestionAvoidance;
        self.start_epoch(now);
        self.vars
    }
}

/// BBR-lite pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BbrPhase {
    Startup,
    Drain,
    ProbeBw,
    ProbeRtt,
}

/// Simplified BBR: four cwnd-driven phases and a monotone minimum-RTT
/// tracker. Loss is treated as a mild signal rather than a collapse.
#[derive(Debug, Clone)]
pub struct BbrLite {
    vars: CongestionVars,
    phase: BbrPhase,
    /// Monotone minimum of observed RTT samples, in seconds.
    rtt_min: Option<f64>,
    /// Crude delivery-rate estimate: cwnd over minimum RTT, in MSS/s.
    bw_estimate: f64,
}

impl BbrLite {
    pub fn new() -> Self {
        BbrLite {
            vars: CongestionVars::initial(),
            phase: BbrPhase::Startup,
            rtt_min: None,
            bw_estimate: 0.0,
        }
    }

    /// Current BBR pipeline phase.
    pub fn bbr_phase(&self) -> BbrPhase {
        self.phase
    }

    /// Minimum RTT observed so far, in seconds.
    pub fn rtt_min(&self) -> Option<f64> {
        self.rtt_min
    }

    /// Estimated delivery rate in MSS per second.
    pub fn bandwidth_estimate(&self) -> f64 {
        self.bw_estimate
    }

    /// External policy hook: drop into PROBE_RTT, shrinking the window
    /// toward 4 MSS before returning to PROBE_BW. Nothing in the simulator
    /// enters this phase on its own; the driver may.
    pub fn enter_probe_rtt(&mut self) {
        self.phase = BbrPhase::ProbeRtt;
    }

    fn observe_rtt(&mut self, rtt_sample: Option<f64>) {
        if let Some(rtt) = rtt_sample {
            if self.rtt_min.map_or(true, |min| rtt < min) {
                self.rtt_min = Some(rtt);
            }
        }
        if let Some(min) = self.rtt_min {
            if min > 0.0 {
                self.bw_estimate = self.vars.cwnd / min;
            }
        }
    }
}

impl Default for BbrLite {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionControl for BbrLite {
    fn name(&self) -> &'static str {
        "BBR"
    }

    fn vars(&self) -> CongestionVars {
        self.vars
    }

    fn on_ack(&mut self, _now: SimTime, rtt_sample: Option<f64>) -> CongestionVars {
        self.observe_rtt(rtt_sample);
        match self.phase {
            BbrPhase::Startup => {
                self.vars.cwnd += 1.0;
                if self.vars.cwnd >= self.vars.ssthresh {
                    self.phase = BbrPhase::Drain;
                    self.vars.phase = CongestionPhase::CongestionAvoidance;
                }
            }
            BbrPhase::Drain => {
                if self.vars.cwnd > self.vars.ssthresh {
                    self.vars.cwnd = self.vars.ssthresh.max(self.vars.cwnd - 0.5);
                } else {
                    self.phase = BbrPhase::ProbeBw;
                }
            }
            BbrPhase::ProbeBw => {
                self.vars.cwnd += 0.1 / self.vars.cwnd;
                self.vars.phase = CongestionPhase::CongestionAvoidance;
            }
            BbrPhase::ProbeRtt => {
                if self.vars.cwnd > 4.0 {
                    self.vars.cwnd = (self.vars.cwnd - 0.5).max(4.0);
                } else {
                    self.phase = BbrPhase::ProbeBw;
                }
            }
        }
        self.vars
    }

    fn on_loss(&mut self, _now: SimTime, kind: LossKind) -> CongestionVars {
        match kind {
            LossKind::Timeout => {
                self.vars.ssthresh = (self.vars.cwnd / 2.0).max(2.0);
                self.vars.cwnd = (self.vars.cwnd * 0.5).max(4.0);
            }
            LossKind::FastRetransmit => {
                self.vars.ssthresh = (self.vars.cwnd * 0.875).max(2.0);
                self.vars.cwnd = (self.vars.cwnd * 0.875).max(1.0);
            }
        }
        self.vars
    }

    fn on_fast_recovery_exit(&mut self, _now: SimTime) -> CongestionVars {
        self.vars.phase = CongestionPhase::CongestionAvoidance;
        self.vars
    }
}

/// Selectable congestion-control algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Reno,
    NewReno,
    Cubic,
    Bbr,
}

/// Canonical algorithm names, as accepted by [`Algorithm::from_str`].
pub const ALGORITHM_NAMES: [&str; 4] = ["Reno", "NewReno", "Cubic", "BBR"];

impl Algorithm {
    /// Instantiate the strategy.
    pub fn build(self) -> Box<dyn CongestionControl> {
        match self {
            Algorithm::Reno => Box::new(Reno::new()),
            Algorithm::NewReno => Box::new(NewReno::new()),
            Algorithm::Cubic => Box::new(Cubic::new()),
            Algorithm::Bbr => Box::new(BbrLite::new()),
        }
    }

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Reno => "Reno",
            Algorithm::NewReno => "NewReno",
            Algorithm::Cubic => "Cubic",
            Algorithm::Bbr => "BBR",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Requested algorithm name is not one of [`ALGORITHM_NAMES`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported congestion algorithm: {name} (valid: Reno, NewReno, Cubic, BBR)")]
pub struct UnknownAlgorithmError {
    pub name: String,
}

impl FromStr for Algorithm {
    type Err = UnknownAlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reno" => Ok(Algorithm::Reno),
            "newreno" => Ok(Algorithm::NewReno),
            "cubic" => Ok(Algorithm::Cubic),
            "bbr" => Ok(Algorithm::Bbr),
            _ => Err(UnknownAlgorithmError {
                name: s.to_string(),
            }),
        }
    }
}
