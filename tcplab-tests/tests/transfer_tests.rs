//! Data-transfer scenarios: slow-start growth, fast retransmit, RTO
//! recovery, and cumulative acknowledgement.

mod common;

use bytes::Bytes;
use common::{established_pair, grow_cwnd, server_ack};
use std::sync::{Arc, Mutex};
use tcplab_net::{Endpoint, LinkConfig, Simulator, SimulatorConfig};
use tcplab_protocol::{Algorithm, CongestionPhase, Metric, Segment, SimTime};

#[test]
fn test_slow_start_ramp() {
    let config = SimulatorConfig {
        link: LinkConfig {
            delay_s: 0.01,
            loss_rate: 0.0,
            bandwidth_kb_per_s: 1000.0,
        },
        algorithm: Algorithm::Reno,
        ..SimulatorConfig::default()
    };
    let mut sim = Simulator::with_seed(config, 1).unwrap();
    sim.start_connection().unwrap();
    sim.run_until(|s| s.established(), 0.01, 5.0);

    for _ in 0..10 {
        sim.send_data(Bytes::from_static(b"x"), true);
    }
    assert!(sim.run_until(
        |s| s.client().unacked_data() == 0 && s.client().queued() == 0,
        0.01,
        10.0
    ));

    // Ten ACKs in slow start: cwnd went 1, 2, ..., 11, one step per ACK,
    // never leaving slow start below the threshold of 16.
    let vars = sim.client().congestion_vars();
    assert_eq!(vars.cwnd, 11.0);
    assert_eq!(vars.phase, CongestionPhase::SlowStart);

    let cwnd_trace: Vec<f64> = sim
        .metric_trace(Endpoint::Client, Metric::Cwnd)
        .into_iter()
        .map(|(value, _)| value)
        .collect();
    assert_eq!(cwnd_trace.first(), Some(&1.0));
    assert!(cwnd_trace.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(cwnd_trace.last(), Some(&11.0));
    assert_eq!(sim.server().received().len(), 10);
}

#[test]
fn test_fast_retransmit_on_three_duplicates() {
    let now = SimTime::ZERO;
    let (mut c, _s) = established_pair(Algorithm::Reno, now);
    let now = grow_cwnd(&mut c, 5.0, SimTime::from_secs(1.0));
    let cwnd_before = c.congestion_vars().cwnd;
    assert_eq!(cwnd_before, 5.0);

    let retransmitted = Arc::new(Mutex::new(Vec::new()));
    let sink = retransmitted.clone();
    c.events.on_retransmit_needed = Some(Box::new(move |seg: &Segment| {
        sink.lock().unwrap().push(seg.clone());
    }));
    let metrics = Arc::new(Mutex::new(Vec::new()));
    let metric_sink = metrics.clone();
    c.events.on_metric = Some(Box::new(move |metric, value, _time| {
        metric_sink.lock().unwrap().push((metric, value));
    }));

    // Five payloads in flight.
    let mut segments = Vec::new();
    for payload in [&b"a"[..], b"b", b"c", b"d", b"e"] {
        segments.push(c.send(Bytes::copy_from_slice(payload), now).unwrap());
    }
    assert_eq!(c.unacked_data(), 5);

    // The receiver keeps acknowledging only the first segment's start.
    for i in 0..3 {
        c.deliver(server_ack(segments[0].seq, now + 0.01 * i as f64), now);
    }

    let resent = retransmitted.lock().unwrap();
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].seq, segments[0].seq);

    let vars = c.congestion_vars();
    assert_eq!(vars.ssthresh, (cwnd_before / 2.0).max(2.0));
    assert_eq!(vars.cwnd, vars.ssthresh + 3.0);
    assert_eq!(vars.phase, CongestionPhase::FastRecovery);

    assert!(metrics
        .lock()
        .unwrap()
        .iter()
        .any(|(metric, _)| *metric == Metric::FastRetxEvent));
}

#[test]
fn test_fast_retransmit_only_once_per_burst() {
    let now = SimTime::ZERO;
    let (mut c, _s) = established_pair(Algorithm::Reno, now);
    let now = grow_cwnd(&mut c, 5.0, SimTime::from_secs(1.0));

    let count = Arc::new(Mutex::new(0usize));
    let sink = count.clone();
    c.events.on_retransmit_needed = Some(Box::new(move |_seg: &Segment| {
        *sink.lock().unwrap() += 1;
    }));

    let first = c.send(Bytes::from_static(b"a"), now).unwrap();
    c.send(Bytes::from_static(b"b"), now).unwrap();

    // Five duplicates: the burst fires on the third only.
    for i in 0..5 {
        c.deliver(server_ack(first.seq, now + 0.01 * i as f64), now);
    }
    assert_eq!(*count.lock().unwrap(), 1);
}

#[test]
fn test_rto_recovery_and_karn() {
    let now = SimTime::ZERO;
    let (mut c, mut s) = established_pair(Algorithm::Reno, now);
    let now = grow_cwnd(&mut c, 4.0, SimTime::from_secs(1.0));
    let cwnd_before = c.congestion_vars().cwnd;
    let srtt_before = c.rtt().srtt();

    // The payload is lost on the wire: the server never sees it.
    let lost = c.send(Bytes::from_static(b"lost"), now).unwrap();
    assert!(c.tick(now + 0.5).is_empty());

    // Past the RTO the segment is retransmitted and the window collapses.
    let resent = c.tick(now + 1.6);
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].seq, lost.seq);
    let vars = c.congestion_vars();
    assert_eq!(vars.cwnd, 1.0);
    assert_eq!(vars.ssthresh, (cwnd_before / 2.0).max(2.0));
    assert_eq!(vars.phase, CongestionPhase::SlowStart);

    // The retransmitted copy reaches the server and is acknowledged, but
    // Karn's rule forbids sampling RTT from it.
    let ack = s.deliver(resent[0].clone(), now + 1.7).pop().unwrap();
    c.deliver(ack, now + 1.8);
    assert_eq!(c.unacked_data(), 0);
    assert_eq!(c.rtt().srtt(), srtt_before);
}

#[test]
fn test_cumulative_ack_clears_prefix() {
    let now = SimTime::ZERO;
    let (mut c, _s) = established_pair(Algorithm::Reno, now);
    let now = grow_cwnd(&mut c, 6.0, SimTime::from_secs(1.0));

    let mut segments = Vec::new();
    for payload in [&b"11"[..], b"22", b"33", b"44"] {
        segments.push(c.send(Bytes::copy_from_slice(payload), now).unwrap());
    }

    // Acknowledge through the third segment.
    c.deliver(server_ack(segments[2].end_seq(), now + 0.1), now + 0.1);
    assert_eq!(c.unacked_data(), 1);

    // The last segment needs its own acknowledgement.
    c.deliver(server_ack(segments[3].end_seq(), now + 0.2), now + 0.2);
    assert_eq!(c.unacked_data(), 0);
}

#[test]
fn test_duplicate_ack_statistics() {
    let now = SimTime::ZERO;
    let (mut c, _s) = established_pair(Algorithm::Reno, now);
    let now = grow_cwnd(&mut c, 4.0, SimTime::from_secs(1.0));

    let first = c.send(Bytes::from_static(b"a"), now).unwrap();
    c.send(Bytes::from_static(b"b"), now).unwrap();

    for i in 0..3 {
        c.deliver(server_ack(first.seq, now + 0.01 * i as f64), now);
    }
    let stats = c.stats();
    assert_eq!(stats.duplicate_acks, 3);
    assert_eq!(stats.retransmissions, 1);
}

#[test]
fn test_transfer_over_lossy_link_completes() {
    let config = SimulatorConfig {
        link: LinkConfig {
            delay_s: 0.05,
            loss_rate: 0.15,
            bandwidth_kb_per_s: 500.0,
        },
        algorithm: Algorithm::NewReno,
        ..SimulatorConfig::default()
    };
    let mut sim = Simulator::with_seed(config, 99).unwrap();
    sim.start_connection().unwrap();
    assert!(sim.run_until(|s| s.established(), 0.02, 60.0));

    for _ in 0..20 {
        sim.send_data(Bytes::from_static(b"chunk"), true);
    }
    assert!(sim.run_until(
        |s| s.server().received().len() == 20,
        0.02,
        120.0
    ));
    // Losses happened and were repaired.
    assert!(!sim.loss_events().is_empty());
}
