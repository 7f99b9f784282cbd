//! Handshake scenarios: clean three-way establishment, SYN-cookie
//! validation and replay, duplicate SYNs, and illegal connect calls.

mod common;

use common::{client, established_pair, server};
use tcplab_net::{LinkConfig, LinkStatus, Simulator, SimulatorConfig, TraceEvent};
use tcplab_protocol::{Algorithm, ConnectionError, ConnectionState, Flags, SimTime};

fn simulator(delay_s: f64, loss_rate: f64) -> Simulator {
    let config = SimulatorConfig {
        link: LinkConfig {
            delay_s,
            loss_rate,
            bandwidth_kb_per_s: 1000.0,
        },
        algorithm: Algorithm::Reno,
        ..SimulatorConfig::default()
    };
    Simulator::with_seed(config, 7).unwrap()
}

#[test]
fn test_clean_handshake_three_segments() {
    let mut sim = simulator(0.1, 0.0);
    sim.start_connection().unwrap();
    assert!(sim.run_until(|s| s.established(), 0.05, 5.0));

    // Exactly three segments crossed the link: SYN, SYN|ACK, ACK.
    let transmitted: Vec<String> = sim
        .history()
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Transmitted {
                segment,
                status: LinkStatus::Transmitting,
                ..
            } => Some(segment.flags.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(transmitted, ["SYN", "SYN,ACK", "ACK"]);

    assert_eq!(sim.client().state(), ConnectionState::Established);
    assert_eq!(sim.server().state(), ConnectionState::Established);
}

#[test]
fn test_handshake_survives_synack_loss() {
    // Every handshake segment faces a 25% drop chance; the handshake RTO
    // with exponential backoff must still get both sides established.
    let mut sim = simulator(0.05, 0.25);
    sim.start_connection().unwrap();
    assert!(sim.run_until(|s| s.established(), 0.05, 60.0));
}

#[test]
fn test_syn_cookie_replay_rejected() {
    let now = SimTime::ZERO;
    let mut c = client(Algorithm::Reno);
    let mut s = server(Algorithm::Reno);

    let syn = c.connect(now).unwrap();
    let synack = s.deliver(syn, now).pop().unwrap();
    let final_ack = c.deliver(synack, now).pop().unwrap();
    assert_eq!(s.state(), ConnectionState::SynReceived);

    // 129 seconds later the ACK's echoed cookie is two slots old.
    let stale = SimTime::from_secs(129.0);
    let replies = s.deliver(final_ack, stale);
    assert!(replies.is_empty());
    assert_eq!(s.state(), ConnectionState::SynReceived);
}

#[test]
fn test_syn_cookie_accepted_in_next_slot() {
    let now = SimTime::ZERO;
    let mut c = client(Algorithm::Reno);
    let mut s = server(Algorithm::Reno);

    let syn = c.connect(now).unwrap();
    let synack = s.deliver(syn, now).pop().unwrap();
    let final_ack = c.deliver(synack, now).pop().unwrap();

    // One slot later the cookie still validates.
    let delayed = SimTime::from_secs(100.0);
    s.deliver(final_ack, delayed);
    assert_eq!(s.state(), ConnectionState::Established);
}

#[test]
fn test_corrupted_final_ack_dropped() {
    let now = SimTime::ZERO;
    let mut c = client(Algorithm::Reno);
    let mut s = server(Algorithm::Reno);

    let syn = c.connect(now).unwrap();
    let synack = s.deliver(syn, now).pop().unwrap();
    let mut final_ack = c.deliver(synack, now).pop().unwrap();

    // An ACK that does not echo the cookie ISN is silently ignored.
    final_ack.ack = final_ack.ack.wrapping_add(17);
    let replies = s.deliver(final_ack, now);
    assert!(replies.is_empty());
    assert_eq!(s.state(), ConnectionState::SynReceived);
}

#[test]
fn test_duplicate_syn_gets_fresh_syn_ack() {
    let now = SimTime::ZERO;
    let mut c = client(Algorithm::Reno);
    let mut s = server(Algorithm::Reno);

    let syn = c.connect(now).unwrap();
    s.deliver(syn.clone(), now).pop().unwrap();

    // The client's SYN timer fired and the duplicate reaches the server.
    let again = s.deliver(syn, now + 3.5).pop().unwrap();
    assert!(again.has_flag(Flags::SYN | Flags::ACK));
    assert_eq!(s.state(), ConnectionState::SynReceived);
    assert_eq!(s.stats().retransmissions, 1);
}

#[test]
fn test_connect_rejected_when_established() {
    let (mut c, _s) = established_pair(Algorithm::Reno, SimTime::ZERO);
    let err = c.connect(SimTime::from_secs(1.0)).unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::IllegalState(ConnectionState::Established)
    ));
}

#[test]
fn test_unknown_algorithm_lists_valid_names() {
    let err = "vegas".parse::<Algorithm>().unwrap_err();
    let message = err.to_string();
    for name in ["Reno", "NewReno", "Cubic", "BBR"] {
        assert!(message.contains(name), "missing {name} in: {message}");
    }
}

#[test]
fn test_syn_retransmitted_with_backoff() {
    let mut c = client(Algorithm::Reno);
    let now = SimTime::ZERO;
    c.connect(now).unwrap();

    // Handshake RTO is 3 s; the first retry doubles the next timeout.
    assert!(c.tick(now + 2.0).is_empty());
    let first = c.tick(now + 3.5);
    assert_eq!(first.len(), 1);
    assert!(first[0].has_flag(Flags::SYN));

    assert!(c.tick(now + 3.5 + 5.0).is_empty());
    assert_eq!(c.tick(now + 3.5 + 6.5).len(), 1);
}
