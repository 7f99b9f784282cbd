//! Statistical and property tests: loss-rate convergence on the link,
//! arrival ordering, and the RFC 6298 estimator recurrence.

use bytes::Bytes;
use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;
use tcplab_net::{Endpoint, Link, LinkConfig, LinkStatus};
use tcplab_protocol::{Flags, RttEstimator, Segment, SimTime};

fn segment(seq: u32, payload_len: usize) -> Segment {
    Segment::new(
        5000,
        8000,
        seq,
        0,
        Flags::PSH | Flags::ACK,
        65535,
        Bytes::from(vec![0u8; payload_len]),
        SimTime::ZERO,
    )
}

#[test]
fn test_loss_rate_converges() {
    const N: u64 = 2000;
    const LOSS: f64 = 0.3;

    let config = LinkConfig {
        delay_s: 0.1,
        loss_rate: LOSS,
        bandwidth_kb_per_s: 1000.0,
    };
    let mut link = Link::with_seed(config, 1234).unwrap();

    let lost = Rc::new(RefCell::new(0u64));
    let counter = lost.clone();
    link.on_transmitted = Some(Box::new(move |_seg, _dest, status| {
        if status == LinkStatus::Lost {
            *counter.borrow_mut() += 1;
        }
    }));

    for i in 0..N {
        link.submit(segment(i as u32, 8), Endpoint::Server, SimTime::ZERO);
    }

    // Binomial(N, 0.3): mean 600, sigma ~20.5. Five sigmas of slack keeps
    // the seeded draw far inside the band.
    let lost = *lost.borrow();
    let mean = (N as f64) * LOSS;
    let sigma = ((N as f64) * LOSS * (1.0 - LOSS)).sqrt();
    assert!(
        (lost as f64 - mean).abs() < 5.0 * sigma,
        "lost {lost} of {N}, expected about {mean}"
    );
}

#[test]
fn test_deliveries_follow_arrival_order() {
    let config = LinkConfig {
        delay_s: 0.2,
        loss_rate: 0.0,
        bandwidth_kb_per_s: 1.0, // slow enough that size dominates
    };
    let mut link = Link::with_seed(config, 5).unwrap();

    let order = Rc::new(RefCell::new(Vec::new()));
    let sink = order.clone();
    link.on_transmitted = Some(Box::new(move |seg, _dest, status| {
        if status == LinkStatus::Arrived {
            sink.borrow_mut().push(seg.seq);
        }
    }));

    // Mixed sizes: big segments serialize slowly, so later small ones can
    // overtake them; the queue must still deliver in arrival-time order.
    let sizes = [2048usize, 4, 1024, 4, 512, 4, 4096, 4];
    let mut arrivals: Vec<(u32, f64)> = Vec::new();
    for (i, size) in sizes.iter().enumerate() {
        let seq = i as u32;
        let wire = (20 + size) as f64 / 1024.0;
        arrivals.push((seq, 0.2 + wire / 1.0));
        link.submit(segment(seq, *size), Endpoint::Server, SimTime::ZERO);
    }

    // Two dummy endpoints to receive the deliveries.
    let mut client = tcplab_protocol::Connection::new(tcplab_protocol::ConnectionConfig {
        local_port: 5000,
        remote_port: 8000,
        is_server: false,
        algorithm: tcplab_protocol::Algorithm::Reno,
    });
    let mut server = tcplab_protocol::Connection::new(tcplab_protocol::ConnectionConfig {
        local_port: 8000,
        remote_port: 5000,
        is_server: true,
        algorithm: tcplab_protocol::Algorithm::Reno,
    });
    link.tick(SimTime::from_secs(60.0), &mut client, &mut server);

    arrivals.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    let expected: Vec<u32> = arrivals.into_iter().map(|(seq, _)| seq).collect();
    assert_eq!(*order.borrow(), expected);
}

#[test]
fn test_tie_break_preserves_submission_order() {
    let mut link = Link::with_seed(LinkConfig::default(), 5).unwrap();

    let order = Rc::new(RefCell::new(Vec::new()));
    let sink = order.clone();
    link.on_transmitted = Some(Box::new(move |seg, _dest, status| {
        if status == LinkStatus::Arrived {
            sink.borrow_mut().push(seg.seq);
        }
    }));

    // Identical sizes mean identical arrival times.
    for seq in 0..10u32 {
        link.submit(segment(seq, 16), Endpoint::Server, SimTime::ZERO);
    }
    let mut client = tcplab_protocol::Connection::new(tcplab_protocol::ConnectionConfig {
        local_port: 5000,
        remote_port: 8000,
        is_server: false,
        algorithm: tcplab_protocol::Algorithm::Reno,
    });
    let mut server = tcplab_protocol::Connection::new(tcplab_protocol::ConnectionConfig {
        local_port: 8000,
        remote_port: 5000,
        is_server: true,
        algorithm: tcplab_protocol::Algorithm::Reno,
    });
    link.tick(SimTime::from_secs(10.0), &mut client, &mut server);

    assert_eq!(*order.borrow(), (0..10u32).collect::<Vec<_>>());
}

proptest! {
    /// RFC 6298 recurrence: the estimator matches a straight fold of the
    /// definition for any sample sequence, and the RTO stays clamped.
    #[test]
    fn prop_rfc6298_recurrence(samples in proptest::collection::vec(0.001f64..10.0, 1..40)) {
        let mut estimator = RttEstimator::new();
        let mut srtt: Option<f64> = None;
        let mut rttvar = 0.0f64;

        for sample in &samples {
            estimator.update(*sample);
            match srtt {
                None => {
                    srtt = Some(*sample);
                    rttvar = *sample / 2.0;
                }
                Some(prev) => {
                    rttvar = 0.75 * rttvar + 0.25 * (prev - *sample).abs();
                    srtt = Some(0.875 * prev + 0.125 * *sample);
                }
            }
        }

        let expected_srtt = srtt.unwrap();
        prop_assert!((estimator.srtt().unwrap() - expected_srtt).abs() < 1e-9);
        prop_assert!((estimator.rttvar() - rttvar).abs() < 1e-9);

        let expected_rto = (expected_srtt + (4.0 * rttvar).max(1.0)).clamp(1.0, 60.0);
        prop_assert!((estimator.rto() - expected_rto).abs() < 1e-9);
        prop_assert!(estimator.rto() >= 1.0 && estimator.rto() <= 60.0);
    }

    /// Wire size is always header plus payload, and SYN/FIN segments own
    /// exactly one extra unit of sequence space.
    #[test]
    fn prop_segment_sizes(seq in 0u32..1_000_000, len in 0usize..2000) {
        let seg = segment(seq, len);
        prop_assert_eq!(seg.wire_size(), 20 + len);
        prop_assert_eq!(seg.end_seq(), seq + len as u32);

        let syn = Segment::new(1, 2, seq, 0, Flags::SYN, 0, Bytes::new(), SimTime::ZERO);
        prop_assert_eq!(syn.end_seq(), seq + 1);
    }
}
