//! Shared helpers for the integration tests.
//!
//! Each test binary compiles this module separately and uses a subset of
//! the helpers.
#![allow(dead_code)]

use bytes::Bytes;
use tcplab_protocol::{
    Algorithm, Connection, ConnectionConfig, ConnectionState, Flags, Segment, SimTime,
};

pub const CLIENT_PORT: u16 = 5000;
pub const SERVER_PORT: u16 = 8000;

pub fn client(algorithm: Algorithm) -> Connection {
    Connection::new(ConnectionConfig {
        local_port: CLIENT_PORT,
        remote_port: SERVER_PORT,
        is_server: false,
        algorithm,
    })
}

pub fn server(algorithm: Algorithm) -> Connection {
    Connection::new(ConnectionConfig {
        local_port: SERVER_PORT,
        remote_port: CLIENT_PORT,
        is_server: true,
        algorithm,
    })
}

/// Drive the three-way handshake by hand at `now`, returning both endpoints
/// in ESTABLISHED.
pub fn established_pair(algorithm: Algorithm, now: SimTime) -> (Connection, Connection) {
    let mut c = client(algorithm);
    let mut s = server(algorithm);

    let syn = c.connect(now).expect("client starts CLOSED");
    let synack = s.deliver(syn, now).pop().expect("SYN|ACK reply");
    let ack = c.deliver(synack, now).pop().expect("final ACK reply");
    s.deliver(ack, now);

    assert_eq!(c.state(), ConnectionState::Established);
    assert_eq!(s.state(), ConnectionState::Established);
    (c, s)
}

/// A bare ACK from the server to the client acknowledging `ack`.
pub fn server_ack(ack: u32, now: SimTime) -> Segment {
    Segment::new(
        SERVER_PORT,
        CLIENT_PORT,
        0,
        ack,
        Flags::ACK,
        65535,
        Bytes::new(),
        now,
    )
}

/// Grow the client's congestion window to `target` by sending and
/// acknowledging one payload per round.
pub fn grow_cwnd(c: &mut Connection, target: f64, start: SimTime) -> SimTime {
    let mut now = start;
    while c.congestion_vars().cwnd < target {
        let seg = c
            .send(Bytes::from_static(b"w"), now)
            .expect("window open while growing");
        c.deliver(server_ack(seg.end_seq(), now + 0.05), now + 0.05);
        now = now + 0.1;
    }
    now
}
