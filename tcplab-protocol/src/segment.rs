//! TCP segment value type
//!
//! A [`Segment`] models one TCP segment exchanged between the two simulated
//! endpoints: ports, sequence/acknowledgement numbers, flag set, advertised
//! window, payload, and creation timestamp. Segments are plain in-process
//! values; there is no wire encoding. Once handed to the link a segment is
//! never mutated; retransmissions resend a clone of the original.

use crate::time::SimTime;
use bytes::Bytes;
use std::fmt;
use std::ops::BitOr;

/// Modeled TCP header size in bytes; the on-wire size of a segment is
/// `HEADER_SIZE + payload.len()`.
pub const HEADER_SIZE: usize = 20;

/// TCP control-flag bitset.
///
/// Bit values match the real TCP header flag octet so that combined sets
/// render familiarly in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const FIN: Flags = Flags(0x01);
    pub const SYN: Flags = Flags(0x02);
    pub const RST: Flags = Flags(0x04);
    pub const PSH: Flags = Flags(0x08);
    pub const ACK: Flags = Flags(0x10);

    /// The empty flag set.
    pub const NONE: Flags = Flags(0);

    /// Check that every bit of `flag` is set in `self`.
    #[inline]
    pub fn contains(self, flag: Flags) -> bool {
        (self.0 & flag.0) == flag.0
    }

    /// Raw flag bits.
    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Flags::SYN) {
            names.push("SYN");
        }
        if self.contains(Flags::ACK) {
            names.push("ACK");
        }
        if self.contains(Flags::FIN) {
            names.push("FIN");
        }
        if self.contains(Flags::RST) {
            names.push("RST");
        }
        if self.contains(Flags::PSH) {
            names.push("PSH");
        }
        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join(","))
        }
    }
}

/// An immutable TCP segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// Sequence number
    pub seq: u32,
    /// Acknowledgement number
    pub ack: u32,
    /// Control flags
    pub flags: Flags,
    /// Advertised receive window
    pub window: u16,
    /// Payload bytes (possibly empty)
    pub payload: Bytes,
    /// Simulated time of creation
    pub timestamp: SimTime,
}

impl Segment {
    /// Create a new segment.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: Flags,
        window: u16,
        payload: Bytes,
        timestamp: SimTime,
    ) -> Self {
        Segment {
            src_port,
            dst_port,
            seq,
            ack,
            flags,
            window,
            payload,
            timestamp,
        }
    }

    /// Test whether every bit of `flag` is set.
    #[inline]
    pub fn has_flag(&self, flag: Flags) -> bool {
        self.flags.contains(flag)
    }

    /// Modeled on-wire size: header plus payload.
    #[inline]
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Sequence-space units this segment occupies: the payload length, plus
    /// one for SYN or FIN.
    pub fn seq_consumed(&self) -> u32 {
        let mut len = self.payload.len() as u32;
        if self.has_flag(Flags::SYN) || self.has_flag(Flags::FIN) {
            len += 1;
        }
        len
    }

    /// First sequence number past this segment; a cumulative ACK covers the
    /// segment once it reaches this value.
    #[inline]
    pub fn end_seq(&self) -> u32 {
        self.seq.wrapping_add(self.seq_consumed())
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TCP[{}->{}] SEQ={} ACK={} FLAGS={} WIN={} DATA={}B",
            self.src_port,
            self.dst_port,
            self.seq,
            self.ack,
            self.flags,
            self.window,
            self.payload.len()
        )
    }
}
