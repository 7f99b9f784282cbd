//! SYN cookies
//!
//! The server derives its initial sequence number from a keyed hash of the
//! client's ISN, the port pair, and a coarse time slot. When the final
//! handshake ACK arrives, recomputing the hash validates the ACK without
//! trusting any stored SYN state. A cookie minted in slot `t` stays valid
//! through slot `t + 1` and is rejected from `t + 2` onward.

use crate::time::SimTime;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Width of one cookie time slot, in seconds.
pub const SLOT_SECS: f64 = 64.0;

/// Number of bytes in a cookie secret.
pub const SECRET_LEN: usize = 16;

/// Map an instant to its cookie time slot.
pub fn time_slot(now: SimTime) -> u64 {
    (now.as_secs() / SLOT_SECS).floor() as u64
}

/// Per-endpoint secret key for SYN-cookie generation.
#[derive(Clone)]
pub struct CookieSecret([u8; SECRET_LEN]);

impl CookieSecret {
    /// Draw a fresh random secret.
    pub fn random() -> Self {
        let mut secret = [0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut secret);
        CookieSecret(secret)
    }

    /// Build a secret from fixed bytes.
    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        CookieSecret(bytes)
    }

    /// Compute the 32-bit cookie for a handshake observed in `slot`.
    ///
    /// The MAC input is the ASCII rendering `"isn:src_port:dst_port:slot"`
    /// of the client's ISN and the port pair as seen on the SYN; the first
    /// four bytes of the HMAC-SHA256 digest become the cookie.
    pub fn generate(&self, client_isn: u32, src_port: u16, dst_port: u16, slot: u64) -> u32 {
        let mut mac =
            HmacSha256::new_from_slice(&self.0).expect("hmac accepts keys of any length");
        mac.update(format!("{client_isn}:{src_port}:{dst_port}:{slot}").as_bytes());
        let digest = mac.finalize().into_bytes();
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    /// Check a cookie against the current and the previous time slot.
    pub fn validate(
        &self,
        cookie: u32,
        client_isn: u32,
        src_port: u16,
        dst_port: u16,
        now: SimTime,
    ) -> bool {
        let slot = time_slot(now);
        if self.generate(client_isn, src_port, dst_port, slot) == cookie {
            return true;
        }
        slot > 0 && self.generate(client_isn, src_port, dst_port, slot - 1) == cookie
    }
}
