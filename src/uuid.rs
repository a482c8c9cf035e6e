//! # Archive Identity
//!
//! Every archive carries a 128-bit UUID in its header. Two archives with the
//! same UUID are assumed to hold the same content, so generated UUIDs must
//! not collide across machines or runs. A UUID is derived as the MD5 digest
//! of either a caller-supplied seed (reproducible builds) or of the current
//! clock, wall time, process id and a few random bytes.
//!
//! UUIDs print in the canonical `8-4-4-4-12` lowercase hex form.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};
use rand::RngCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Uuid([u8; 16]);

impl Uuid {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Derives a UUID deterministically from a seed value.
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(seed);
        Self(hasher.finalize().into())
    }

    /// Generates a fresh UUID from the clock, wall time, pid and a random
    /// nonce.
    pub fn generate() -> Self {
        let mut hasher = Md5::new();

        let monotonic = std::time::Instant::now();
        hasher.update(format!("{:?}", monotonic).as_bytes());

        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        hasher.update(wall.as_nanos().to_le_bytes());

        hasher.update(std::process::id().to_le_bytes());

        let mut nonce = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut nonce);
        hasher.update(nonce);

        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn into_bytes(self) -> [u8; 16] {
        self.0
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
