//! # Archive Integrity
//!
//! The last 16 bytes of an archive are the MD5 digest of every byte before
//! them. The writer appends the digest as its final step; the reader can
//! recompute and compare it on demand.

use std::io::Read;

use eyre::{Result, WrapErr};
use md5::{Digest, Md5};

/// Digests exactly `limit` bytes from `reader`.
pub fn md5_stream<R: Read>(reader: R, limit: u64) -> Result<[u8; 16]> {
    let mut hasher = Md5::new();
    let mut taken = reader.take(limit);
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        let n = taken
            .read(&mut buf)
            .wrap_err("failed to read while computing checksum")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    eyre::ensure!(
        total == limit,
        "checksum region truncated: digested {} of {} bytes",
        total,
        limit
    );

    Ok(hasher.finalize().into())
}

/// Digests an in-memory region.
pub fn md5_bytes(bytes: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

pub fn hex(digest: &[u8; 16]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_and_bytes_agree() {
        let payload = b"the quick brown fox jumps over the lazy dog";
        let streamed = md5_stream(&payload[..], payload.len() as u64).unwrap();
        assert_eq!(streamed, md5_bytes(payload));
    }

    #[test]
    fn stream_respects_limit() {
        let payload = b"0123456789";
        let digest = md5_stream(&payload[..], 4).unwrap();
        assert_eq!(digest, md5_bytes(b"0123"));
    }

    #[test]
    fn truncated_region_is_an_error() {
        let payload = b"short";
        assert!(md5_stream(&payload[..], 100).is_err());
    }
}
