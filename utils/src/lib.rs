//! Leverage common hashing and encoding helpers across the fuzzer.

use sha2::{Digest, Sha256};
use std::hash::Hasher;

/// Converts bytes to a hexadecimal string.
pub fn hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Hashes the given bytes using SHA-256.
pub fn hash(bytes: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().to_vec()
}

/// FNV offset basis (64-bit).
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV prime (64-bit).
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Streaming 64-bit FNV-1a hasher.
///
/// Output depends only on the bytes written and the order they were written in, so
/// it is stable across processes and platforms (unlike [std::collections::hash_map::DefaultHasher]).
#[derive(Clone, Copy, Debug)]
pub struct Fnv64(u64);

impl Fnv64 {
    /// Create a hasher seeded with the FNV offset basis.
    pub const fn new() -> Self {
        Self(FNV_OFFSET)
    }
}

impl Default for Fnv64 {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for Fnv64 {
    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}
