//! Ensemble-wide hash function.
//!
//! Both partitioning tiers select their target by hashing names with this
//! function, so every node of every cluster must compute identical values:
//! the hash is part of the wire-visible contract. It is implemented here
//! rather than pulled from a crate so that a dependency upgrade can never
//! silently remap the entire key space.
//!
//! The algorithm is 32-bit MurmurHash2 with a fixed zero seed.

const M: u32 = 0x5bd1_e995;
const R: u32 = 24;
const SEED: u32 = 0;

/// Hashes a byte sequence to a well-distributed 32-bit value.
///
/// Deterministic across processes and architectures: chunks are read
/// little-endian regardless of the host byte order.
pub fn hash(bytes: &[u8]) -> u32 {
    let mut h = SEED ^ bytes.len() as u32;

    let mut chunks = bytes.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        if tail.len() >= 3 {
            h ^= (tail[2] as u32) << 16;
        }
        if tail.len() >= 2 {
            h ^= (tail[1] as u32) << 8;
        }
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Hashes a string key.
pub fn hash_str(key: &str) -> u32 {
    hash(key.as_bytes())
}

/// Combines two hash values into one by rehashing their big-endian bytes.
///
/// Used for `(bucket, key)` slot selection so that the pair mapping is not a
/// trivial function of either component alone.
pub fn combine(a: u32, b: u32) -> u32 {
    let mut buf = [0u8; 8];
    buf[..4].copy_from_slice(&a.to_be_bytes());
    buf[4..].copy_from_slice(&b.to_be_bytes());
    hash(&buf)
}
