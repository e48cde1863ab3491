//! Murmur3 hash token implementation (Cassandra-compatible).
//!
//! The backing store places a row on the ring at the high 64-bit word of
//! MurmurHash3 x64 128 (seed 0) over the row key. Routing only works if this
//! value is bit-exact with the store's partitioner, including its one quirk:
//! tail bytes are read as *signed* bytes and sign-extended before being
//! folded in. For ASCII keys this makes no difference.
//!
//! Arithmetic is done on `u64` so every right shift is a logical shift; the
//! results are reinterpreted as `i64` at the end.

use std::fmt;

use crate::token::traits::Token;

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

/// Murmur3 token using the signed 64-bit representation of the store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Murmur3Token(pub i64);

impl Token for Murmur3Token {
    fn min_value() -> Self {
        Murmur3Token(i64::MIN)
    }

    fn max_value() -> Self {
        Murmur3Token(i64::MAX)
    }

    fn is_minimum(&self) -> bool {
        self.0 == i64::MIN
    }

    fn value(&self) -> i64 {
        self.0
    }
}

impl Murmur3Token {
    /// Computes the routing token of a row key.
    pub fn from_bytes(data: &[u8]) -> Self {
        Murmur3Token(murmur3_x64_128(data).0)
    }

    /// Creates a token from a string key.
    pub fn from_key(key: &str) -> Self {
        Self::from_bytes(key.as_bytes())
    }
}

impl fmt::Display for Murmur3Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// MurmurHash3 x64 128 with seed 0, returned as `(high, low)` signed words.
pub fn murmur3_x64_128(data: &[u8]) -> (i64, i64) {
    let len = data.len();
    let mut h1: u64 = 0;
    let mut h2: u64 = 0;

    let mut blocks = data.chunks_exact(16);
    for block in blocks.by_ref() {
        let (lo, hi) = block.split_at(8);
        let k1 = read_u64_le(lo);
        let k2 = read_u64_le(hi);

        h1 ^= mix_k1(k1);
        h1 = h1.rotate_left(27).wrapping_add(h2);
        h1 = h1.wrapping_mul(5).wrapping_add(0x52dc_e729);

        h2 ^= mix_k2(k2);
        h2 = h2.rotate_left(31).wrapping_add(h1);
        h2 = h2.wrapping_mul(5).wrapping_add(0x3849_5ab5);
    }

    let tail = blocks.remainder();
    if tail.len() > 8 {
        h2 ^= mix_k2(fold_tail(&tail[8..]));
    }
    if !tail.is_empty() {
        h1 ^= mix_k1(fold_tail(&tail[..tail.len().min(8)]));
    }

    h1 ^= len as u64;
    h2 ^= len as u64;

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    h1 = fmix64(h1);
    h2 = fmix64(h2);

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    (h1 as i64, h2 as i64)
}

#[inline]
fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Folds up to eight tail bytes, little-endian, each sign-extended.
#[inline]
fn fold_tail(bytes: &[u8]) -> u64 {
    bytes.iter().enumerate().fold(0u64, |k, (i, &b)| {
        k ^ ((b as i8 as i64 as u64) << (i * 8))
    })
}

#[inline]
fn mix_k1(k1: u64) -> u64 {
    k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2)
}

#[inline]
fn mix_k2(k2: u64) -> u64 {
    k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1)
}

/// Finalization mix: forces all bits of a hash block to avalanche.
#[inline]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}
