//! Wrap-aware token intervals.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A `(left, right]` interval over the signed 64-bit token space.
///
/// When `left >= right` the interval wraps past `i64::MAX` back to
/// `i64::MIN`; `left == right` therefore covers every token. Any two values
/// are accepted.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct TokenRange {
    pub left: i64,
    pub right: i64,
}

impl TokenRange {
    #[inline]
    pub const fn new(left: i64, right: i64) -> Self {
        Self { left, right }
    }

    /// True if the interval crosses the numeric boundary of the ring.
    #[inline]
    pub const fn wraps(&self) -> bool {
        self.left >= self.right
    }

    /// Returns true if `token` lies in `(left, right]`, wrapping if needed.
    #[inline]
    pub const fn contains(&self, token: i64) -> bool {
        if self.wraps() {
            token > self.left || token <= self.right
        } else {
            token > self.left && token <= self.right
        }
    }

    /// Number of tokens covered, or `None` for a full-ring range whose width
    /// (2^64) does not fit in a `u64`.
    pub fn width(&self) -> Option<u64> {
        if self.left == self.right {
            None
        } else {
            Some((self.right as u64).wrapping_sub(self.left as u64))
        }
    }

    /// Fraction of the ring this range covers.
    pub fn ownership(&self) -> f64 {
        match self.width() {
            Some(w) => w as f64 / 2f64.powi(64),
            None => 1.0,
        }
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.left, self.right)
    }
}
