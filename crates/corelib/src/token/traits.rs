//! Core token trait definitions.

use std::fmt::Debug;
use std::hash::Hash;

/// Minimal token trait for the ring.
///
/// Tokens are immutable, totally ordered positions. Implementations must be
/// thread-safe and cheap to compare/hash.
pub trait Token: Copy + Ord + Hash + Send + Sync + Debug + 'static {
    /// Smallest token (start of the numeric range).
    fn min_value() -> Self;
    /// Largest token (end of the numeric range).
    fn max_value() -> Self;
    /// True if this token is the minimum.
    fn is_minimum(&self) -> bool;
    /// Raw signed value used for range arithmetic.
    fn value(&self) -> i64;
}
