//! Token ring implementation.
//!
//! The ring maps token ranges to ordered replica lists and provides the
//! lookup used for routing, plus the refreshable topology that pairs the
//! current ring with per-host connection pools.

pub mod range;
pub mod ring;
pub mod topology;

pub use range::TokenRange;
pub use ring::{RangeId, RangeView, RingBuilder, RingSnapshot};
pub use topology::RingTopology;
