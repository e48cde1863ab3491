//! Token abstraction module for the token ring.
//!
//! Tokens represent positions on the ring. The backing store partitions rows
//! with the Murmur3 scheme, so [`murmur3`] holds both the token type and the
//! hash it is computed with.

pub mod murmur3;
pub mod traits;

pub use murmur3::{murmur3_x64_128, Murmur3Token};
pub use traits::Token;
