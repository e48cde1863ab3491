//! Partitioner abstraction for the token ring.
//!
//! Partitioners are responsible for converting row keys into tokens that can
//! be located on the ring. Only the store's Murmur3 scheme is provided.

pub mod murmur3;
pub mod traits;

pub use murmur3::Murmur3Partitioner;
pub use traits::Partitioner;
