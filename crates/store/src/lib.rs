//! Offline message store on top of the ring router.
//!
//! Messages are keyed by receiver: every message for a receiver lives in the
//! replicas of the receiver id's token, so both writes and reads are routed
//! by `receiver_id`.

pub mod error;
pub mod message;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use message::Message;
pub use store::MessageStore;
