//! Message records.

use corelib::Row;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// A message waiting for its receiver.
///
/// All fields are opaque strings; `timestamp` is whatever the producer
/// supplied and is not interpreted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub receiver_id: String,
    pub timestamp: String,
    pub msg_id: String,
    pub group_id: String,
    pub msg: String,
    pub sender_id: String,
}

impl Message {
    /// Number of stored columns.
    pub const COLUMN_COUNT: usize = 6;

    /// Column values in table order.
    pub fn values(&self) -> [&str; Self::COLUMN_COUNT] {
        [
            self.receiver_id.as_str(),
            self.timestamp.as_str(),
            self.msg_id.as_str(),
            self.group_id.as_str(),
            self.msg.as_str(),
            self.sender_id.as_str(),
        ]
    }

    /// Rebuilds a message from a result row in table order.
    pub fn from_row(row: Row) -> Result<Self> {
        let actual = row.len();
        let [receiver_id, timestamp, msg_id, group_id, msg, sender_id]: [String; Self::COLUMN_COUNT] =
            row.try_into().map_err(|_| StoreError::MalformedRow {
                expected: Self::COLUMN_COUNT,
                actual,
            })?;
        Ok(Self {
            receiver_id,
            timestamp,
            msg_id,
            group_id,
            msg,
            sender_id,
        })
    }
}
