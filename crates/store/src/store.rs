//! The message store façade.

use std::sync::Arc;

use corelib::{Connection, Connector, RingDescriber, Router};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::message::Message;
use crate::query;

/// Stores and retrieves messages through a shared [`Router`].
///
/// Every call checks out exactly one pooled connection and always hands it
/// back, whether the statement succeeds or not.
pub struct MessageStore<D: RingDescriber, K: Connector> {
    router: Arc<Router<D, K>>,
}

impl<D: RingDescriber, K: Connector> Clone for MessageStore<D, K> {
    fn clone(&self) -> Self {
        Self {
            router: Arc::clone(&self.router),
        }
    }
}

impl<D: RingDescriber, K: Connector> MessageStore<D, K> {
    pub fn new(router: Arc<Router<D, K>>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<Router<D, K>> {
        &self.router
    }

    /// Writes one message to the replicas of its receiver.
    pub fn store(&self, message: &Message) -> Result<()> {
        if message.receiver_id.is_empty() {
            return Err(StoreError::InvalidMessage("receiver_id is empty".into()));
        }
        let statement = query::insert(message);
        self.router
            .with_connection(message.receiver_id.as_bytes(), |conn| conn.execute(&statement))
            .map_err(|err| {
                warn!(receiver = %message.receiver_id, msg_id = %message.msg_id, error = %err, "store failed");
                StoreError::from(err)
            })?;
        debug!(receiver = %message.receiver_id, msg_id = %message.msg_id, "message stored");
        Ok(())
    }

    /// Reads every message stored for `receiver_id`.
    pub fn retrieve(&self, receiver_id: &str) -> Result<Vec<Message>> {
        let statement = query::select_by_receiver(receiver_id);
        let result = self
            .router
            .with_connection(receiver_id.as_bytes(), |conn| conn.execute(&statement))
            .map_err(|err| {
                warn!(receiver = %receiver_id, error = %err, "retrieve failed");
                StoreError::from(err)
            })?;
        let messages = result
            .rows
            .into_iter()
            .map(Message::from_row)
            .collect::<Result<Vec<_>>>()?;
        debug!(receiver = %receiver_id, count = messages.len(), "messages retrieved");
        Ok(messages)
    }
}
