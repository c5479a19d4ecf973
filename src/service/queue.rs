//! Outbound queue for messages sent while not connected

use crate::error::ClientResult;
use crate::protocol::{Headers, MessageBody};
use std::collections::VecDeque;
use tracing::{debug, error};

/// A `send` issued while the connection was unavailable
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub destination: String,
    pub body: MessageBody,
    pub headers: Headers,
}

/// Result of one flush pass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FlushOutcome {
    /// Message ids assigned to the entries that went out
    pub sent: Vec<String>,
    /// Entries pushed back onto the tail
    pub requeued: usize,
}

#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<PendingMessage>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: PendingMessage) {
        self.items.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingMessage> {
        self.items.iter()
    }

    /// Snapshot and clear the queue, then resubmit each entry in order.
    ///
    /// Entries whose resubmission fails go back on the tail. Successes that
    /// came before a failure are gone for good, so ordering is FIFO within
    /// one pass only.
    pub fn flush<F>(&mut self, mut send: F) -> FlushOutcome
    where
        F: FnMut(&PendingMessage) -> ClientResult<String>,
    {
        let batch: Vec<PendingMessage> = self.items.drain(..).collect();
        let mut outcome = FlushOutcome::default();

        for message in batch {
            match send(&message) {
                Ok(id) => outcome.sent.push(id),
                Err(e) => {
                    error!(
                        destination = %message.destination,
                        error = %e,
                        "Failed to send pending message"
                    );
                    self.items.push_back(message);
                    outcome.requeued += 1;
                }
            }
        }

        debug!(
            sent = outcome.sent.len(),
            requeued = outcome.requeued,
            "Flushed pending messages"
        );
        outcome
    }
}
