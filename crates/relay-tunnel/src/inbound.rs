//! Inbound message queue.
//!
//! Fully reassembled messages wait here until the application receives them.
//! The queue, the reassembler feeding it and the arrival signal share one lock
//! domain, separate from the send allowance.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::Notify;

use crate::chunk::{Reassembler, Reassembly};

#[derive(Debug, Default)]
struct InboundState {
    queue: VecDeque<Bytes>,
    reassembler: Reassembler,
}

/// Arrived messages in completion order plus an arrival signal.
#[derive(Debug, Default)]
pub struct Inbound {
    state: Mutex<InboundState>,
    arrived: Notify,
}

impl Inbound {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk to the reassembler, queueing the message it completes.
    pub fn push_chunk(&self, size_or_cont: usize, chunk: &[u8]) -> Reassembly {
        let mut state = self.state.lock().unwrap();
        let outcome = state.reassembler.push(size_or_cont, chunk);
        if let Some(message) = &outcome.message {
            tracing::debug!(len = message.len(), "queuing arrived message");
            state.queue.push_back(message.clone());
            self.arrived.notify_waiters();
        }
        outcome
    }

    /// Pops the oldest message, if any.
    pub fn try_pop(&self) -> Option<Bytes> {
        self.state.lock().unwrap().queue.pop_front()
    }

    /// Pops the oldest message, waiting for one to arrive if the queue is empty.
    ///
    /// Callers must not pop concurrently: with a single consumer an arrival
    /// wake-up always leaves a message behind, and finding none is a
    /// synchronization bug that panics.
    pub async fn pop(&self) -> Bytes {
        let arrived = self.arrived.notified();
        tokio::pin!(arrived);
        arrived.as_mut().enable();

        if let Some(message) = self.try_pop() {
            return message;
        }
        arrived.await;
        match self.try_pop() {
            Some(message) => message,
            None => panic!("arrival signal raised but no message queued"),
        }
    }

    /// Returns the number of complete messages waiting.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Returns `true` if no complete message is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
