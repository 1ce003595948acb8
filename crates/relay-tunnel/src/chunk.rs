//! Message chunking and reassembly.
//!
//! A message travels as consecutive chunks of at most `chunk_limit` bytes. The
//! first chunk is tagged with the total message length, every continuation
//! with `0`, which tells the receiver whether a chunk starts a new message or
//! extends the one in progress.

use bytes::{Bytes, BytesMut};

/// Splits `message` into `(size_or_cont, chunk)` pairs in send order.
///
/// `chunk_limit` must be positive.
pub fn split(message: &Bytes, chunk_limit: usize) -> impl Iterator<Item = (usize, Bytes)> + '_ {
    debug_assert!(chunk_limit > 0);
    let total = message.len();
    (0..total).step_by(chunk_limit.max(1)).map(move |pos| {
        let end = (pos + chunk_limit).min(total);
        let size_or_cont = if pos == 0 { total } else { 0 };
        (size_or_cont, message.slice(pos..end))
    })
}

/// Result of feeding one chunk to a [`Reassembler`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reassembly {
    /// A message completed by this chunk.
    pub message: Option<Bytes>,
    /// Bytes of earlier, never to be completed data dropped by this chunk.
    /// The peer paid allowance for them, so they must be granted back.
    pub discarded: usize,
}

#[derive(Debug)]
struct Partial {
    size: usize,
    data: BytesMut,
}

/// Accumulates chunks into complete messages, one message at a time.
#[derive(Debug, Default)]
pub struct Reassembler {
    partial: Option<Partial>,
}

impl Reassembler {
    /// Creates a reassembler with no message in progress.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(declared size, bytes arrived)` of the message in progress.
    pub fn in_progress(&self) -> Option<(usize, usize)> {
        self.partial.as_ref().map(|p| (p.size, p.data.len()))
    }

    /// Adds one chunk.
    ///
    /// A non-zero `size_or_cont` starts a new message, abandoning any partial
    /// one (the peer gave up on it and restarted). A continuation with nothing
    /// in progress, or a chunk overflowing the declared size, is dropped along
    /// with the partial data.
    pub fn push(&mut self, size_or_cont: usize, chunk: &[u8]) -> Reassembly {
        let mut outcome = Reassembly::default();

        if size_or_cont != 0 {
            if let Some(old) = self.partial.take() {
                tracing::warn!(
                    size = old.size,
                    arrived = old.data.len(),
                    "incomplete message discarded"
                );
                outcome.discarded += old.data.len();
            }
            self.partial = Some(Partial {
                size: size_or_cont,
                // The declared size comes from the peer; grow as bytes arrive.
                data: BytesMut::with_capacity(size_or_cont.min(chunk.len())),
            });
        }

        let Some(partial) = self.partial.as_mut() else {
            tracing::warn!(arrived = chunk.len(), "continuation chunk without message start");
            outcome.discarded += chunk.len();
            return outcome;
        };
        if partial.data.len() + chunk.len() > partial.size {
            tracing::warn!(
                size = partial.size,
                arrived = partial.data.len() + chunk.len(),
                "chunk overflows declared message size"
            );
            outcome.discarded += partial.data.len() + chunk.len();
            self.partial = None;
            return outcome;
        }

        partial.data.extend_from_slice(chunk);
        if partial.data.len() == partial.size {
            if let Some(done) = self.partial.take() {
                outcome.message = Some(done.data.freeze());
            }
        }
        outcome
    }
}
