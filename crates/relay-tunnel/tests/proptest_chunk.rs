//! Property-based tests for message chunking and reassembly.

use bytes::Bytes;
use proptest::prelude::*;
use relay_tunnel::chunk::{split, Reassembler};

fn any_message() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 1..4096)
}

proptest! {
    /// Every message survives a split and reassembly for any positive chunk limit.
    #[test]
    fn test_split_reassemble_roundtrip(data in any_message(), chunk_limit in 1usize..512) {
        let message = Bytes::from(data);
        let chunks: Vec<_> = split(&message, chunk_limit).collect();

        prop_assert_eq!(chunks.len(), message.len().div_ceil(chunk_limit));
        prop_assert_eq!(chunks[0].0, message.len());
        prop_assert!(chunks[1..].iter().all(|(tag, _)| *tag == 0));
        prop_assert!(chunks.iter().all(|(_, chunk)| !chunk.is_empty() && chunk.len() <= chunk_limit));

        let mut reassembler = Reassembler::new();
        let last = chunks.len() - 1;
        for (i, (size_or_cont, chunk)) in chunks.iter().enumerate() {
            let outcome = reassembler.push(*size_or_cont, chunk);
            prop_assert_eq!(outcome.discarded, 0);
            if i == last {
                prop_assert_eq!(outcome.message.as_ref(), Some(&message));
            } else {
                prop_assert!(outcome.message.is_none());
            }
        }
        prop_assert!(reassembler.in_progress().is_none());
    }

    /// A restarted message drops exactly the bytes of the abandoned one.
    #[test]
    fn test_abandoned_prefix_is_discarded(
        abandoned in any_message(),
        sent_chunks in 1usize..8,
        data in any_message(),
        chunk_limit in 1usize..256,
    ) {
        let abandoned = Bytes::from(abandoned);
        let message = Bytes::from(data);
        let mut reassembler = Reassembler::new();

        let prefix: Vec<_> = split(&abandoned, chunk_limit).collect();
        let cut = sent_chunks.min(prefix.len().saturating_sub(1));
        let mut arrived = 0;
        for (size_or_cont, chunk) in prefix.iter().take(cut) {
            arrived += chunk.len();
            prop_assert!(reassembler.push(*size_or_cont, chunk).message.is_none());
        }

        let mut discarded = 0;
        let mut completed = None;
        for (size_or_cont, chunk) in split(&message, chunk_limit) {
            let outcome = reassembler.push(size_or_cont, &chunk);
            discarded += outcome.discarded;
            if outcome.message.is_some() {
                completed = outcome.message;
            }
        }
        prop_assert_eq!(discarded, arrived);
        prop_assert_eq!(completed, Some(message));
    }
}
