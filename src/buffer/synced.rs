//! N-ary synced buffer group: the Rust replacement for the original's
//! "BufferPair" (data + timestamp) and MQTT "triple" (topic + payload +
//! timestamp).
//!
//! `canbuf.c` and `mqttbuf.c` each hand-derive the pair/triple-sync
//! invariant at every call site: lock, read every sub-buffer's count,
//! compare them all, pop each in turn, unlock. This module writes that
//! logic exactly once as [`SyncedBuffers<N>`] — a single mutex guarding `N`
//! parallel `VecDeque`s that are only ever pushed or popped together, so the
//! invariant "all `N` counts are equal outside the lock" is structural
//! rather than something every caller must remember to re-check.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{BridgeError, BridgeResult};

/// `N` FIFOs of opaque blobs, always mutated together under one lock.
///
/// A message is `N` blobs — one per slot — enqueued or dequeued as a unit.
/// Slot 0 is conventionally the frame/payload data; the last slot is
/// conventionally the millisecond timestamp.
#[derive(Debug)]
pub struct SyncedBuffers<const N: usize> {
    capacity: usize,
    slots: Mutex<[VecDeque<Vec<u8>>; N]>,
}

impl<const N: usize> SyncedBuffers<N> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Mutex::new(std::array::from_fn(|_| VecDeque::with_capacity(capacity.min(64)))),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of complete messages resident (every slot's length, which are
    /// always equal by construction).
    #[must_use]
    pub fn count(&self) -> usize {
        let guard = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        guard[0].len()
    }

    /// Enqueue one message: exactly `N` blobs, pushed together.
    ///
    /// Drop-head overflow applies per slot simultaneously, so the pair-sync
    /// invariant holds even across an overflowing push.
    pub fn enqueue(&self, blobs: [Vec<u8>; N]) {
        let mut guard = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for (slot, blob) in guard.iter_mut().zip(blobs) {
            if slot.len() >= self.capacity {
                slot.pop_front();
            }
            slot.push_back(blob);
        }
    }

    /// Dequeue one message, or `Ok(None)` if the group is empty.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::BufferError`] if the slots are found to hold
    /// differing counts — the pair/triple-sync invariant has been violated,
    /// which the caller must treat as fatal to the owning endpoint (flush
    /// and transition to `DISCONNECTED` per §4.2).
    pub fn dequeue(&self) -> BridgeResult<Option<[Vec<u8>; N]>> {
        let mut guard = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let counts: Vec<usize> = guard.iter().map(VecDeque::len).collect();
        if counts.iter().all(|&c| c == 0) {
            return Ok(None);
        }
        if counts.iter().any(|&c| c != counts[0]) {
            return Err(BridgeError::BufferError(format!(
                "synced buffer group out of sync: slot counts {counts:?}"
            )));
        }
        let mut popped: [Vec<u8>; N] = std::array::from_fn(|_| Vec::new());
        for (slot, out) in guard.iter_mut().zip(popped.iter_mut()) {
            *out = slot
                .pop_front()
                .expect("counts were verified equal and nonzero above");
        }
        Ok(Some(popped))
    }

    /// Discard every resident message across all slots.
    pub fn clean(&self) {
        let mut guard = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for slot in guard.iter_mut() {
            slot.clear();
        }
    }
}

/// A data/timestamp pair, as used by the CAN and TCP-server endpoints.
pub type BufferPair = SyncedBuffers<2>;

/// A topic/payload/timestamp triple, as used by the MQTT endpoint.
pub type BufferTriple = SyncedBuffers<3>;

/// Pack a frame and a millisecond timestamp into a [`BufferPair`] message.
#[must_use]
pub fn pair_message(frame: &[u8], timestamp_ms: u64) -> [Vec<u8>; 2] {
    [frame.to_vec(), timestamp_ms.to_le_bytes().to_vec()]
}

/// Unpack a [`BufferPair`] message back into `(frame, timestamp_ms)`.
///
/// # Panics
///
/// Panics if the timestamp slot is not exactly 8 bytes — this would itself
/// indicate a pair-sync violation upstream and is treated the same as any
/// other internal invariant breach.
#[must_use]
pub fn unpack_pair_message(message: [Vec<u8>; 2]) -> (Vec<u8>, u64) {
    let [frame, stamp] = message;
    let stamp_bytes: [u8; 8] = stamp
        .try_into()
        .expect("timestamp slot must always be 8 bytes");
    (frame, u64::from_le_bytes(stamp_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_sync_holds_across_push_and_pop() {
        let pair = BufferPair::new(16);
        pair.enqueue(pair_message(b"frame-1", 1000));
        pair.enqueue(pair_message(b"frame-2", 2000));
        assert_eq!(pair.count(), 2);

        let (frame, ts) = unpack_pair_message(pair.dequeue().unwrap().unwrap());
        assert_eq!(frame, b"frame-1");
        assert_eq!(ts, 1000);
        assert_eq!(pair.count(), 1);
    }

    #[test]
    fn test_dequeue_empty_returns_none() {
        let pair = BufferPair::new(4);
        assert_eq!(pair.dequeue().unwrap(), None);
    }

    #[test]
    fn test_triple_enqueue_dequeue_roundtrip() {
        let triple = BufferTriple::new(8);
        triple.enqueue([b"topic".to_vec(), b"payload".to_vec(), 42u64.to_le_bytes().to_vec()]);
        let [topic, payload, stamp] = triple.dequeue().unwrap().unwrap();
        assert_eq!(topic, b"topic");
        assert_eq!(payload, b"payload");
        assert_eq!(u64::from_le_bytes(stamp.try_into().unwrap()), 42);
    }

    #[test]
    fn test_overflow_preserves_pair_sync() {
        let pair = BufferPair::new(2);
        for i in 0u64..5 {
            pair.enqueue(pair_message(&[i as u8], i));
        }
        assert_eq!(pair.count(), 2);
        let (frame, ts) = unpack_pair_message(pair.dequeue().unwrap().unwrap());
        assert_eq!(frame, vec![3u8]);
        assert_eq!(ts, 3);
    }

    #[test]
    fn test_clean_empties_every_slot() {
        let triple = BufferTriple::new(8);
        triple.enqueue([b"t".to_vec(), b"p".to_vec(), 1u64.to_le_bytes().to_vec()]);
        triple.clean();
        assert_eq!(triple.count(), 0);
        assert_eq!(triple.dequeue().unwrap(), None);
    }
}
