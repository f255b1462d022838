//! Bounded circular buffer primitive and process-wide registry.
//!
//! A `BoundedBuffer` is a fixed-capacity FIFO of opaque byte blobs, each
//! carrying its own length. Overflow drops the oldest element to make room
//! for the newest (drop-head policy) rather than rejecting the push.
//!
//! The original C implementation (`buffer.c`) exposed `pop_size` and `pop`
//! as two calls sharing one held lock — a latent footgun where a caller who
//! forgets the matching `pop` deadlocks every later access. This module
//! exposes only [`BoundedBuffer::peek_and_pop`], which takes and releases the
//! lock atomically; there is no way to observe a size without also popping.

pub mod synced;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::constants::{MAX_BUFFER_CAPACITY, MAX_REGISTERED_BUFFERS};
use crate::error::{BridgeError, BridgeResult};

/// A fixed-capacity FIFO of opaque byte blobs with drop-oldest overflow.
#[derive(Debug)]
pub struct BoundedBuffer {
    capacity: usize,
    elements: Mutex<VecDeque<Vec<u8>>>,
}

impl BoundedBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            elements: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
        }
    }

    /// Fixed capacity this buffer was created with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of elements currently resident.
    #[must_use]
    pub fn count(&self) -> usize {
        self.elements.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the buffer is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.count() >= self.capacity
    }

    /// Copy `blob` into the tail of the FIFO.
    ///
    /// Returns `true` if an element was dropped to make room (overflow),
    /// `false` otherwise. A zero-length blob is a valid push and stores an
    /// empty payload.
    pub fn push(&self, blob: &[u8]) -> bool {
        let mut guard = self.elements.lock().unwrap_or_else(|e| e.into_inner());
        let overflowed = if guard.len() >= self.capacity {
            guard.pop_front();
            true
        } else {
            false
        };
        guard.push_back(blob.to_vec());
        overflowed
    }

    /// Atomically read the size of the head element and remove it.
    ///
    /// Replaces the original's `pop_size` + `pop` pair with a single
    /// lock acquisition (see module docs).
    pub fn peek_and_pop(&self) -> Option<Vec<u8>> {
        let mut guard = self.elements.lock().unwrap_or_else(|e| e.into_inner());
        guard.pop_front()
    }

    /// Discard every resident element, resetting the buffer to empty.
    pub fn clean(&self) {
        let mut guard = self.elements.lock().unwrap_or_else(|e| e.into_inner());
        guard.clear();
    }
}

/// Opaque handle to a buffer registered with a [`BufferRegistry`].
///
/// Holds the buffer by `Arc` rather than an integer index, so a handle
/// remains valid and independently usable even if the registry that minted
/// it is dropped.
#[derive(Debug, Clone)]
pub struct BufferHandle(Arc<BoundedBuffer>);

impl BufferHandle {
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.0.capacity()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.0.count()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.0.is_full()
    }

    pub fn push(&self, blob: &[u8]) -> bool {
        self.0.push(blob)
    }

    pub fn peek_and_pop(&self) -> Option<Vec<u8>> {
        self.0.peek_and_pop()
    }

    pub fn clean(&self) {
        self.0.clean();
    }
}

/// Process-wide pool that hands out [`BufferHandle`]s.
///
/// Mirrors the original's fixed-size global array, but as an owned value:
/// a single supervisor constructs one `BufferRegistry` and passes handles
/// into each endpoint's constructor rather than relying on global state.
#[derive(Debug, Default)]
pub struct BufferRegistry {
    registered: Mutex<usize>,
}

impl BufferRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new buffer of the given `capacity`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ParameterError`] if `capacity` exceeds
    /// [`MAX_BUFFER_CAPACITY`], or [`BridgeError::BufferError`] if the
    /// process-wide registration ceiling ([`MAX_REGISTERED_BUFFERS`]) would
    /// be exceeded.
    pub fn register(&self, capacity: usize) -> BridgeResult<BufferHandle> {
        if capacity > MAX_BUFFER_CAPACITY {
            return Err(BridgeError::ParameterError(format!(
                "buffer capacity {capacity} exceeds ceiling {MAX_BUFFER_CAPACITY}"
            )));
        }
        let mut registered = self.registered.lock().unwrap_or_else(|e| e.into_inner());
        if *registered >= MAX_REGISTERED_BUFFERS {
            return Err(BridgeError::BufferError(format!(
                "buffer registry ceiling {MAX_REGISTERED_BUFFERS} reached"
            )));
        }
        *registered += 1;
        Ok(BufferHandle(Arc::new(BoundedBuffer::new(capacity))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_fifo_order() {
        let buf = BoundedBuffer::new(4);
        buf.push(b"one");
        buf.push(b"two");
        buf.push(b"three");
        assert_eq!(buf.peek_and_pop(), Some(b"one".to_vec()));
        assert_eq!(buf.peek_and_pop(), Some(b"two".to_vec()));
        assert_eq!(buf.peek_and_pop(), Some(b"three".to_vec()));
        assert_eq!(buf.peek_and_pop(), None);
    }

    #[test]
    fn test_count_never_exceeds_capacity() {
        let buf = BoundedBuffer::new(3);
        for i in 0u8..10 {
            buf.push(&[i]);
            assert!(buf.count() <= buf.capacity());
        }
        assert_eq!(buf.count(), 3);
    }

    #[test]
    fn test_overflow_drops_oldest_and_preserves_tail() {
        // S2: capacity 2000, push 2500, expect [500..2500) preserved in order.
        let capacity = 2000;
        let buf = BoundedBuffer::new(capacity);
        for i in 0u32..2500 {
            buf.push(&i.to_le_bytes());
        }
        assert_eq!(buf.count(), capacity);
        for expected in 500u32..2500 {
            let popped = buf.peek_and_pop().expect("buffer should not be empty yet");
            assert_eq!(u32::from_le_bytes(popped.try_into().unwrap()), expected);
        }
        assert_eq!(buf.peek_and_pop(), None);
    }

    #[test]
    fn test_zero_length_push_stores_empty_payload() {
        let buf = BoundedBuffer::new(4);
        buf.push(&[]);
        let popped = buf.peek_and_pop().expect("zero-length push should still enqueue");
        assert!(popped.is_empty());
    }

    #[test]
    fn test_clean_resets_to_empty() {
        let buf = BoundedBuffer::new(4);
        buf.push(b"a");
        buf.push(b"b");
        buf.clean();
        assert_eq!(buf.count(), 0);
        assert_eq!(buf.peek_and_pop(), None);
    }

    #[test]
    fn test_registry_enforces_capacity_ceiling() {
        let registry = BufferRegistry::new();
        let err = registry
            .register(MAX_BUFFER_CAPACITY + 1)
            .expect_err("oversized capacity must be rejected");
        assert!(matches!(err, BridgeError::ParameterError(_)));
    }

    #[test]
    fn test_registry_enforces_count_ceiling() {
        let registry = BufferRegistry::new();
        for _ in 0..MAX_REGISTERED_BUFFERS {
            registry.register(16).expect("should be under the ceiling");
        }
        let err = registry
            .register(16)
            .expect_err("should be rejected once the ceiling is reached");
        assert!(matches!(err, BridgeError::BufferError(_)));
    }

    #[test]
    fn test_handles_are_independent_across_registrations() {
        let registry = BufferRegistry::new();
        let a = registry.register(8).unwrap();
        let b = registry.register(8).unwrap();
        a.push(b"hello");
        assert_eq!(a.count(), 1);
        assert_eq!(b.count(), 0);
    }
}
