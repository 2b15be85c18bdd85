//! Notification reassembly buffer.
//!
//! Peers that cannot fit an application value into one notification send it
//! as consecutive fragments. A buffer accumulates fragments in arrival order
//! and yields the concatenation once the configured count is reached.

use bytes::{Bytes, BytesMut};

/// Accumulates notification fragments for one characteristic.
#[derive(Debug)]
pub(crate) struct NotifyBuffer {
    target: usize,
    fragments: Vec<Bytes>,
}

impl NotifyBuffer {
    /// Creates a buffer that reassembles `target` fragments per value.
    pub(crate) fn new(target: usize) -> Self {
        Self {
            target,
            fragments: Vec::with_capacity(target),
        }
    }

    /// Appends a fragment.
    ///
    /// Returns the reassembled value once the target count is reached; the
    /// buffer resets for the next value. A fragment arriving into a buffer
    /// that is somehow already full resets it first, so a desynchronized
    /// peer starts a fresh value rather than corrupting the current one.
    pub(crate) fn push(&mut self, fragment: Bytes) -> Option<Bytes> {
        if self.fragments.len() >= self.target {
            tracing::warn!(
                "reassembly buffer overflow at {} fragments, resetting",
                self.fragments.len()
            );
            self.reset();
        }
        self.fragments.push(fragment);
        if self.fragments.len() < self.target {
            return None;
        }

        let total: usize = self.fragments.iter().map(Bytes::len).sum();
        let mut value = BytesMut::with_capacity(total);
        for fragment in self.fragments.drain(..) {
            value.extend_from_slice(&fragment);
        }
        Some(value.freeze())
    }

    /// Discards any accumulated fragments.
    pub(crate) fn reset(&mut self) {
        self.fragments.clear();
    }

    /// Returns the number of fragments currently held.
    pub(crate) fn len(&self) -> usize {
        self.fragments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yields_only_when_full() {
        let mut buffer = NotifyBuffer::new(3);
        assert!(buffer.push(Bytes::from_static(b"ab")).is_none());
        assert!(buffer.push(Bytes::from_static(b"cd")).is_none());
        assert_eq!(buffer.len(), 2);

        let value = buffer.push(Bytes::from_static(b"ef")).unwrap();
        assert_eq!(&value[..], b"abcdef");
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_resets_between_values() {
        let mut buffer = NotifyBuffer::new(2);
        assert!(buffer.push(Bytes::from_static(b"1")).is_none());
        assert_eq!(&buffer.push(Bytes::from_static(b"2")).unwrap()[..], b"12");

        assert!(buffer.push(Bytes::from_static(b"3")).is_none());
        assert_eq!(&buffer.push(Bytes::from_static(b"4")).unwrap()[..], b"34");
    }

    #[test]
    fn test_single_fragment_target() {
        let mut buffer = NotifyBuffer::new(1);
        assert_eq!(&buffer.push(Bytes::from_static(b"x")).unwrap()[..], b"x");
    }

    #[test]
    fn test_explicit_reset_discards_partial_value() {
        let mut buffer = NotifyBuffer::new(3);
        let _ = buffer.push(Bytes::from_static(b"ab"));
        buffer.reset();

        assert!(buffer.push(Bytes::from_static(b"cd")).is_none());
        assert!(buffer.push(Bytes::from_static(b"ef")).is_none());
        assert_eq!(&buffer.push(Bytes::from_static(b"gh")).unwrap()[..], b"cdefgh");
    }

    #[test]
    fn test_overflow_resets_before_accepting() {
        let mut buffer = NotifyBuffer::new(2);
        let _ = buffer.push(Bytes::from_static(b"a"));
        // Force an inconsistent state: shrink the target below the fill
        buffer.target = 1;
        buffer.fragments.push(Bytes::from_static(b"b"));

        // Overflowed buffer resets, then accepts the fragment as a new value
        assert_eq!(&buffer.push(Bytes::from_static(b"c")).unwrap()[..], b"c");
    }
}
