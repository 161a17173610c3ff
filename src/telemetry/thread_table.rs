//! Fixed-capacity table of per-thread entries.

use serde::{Serialize, Serializer};

/// Maximum number of threads tracked by any telemetry table.
///
/// Threads beyond this bound are not tracked.
pub const MAX_TRACKED_THREADS: usize = 16;

/// Inline array of up to [`MAX_TRACKED_THREADS`] entries.
///
/// Never allocates; pushing into a full table drops the entry.
#[derive(Debug, Clone, Copy)]
pub struct ThreadTable<T: Copy + Default> {
    entries: [T; MAX_TRACKED_THREADS],
    len: usize,
}

impl<T: Copy + Default> Default for ThreadTable<T> {
    fn default() -> Self {
        Self {
            entries: [T::default(); MAX_TRACKED_THREADS],
            len: 0,
        }
    }
}

impl<T: Copy + Default> ThreadTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refills the table through a host call that writes into a buffer and
    /// returns the number of entries written.
    pub fn fill_with(&mut self, fill: impl FnOnce(&mut [T]) -> usize) {
        self.entries = [T::default(); MAX_TRACKED_THREADS];
        self.len = fill(&mut self.entries).min(MAX_TRACKED_THREADS);
    }

    /// Appends an entry. Returns `false` if the table was full.
    pub fn push(&mut self, entry: T) -> bool {
        match self.entries.get_mut(self.len) {
            Some(slot) => {
                *slot = entry;
                self.len += 1;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.entries[..self.len]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T: Copy + Default + PartialEq> PartialEq for ThreadTable<T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Copy + Default + Eq> Eq for ThreadTable<T> {}

impl<T: Copy + Default + Serialize> Serialize for ThreadTable<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.as_slice())
    }
}

impl<'a, T: Copy + Default> IntoIterator for &'a ThreadTable<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_until_full() {
        let mut table = ThreadTable::<u32>::new();
        for i in 0..MAX_TRACKED_THREADS as u32 {
            assert!(table.push(i));
        }
        assert!(!table.push(99));
        assert_eq!(table.len(), MAX_TRACKED_THREADS);
        assert_eq!(table.as_slice().last(), Some(&(MAX_TRACKED_THREADS as u32 - 1)));
    }

    #[test]
    fn test_fill_with_clamps_reported_count() {
        let mut table = ThreadTable::<u32>::new();
        // A misbehaving source claiming more entries than the buffer holds
        table.fill_with(|buf| {
            buf.iter_mut().for_each(|e| *e = 7);
            buf.len() + 10
        });
        assert_eq!(table.len(), MAX_TRACKED_THREADS);
    }

    #[test]
    fn test_fill_with_clears_stale_entries() {
        let mut table = ThreadTable::<u32>::new();
        table.fill_with(|buf| {
            buf[0] = 1;
            buf[1] = 2;
            2
        });
        table.fill_with(|buf| {
            buf[0] = 3;
            1
        });
        assert_eq!(table.as_slice(), &[3]);
    }

    #[test]
    fn test_equality_ignores_unused_slots() {
        let mut a = ThreadTable::<u32>::new();
        let mut b = ThreadTable::<u32>::new();
        a.fill_with(|buf| {
            buf[0] = 5;
            buf[1] = 6;
            1
        });
        b.push(5);
        assert_eq!(a, b);
    }

    #[test]
    fn test_serializes_as_sequence() {
        let mut table = ThreadTable::<u32>::new();
        table.push(1);
        table.push(2);
        assert_eq!(serde_json::to_string(&table).unwrap(), "[1,2]");
    }
}
