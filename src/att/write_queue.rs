//! Arena allocator for queued "Prepare Write" chunks.
//!
//! Backs the ATT *Prepare Write Request* / *Execute Write Request* pair: each prepared write
//! chunk is appended to a shared byte arena, and `Execute Write` either applies or discards all
//! chunks belonging to the requesting client in order.
//!
//! Only one client may hold records in the arena at a time. This mirrors the peer's own
//! client-locking behaviour: a second client's prepared writes would be meaningless to commit
//! alongside another client's, since Execute Write applies "all pending prepared values" without
//! per-client filtering on the wire.

use crate::att::handle::AttHandle;
use crate::Error;
use heapless::Vec as HVec;

/// One queued "Prepare Write" chunk.
#[derive(Debug, Clone, Copy)]
struct Record<C> {
    client: C,
    handle: AttHandle,
    offset: u16,
    start: usize,
    len: usize,
}

/// Shared arena of `CAPACITY` bytes, holding up to `MAX_RECORDS` prepared-write chunks.
///
/// `C` identifies a client connection; in this stack's single-connection model it is typically a
/// zero-sized or single-valued type, but the arena enforces the locking rule generically.
pub struct WriteQueue<C, const CAPACITY: usize, const MAX_RECORDS: usize> {
    arena: [u8; CAPACITY],
    used: usize,
    records: HVec<Record<C>, MAX_RECORDS>,
}

impl<C: PartialEq + Copy, const CAPACITY: usize, const MAX_RECORDS: usize>
    WriteQueue<C, CAPACITY, MAX_RECORDS>
{
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            arena: [0; CAPACITY],
            used: 0,
            records: HVec::new(),
        }
    }

    fn locked_by_other(&self, client: C) -> bool {
        self.records.iter().any(|r| r.client != client)
    }

    /// Appends a new chunk of `data` targeting `handle` at `offset`, queued by `client`.
    ///
    /// Fails if the arena doesn't have enough free space, if the record list is full, or if
    /// another client currently holds any records (the write queue has a single-client lock).
    pub fn allocate(
        &mut self,
        handle: AttHandle,
        offset: u16,
        data: &[u8],
        client: C,
    ) -> Result<(), Error> {
        if self.locked_by_other(client) {
            return Err(Error::QueueFull);
        }
        if self.used + data.len() > CAPACITY {
            return Err(Error::QueueFull);
        }

        let start = self.used;
        self.records
            .push(Record {
                client,
                handle,
                offset,
                start,
                len: data.len(),
            })
            .map_err(|_| Error::QueueFull)?;

        self.arena[start..start + data.len()].copy_from_slice(data);
        self.used += data.len();
        Ok(())
    }

    /// Releases all records held by `client`.
    ///
    /// A no-op if `client` does not currently hold the lock (eg. another client holds records,
    /// or the arena is empty).
    pub fn free(&mut self, client: C) {
        if self.records.is_empty() || self.locked_by_other(client) {
            return;
        }
        self.records.clear();
        self.used = 0;
    }

    /// Iterates the chunks held by `client`, in FIFO (insertion) order.
    ///
    /// Yields nothing if another client holds the lock.
    pub fn iter(&self, client: C) -> impl Iterator<Item = (AttHandle, u16, &[u8])> {
        let locked_out = self.locked_by_other(client);
        self.records.iter().filter_map(move |r| {
            if locked_out {
                None
            } else {
                Some((r.handle, r.offset, &self.arena[r.start..r.start + r.len]))
            }
        })
    }

    /// Returns whether the arena currently holds no queued chunks.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<C: PartialEq + Copy, const CAPACITY: usize, const MAX_RECORDS: usize> Default
    for WriteQueue<C, CAPACITY, MAX_RECORDS>
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_allocate_98_bytes_but_not_a_single_byte_more() {
        let mut q: WriteQueue<u8, 100, 8> = WriteQueue::new();
        let data = [0u8; 98];
        assert!(q.allocate(AttHandle::from_raw(1), 0, &data, 0).is_ok());
        assert!(q.allocate(AttHandle::from_raw(1), 98, &[0u8; 1], 0).is_err());
    }

    #[test]
    fn can_allocate_after_releasing() {
        let mut q: WriteQueue<u8, 100, 8> = WriteQueue::new();
        for _ in 0..5 {
            assert!(q
                .allocate(AttHandle::from_raw(1), 0, &[0u8; 98], 0)
                .is_ok());
            q.free(0);
        }
    }

    #[test]
    fn queue_can_be_iterated_in_order() {
        let mut q: WriteQueue<u8, 100, 8> = WriteQueue::new();
        q.allocate(AttHandle::from_raw(1), 0, &[1, 2, 3, 4, 5], 0)
            .unwrap();
        q.allocate(AttHandle::from_raw(2), 0, &[6, 7, 8, 8, 8], 0)
            .unwrap();
        q.allocate(AttHandle::from_raw(3), 0, &[100, 101, 102, 103, 104], 0)
            .unwrap();

        let chunks: heapless::Vec<_, 8> = q.iter(0).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].2, &[1, 2, 3, 4, 5]);
        assert_eq!(chunks[2].2, &[100, 101, 102, 103, 104]);
    }

    #[test]
    fn seems_to_be_full_when_locked_by_other_client() {
        let mut q: WriteQueue<u8, 100, 8> = WriteQueue::new();
        q.allocate(AttHandle::from_raw(1), 0, &[0u8; 15], 1).unwrap();
        assert!(q.allocate(AttHandle::from_raw(1), 0, &[0u8; 15], 2).is_err());
    }

    #[test]
    fn can_not_be_freed_by_other_clients() {
        let mut q: WriteQueue<u8, 100, 8> = WriteQueue::new();
        q.allocate(AttHandle::from_raw(1), 0, &[0u8; 15], 1).unwrap();
        q.free(2);
        assert!(q.allocate(AttHandle::from_raw(1), 0, &[0u8; 15], 2).is_err());
    }

    #[test]
    fn can_be_freed_and_allocated_again_by_a_new_client() {
        let mut q: WriteQueue<u8, 100, 8> = WriteQueue::new();
        q.allocate(AttHandle::from_raw(1), 0, &[0u8; 15], 1).unwrap();
        q.free(1);
        assert!(q.allocate(AttHandle::from_raw(1), 0, &[0u8; 15], 2).is_ok());
    }
}
