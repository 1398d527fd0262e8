// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::num::NonZeroUsize;
use std::sync::{Condvar, Mutex, MutexGuard};

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum QueueError {
    /// No room for another byte.  Expected under load; callers retry or drop.
    #[error("queue is full")]
    Full,

    /// Nothing to dequeue.  Expected whenever the queue drains.
    #[error("queue is empty")]
    Empty,

    #[error("unable to reserve {capacity} bytes of queue storage")]
    Alloc { capacity: usize },

    /// A holder of the queue lock panicked, leaving the ring in an unknown
    /// state.
    #[error("queue lock poisoned")]
    Poisoned,
}
impl QueueError {
    /// Is this one of the flow-control outcomes (full/empty) rather than an
    /// actual failure of the queue?
    pub fn is_flow_control(&self) -> bool {
        matches!(self, QueueError::Full | QueueError::Empty)
    }
}

struct Ring {
    buf: Box<[u8]>,
    front: usize,
    rear: usize,
    len: usize,
}
impl Ring {
    fn capacity(&self) -> usize {
        self.buf.len()
    }
    fn is_full(&self) -> bool {
        self.len == self.capacity()
    }
    fn is_empty(&self) -> bool {
        self.len == 0
    }
    fn push(&mut self, data: u8) -> Result<(), QueueError> {
        if self.is_full() {
            return Err(QueueError::Full);
        }
        self.buf[self.rear] = data;
        self.rear = (self.rear + 1) % self.capacity();
        self.len += 1;
        Ok(())
    }
    fn pop(&mut self) -> Result<u8, QueueError> {
        if self.is_empty() {
            return Err(QueueError::Empty);
        }
        let data = self.buf[self.front];
        self.front = (self.front + 1) % self.capacity();
        self.len -= 1;
        Ok(data)
    }
}

/// Fixed-capacity FIFO of bytes, safe to share between an interrupt
/// context and any number of application threads.
///
/// Every operation holds the queue lock across its entire check-and-mutate
/// sequence.  The non-blocking operations never wait on queue state; the
/// `*_wait` variants sleep until the opposite operation makes progress.
pub struct ByteQueue {
    ring: Mutex<Ring>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl std::fmt::Debug for ByteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ds = f.debug_struct("ByteQueue");
        ds.field("capacity", &self.capacity);
        match self.ring.try_lock() {
            Ok(ring) => ds
                .field("front", &ring.front)
                .field("rear", &ring.rear)
                .field("len", &ring.len),
            Err(_) => ds.field("ring", &"<locked>"),
        };
        ds.finish()
    }
}

impl ByteQueue {
    /// Create a queue holding at most `capacity` bytes.
    ///
    /// Storage is reserved up front; failure to do so is reported rather
    /// than aborting the process.
    pub fn new(capacity: NonZeroUsize) -> Result<Self, QueueError> {
        let capacity = capacity.get();
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| QueueError::Alloc { capacity })?;
        buf.resize(capacity, 0u8);

        Ok(Self {
            ring: Mutex::new(Ring {
                buf: buf.into_boxed_slice(),
                front: 0,
                rear: 0,
                len: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ring>, QueueError> {
        self.ring.lock().map_err(|_| QueueError::Poisoned)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a byte, failing with [`QueueError::Full`] if there is no room.
    pub fn enqueue(&self, data: u8) -> Result<(), QueueError> {
        let mut ring = self.lock()?;
        ring.push(data)?;
        drop(ring);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest byte, failing with [`QueueError::Empty`] if there is
    /// none.
    pub fn dequeue(&self) -> Result<u8, QueueError> {
        let mut ring = self.lock()?;
        let data = ring.pop()?;
        drop(ring);

        self.not_full.notify_one();
        Ok(data)
    }

    /// Append a byte, sleeping until there is room for it.
    pub fn enqueue_wait(&self, data: u8) -> Result<(), QueueError> {
        let ring = self.lock()?;
        let mut ring = self
            .not_full
            .wait_while(ring, |ring| ring.is_full())
            .map_err(|_| QueueError::Poisoned)?;
        ring.push(data)?;
        drop(ring);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest byte, sleeping until one is available.
    pub fn dequeue_wait(&self) -> Result<u8, QueueError> {
        let ring = self.lock()?;
        let mut ring = self
            .not_empty
            .wait_while(ring, |ring| ring.is_empty())
            .map_err(|_| QueueError::Poisoned)?;
        let data = ring.pop()?;
        drop(ring);

        self.not_full.notify_one();
        Ok(data)
    }

    pub fn is_full(&self) -> Result<bool, QueueError> {
        Ok(self.lock()?.is_full())
    }
    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.lock()?.is_empty())
    }
    /// Number of bytes currently queued.
    pub fn len(&self) -> Result<usize, QueueError> {
        Ok(self.lock()?.len)
    }

    /// Poison the queue lock by panicking while holding it.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let res = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = self.ring.lock().unwrap();
                panic!("poisoning queue lock");
            })
            .join()
        });
        assert!(res.is_err());
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use super::*;

    use proptest::prelude::*;

    fn queue(capacity: usize) -> ByteQueue {
        ByteQueue::new(NonZeroUsize::new(capacity).unwrap()).unwrap()
    }

    #[test]
    fn test_capacity_and_len() {
        let q = queue(4);
        assert_eq!(q.capacity(), 4);
        assert_eq!(q.len(), Ok(0));
        assert_eq!(q.is_empty(), Ok(true));
        assert_eq!(q.is_full(), Ok(false));

        for b in 0..3 {
            q.enqueue(b).unwrap();
        }
        assert_eq!(q.len(), Ok(3));
        assert_eq!(q.is_empty(), Ok(false));
        assert_eq!(q.is_full(), Ok(false));
    }

    #[test]
    fn test_full_rejects() {
        let q = queue(2);
        q.enqueue(1).unwrap();
        q.enqueue(2).unwrap();
        assert_eq!(q.is_full(), Ok(true));
        assert_eq!(q.enqueue(3), Err(QueueError::Full));
        assert_eq!(q.len(), Ok(2));

        assert_eq!(q.dequeue(), Ok(1));
        assert_eq!(q.dequeue(), Ok(2));
    }

    #[test]
    fn test_empty_rejects() {
        let q = queue(2);
        assert_eq!(q.dequeue(), Err(QueueError::Empty));
        assert_eq!(q.len(), Ok(0));
    }

    #[test]
    fn test_wrap_around() {
        let q = queue(3);
        for round in 0..10u8 {
            q.enqueue(round).unwrap();
            q.enqueue(round.wrapping_mul(7)).unwrap();
            assert_eq!(q.dequeue(), Ok(round));
            assert_eq!(q.dequeue(), Ok(round.wrapping_mul(7)));
        }
        assert_eq!(q.is_empty(), Ok(true));
    }

    #[test]
    fn test_poisoned_lock() {
        let q = queue(4);
        q.enqueue(1).unwrap();
        q.poison();

        assert_eq!(q.enqueue(2), Err(QueueError::Poisoned));
        assert_eq!(q.dequeue(), Err(QueueError::Poisoned));
        assert_eq!(q.len(), Err(QueueError::Poisoned));
        assert!(!QueueError::Poisoned.is_flow_control());
        assert!(QueueError::Full.is_flow_control());
    }

    #[test]
    fn test_wait_handoff() {
        // Capacity far below the transfer size forces both sides to wait
        let q = Arc::new(queue(2));
        let producer = {
            let q = q.clone();
            std::thread::spawn(move || {
                for b in 0..=255u8 {
                    q.enqueue_wait(b).unwrap();
                }
            })
        };
        let received: Vec<u8> =
            (0..256).map(|_| q.dequeue_wait().unwrap()).collect();
        producer.join().unwrap();

        assert_eq!(received, (0..=255u8).collect::<Vec<_>>());
        assert_eq!(q.is_empty(), Ok(true));
    }

    #[test]
    fn test_concurrent_producers() {
        let q = queue(64);
        std::thread::scope(|s| {
            for t in 0..4u8 {
                let q = &q;
                s.spawn(move || {
                    for _ in 0..16 {
                        q.enqueue(t).unwrap();
                    }
                });
            }
        });
        assert_eq!(q.is_full(), Ok(true));

        let mut counts = [0usize; 4];
        while let Ok(b) = q.dequeue() {
            counts[b as usize] += 1;
        }
        assert_eq!(counts, [16; 4]);
    }

    #[test]
    fn test_debug_output() {
        let q = queue(8);
        q.enqueue(0xaa).unwrap();
        let out = format!("{q:?}");
        assert!(out.contains("capacity: 8"));
        assert!(out.contains("len: 1"));
    }

    proptest! {
        #[test]
        fn fifo_order_and_bounds(
            capacity in 1usize..16,
            ops in prop::collection::vec(prop::option::of(any::<u8>()), 0..128),
        ) {
            let q = queue(capacity);
            let mut model = VecDeque::new();

            for op in ops {
                match op {
                    Some(b) => {
                        let res = q.enqueue(b);
                        if model.len() == capacity {
                            prop_assert_eq!(res, Err(QueueError::Full));
                        } else {
                            prop_assert_eq!(res, Ok(()));
                            model.push_back(b);
                        }
                    }
                    None => {
                        let expected =
                            model.pop_front().ok_or(QueueError::Empty);
                        prop_assert_eq!(q.dequeue(), expected);
                    }
                }
                let len = q.len().unwrap();
                prop_assert!(len <= capacity);
                prop_assert_eq!(len, model.len());
            }
        }
    }
}
