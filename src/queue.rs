//! A bounded ring of equal-size byte slots, connecting one compression
//! worker to the serializing thread of the writer pipeline.
//!
//! Exactly one producer and one consumer use each queue. The producer
//! blocks while all slots are taken, which bounds the memory of the whole
//! pipeline regardless of image size. All slot memory is allocated once,
//! when the queue is constructed.

use crate::error::{Error, Result, UnitResult};
use crate::pipeline::ErrorCell;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Number of payload slots per queue: small enough to bound memory,
/// large enough to hide compression time jitter between blocks.
pub(crate) const SLOTS_PER_QUEUE: usize = 4;

/// One fixed-capacity payload slot.
#[derive(Debug)]
struct Slot {
    block_id: u64,
    payload_len: usize,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct Occupancy {
    taken: usize,
    read_index: usize,
    write_index: usize,
}

/// A bounded single-producer single-consumer queue
/// of compressed block payloads.
#[derive(Debug)]
pub(crate) struct BlockQueue {
    slots: Vec<Mutex<Slot>>,
    occupancy: Mutex<Occupancy>,
    space_available: Condvar,
    data_available: Condvar,
}

impl BlockQueue {
    /// A queue of `SLOTS_PER_QUEUE` slots, each able to hold
    /// `slot_capacity` payload bytes.
    pub fn new(slot_capacity: usize) -> Self {
        BlockQueue {
            slots: (0..SLOTS_PER_QUEUE)
                .map(|_| {
                    Mutex::new(Slot {
                        block_id: 0,
                        payload_len: 0,
                        bytes: vec![0_u8; slot_capacity],
                    })
                })
                .collect(),
            occupancy: Mutex::new(Occupancy {
                taken: 0,
                read_index: 0,
                write_index: 0,
            }),
            space_available: Condvar::new(),
            data_available: Condvar::new(),
        }
    }

    /// Producer side: block until a slot is free, copy the payload into it,
    /// and publish it to the consumer. Returns `Cancelled` when the pipeline
    /// was halted while waiting.
    pub fn push(&self, run: &ErrorCell, block_id: u64, payload: &[u8]) -> UnitResult {
        let write_index = {
            let mut occupancy = self.occupancy.lock().expect("queue poisoned");
            while occupancy.taken == self.slots.len() && !run.is_cancelled() {
                occupancy = self
                    .space_available
                    .wait(occupancy)
                    .expect("queue poisoned");
            }

            if run.is_cancelled() {
                return Err(Error::Cancelled);
            }

            occupancy.write_index
        };

        {
            let mut slot = self.slots[write_index].lock().expect("queue poisoned");
            if payload.len() > slot.bytes.len() {
                return Err(Error::CompressionFailed);
            }

            slot.bytes[..payload.len()].copy_from_slice(payload);
            slot.payload_len = payload.len();
            slot.block_id = block_id;
        }

        let mut occupancy = self.occupancy.lock().expect("queue poisoned");
        occupancy.write_index = (occupancy.write_index + 1) % self.slots.len();
        occupancy.taken += 1;
        drop(occupancy);

        self.data_available.notify_one();
        Ok(())
    }

    /// Consumer side: block until a payload is available and borrow it.
    /// Call [`ReadSlot::pop`] to release the slot back to the producer.
    /// Returns `Cancelled` when the pipeline was halted while waiting.
    pub fn wait_read_slot(&self, run: &ErrorCell) -> Result<ReadSlot<'_>> {
        let read_index = {
            let mut occupancy = self.occupancy.lock().expect("queue poisoned");
            while occupancy.taken == 0 && !run.is_cancelled() {
                occupancy = self.data_available.wait(occupancy).expect("queue poisoned");
            }

            if run.is_cancelled() {
                return Err(Error::Cancelled);
            }

            occupancy.read_index
        };

        Ok(ReadSlot {
            queue: self,
            guard: self.slots[read_index].lock().expect("queue poisoned"),
        })
    }

    /// Wake all waiters so they can observe cancellation.
    pub fn interrupt(&self) {
        self.space_available.notify_all();
        self.data_available.notify_all();
    }
}

/// Borrow of the oldest payload in a queue.
/// The slot stays occupied until this is [popped](ReadSlot::pop).
#[derive(Debug)]
pub(crate) struct ReadSlot<'q> {
    queue: &'q BlockQueue,
    guard: MutexGuard<'q, Slot>,
}

impl ReadSlot<'_> {
    /// The id of the block this payload belongs to.
    pub fn block_id(&self) -> u64 {
        self.guard.block_id
    }

    /// The compressed payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.guard.bytes[..self.guard.payload_len]
    }

    /// Release the slot back to the producer.
    pub fn pop(self) {
        let queue = self.queue;
        drop(self.guard);

        let mut occupancy = queue.occupancy.lock().expect("queue poisoned");
        occupancy.read_index = (occupancy.read_index + 1) % queue.slots.len();
        occupancy.taken -= 1;
        drop(occupancy);

        queue.space_available.notify_one();
    }
}
