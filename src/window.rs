//! Fixed-capacity circular window buffer.
//!
//! [`WindowBuffer`] holds one [`Slot`] per sequence number in the current
//! window.  Slots are keyed by the engine's 64-bit logical sequence number
//! (see [`crate::seq`]), so the buffer index `seq % capacity` stays
//! contiguous when the 32-bit wire counter wraps.  The full number is stored
//! in the slot: a lookup for a different number that maps to the same index
//! misses instead of returning the wrong entry.
//!
//! The sender stores in-flight segments with a retransmission deadline; the
//! receiver stores out-of-order segments and never arms a timer.

use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    /// `put` hit a slot still holding another sequence number.
    #[error("slot for seq {seq} is still occupied by seq {occupant}")]
    SlotOccupied { seq: u64, occupant: u64 },
}

/// One buffer position.
#[derive(Debug, Clone)]
pub struct Slot<T> {
    pub seq: u64,
    pub item: T,
    /// Retransmission deadline; `None` means no timer is armed.
    pub deadline: Option<Instant>,
}

#[derive(Debug)]
pub struct WindowBuffer<T> {
    slots: Box<[Option<Slot<T>>]>,
    len: usize,
}

impl<T> WindowBuffer<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn index(&self, seq: u64) -> usize {
        (seq % self.slots.len() as u64) as usize
    }

    /// Store `item` under `seq`.  Fails if the slot holds a different
    /// sequence number; re-putting the same number replaces the entry.
    pub fn put(&mut self, seq: u64, item: T) -> Result<(), WindowError> {
        let idx = self.index(seq);
        match &self.slots[idx] {
            Some(slot) if slot.seq != seq => {
                return Err(WindowError::SlotOccupied {
                    seq,
                    occupant: slot.seq,
                })
            }
            Some(_) => {}
            None => self.len += 1,
        }
        self.slots[idx] = Some(Slot {
            seq,
            item,
            deadline: None,
        });
        Ok(())
    }

    pub fn get(&self, seq: u64) -> Option<&Slot<T>> {
        self.slots[self.index(seq)]
            .as_ref()
            .filter(|slot| slot.seq == seq)
    }

    pub fn get_mut(&mut self, seq: u64) -> Option<&mut Slot<T>> {
        let idx = self.index(seq);
        self.slots[idx].as_mut().filter(|slot| slot.seq == seq)
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.get(seq).is_some()
    }

    /// Empty the slot for `seq`, returning what it held.
    pub fn clear(&mut self, seq: u64) -> Option<T> {
        let idx = self.index(seq);
        match &self.slots[idx] {
            Some(slot) if slot.seq == seq => {
                self.len -= 1;
                self.slots[idx].take().map(|slot| slot.item)
            }
            _ => None,
        }
    }

    /// Arm (or re-arm) the retransmission deadline for `seq`.
    /// Returns `false` if `seq` is not buffered.
    pub fn arm_timer(&mut self, seq: u64, deadline: Instant) -> bool {
        match self.get_mut(seq) {
            Some(slot) => {
                slot.deadline = Some(deadline);
                true
            }
            None => false,
        }
    }

    pub fn disarm_timer(&mut self, seq: u64) -> bool {
        match self.get_mut(seq) {
            Some(slot) => {
                slot.deadline = None;
                true
            }
            None => false,
        }
    }

    /// `true` when `seq` is buffered with an armed deadline at or before `now`.
    pub fn timer_expired(&self, seq: u64, now: Instant) -> bool {
        self.get(seq)
            .and_then(|slot| slot.deadline)
            .is_some_and(|deadline| deadline <= now)
    }

    /// `true` when `seq` is buffered and its timer is disarmed.
    pub fn timer_disarmed(&self, seq: u64) -> bool {
        self.get(seq).is_some_and(|slot| slot.deadline.is_none())
    }

    /// Earliest armed deadline across all slots.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .flatten()
            .filter_map(|slot| slot.deadline)
            .min()
    }
}
