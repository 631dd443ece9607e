//! Send-side window state machine.
//!
//! [`SendWindow`] tracks the in-flight segments of one transfer.  It does
//! **not** touch the socket; [`crate::connection::SendConnection`] calls these
//! methods and owns the actual send/receive loop.
//!
//! # Protocol contract
//!
//! - At most `capacity` segments are in flight (`next - base <= capacity`).
//! - Acknowledgments are **per segment**: an ACK for `s` resolves `s` only.
//! - The window slides from `base` only.  An ACK for a later segment just
//!   disarms that segment's timer; once `base` itself is acknowledged, every
//!   already-resolved segment behind it is drained in the same step.
//! - Each segment has its own retransmission deadline.
//!
//! ```text
//!  base                next            base + capacity
//!   │                    │                   │
//!  ─┼────────────────────┼───────────────────┼──▶ logical seq
//!   │ <── in flight ───▶ │ <── sendable ───▶ │
//! ```

use tokio::time::Instant;

use crate::config::Mode;
use crate::packet::Segment;
use crate::seq::{self, Position};
use crate::timer::RetransmitPolicy;
use crate::window::{WindowBuffer, WindowError};

/// A segment that has been sent and is awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub segment: Segment,
    /// How many times this segment has been transmitted (1 = first send).
    pub tx_count: u32,
    /// Retransmissions since `base` last advanced.  Checked against the
    /// retry budget, so a receiver that is still making progress never
    /// exhausts it.
    pub retries: u32,
}

/// Result of feeding one reply to [`SendWindow::on_ack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Not an acknowledgment, or outside `[base, next)`.  No state change.
    Stale,
    /// The segment had already been acknowledged.
    Duplicate,
    /// A segment after `base` was acknowledged; the window did not move.
    Recorded,
    /// `base` was acknowledged and the window slid by this many segments.
    Slid(u64),
}

/// Result of [`SendWindow::retransmit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retransmit {
    /// Put this segment on the wire again.
    Send(Segment),
    /// The segment already used up its retry budget.
    Exhausted { attempts: u32 },
    /// Nothing in flight under that number.
    Missing,
}

#[derive(Debug)]
pub struct SendWindow {
    mode: Mode,
    /// Oldest unacknowledged logical sequence number.
    base: u64,
    /// Logical sequence number of the next new segment.
    next: u64,
    buffer: WindowBuffer<InFlight>,
    policy: RetransmitPolicy,
    /// Logical number of the FIN segment, once it has been sent.
    fin_seq: Option<u64>,
    fin_acked: bool,
}

impl SendWindow {
    pub fn new(mode: Mode, capacity: u32, policy: RetransmitPolicy) -> Self {
        Self::starting_at(0, mode, capacity, policy)
    }

    /// Window whose first segment uses logical number `start`.
    pub fn starting_at(start: u64, mode: Mode, capacity: u32, policy: RetransmitPolicy) -> Self {
        Self {
            mode,
            base: start,
            next: start,
            buffer: WindowBuffer::new(capacity),
            policy,
            fin_seq: None,
            fin_acked: false,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn next(&self) -> u64 {
        self.next
    }

    pub fn capacity(&self) -> u32 {
        self.buffer.capacity()
    }

    /// Number of segments between `base` and `next`.
    pub fn in_flight(&self) -> u64 {
        self.next - self.base
    }

    pub fn fin_sent(&self) -> bool {
        self.fin_seq.is_some()
    }

    pub fn fin_acked(&self) -> bool {
        self.fin_acked
    }

    /// `true` when another new segment may be sent.
    pub fn can_send(&self) -> bool {
        !self.fin_sent() && self.in_flight() < u64::from(self.capacity())
    }

    /// `true` once `base` has passed the FIN and nothing is buffered.
    pub fn is_complete(&self) -> bool {
        self.fin_seq.is_some_and(|fin| self.base > fin) && self.buffer.is_empty()
    }

    /// Build the next data segment.  Call [`record_sent`](Self::record_sent)
    /// once it is on the wire.
    pub fn build_segment(&self, payload: Vec<u8>, is_fin: bool) -> Segment {
        Segment::data(self.mode, seq::to_wire(self.next), payload, is_fin)
    }

    /// Place a just-transmitted segment into the window, arm its timer and
    /// advance `next`.  Returns the segment's logical number.
    pub fn record_sent(&mut self, segment: Segment, now: Instant) -> Result<u64, WindowError> {
        debug_assert!(
            self.can_send(),
            "record_sent on a full or finished window ({} / {})",
            self.in_flight(),
            self.capacity()
        );
        let logical = self.next;
        let is_fin = segment.is_fin;
        self.buffer.put(
            logical,
            InFlight {
                segment,
                tx_count: 1,
                retries: 0,
            },
        )?;
        self.buffer
            .arm_timer(logical, self.policy.deadline_from(now));
        if is_fin {
            self.fin_seq = Some(logical);
        }
        self.next += 1;
        Ok(logical)
    }

    /// Process one decoded reply.
    pub fn on_ack(&mut self, reply: &Segment) -> AckOutcome {
        if !reply.is_ack {
            return AckOutcome::Stale;
        }
        let logical = match seq::classify(reply.seq, seq::to_wire(self.base), self.in_flight() as u32) {
            Position::Inside(offset) => self.base + u64::from(offset),
            Position::Below | Position::Above => return AckOutcome::Stale,
        };

        if self.buffer.timer_disarmed(logical) {
            return AckOutcome::Duplicate;
        }
        self.buffer.disarm_timer(logical);
        if self.fin_seq == Some(logical) {
            self.fin_acked = true;
        }

        if logical != self.base {
            return AckOutcome::Recorded;
        }

        let start = self.base;
        while self.base < self.next && self.buffer.timer_disarmed(self.base) {
            self.buffer.clear(self.base);
            self.base += 1;
        }
        // Progress: every segment still in flight gets a fresh budget.
        for logical in self.base..self.next {
            if let Some(slot) = self.buffer.get_mut(logical) {
                slot.item.retries = 0;
            }
        }
        AckOutcome::Slid(self.base - start)
    }

    /// Logical numbers of in-flight segments whose deadline has passed.
    pub fn expired(&self, now: Instant) -> Vec<u64> {
        (self.base..self.next)
            .filter(|&s| self.buffer.timer_expired(s, now))
            .collect()
    }

    /// Count a retransmission of `logical` at `now` and re-arm its timer.
    pub fn retransmit(&mut self, logical: u64, now: Instant) -> Retransmit {
        let deadline = self.policy.deadline_from(now);
        let max_retries = self.policy.max_retries;
        let Some(slot) = self.buffer.get_mut(logical) else {
            return Retransmit::Missing;
        };
        if slot.item.retries >= max_retries {
            return Retransmit::Exhausted {
                attempts: slot.item.tx_count,
            };
        }
        slot.item.tx_count += 1;
        slot.item.retries += 1;
        slot.deadline = Some(deadline);
        Retransmit::Send(slot.item.segment.clone())
    }

    /// Earliest pending retransmission deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.buffer.next_deadline()
    }

    pub fn entry(&self, logical: u64) -> Option<&InFlight> {
        self.buffer.get(logical).map(|slot| &slot.item)
    }
}
