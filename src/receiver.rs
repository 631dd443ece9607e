//! Receive-side window state machine.
//!
//! [`RecvWindow`] is responsible for everything that happens *after* a raw
//! datagram is decoded into a [`Segment`] and *before* payload bytes reach
//! the output:
//! - Validating that a segment's sequence number falls within the receive
//!   window, using wrap-around aware comparison.
//! - Buffering out-of-order segments until the gap before them is filled.
//! - Releasing contiguous runs starting at `base`, strictly in order.
//! - Building the acknowledgment for each delivered segment and for old
//!   duplicates the sender evidently did not see acknowledged.
//!
//! The [`RecvWindow`] does **not** send anything itself; it tells
//! [`crate::connection::RecvConnection`] what to write and what to send.

use crate::config::Mode;
use crate::packet::Segment;
use crate::seq::{self, Position};
use crate::window::WindowBuffer;

/// What to do with one incoming segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// `base` arrived: write these payloads in order, acknowledging each.
    Deliver(Vec<Segment>),
    /// Stored ahead of a gap; nothing to deliver yet.
    Buffered,
    /// Already stored and still waiting for the gap to close.  No reply.
    AlreadyBuffered,
    /// Behind the window: already delivered.  Send this acknowledgment again.
    Duplicate(Segment),
    /// Beyond the window.  Dropped without a reply.
    OutOfWindow,
    /// An acknowledgment arrived at the receiver.  Dropped without a reply.
    NotData,
}

#[derive(Debug)]
pub struct RecvWindow {
    mode: Mode,
    /// Oldest logical sequence number not yet delivered.
    base: u64,
    /// One past the largest acceptable logical sequence number.
    next: u64,
    buffer: WindowBuffer<Segment>,
    /// Logical number of the FIN once it has been seen (buffered or delivered).
    fin_seq: Option<u64>,
    fin_delivered: bool,
}

impl RecvWindow {
    pub fn new(mode: Mode, capacity: u32) -> Self {
        Self::starting_at(0, mode, capacity)
    }

    pub fn starting_at(start: u64, mode: Mode, capacity: u32) -> Self {
        Self {
            mode,
            base: start,
            next: start + u64::from(capacity),
            buffer: WindowBuffer::new(capacity),
            fin_seq: None,
            fin_delivered: false,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn next(&self) -> u64 {
        self.next
    }

    /// Number of segments held back waiting for an earlier one.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn fin_seen(&self) -> bool {
        self.fin_seq.is_some()
    }

    /// `true` once the FIN and everything before it has been delivered.
    pub fn is_finished(&self) -> bool {
        self.fin_delivered
    }

    /// Acknowledgment for `segment`, echoing its FIN flag.
    pub fn ack_for(&self, segment: &Segment) -> Segment {
        Segment::ack(self.mode, segment.seq, segment.is_fin)
    }

    /// Process one decoded segment.
    pub fn on_segment(&mut self, segment: Segment) -> Accepted {
        if segment.is_ack {
            return Accepted::NotData;
        }
        let span = (self.next - self.base) as u32;
        let logical = match seq::classify(segment.seq, seq::to_wire(self.base), span) {
            Position::Inside(offset) => self.base + u64::from(offset),
            Position::Below => return Accepted::Duplicate(self.ack_for(&segment)),
            Position::Above => return Accepted::OutOfWindow,
        };

        if self.buffer.contains(logical) {
            return Accepted::AlreadyBuffered;
        }
        if segment.is_fin {
            // Nothing past the FIN is ever acceptable.
            self.fin_seq = Some(logical);
            self.next = logical + 1;
        }
        if let Err(e) = self.buffer.put(logical, segment) {
            log::warn!("[arq:recv] {e}");
            return Accepted::AlreadyBuffered;
        }

        if logical != self.base {
            return Accepted::Buffered;
        }
        Accepted::Deliver(self.drain_run())
    }

    /// Pop the contiguous run starting at `base`.
    fn drain_run(&mut self) -> Vec<Segment> {
        let mut run = Vec::new();
        while let Some(segment) = self.buffer.clear(self.base) {
            let is_fin = segment.is_fin;
            self.base += 1;
            if self.fin_seq.is_none() {
                self.next += 1;
            }
            run.push(segment);
            if is_fin {
                self.fin_delivered = true;
                break;
            }
        }
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(seq: u32, payload: &[u8]) -> Segment {
        Segment::data(Mode::SlidingWindow, seq, payload.to_vec(), false)
    }

    fn fin(seq: u32, payload: &[u8]) -> Segment {
        Segment::data(Mode::SlidingWindow, seq, payload.to_vec(), true)
    }

    fn payloads(accepted: Accepted) -> Vec<Vec<u8>> {
        match accepted {
            Accepted::Deliver(run) => run.into_iter().map(|s| s.payload).collect(),
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn initial_window_spans_capacity() {
        let r = RecvWindow::new(Mode::SlidingWindow, 4);
        assert_eq!(r.base(), 0);
        assert_eq!(r.next(), 4);
        assert!(!r.fin_seen());
    }

    #[test]
    fn in_order_segment_delivered() {
        let mut r = RecvWindow::new(Mode::SlidingWindow, 4);
        assert_eq!(payloads(r.on_segment(data(0, b"hello"))), vec![b"hello".to_vec()]);
        assert_eq!(r.base(), 1);
        assert_eq!(r.next(), 5);
    }

    #[test]
    fn out_of_order_segments_wait_for_base() {
        let mut r = RecvWindow::new(Mode::SlidingWindow, 4);
        assert_eq!(r.on_segment(data(2, b"c")), Accepted::Buffered);
        assert_eq!(r.on_segment(data(1, b"b")), Accepted::Buffered);
        assert_eq!(r.buffered(), 2);
        assert_eq!(r.base(), 0);

        let delivered = payloads(r.on_segment(data(0, b"a")));
        assert_eq!(delivered, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(r.base(), 3);
        assert_eq!(r.next(), 7);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn already_buffered_segment_is_not_rebuffered() {
        let mut r = RecvWindow::new(Mode::SlidingWindow, 4);
        r.on_segment(data(1, b"b"));
        assert_eq!(r.on_segment(data(1, b"b")), Accepted::AlreadyBuffered);
        assert_eq!(r.buffered(), 1);
    }

    #[test]
    fn duplicate_below_base_is_reacknowledged() {
        let mut r = RecvWindow::new(Mode::SlidingWindow, 4);
        r.on_segment(data(0, b"a"));
        r.on_segment(data(1, b"b"));
        let (base, next) = (r.base(), r.next());

        match r.on_segment(data(0, b"a")) {
            Accepted::Duplicate(ack) => {
                assert!(ack.is_ack);
                assert_eq!(ack.seq, 0);
                assert!(!ack.is_fin);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!((r.base(), r.next()), (base, next));
    }

    #[test]
    fn segment_beyond_window_dropped() {
        let mut r = RecvWindow::new(Mode::SlidingWindow, 4);
        assert_eq!(r.on_segment(data(4, b"e")), Accepted::OutOfWindow);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn stop_and_wait_accepts_only_base() {
        let mut r = RecvWindow::new(Mode::StopAndWait, 1);
        assert_eq!(r.on_segment(data(1, b"b")), Accepted::OutOfWindow);
        assert_eq!(payloads(r.on_segment(data(0, b"a"))).len(), 1);
        assert_eq!(payloads(r.on_segment(data(1, b"b"))).len(), 1);
    }

    #[test]
    fn acks_are_not_data() {
        let mut r = RecvWindow::new(Mode::SlidingWindow, 4);
        let ack = Segment::ack(Mode::SlidingWindow, 0, false);
        assert_eq!(r.on_segment(ack), Accepted::NotData);
        assert_eq!(r.base(), 0);
    }

    #[test]
    fn fin_delivery_finishes_and_closes_window() {
        let mut r = RecvWindow::new(Mode::SlidingWindow, 4);
        r.on_segment(data(0, b"ab"));
        let run = match r.on_segment(fin(1, b"c")) {
            Accepted::Deliver(run) => run,
            other => panic!("expected delivery, got {other:?}"),
        };
        assert!(run[0].is_fin);
        assert!(r.is_finished());
        assert_eq!(r.base(), 2);
        assert_eq!(r.next(), 2);

        // A retransmitted FIN is re-acknowledged with the FIN flag.
        match r.on_segment(fin(1, b"c")) {
            Accepted::Duplicate(ack) => assert!(ack.is_fin),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[test]
    fn buffered_fin_freezes_window_end() {
        let mut r = RecvWindow::new(Mode::SlidingWindow, 8);
        assert_eq!(r.on_segment(fin(2, b"z")), Accepted::Buffered);
        assert!(r.fin_seen());
        assert_eq!(r.next(), 3);
        assert_eq!(r.on_segment(data(3, b"?")), Accepted::OutOfWindow);

        assert_eq!(payloads(r.on_segment(data(0, b"x"))).len(), 1);
        assert_eq!(r.next(), 3);
        assert!(!r.is_finished());

        let run = payloads(r.on_segment(data(1, b"y")));
        assert_eq!(run, vec![b"y".to_vec(), b"z".to_vec()]);
        assert!(r.is_finished());
    }

    #[test]
    fn delivery_across_wire_wrap() {
        let start = u64::from(u32::MAX);
        let mut r = RecvWindow::starting_at(start, Mode::SlidingWindow, 4);
        // Wire seq 0 is logical 2^32, one past u32::MAX.
        assert_eq!(r.on_segment(data(0, b"b")), Accepted::Buffered);
        let run = payloads(r.on_segment(data(u32::MAX, b"a")));
        assert_eq!(run, vec![b"a".to_vec(), b"b".to_vec()]);
        // The old number is now a duplicate, not a new wrapped segment.
        assert!(matches!(
            r.on_segment(data(u32::MAX, b"a")),
            Accepted::Duplicate(_)
        ));
    }
}
