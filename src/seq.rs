//! Wrap-around sequence-number arithmetic.
//!
//! Sequence numbers are 32-bit counters that wrap.  Ordering is never
//! decided by comparing raw values or buffer indices: two numbers are
//! compared through their signed distance, which is correct as long as they
//! are less than 2^31 apart.  Window sizes are far below that bound.
//!
//! Engines keep their cursors as 64-bit logical counters that never wrap in
//! practice.  Only the low 32 bits travel on the wire; an incoming number is
//! placed back into logical space by its distance from the window base.

/// Low 32 bits of a logical sequence number, as carried in the header.
#[inline]
pub fn to_wire(logical: u64) -> u32 {
    logical as u32
}

/// Signed distance from `from` to `to` in wrap-around space.
///
/// Positive when `to` is ahead of `from`.
#[inline]
pub fn distance(from: u32, to: u32) -> i32 {
    to.wrapping_sub(from) as i32
}

/// `true` when `a` precedes `b`.
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    distance(b, a) < 0
}

/// `true` when `seq` lies in the half-open interval `[base, end)`.
#[inline]
pub fn in_range(seq: u32, base: u32, end: u32) -> bool {
    seq.wrapping_sub(base) < end.wrapping_sub(base)
}

/// Where a sequence number falls relative to a window `[base, base + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Already passed: an old duplicate.
    Below,
    /// Offset from `base` inside the window.
    Inside(u32),
    /// Not yet acceptable.
    Above,
}

/// Classify `seq` against the window starting at `base` spanning `len` numbers.
pub fn classify(seq: u32, base: u32, len: u32) -> Position {
    if seq_lt(seq, base) {
        Position::Below
    } else if in_range(seq, base, base.wrapping_add(len)) {
        Position::Inside(seq.wrapping_sub(base))
    } else {
        Position::Above
    }
}
