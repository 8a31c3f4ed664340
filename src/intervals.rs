//! Interval flattening and containment tests used by "within" restricted
//! track aggregation. Coordinates are sequence-relative and inclusive.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    start: i64,
    end: i64,
}

impl Interval {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    #[inline(always)]
    pub fn start(&self) -> i64 {
        self.start
    }

    #[inline(always)]
    pub fn end(&self) -> i64 {
        self.end
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    #[inline(always)]
    pub fn contains(&self, other: &Interval) -> bool {
        other.start >= self.start && other.end <= self.end
    }
}

/// Merges start-ordered intervals into the minimal ordered list of
/// non-overlapping intervals covering the same positions of a sequence of
/// `length` bases. Overlapping and back-to-back intervals are merged; parts
/// outside `[0, length)` are clipped away.
pub fn flatten(intervals: &[Interval], length: usize) -> Vec<Interval> {
    debug_assert!(
        intervals.windows(2).all(|w| w[0].start <= w[1].start),
        "intervals must be ordered by start"
    );
    let last = length as i64 - 1;
    let mut ret: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        if interval.end < 0 || interval.start > last || interval.is_empty() {
            continue;
        }
        let clipped = Interval::new(interval.start.max(0), interval.end.min(last));
        match ret.last_mut() {
            Some(previous) if clipped.start <= previous.end + 1 => {
                previous.end = previous.end.max(clipped.end);
            }
            _ => ret.push(clipped),
        }
    }
    ret
}

/// True if `region` lies wholly inside any interval of `cover`.
pub fn is_contained(region: &Interval, cover: &[Interval]) -> bool {
    cover.iter().any(|other| other.contains(region))
}
