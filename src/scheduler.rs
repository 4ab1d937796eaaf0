use crate::error::{Error, Result};
use crate::store::ParticleHandle;
use ordered_float::NotNan;
use std::cmp::Ordering;

/// What a queued event predicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Contact between two particles.
    Collision { a: ParticleHandle, b: ParticleHandle },
    /// `particle` leaves grid cell `from` for its neighbor `to`.
    CellCrossing { particle: ParticleHandle, from: usize, to: usize },
}

/// A predicted event. Immutable once queued; it may go stale when a
/// participant changes course first.
///
/// Ordering is by time, ties broken by insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    time: NotNan<f64>,
    kind: EventKind,
    seq: u64,
}

impl Event {
    /// Absolute predicted time.
    #[inline]
    pub fn time(&self) -> f64 {
        self.time.into_inner()
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Position in the insertion order; the tie-breaker for equal times.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.cmp(&other.time) {
            Ordering::Equal => self.seq.cmp(&other.seq),
            o => o,
        }
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of predicted events.
///
/// No deduplication: the same pair may be queued several times, and stale
/// entries are dropped by the driver when popped.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: Vec<Event>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Earliest queued event without removing it.
    pub fn peek(&self) -> Option<&Event> {
        self.heap.first()
    }

    /// Queues an event at absolute `time`. O(log n).
    pub fn push(&mut self, time: f64, kind: EventKind) -> Result<()> {
        let time = NotNan::new(time).map_err(|_| Error::InvalidTime(time))?;
        let event = Event { time, kind, seq: self.next_seq };
        self.next_seq += 1;

        self.heap.push(event);
        self.sift_up(self.heap.len() - 1);
        Ok(())
    }

    /// Removes and returns the earliest event. O(log n).
    pub fn pop(&mut self) -> Option<Event> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let top = self.heap.pop();
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        top
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.heap[idx] >= self.heap[parent] {
                break;
            }
            self.heap.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut smallest = idx;
            if left < len && self.heap[left] < self.heap[smallest] {
                smallest = left;
            }
            if right < len && self.heap[right] < self.heap[smallest] {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.heap.swap(idx, smallest);
            idx = smallest;
        }
    }
}
