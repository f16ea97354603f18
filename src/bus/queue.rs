//! Fixed-capacity event queue with a hysteretic overflow warning latch.
//!
//! Push on a full queue fails — it never blocks and never grows. The first
//! rejected push per excursion arms a one-shot warning; the latch re-arms
//! only after occupancy falls back below 80% of capacity, so a queue
//! hovering at the limit produces one warning, not a storm.

use crate::events::Event;

/// Compile-time storage bound for one priority queue. Slightly larger than
/// the maximum configurable capacity so overflow warnings always have a
/// reserved slot to land in.
pub const QUEUE_STORAGE: usize = 36;

/// Largest effective capacity a queue can be configured with.
pub const MAX_QUEUE_CAPACITY: usize = 32;

pub struct BoundedQueue {
    items: heapless::Deque<Event, QUEUE_STORAGE>,
    /// Effective capacity (<= QUEUE_STORAGE); configurable for tests.
    capacity: usize,
    drops: u32,
    warn_latched: bool,
}

impl BoundedQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: heapless::Deque::new(),
            capacity: capacity.min(MAX_QUEUE_CAPACITY),
            drops: 0,
            warn_latched: false,
        }
    }

    /// Push an event. Returns `false` (and counts a drop) when full.
    pub fn push(&mut self, event: Event) -> bool {
        if self.items.len() >= self.capacity {
            self.drops = self.drops.saturating_add(1);
            return false;
        }
        // Cannot fail: len < capacity <= QUEUE_STORAGE.
        self.items.push_back(event).is_ok()
    }

    /// Push past the configured capacity into the reserved headroom — used
    /// only for synthesized warning events, so a full queue can still
    /// report that it is full. Bounded by physical storage.
    pub fn force_push(&mut self, event: Event) -> bool {
        self.items.push_back(event).is_ok()
    }

    /// Pop the oldest event (FIFO).
    pub fn pop(&mut self) -> Option<Event> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dropped-event count since construction.
    pub fn drops(&self) -> u32 {
        self.drops
    }

    /// Called on the first overflow of an excursion: returns `true` exactly
    /// once until [`update_hysteresis`](Self::update_hysteresis) re-arms it.
    pub fn arm_overflow_warning(&mut self) -> bool {
        if self.warn_latched {
            return false;
        }
        self.warn_latched = true;
        true
    }

    /// Re-arm the overflow warning once occupancy drops below 80% of
    /// capacity. Call after draining.
    pub fn update_hysteresis(&mut self) {
        if self.warn_latched && self.items.len() * 5 < self.capacity * 4 {
            self.warn_latched = false;
        }
    }

    #[cfg(test)]
    pub fn warning_latched(&self) -> bool {
        self.warn_latched
    }
}
