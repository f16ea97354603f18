//! Priority event bus with throttling and a failure-isolating circuit breaker.
//!
//! ```text
//! ┌───────────┐ publish  ┌─────────────────────────────┐
//! │ FSM       │─────────▶│ EventBus                    │
//! │ Net       │          │  per-kind throttle          │   timer tick
//! │ Drivers   │          │  ┌─────────┐  ┌─────────┐   │◀──(dispatch_high,
//! └───────────┘          │  │ HIGH 32 │  │ LOW 32  │   │    batch of 5)
//!                        │  └─────────┘  └─────────┘   │
//!                        │  circuit breaker            │◀── main loop
//!                        └──────────────┬──────────────┘    (drain_low)
//!                                       │ BusDelegate::handle(id, event)
//!                                       ▼
//!                              subscribed handles, in order
//! ```
//!
//! Dispatch semantics:
//! - HIGH events (`system.error`, `system.state_change`) drain from the
//!   periodic timer tick, at most [`BusConfig::batch_size`] per tick to
//!   bound timer-context execution time.
//! - LOW events drain only when the host loop calls [`EventBus::drain_low`].
//! - Within one class, dispatch is strictly FIFO. There is no cross-class
//!   ordering guarantee.
//! - A failing handle never stops delivery to the remaining handles and
//!   never propagates past the bus.

pub mod breaker;
pub mod queue;

use crate::error::HandlerError;
use crate::events::{Event, EventKind, EventPayload, SystemErrorKind};
use breaker::CircuitBreaker;
use log::{debug, warn};
use queue::BoundedQueue;

/// Dispatch tick period — the hardware timer drains the HIGH queue at this
/// cadence.
pub const TICK_PERIOD_MS: u64 = 25;

/// Maximum subscriber handles per event kind.
pub const MAX_SUBSCRIBERS: usize = 4;

/// Bound on synthesized `system.error` chaining.
pub const MAX_ERROR_DEPTH: u8 = 3;

// ---------------------------------------------------------------------------
// Subscriber identity
// ---------------------------------------------------------------------------

/// Opaque subscriber handle. The runtime assigns one id per component and
/// routes dispatch through [`BusDelegate`]; the bus itself never stores
/// callbacks, so subscription state stays `Copy` and allocation-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(pub u8);

/// Receiver side of dispatch. One fixed signature for every subscriber —
/// no variadic arguments, no duck typing.
pub trait BusDelegate {
    fn handle(&mut self, handle: HandlerId, event: &Event) -> Result<(), HandlerError>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Effective HIGH queue capacity (<= compile-time storage).
    pub high_capacity: usize,
    /// Effective LOW queue capacity.
    pub low_capacity: usize,
    /// Events dispatched per tick / per drain call.
    pub batch_size: usize,
    /// Consecutive handler failures that open the breaker.
    pub breaker_threshold: u32,
    /// Milliseconds the breaker stays open.
    pub breaker_recovery_ms: u64,
    /// Per-kind minimum inter-publish interval (ms); 0 disables throttling.
    pub throttle_ms: [u32; EventKind::COUNT],
}

impl Default for BusConfig {
    fn default() -> Self {
        let mut throttle_ms = [0u32; EventKind::COUNT];
        // Sensor readings arrive faster than anyone downstream cares about.
        throttle_ms[EventKind::SensorData.index()] = 500;
        Self {
            high_capacity: 32,
            low_capacity: 32,
            batch_size: 5,
            breaker_threshold: 5,
            breaker_recovery_ms: 30_000,
            throttle_ms,
        }
    }
}

/// Result of a publish attempt. Throttled and full-queue publishes are
/// degraded service, not errors — callers may ignore the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Accepted,
    Throttled,
    QueueFull,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct BusStats {
    pub processed: u64,
    pub dispatch_errors: u64,
    pub high_len: usize,
    pub low_len: usize,
    pub high_drops: u32,
    pub low_drops: u32,
    pub breaker_open: bool,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

pub struct EventBus {
    cfg: BusConfig,
    high: BoundedQueue,
    low: BoundedQueue,
    /// Per-kind ordered subscriber lists; insertion order = dispatch order.
    subs: [heapless::Vec<HandlerId, MAX_SUBSCRIBERS>; EventKind::COUNT],
    /// Last accepted publish per kind, for throttling.
    last_publish_ms: [Option<u64>; EventKind::COUNT],
    breaker: CircuitBreaker,
    processed: u64,
    dispatch_errors: u64,
}

impl EventBus {
    pub fn new(cfg: BusConfig) -> Self {
        let breaker = CircuitBreaker::new(cfg.breaker_threshold, cfg.breaker_recovery_ms);
        Self {
            high: BoundedQueue::new(cfg.high_capacity),
            low: BoundedQueue::new(cfg.low_capacity),
            subs: Default::default(),
            last_publish_ms: [None; EventKind::COUNT],
            breaker,
            processed: 0,
            dispatch_errors: 0,
            cfg,
        }
    }

    // ── Subscription ──────────────────────────────────────────

    /// Subscribe `handle` to `kind`. Duplicate registration is a no-op.
    pub fn subscribe(&mut self, kind: EventKind, handle: HandlerId) {
        let list = &mut self.subs[kind.index()];
        if list.contains(&handle) {
            debug!("Bus: duplicate subscribe {:?} to {}", handle, kind.name());
            return;
        }
        if list.push(handle).is_err() {
            warn!("Bus: subscriber table full for {}", kind.name());
        }
    }

    /// Remove `handle` from `kind` if present.
    pub fn unsubscribe(&mut self, kind: EventKind, handle: HandlerId) {
        let list = &mut self.subs[kind.index()];
        if let Some(pos) = list.iter().position(|h| *h == handle) {
            list.remove(pos);
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subs[kind.index()].len()
    }

    // ── Publish ───────────────────────────────────────────────

    /// Throttle, classify, and enqueue one event.
    ///
    /// On the first overflow of an excursion a single
    /// `system.error { queue_full }` warning is forced into the HIGH queue;
    /// the warning re-arms only after occupancy drops below 80% of capacity.
    pub fn publish(&mut self, payload: EventPayload, now_ms: u64) -> PublishOutcome {
        let kind = payload.kind();

        let window = self.cfg.throttle_ms[kind.index()];
        if window > 0 {
            if let Some(last) = self.last_publish_ms[kind.index()] {
                if now_ms.saturating_sub(last) < u64::from(window) {
                    return PublishOutcome::Throttled;
                }
            }
        }
        self.last_publish_ms[kind.index()] = Some(now_ms);

        let event = Event::new(payload, now_ms);
        let queue = if kind.is_high_priority() {
            &mut self.high
        } else {
            &mut self.low
        };

        if queue.push(event) {
            return PublishOutcome::Accepted;
        }

        warn!("Bus: {} queue full, dropping {}", priority_name(kind), kind.name());
        if queue.arm_overflow_warning() {
            let ctx = if kind.is_high_priority() {
                "high queue full"
            } else {
                "low queue full"
            };
            let warning = Event::new(
                EventPayload::system_error(SystemErrorKind::QueueFull, ctx, 0),
                now_ms,
            );
            // Reserved headroom: lands even when the HIGH queue itself is
            // the one that overflowed.
            let _ = self.high.force_push(warning);
        }
        PublishOutcome::QueueFull
    }

    // ── Dispatch ──────────────────────────────────────────────

    /// Drain up to one batch from the HIGH queue. Invoked from the periodic
    /// dispatch tick; bounded so timer context stays short.
    pub fn dispatch_high(&mut self, delegate: &mut dyn BusDelegate, now_ms: u64) -> usize {
        self.dispatch_queue(QueueClass::High, delegate, now_ms)
    }

    /// Drain up to one batch from the LOW queue. Cooperative — only runs
    /// when the host loop calls it.
    pub fn drain_low(&mut self, delegate: &mut dyn BusDelegate, now_ms: u64) -> usize {
        self.dispatch_queue(QueueClass::Low, delegate, now_ms)
    }

    fn dispatch_queue(
        &mut self,
        class: QueueClass,
        delegate: &mut dyn BusDelegate,
        now_ms: u64,
    ) -> usize {
        if !self.breaker.allow_dispatch(now_ms) {
            return 0;
        }

        let mut dispatched = 0;
        while dispatched < self.cfg.batch_size {
            let event = match class {
                QueueClass::High => self.high.pop(),
                QueueClass::Low => self.low.pop(),
            };
            let Some(event) = event else { break };

            self.dispatch_event(&event, delegate, now_ms);
            dispatched += 1;
            self.processed += 1;

            // The breaker may have opened mid-batch; stop pulling more.
            if self.breaker.is_open() {
                break;
            }
        }

        match class {
            QueueClass::High => self.high.update_hysteresis(),
            QueueClass::Low => self.low.update_hysteresis(),
        }
        dispatched
    }

    /// Invoke every subscribed handle for the event, in subscription order.
    /// A failing handle is isolated: the remaining handles still run.
    fn dispatch_event(&mut self, event: &Event, delegate: &mut dyn BusDelegate, now_ms: u64) {
        let kind = event.kind();
        let handles = self.subs[kind.index()].clone();

        for handle in &handles {
            match delegate.handle(*handle, event) {
                Ok(()) => self.breaker.record_success(),
                Err(e) => {
                    self.dispatch_errors += 1;
                    warn!("Bus: {} handler {:?} failed: {}", kind.name(), handle, e);
                    self.breaker.record_error(now_ms);
                    self.synthesize_callback_error(event, e, now_ms);
                }
            }
        }
    }

    /// Convert a handler failure into a `system.error` event, bounded by
    /// kind (never about an error event) and by synthesis depth.
    fn synthesize_callback_error(&mut self, failed: &Event, err: HandlerError, now_ms: u64) {
        if failed.kind() == EventKind::SystemError {
            return;
        }
        let parent_depth = match &failed.payload {
            EventPayload::SystemError { depth, .. } => *depth,
            _ => 0,
        };
        let depth = parent_depth + 1;
        if depth > MAX_ERROR_DEPTH {
            return;
        }
        let error_event = Event::new(
            EventPayload::system_error(SystemErrorKind::CallbackError, err.context, depth),
            now_ms,
        );
        // Enqueued directly — re-entering publish() here would throttle or
        // recurse on the very path that is failing.
        let _ = self.high.force_push(error_event);
    }

    // ── Introspection ─────────────────────────────────────────

    pub fn stats(&self) -> BusStats {
        BusStats {
            processed: self.processed,
            dispatch_errors: self.dispatch_errors,
            high_len: self.high.len(),
            low_len: self.low.len(),
            high_drops: self.high.drops(),
            low_drops: self.low.drops(),
            breaker_open: self.breaker.is_open(),
        }
    }

    pub fn breaker_is_open(&self) -> bool {
        self.breaker.is_open()
    }

    pub fn high_len(&self) -> usize {
        self.high.len()
    }

    pub fn low_len(&self) -> usize {
        self.low.len()
    }
}

#[derive(Clone, Copy)]
enum QueueClass {
    High,
    Low,
}

fn priority_name(kind: EventKind) -> &'static str {
    if kind.is_high_priority() {
        "high"
    } else {
        "low"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
