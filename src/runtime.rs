//! Explicit runtime context — no module-level singletons.
//!
//! One [`Runtime`] constructed at boot owns the bus, the lifecycle FSM, the
//! connection orchestrator, and every collaborator. Subscribers are routed
//! by [`HandlerId`] through the [`BusDelegate`] impl on [`Components`];
//! events a handler wants to publish go into an outbox that the runtime
//! flushes after the dispatch batch, so nothing re-enters the bus from
//! inside dispatch.
//!
//! Main-loop order per iteration (see [`Runtime::step`]):
//! pending timer ticks → HIGH dispatch batches → FSM update (feeds WDT) →
//! orchestrator poll + periodic reconcile → LOW drain → KV debounce flush →
//! reset escalation check.

use crate::adapters::kv::PersistentKv;
use crate::bus::{BusConfig, BusDelegate, EventBus, HandlerId};
use crate::config::SystemConfig;
use crate::drivers::status_led::LedIndicator;
use crate::drivers::watchdog::Watchdog;
use crate::error::HandlerError;
use crate::events::{Event, EventKind, Outbox};
use crate::fsm::StateMachine;
use crate::net::ConnectionOrchestrator;
use log::{error, warn};

pub const HANDLER_FSM: HandlerId = HandlerId(0);
pub const HANDLER_NET: HandlerId = HandlerId(1);

/// Link-status reconciliation cadence.
const RECONCILE_PERIOD_MS: u64 = 1_000;

/// Restart-loop protection: at most this many deliberate resets…
const MAX_RESTART_COUNT: u64 = 5;
/// …per this window. Counted in the persistent cache.
const RESTART_WINDOW_MS: u64 = 3_600_000;

pub const KV_RESTART_COUNT: &str = "restart_count";
pub const KV_RESTART_TIME: &str = "last_restart_time";

// ---------------------------------------------------------------------------
// Components — everything the bus dispatches into
// ---------------------------------------------------------------------------

pub struct Components {
    pub fsm: StateMachine,
    pub net: ConnectionOrchestrator,
    pub led: LedIndicator,
    pub kv: PersistentKv,
    pub watchdog: Watchdog,
    /// Events emitted by handlers during dispatch; flushed by the runtime.
    outbox: Outbox,
    /// Timestamp of the current step, visible to dispatch handlers.
    now_ms: u64,
}

impl BusDelegate for Components {
    fn handle(&mut self, handle: HandlerId, event: &Event) -> Result<(), HandlerError> {
        match handle {
            HANDLER_FSM => self.fsm.handle_bus_event(
                event,
                &mut self.net,
                &mut self.led,
                &mut self.outbox,
                self.now_ms,
            ),
            HANDLER_NET => self.net.handle_bus_event(event),
            other => {
                warn!("Runtime: dispatch to unknown handler {:?}", other);
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

pub struct Runtime {
    pub bus: EventBus,
    pub components: Components,
    last_reconcile_ms: u64,
}

impl Runtime {
    pub fn new(
        config: SystemConfig,
        net: ConnectionOrchestrator,
        kv: PersistentKv,
        watchdog: Watchdog,
        now_ms: u64,
    ) -> Self {
        let mut bus = EventBus::new(BusConfig::default());

        // The FSM reacts to link lifecycle and faults; the orchestrator to
        // inbound MQTT commands.
        bus.subscribe(EventKind::WifiStateChange, HANDLER_FSM);
        bus.subscribe(EventKind::MqttStateChange, HANDLER_FSM);
        bus.subscribe(EventKind::SystemError, HANDLER_FSM);
        bus.subscribe(EventKind::MqttMessage, HANDLER_NET);

        let fsm = StateMachine::new(config, now_ms);

        Self {
            bus,
            components: Components {
                fsm,
                net,
                led: LedIndicator::new(),
                kv,
                watchdog,
                outbox: Outbox::new(),
                now_ms,
            },
            last_reconcile_ms: now_ms,
        }
    }

    /// Run the initial FSM entry actions. Call once before the first step.
    pub fn start(&mut self, now_ms: u64) {
        let c = &mut self.components;
        c.now_ms = now_ms;
        c.fsm.start(&mut c.net, &mut c.led, &mut c.outbox);
        self.flush_outboxes(now_ms);
    }

    /// One main-loop iteration. Returns `true` when the error budget is
    /// exhausted and a hardware reset is due (and permitted by the
    /// restart-loop guard) — the caller performs the actual reset.
    pub fn step(&mut self, pending_ticks: u32, now_ms: u64) -> bool {
        self.components.now_ms = now_ms;

        // 1. Timer-driven HIGH dispatch, one bounded batch per tick.
        for _ in 0..pending_ticks {
            self.bus.dispatch_high(&mut self.components, now_ms);
            self.flush_outboxes(now_ms);
        }

        // 2. Lifecycle update — always feeds the watchdog.
        {
            let c = &mut self.components;
            c.fsm
                .update(&mut c.net, &mut c.led, &mut c.outbox, &c.watchdog, now_ms);
        }
        self.flush_outboxes(now_ms);

        // 3. Drive the connection sequence and reconcile link status.
        {
            let c = &mut self.components;
            c.net.poll(&mut c.kv, now_ms);
            if now_ms.saturating_sub(self.last_reconcile_ms) >= RECONCILE_PERIOD_MS {
                self.last_reconcile_ms = now_ms;
                c.net.reconcile(now_ms);
            }
        }
        self.flush_outboxes(now_ms);

        // 4. Cooperative LOW drain.
        self.bus.drain_low(&mut self.components, now_ms);
        self.flush_outboxes(now_ms);

        // 5. Debounced persistence.
        self.components.kv.flush(now_ms);

        // 6. Reset escalation.
        if self.components.fsm.reset_requested() {
            return self.escalate_reset(now_ms);
        }
        false
    }

    /// Move handler- and orchestrator-emitted events onto the bus.
    fn flush_outboxes(&mut self, now_ms: u64) {
        let c = &mut self.components;
        for payload in core::mem::take(&mut c.outbox) {
            let _ = self.bus.publish(payload, now_ms);
        }
        for payload in c.net.take_events() {
            let _ = self.bus.publish(payload, now_ms);
        }
    }

    /// Restart-loop protection: allow at most [`MAX_RESTART_COUNT`]
    /// deliberate resets per window; beyond that the device stays up in its
    /// degraded state rather than boot-looping.
    fn escalate_reset(&mut self, now_ms: u64) -> bool {
        let kv = &mut self.components.kv;
        let last = kv.get_u64(KV_RESTART_TIME).unwrap_or(0);
        let mut count = kv.get_u64(KV_RESTART_COUNT).unwrap_or(0);

        if now_ms.saturating_sub(last) > RESTART_WINDOW_MS {
            count = 0;
        }

        if count >= MAX_RESTART_COUNT {
            error!(
                "Runtime: restart loop detected ({} resets), refusing to reset again",
                count
            );
            // Stay up degraded; the request re-arms on the next Error entry.
            self.components.fsm.clear_reset_request();
            return false;
        }

        count += 1;
        error!(
            "Runtime: error budget exhausted, hardware reset {}/{}",
            count, MAX_RESTART_COUNT
        );
        kv.set(KV_RESTART_COUNT, serde_json::json!(count));
        kv.set(KV_RESTART_TIME, serde_json::json!(now_ms));
        kv.force_flush(now_ms);
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
