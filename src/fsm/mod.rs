//! Table-driven lifecycle state machine.
//!
//! ```text
//!  INIT ──[settle]──▶ CONNECTING ──[link up]──▶ RUNNING
//!    │                   ▲   │                     │
//!    │                   │   └──[timeout]──┐  [link lost]
//!    └──[link up]────────┼─────────────────┤       │
//!                        │                 ▼       ▼
//!                        └──[15s retry]── ERROR ◀──┘
//! ```
//!
//! The transition table is a pure function of (state, event): an event with
//! no entry in the current state's row is a no-op, and nothing else
//! influences the transition. Entry actions — driving the orchestrator,
//! selecting the LED pattern, spending the error budget — are side effects
//! layered on top by the engine.
//!
//! Every `update()` call feeds the hardware watchdog before returning, no
//! matter what the state handler did; an unfed watchdog is the last line of
//! defense against a true hang, so no handler error may unwind past it.

pub mod context;
pub mod states;

use crate::drivers::status_led::LedPattern;
use crate::drivers::watchdog::Watchdog;
use crate::error::HandlerError;
use crate::events::{Event, EventPayload, LinkState, Outbox, SystemErrorKind};
use context::{FsmContext, StepCtx};
use log::{error, info, warn};

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// The reduced 4-state lifecycle model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateId {
    Init = 0,
    Connecting = 1,
    Running = 2,
    Error = 3,
}

impl StateId {
    /// Total number of states — used to size the table array.
    pub const COUNT: usize = 4;

    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Connecting => "CONNECTING",
            Self::Running => "RUNNING",
            Self::Error => "ERROR",
        }
    }

    /// 1:1 LED pattern selection for this state.
    pub fn led_pattern(self) -> LedPattern {
        match self {
            Self::Init => LedPattern::Blink,
            Self::Connecting => LedPattern::Pulse,
            Self::Running => LedPattern::Cruise,
            Self::Error => LedPattern::Sos,
        }
    }

    /// Convert a `u8` index back to `StateId`. Falls back to `Error` on an
    /// out-of-range index in release builds.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Init,
            1 => Self::Connecting,
            2 => Self::Running,
            3 => Self::Error,
            _ => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::Error
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FSM input events
// ---------------------------------------------------------------------------

/// Inputs the transition table understands. Bus events are distilled into
/// these via [`fsm_event_from_bus`]; state update handlers produce them
/// directly (timeouts, self-scheduled retries).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmEvent {
    /// Boot settle finished.
    InitComplete,
    /// WiFi came up.
    LinkConnected,
    /// The orchestrator reports full connectivity (WiFi + MQTT).
    FullyConnected,
    /// WiFi or MQTT dropped.
    LinkDisconnected,
    /// The connecting phase exceeded its bound.
    ConnectTimeout,
    /// A fault was reported (system error, failed handler).
    Fault,
    /// The Error-state retry timer elapsed (self-scheduled).
    RetryElapsed,
}

/// The transition table: `(state, event) -> next state`, or `None` when the
/// event has no entry in the state's row.
pub fn next_state(state: StateId, event: FsmEvent) -> Option<StateId> {
    use FsmEvent::*;
    use StateId::*;
    match (state, event) {
        (Init, InitComplete) => Some(Connecting),
        (Init, LinkConnected | FullyConnected) => Some(Running),
        (Init, Fault) => Some(Error),

        (Connecting, LinkConnected | FullyConnected) => Some(Running),
        (Connecting, ConnectTimeout | Fault) => Some(Error),

        (Running, LinkDisconnected) => Some(Connecting),
        (Running, Fault) => Some(Error),

        (Error, RetryElapsed) => Some(Connecting),

        _ => None,
    }
}

/// Distil a bus event into an FSM input.
///
/// Degraded-service errors (queue full, health warnings) stay out of the
/// table on purpose: they are logged and survivable, and must not bounce a
/// healthy system into the Error state.
pub fn fsm_event_from_bus(event: &Event) -> Option<FsmEvent> {
    match &event.payload {
        EventPayload::WifiState { state, .. } => match state {
            LinkState::Connected => Some(FsmEvent::LinkConnected),
            LinkState::Disconnected => Some(FsmEvent::LinkDisconnected),
            LinkState::Connecting => None,
        },
        EventPayload::MqttState { state } => match state {
            LinkState::Connected => Some(FsmEvent::FullyConnected),
            LinkState::Disconnected => Some(FsmEvent::LinkDisconnected),
            LinkState::Connecting => None,
        },
        EventPayload::SystemError { kind, .. } => match kind {
            SystemErrorKind::CallbackError
            | SystemErrorKind::PoolExhausted
            | SystemErrorKind::RetriesExhausted
            | SystemErrorKind::StateHandlerFailed => Some(FsmEvent::Fault),
            SystemErrorKind::QueueFull | SystemErrorKind::HealthWarning => None,
        },
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
pub type StateActionFn = fn(&mut StepCtx);

/// Signature for the per-tick update handler. `Ok(Some(ev))` feeds the
/// transition table; `Err` is demoted to an Error-state transition at the
/// engine boundary.
pub type StateUpdateFn = fn(&mut StepCtx) -> Result<Option<FsmEvent>, HandlerError>;

/// Static descriptor for a single state. Stored in a fixed-size array —
/// no heap, no `dyn`.
pub struct StateDescriptor {
    pub id: StateId,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct StateMachine {
    table: [StateDescriptor; StateId::COUNT],
    current: usize,
    ctx: FsmContext,
}

impl StateMachine {
    pub fn new(config: crate::config::SystemConfig, now_ms: u64) -> Self {
        Self {
            table: states::build_state_table(),
            current: StateId::Init as usize,
            ctx: FsmContext::new(config, now_ms),
        }
    }

    /// Run the initial `on_enter` for the starting state. Call once after
    /// construction, before the first `update()`.
    pub fn start(
        &mut self,
        net: &mut crate::net::ConnectionOrchestrator,
        led: &mut crate::drivers::status_led::LedIndicator,
        outbox: &mut Outbox,
    ) {
        info!("FSM: starting in {}", self.table[self.current].name);
        led.play(self.current_state().led_pattern());
        let _ = outbox.push(EventPayload::SystemState {
            state: self.current_state(),
        });
        if let Some(enter) = self.table[self.current].on_enter {
            let mut step = StepCtx {
                shared: &mut self.ctx,
                net,
                led,
                outbox,
            };
            enter(&mut step);
        }
    }

    /// Feed one bus event through the conversion layer and the transition
    /// table. No-ops (including non-lifecycle events) return `Ok`.
    pub fn handle_bus_event(
        &mut self,
        event: &Event,
        net: &mut crate::net::ConnectionOrchestrator,
        led: &mut crate::drivers::status_led::LedIndicator,
        outbox: &mut Outbox,
        now_ms: u64,
    ) -> Result<(), HandlerError> {
        self.ctx.now_ms = now_ms;
        if let Some(fsm_event) = fsm_event_from_bus(event) {
            self.apply(fsm_event, net, led, outbox);
        }
        Ok(())
    }

    /// One main-loop iteration: run the current state's update handler,
    /// apply any resulting transition, and feed the watchdog — always.
    pub fn update(
        &mut self,
        net: &mut crate::net::ConnectionOrchestrator,
        led: &mut crate::drivers::status_led::LedIndicator,
        outbox: &mut Outbox,
        watchdog: &Watchdog,
        now_ms: u64,
    ) {
        self.ctx.now_ms = now_ms;

        let update = self.table[self.current].on_update;
        let result = {
            let mut step = StepCtx {
                shared: &mut self.ctx,
                net: &mut *net,
                led: &mut *led,
                outbox: &mut *outbox,
            };
            update(&mut step)
        };

        match result {
            Ok(Some(event)) => self.apply(event, net, led, outbox),
            Ok(None) => {}
            Err(e) => {
                error!("FSM: {} handler failed: {}", self.table[self.current].name, e);
                let _ = outbox.push(EventPayload::system_error(
                    SystemErrorKind::StateHandlerFailed,
                    e.context,
                    0,
                ));
                if self.current_state() != StateId::Error {
                    self.transition(StateId::Error, net, led, outbox);
                }
            }
        }

        watchdog.feed();
    }

    /// Apply one FSM event through the transition table.
    pub fn apply(
        &mut self,
        event: FsmEvent,
        net: &mut crate::net::ConnectionOrchestrator,
        led: &mut crate::drivers::status_led::LedIndicator,
        outbox: &mut Outbox,
    ) {
        if let Some(next) = next_state(self.current_state(), event) {
            if next != self.current_state() {
                self.transition(next, net, led, outbox);
            }
        }
    }

    pub fn current_state(&self) -> StateId {
        StateId::from_index(self.current)
    }

    /// Milliseconds spent in the current state (as of the last update).
    pub fn elapsed_in_state(&self) -> u64 {
        self.ctx.elapsed_in_state()
    }

    pub fn error_count(&self) -> u32 {
        self.ctx.error_count
    }

    /// True once the error budget is exhausted; the runtime must escalate
    /// to a hardware reset.
    pub fn reset_requested(&self) -> bool {
        self.ctx.reset_requested
    }

    /// Drop a pending reset request. Called when the restart-loop guard
    /// refuses the reset; the request re-arms on the next Error entry.
    pub fn clear_reset_request(&mut self) {
        self.ctx.reset_requested = false;
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn transition(
        &mut self,
        next_id: StateId,
        net: &mut crate::net::ConnectionOrchestrator,
        led: &mut crate::drivers::status_led::LedIndicator,
        outbox: &mut Outbox,
    ) {
        let next_idx = next_id as usize;

        info!(
            "FSM: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            let mut step = StepCtx {
                shared: &mut self.ctx,
                net: &mut *net,
                led: &mut *led,
                outbox: &mut *outbox,
            };
            exit(&mut step);
        }

        self.current = next_idx;
        self.ctx.state_entered_ms = self.ctx.now_ms;

        // Every entry: LED pattern selection and a state-change event.
        led.play(next_id.led_pattern());
        if outbox
            .push(EventPayload::SystemState { state: next_id })
            .is_err()
        {
            warn!("FSM: outbox full, state-change event dropped");
        }

        if let Some(enter) = self.table[self.current].on_enter {
            let mut step = StepCtx {
                shared: &mut self.ctx,
                net: &mut *net,
                led: &mut *led,
                outbox: &mut *outbox,
            };
            enter(&mut step);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;
    use crate::drivers::status_led::LedIndicator;
    use crate::net::ConnectionOrchestrator;

    fn fixtures() -> (ConnectionOrchestrator, LedIndicator, Outbox) {
        let config = SystemConfig::default();
        (
            ConnectionOrchestrator::new(&config),
            LedIndicator::new(),
            Outbox::new(),
        )
    }

    #[test]
    fn table_is_pure_and_total() {
        // Absent entries leave the state unchanged; present entries are exact.
        assert_eq!(
            next_state(StateId::Init, FsmEvent::InitComplete),
            Some(StateId::Connecting)
        );
        assert_eq!(
            next_state(StateId::Connecting, FsmEvent::LinkConnected),
            Some(StateId::Running)
        );
        assert_eq!(
            next_state(StateId::Connecting, FsmEvent::ConnectTimeout),
            Some(StateId::Error)
        );
        assert_eq!(
            next_state(StateId::Running, FsmEvent::LinkDisconnected),
            Some(StateId::Connecting)
        );
        assert_eq!(
            next_state(StateId::Error, FsmEvent::RetryElapsed),
            Some(StateId::Connecting)
        );
        // No-ops.
        assert_eq!(next_state(StateId::Running, FsmEvent::LinkConnected), None);
        assert_eq!(next_state(StateId::Error, FsmEvent::Fault), None);
        assert_eq!(next_state(StateId::Init, FsmEvent::RetryElapsed), None);
    }

    #[test]
    fn starts_in_init() {
        let fsm = StateMachine::new(SystemConfig::default(), 0);
        assert_eq!(fsm.current_state(), StateId::Init);
    }

    #[test]
    fn start_selects_led_and_emits_state() {
        let (mut net, mut led, mut outbox) = fixtures();
        let mut fsm = StateMachine::new(SystemConfig::default(), 0);
        fsm.start(&mut net, &mut led, &mut outbox);
        assert_eq!(led.current(), LedPattern::Blink);
        assert!(matches!(
            outbox[0],
            EventPayload::SystemState {
                state: StateId::Init
            }
        ));
    }

    #[test]
    fn init_settles_into_connecting() {
        let (mut net, mut led, mut outbox) = fixtures();
        let wd = Watchdog::disabled();
        let mut fsm = StateMachine::new(SystemConfig::default(), 0);
        fsm.start(&mut net, &mut led, &mut outbox);

        fsm.update(&mut net, &mut led, &mut outbox, &wd, 500);
        assert_eq!(fsm.current_state(), StateId::Init);

        fsm.update(&mut net, &mut led, &mut outbox, &wd, 1_000);
        assert_eq!(fsm.current_state(), StateId::Connecting);
        assert_eq!(led.current(), LedPattern::Pulse);
    }

    #[test]
    fn connecting_entry_arms_orchestrator() {
        let (mut net, mut led, mut outbox) = fixtures();
        let mut fsm = StateMachine::new(SystemConfig::default(), 0);
        fsm.start(&mut net, &mut led, &mut outbox);
        fsm.apply(FsmEvent::InitComplete, &mut net, &mut led, &mut outbox);
        assert!(net.is_armed());
    }

    #[test]
    fn error_entry_spends_budget_and_requests_reset_at_max() {
        let (mut net, mut led, mut outbox) = fixtures();
        let mut config = SystemConfig::default();
        config.daemon.max_error_count = 2;
        let mut fsm = StateMachine::new(config, 0);
        fsm.start(&mut net, &mut led, &mut outbox);

        fsm.apply(FsmEvent::Fault, &mut net, &mut led, &mut outbox);
        assert_eq!(fsm.current_state(), StateId::Error);
        assert_eq!(fsm.error_count(), 1);
        assert!(!fsm.reset_requested());

        fsm.apply(FsmEvent::RetryElapsed, &mut net, &mut led, &mut outbox);
        fsm.apply(FsmEvent::Fault, &mut net, &mut led, &mut outbox);
        assert_eq!(fsm.error_count(), 2);
        assert!(fsm.reset_requested());
    }

    #[test]
    fn error_self_retries_after_timeout() {
        let (mut net, mut led, mut outbox) = fixtures();
        let wd = Watchdog::disabled();
        let mut fsm = StateMachine::new(SystemConfig::default(), 0);
        fsm.start(&mut net, &mut led, &mut outbox);
        fsm.apply(FsmEvent::Fault, &mut net, &mut led, &mut outbox);
        assert_eq!(fsm.current_state(), StateId::Error);

        fsm.update(&mut net, &mut led, &mut outbox, &wd, 14_999);
        assert_eq!(fsm.current_state(), StateId::Error);

        fsm.update(&mut net, &mut led, &mut outbox, &wd, 15_000);
        assert_eq!(fsm.current_state(), StateId::Connecting);
    }

    #[test]
    fn running_drops_to_connecting_on_link_loss_event() {
        let (mut net, mut led, mut outbox) = fixtures();
        let mut fsm = StateMachine::new(SystemConfig::default(), 0);
        fsm.start(&mut net, &mut led, &mut outbox);
        fsm.apply(FsmEvent::LinkConnected, &mut net, &mut led, &mut outbox);
        assert_eq!(fsm.current_state(), StateId::Running);
        assert_eq!(led.current(), LedPattern::Cruise);

        let ev = Event::new(
            EventPayload::WifiState {
                state: LinkState::Disconnected,
                ssid: None,
            },
            100,
        );
        fsm.handle_bus_event(&ev, &mut net, &mut led, &mut outbox, 100)
            .unwrap();
        assert_eq!(fsm.current_state(), StateId::Connecting);
    }

    #[test]
    fn running_resets_error_budget() {
        let (mut net, mut led, mut outbox) = fixtures();
        let mut fsm = StateMachine::new(SystemConfig::default(), 0);
        fsm.start(&mut net, &mut led, &mut outbox);
        fsm.apply(FsmEvent::Fault, &mut net, &mut led, &mut outbox);
        assert_eq!(fsm.error_count(), 1);

        fsm.apply(FsmEvent::RetryElapsed, &mut net, &mut led, &mut outbox);
        fsm.apply(FsmEvent::LinkConnected, &mut net, &mut led, &mut outbox);
        assert_eq!(fsm.current_state(), StateId::Running);
        assert_eq!(fsm.error_count(), 0);
    }

    #[test]
    fn degraded_errors_do_not_bounce_running() {
        let (mut net, mut led, mut outbox) = fixtures();
        let mut fsm = StateMachine::new(SystemConfig::default(), 0);
        fsm.start(&mut net, &mut led, &mut outbox);
        fsm.apply(FsmEvent::LinkConnected, &mut net, &mut led, &mut outbox);

        let ev = Event::new(
            EventPayload::system_error(SystemErrorKind::QueueFull, "low queue full", 0),
            50,
        );
        fsm.handle_bus_event(&ev, &mut net, &mut led, &mut outbox, 50)
            .unwrap();
        assert_eq!(fsm.current_state(), StateId::Running);
    }

    #[test]
    fn callback_error_is_a_fault() {
        let (mut net, mut led, mut outbox) = fixtures();
        let mut fsm = StateMachine::new(SystemConfig::default(), 0);
        fsm.start(&mut net, &mut led, &mut outbox);
        fsm.apply(FsmEvent::LinkConnected, &mut net, &mut led, &mut outbox);

        let ev = Event::new(
            EventPayload::system_error(SystemErrorKind::CallbackError, "subscriber", 1),
            60,
        );
        fsm.handle_bus_event(&ev, &mut net, &mut led, &mut outbox, 60)
            .unwrap();
        assert_eq!(fsm.current_state(), StateId::Error);
        assert_eq!(led.current(), LedPattern::Sos);
    }
}
