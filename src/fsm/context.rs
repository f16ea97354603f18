//! Shared mutable context threaded through every FSM handler.
//!
//! `FsmContext` is the persistent blackboard: configuration, timing, the
//! error budget. `StepCtx` bundles it with the collaborators a handler may
//! drive during one step — the orchestrator, the LED indicator, and the
//! event outbox the runtime flushes to the bus after the step.

use crate::config::SystemConfig;
use crate::drivers::status_led::LedIndicator;
use crate::events::Outbox;
use crate::net::ConnectionOrchestrator;

/// Persistent FSM state that survives across ticks.
pub struct FsmContext {
    /// System configuration (timeouts, error budget, health thresholds).
    pub config: SystemConfig,

    // -- Timing --
    /// Monotonic timestamp of the current update/handle call.
    pub now_ms: u64,
    /// Monotonic timestamp the current state was entered.
    pub state_entered_ms: u64,

    // -- Error budget --
    /// Error-state entries since the last successful recovery.
    pub error_count: u32,
    /// Set once the error budget is exhausted; the runtime escalates this
    /// to a hardware reset (with restart-loop protection).
    pub reset_requested: bool,

    // -- Running-state housekeeping --
    pub last_health_check_ms: u64,
    pub last_status_log_ms: u64,
}

impl FsmContext {
    pub fn new(config: SystemConfig, now_ms: u64) -> Self {
        Self {
            config,
            now_ms,
            state_entered_ms: now_ms,
            error_count: 0,
            reset_requested: false,
            last_health_check_ms: now_ms,
            last_status_log_ms: now_ms,
        }
    }

    /// Milliseconds elapsed since the current state was entered.
    pub fn elapsed_in_state(&self) -> u64 {
        self.now_ms.saturating_sub(self.state_entered_ms)
    }
}

/// Everything one handler invocation may touch.
pub struct StepCtx<'a> {
    pub shared: &'a mut FsmContext,
    pub net: &'a mut ConnectionOrchestrator,
    pub led: &'a mut LedIndicator,
    pub outbox: &'a mut Outbox,
}
