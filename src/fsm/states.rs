//! Concrete state handler functions and table builder.
//!
//! Each state is defined by plain `fn` pointers — no closures, no dynamic
//! dispatch, no heap. Handlers read and write the [`StepCtx`] blackboard;
//! update handlers return the next FSM input event, if any.

use super::context::StepCtx;
use super::{FsmEvent, StateDescriptor, StateId};
use crate::diagnostics;
use crate::error::HandlerError;
use crate::events::{EventPayload, SystemErrorKind};
use log::{info, warn};

/// Boot settle before the connection sequence starts.
pub const INIT_SETTLE_MS: u64 = 1_000;
/// Overall bound on one connecting phase (covers scan + all candidates).
pub const CONNECTING_TIMEOUT_MS: u64 = 120_000;
/// Error-state dwell before the self-scheduled retry.
pub const ERROR_RETRY_MS: u64 = 15_000;
/// Running-state health probe period.
pub const HEALTH_CHECK_PERIOD_MS: u64 = 10_000;
/// Running-state status log period.
pub const STATUS_LOG_PERIOD_MS: u64 = 30_000;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table. Called once at startup.
pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        StateDescriptor {
            id: StateId::Init,
            name: "INIT",
            on_enter: None,
            on_exit: None,
            on_update: init_update,
        },
        StateDescriptor {
            id: StateId::Connecting,
            name: "CONNECTING",
            on_enter: Some(connecting_enter),
            on_exit: None,
            on_update: connecting_update,
        },
        StateDescriptor {
            id: StateId::Running,
            name: "RUNNING",
            on_enter: Some(running_enter),
            on_exit: None,
            on_update: running_update,
        },
        StateDescriptor {
            id: StateId::Error,
            name: "ERROR",
            on_enter: Some(error_enter),
            on_exit: None,
            on_update: error_update,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  INIT — boot settle before networking starts
// ═══════════════════════════════════════════════════════════════════════════

fn init_update(ctx: &mut StepCtx) -> Result<Option<FsmEvent>, HandlerError> {
    // Warm start: the link can already be up (e.g. after a soft reset that
    // left the radio associated).
    if ctx.net.is_connected() {
        return Ok(Some(FsmEvent::LinkConnected));
    }
    if ctx.shared.elapsed_in_state() >= INIT_SETTLE_MS {
        info!("INIT: settle complete, starting network bring-up");
        return Ok(Some(FsmEvent::InitComplete));
    }
    Ok(None)
}

// ═══════════════════════════════════════════════════════════════════════════
//  CONNECTING — orchestrator drives WiFi → SNTP → MQTT
// ═══════════════════════════════════════════════════════════════════════════

fn connecting_enter(ctx: &mut StepCtx) {
    info!("CONNECTING: arming connection orchestrator");
    ctx.net.connect();
}

fn connecting_update(ctx: &mut StepCtx) -> Result<Option<FsmEvent>, HandlerError> {
    if ctx.net.is_connected() {
        return Ok(Some(FsmEvent::LinkConnected));
    }
    if ctx.shared.elapsed_in_state() > CONNECTING_TIMEOUT_MS {
        warn!(
            "CONNECTING: no link after {}ms",
            ctx.shared.elapsed_in_state()
        );
        return Ok(Some(FsmEvent::ConnectTimeout));
    }
    Ok(None)
}

// ═══════════════════════════════════════════════════════════════════════════
//  RUNNING — steady state with periodic health checks
// ═══════════════════════════════════════════════════════════════════════════

fn running_enter(ctx: &mut StepCtx) {
    info!("RUNNING: system healthy");
    ctx.shared.error_count = 0;
    ctx.shared.last_health_check_ms = ctx.shared.now_ms;
    ctx.shared.last_status_log_ms = ctx.shared.now_ms;
}

fn running_update(ctx: &mut StepCtx) -> Result<Option<FsmEvent>, HandlerError> {
    // Link loss detected by polling, independent of the event path.
    if !ctx.net.is_connected() {
        warn!("RUNNING: link lost, reconnecting");
        return Ok(Some(FsmEvent::LinkDisconnected));
    }

    let now = ctx.shared.now_ms;

    if now.saturating_sub(ctx.shared.last_health_check_ms) >= HEALTH_CHECK_PERIOD_MS {
        ctx.shared.last_health_check_ms = now;
        check_health(ctx);
    }

    if now.saturating_sub(ctx.shared.last_status_log_ms) >= STATUS_LOG_PERIOD_MS {
        ctx.shared.last_status_log_ms = now;
        info!(
            "RUNNING: up {}s, wifi={} mqtt={} ntp_synced={}",
            ctx.shared.elapsed_in_state() / 1_000,
            ctx.net.is_connected(),
            ctx.net.is_fully_connected(),
            ctx.net.is_time_synced(),
        );
    }

    Ok(None)
}

/// Memory-pressure and temperature probes. Threshold crossings are degraded
/// conditions: logged and surfaced as `system.error { health_warning }`
/// events, which the transition table deliberately ignores.
fn check_health(ctx: &mut StepCtx) {
    let mem_pct = diagnostics::memory_usage_percent();
    if mem_pct > ctx.shared.config.daemon.memory_threshold_pct {
        warn!("RUNNING: high memory usage: {}%", mem_pct);
        let _ = ctx.outbox.push(EventPayload::system_error(
            SystemErrorKind::HealthWarning,
            "memory pressure",
            0,
        ));
    }

    if let Some(temp) = diagnostics::mcu_temperature_c() {
        if temp > ctx.shared.config.daemon.temp_threshold_c {
            warn!("RUNNING: high MCU temperature: {:.1}C", temp);
            let _ = ctx.outbox.push(EventPayload::system_error(
                SystemErrorKind::HealthWarning,
                "temperature",
                0,
            ));
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  ERROR — bounded budget, self-scheduled retry
// ═══════════════════════════════════════════════════════════════════════════

fn error_enter(ctx: &mut StepCtx) {
    ctx.shared.error_count += 1;
    let max = ctx.shared.config.daemon.max_error_count;
    warn!(
        "ERROR: entered ({}/{} budget)",
        ctx.shared.error_count, max
    );

    if ctx.shared.error_count >= max {
        // The runtime performs the reset (with restart-loop protection) —
        // never from inside a state handler.
        warn!("ERROR: budget exhausted, requesting hardware reset");
        ctx.shared.reset_requested = true;
    }
}

fn error_update(ctx: &mut StepCtx) -> Result<Option<FsmEvent>, HandlerError> {
    if ctx.shared.elapsed_in_state() >= ERROR_RETRY_MS {
        info!("ERROR: retry timer elapsed, reconnecting");
        return Ok(Some(FsmEvent::RetryElapsed));
    }
    Ok(None)
}
