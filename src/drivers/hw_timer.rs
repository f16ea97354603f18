//! Hardware dispatch-tick timer.
//!
//! A periodic `esp_timer` callback marks high-priority dispatch ticks by
//! incrementing a lock-free atomic counter; the main task converts pending
//! ticks into `EventBus::dispatch_high` batches. The timer context touches
//! nothing but the atomic, so the ISR/main-loop shared surface is exactly
//! one word — no queue or breaker state is ever mutated off the main task.
//!
//! On simulation targets ticks are synthesized from elapsed time.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::bus::TICK_PERIOD_MS;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// Dispatch ticks produced by the timer and not yet consumed.
static PENDING_TICKS: AtomicU32 = AtomicU32::new(0);

#[cfg(target_os = "espidf")]
static mut DISPATCH_TIMER: esp_timer_handle_t = core::ptr::null_mut();

#[cfg(target_os = "espidf")]
unsafe extern "C" fn dispatch_tick_cb(_arg: *mut core::ffi::c_void) {
    PENDING_TICKS.fetch_add(1, Ordering::Release);
}

/// Start the periodic dispatch timer.
#[cfg(target_os = "espidf")]
pub fn start_dispatch_timer() {
    // SAFETY: DISPATCH_TIMER is written once at boot from the single
    // main-task context before any callback fires. The callback itself
    // only touches the atomic counter, which is ISR-safe.
    unsafe {
        let args = esp_timer_create_args_t {
            callback: Some(dispatch_tick_cb),
            arg: core::ptr::null_mut(),
            dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
            name: b"dispatch\0".as_ptr() as *const _,
            skip_unhandled_events: true,
        };
        let ret = esp_timer_create(&args, &raw mut DISPATCH_TIMER);
        if ret != ESP_OK {
            log::error!(
                "hw_timer: dispatch timer create failed (rc={}) — continuing without ticks",
                ret
            );
            return;
        }
        let ret = esp_timer_start_periodic(DISPATCH_TIMER, TICK_PERIOD_MS * 1_000);
        if ret != ESP_OK {
            log::error!("hw_timer: dispatch timer start failed (rc={})", ret);
            return;
        }
        log::info!("hw_timer: dispatch tick @ {}ms", TICK_PERIOD_MS);
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn start_dispatch_timer() {
    log::info!("hw_timer(sim): ticks synthesized from loop cadence");
}

/// Stop the dispatch timer.
#[cfg(target_os = "espidf")]
pub fn stop_dispatch_timer() {
    // SAFETY: handle written once in start_dispatch_timer; null-check
    // prevents stopping a timer that never started.
    unsafe {
        let t = DISPATCH_TIMER;
        if !t.is_null() {
            esp_timer_stop(t);
        }
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn stop_dispatch_timer() {}

/// Take all pending dispatch ticks (consumes them).
pub fn take_pending_ticks() -> u32 {
    PENDING_TICKS.swap(0, Ordering::Acquire)
}

/// Synthesize ticks from elapsed wall time — host targets only, where no
/// hardware timer runs.
#[cfg(not(target_os = "espidf"))]
pub fn simulate_elapsed(elapsed_ms: u64) {
    let ticks = (elapsed_ms / TICK_PERIOD_MS) as u32;
    if ticks > 0 {
        PENDING_TICKS.fetch_add(ticks, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_ticks_accumulate_and_drain() {
        // Drain anything left over from other tests (shared static).
        let _ = take_pending_ticks();

        simulate_elapsed(75); // 3 ticks at 25ms
        simulate_elapsed(20); // sub-tick remainder rounds down
        assert_eq!(take_pending_ticks(), 3);
        assert_eq!(take_pending_ticks(), 0);
    }
}
