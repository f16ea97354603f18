//! NodeLink Firmware — Main Entry Point
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ hardware timer ──▶ dispatch ticks (atomic)                   │
//! │                                                              │
//! │ main loop:                                                   │
//! │   ticks → EventBus.dispatch_high (batched)                   │
//! │   StateMachine.update          (feeds watchdog)              │
//! │   Orchestrator.poll/reconcile  (WiFi → SNTP → MQTT)          │
//! │   EventBus.drain_low                                         │
//! │   PersistentKv.flush           (debounced)                   │
//! │   reset escalation             (error budget, loop guard)    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use log::{info, warn};

use nodelink::adapters::config_store::ConfigStore;
use nodelink::adapters::kv::PersistentKv;
use nodelink::adapters::time::MonotonicClock;
use nodelink::config::validate_config;
use nodelink::drivers::{hw_timer, watchdog};
use nodelink::net::ConnectionOrchestrator;
use nodelink::runtime::Runtime;

/// Main-loop pacing; the dispatch tick (25 ms) rides on top of this.
const LOOP_PERIOD_MS: u32 = 20;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    #[cfg(target_os = "espidf")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_logger::init()?;
    }
    #[cfg(not(target_os = "espidf"))]
    env_logger_fallback();

    info!("NodeLink v{} starting", env!("CARGO_PKG_VERSION"));

    // ── 2. Configuration ──────────────────────────────────────
    let config_store = ConfigStore::new();
    let config = config_store.load();
    if let Err(e) = validate_config(&config) {
        // load() already falls back to defaults; this only fires if the
        // defaults themselves are broken, which is a build defect.
        warn!("Config validation failed: {e}");
    }

    // ── 3. Clock, watchdog, persistence ───────────────────────
    let clock = MonotonicClock::new();
    let wd = watchdog::Watchdog::new(config.daemon.wdt_timeout_ms, config.daemon.wdt_enabled);
    let kv = PersistentKv::default();

    // ── 4. Connection orchestrator ────────────────────────────
    // Jitter seeded from the boot clock so reconnect delays decorrelate
    // across a fleet after a shared outage.
    let seed = (clock.now_ms() as u32).wrapping_mul(2_654_435_761) | 1;
    let net = ConnectionOrchestrator::with_jitter_seed(&config, seed);

    // ── 5. Runtime assembly ───────────────────────────────────
    let now = clock.now_ms();
    let mut runtime = Runtime::new(config, net, kv, wd, now);

    hw_timer::start_dispatch_timer();
    runtime.start(now);
    info!("System ready. Entering main loop.");

    // ── 6. Main loop ──────────────────────────────────────────
    loop {
        #[cfg(target_os = "espidf")]
        esp_idf_hal::delay::FreeRtos::delay_ms(LOOP_PERIOD_MS);

        #[cfg(not(target_os = "espidf"))]
        {
            std::thread::sleep(std::time::Duration::from_millis(u64::from(LOOP_PERIOD_MS)));
            hw_timer::simulate_elapsed(u64::from(LOOP_PERIOD_MS));
        }

        let now = clock.now_ms();
        let ticks = hw_timer::take_pending_ticks();

        if runtime.step(ticks, now) {
            // Error budget exhausted and the restart-loop guard agreed.
            watchdog::force_restart();
        }
    }
}

/// Plain stderr logging for host-side runs (no esp_idf_logger there).
#[cfg(not(target_os = "espidf"))]
fn env_logger_fallback() {
    struct StderrLog;
    impl log::Log for StderrLog {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }
        fn log(&self, record: &log::Record) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
        fn flush(&self) {}
    }
    static LOGGER: StderrLog = StderrLog;
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Info);
}
