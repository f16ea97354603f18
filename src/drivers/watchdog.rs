//! Task Watchdog Timer (TWDT) driver.
//!
//! Wraps the ESP-IDF TWDT API. The main loop must call `feed()` on every
//! iteration; an unfed watchdog hard-resets the device, which is the
//! system's recovery of last resort against a true hang.
//!
//! `force_restart()` is the deliberate reset path used when the lifecycle
//! FSM exhausts its error budget.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use log::info;

pub struct Watchdog {
    enabled: bool,
    #[cfg(target_os = "espidf")]
    subscribed: bool,
    /// Feeds since construction; lets host tests assert the loop contract.
    #[cfg(not(target_os = "espidf"))]
    feed_count: core::cell::Cell<u64>,
}

impl Watchdog {
    /// Initialise and subscribe the current task to the TWDT with the
    /// configured timeout.
    pub fn new(timeout_ms: u32, enabled: bool) -> Self {
        if !enabled {
            info!("Watchdog: disabled by config");
            return Self::disabled();
        }

        #[cfg(target_os = "espidf")]
        {
            // SAFETY: reconfigure/add run once from the main task before
            // any other task subscribes.
            unsafe {
                let cfg = esp_task_wdt_config_t {
                    timeout_ms,
                    idle_core_mask: 0,
                    trigger_panic: true,
                };
                let ret = esp_task_wdt_reconfigure(&cfg);
                if ret != ESP_OK {
                    log::warn!(
                        "Watchdog: reconfigure returned {} (may already be configured)",
                        ret
                    );
                }

                let ret = esp_task_wdt_add(core::ptr::null_mut());
                let subscribed = ret == ESP_OK;
                if subscribed {
                    info!("Watchdog: subscribed ({}ms timeout, panic on trigger)", timeout_ms);
                } else {
                    log::warn!("Watchdog: failed to subscribe ({})", ret);
                }

                Self {
                    enabled: true,
                    subscribed,
                }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("Watchdog(sim): armed ({}ms timeout)", timeout_ms);
            Self {
                enabled: true,
                feed_count: core::cell::Cell::new(0),
            }
        }
    }

    /// A watchdog that never bites — config-disabled or test fixture.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            #[cfg(target_os = "espidf")]
            subscribed: false,
            #[cfg(not(target_os = "espidf"))]
            feed_count: core::cell::Cell::new(0),
        }
    }

    /// Feed the watchdog. Must be called at least once per timeout window.
    pub fn feed(&self) {
        #[cfg(target_os = "espidf")]
        {
            if self.enabled && self.subscribed {
                unsafe {
                    esp_task_wdt_reset();
                }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.feed_count.set(self.feed_count.get() + 1);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn feed_count(&self) -> u64 {
        self.feed_count.get()
    }
}

/// Deliberate hardware reset — the FatalBudgetExceeded escalation path.
/// Never returns on device.
pub fn force_restart() -> ! {
    #[cfg(target_os = "espidf")]
    {
        log::error!("Forcing hardware reset");
        unsafe {
            esp_restart();
        }
        unreachable!();
    }

    #[cfg(not(target_os = "espidf"))]
    {
        panic!("force_restart() called on host target");
    }
}
