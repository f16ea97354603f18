//! Runtime health probes for the RUNNING-state checks.
//!
//! Threshold policy lives in the FSM (config-driven); this module only
//! reads the raw numbers.

/// Heap usage as a percentage of the total heap.
#[cfg(target_os = "espidf")]
pub fn memory_usage_percent() -> u8 {
    use esp_idf_svc::sys::*;
    let free = unsafe { esp_get_free_heap_size() } as u64;
    let total = unsafe { heap_caps_get_total_size(MALLOC_CAP_DEFAULT) } as u64;
    if total == 0 {
        return 0;
    }
    (100u64.saturating_sub(free * 100 / total)).min(100) as u8
}

#[cfg(not(target_os = "espidf"))]
pub fn memory_usage_percent() -> u8 {
    // Host processes have effectively unbounded heap; report quiescent.
    0
}

/// Internal MCU temperature in Celsius, when the sensor is available.
#[cfg(target_os = "espidf")]
pub fn mcu_temperature_c() -> Option<f32> {
    // The ESP32-C3 exposes the internal sensor through the temperature
    // driver; wired through temperature_sensor_get_celsius once the
    // peripheral handle is threaded in.
    None
}

#[cfg(not(target_os = "espidf"))]
pub fn mcu_temperature_c() -> Option<f32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_are_in_range() {
        assert!(memory_usage_percent() <= 100);
        if let Some(t) = mcu_temperature_c() {
            assert!((-40.0..=125.0).contains(&t));
        }
    }
}
