//! System configuration parameters
//!
//! All tunable parameters for the NodeLink connectivity stack and lifecycle
//! daemon. Values can be overridden via NVS (non-volatile storage).

use serde::{Deserialize, Serialize};

/// A single WiFi candidate network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiNetwork {
    pub ssid: String,
    pub password: String,
}

/// WiFi station configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiConfig {
    /// Candidate networks, tried in scan-RSSI order.
    pub networks: Vec<WifiNetwork>,
    /// Per-attempt association timeout (milliseconds).
    pub connect_timeout_ms: u32,
    /// Scan budget (milliseconds) — a longer scan is logged, not fatal.
    pub scan_timeout_ms: u32,
}

/// MQTT broker configuration, including the retry policy for this link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Keepalive interval (seconds); drives the ping cadence in `poll()`.
    pub keepalive_secs: u16,
    /// Topics subscribed after every successful connect.
    pub topics: Vec<String>,
    /// Retry bound for this link; 0 means retry forever.
    pub max_retries: u32,
    /// Exponential backoff base delay (milliseconds).
    pub base_delay_ms: u32,
    /// Exponential backoff cap (milliseconds).
    pub max_delay_ms: u32,
}

/// SNTP time-sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtpConfig {
    pub server: String,
    /// Bounded attempt count inside the driver.
    pub max_attempts: u32,
    /// Fixed delay between attempts (milliseconds).
    pub retry_interval_ms: u32,
}

/// Lifecycle daemon configuration (error budget, watchdog, health checks).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Error-state entries before the firmware forces a hardware reset.
    pub max_error_count: u32,
    pub wdt_enabled: bool,
    pub wdt_timeout_ms: u32,
    /// Heap usage percentage above which the Running health check warns.
    pub memory_threshold_pct: u8,
    /// MCU temperature (Celsius) above which the Running health check warns.
    pub temp_threshold_c: f32,
}

/// Core system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub wifi: WifiConfig,
    pub mqtt: MqttConfig,
    pub ntp: NtpConfig,
    pub daemon: DaemonConfig,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            networks: Vec::new(),
            connect_timeout_ms: 10_000,
            scan_timeout_ms: 10_000,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: String::new(),
            port: 1883,
            user: String::new(),
            password: String::new(),
            keepalive_secs: 60,
            topics: Vec::new(),
            max_retries: 0, // retry forever
            base_delay_ms: 2_000,
            max_delay_ms: 180_000,
        }
    }
}

impl Default for NtpConfig {
    fn default() -> Self {
        Self {
            server: String::from("pool.ntp.org"),
            max_attempts: 3,
            retry_interval_ms: 5_000,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            max_error_count: 10,
            wdt_enabled: true,
            wdt_timeout_ms: 120_000,
            memory_threshold_pct: 80,
            temp_threshold_c: 65.0,
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            wifi: WifiConfig::default(),
            mqtt: MqttConfig::default(),
            ntp: NtpConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

/// Range-check a configuration before persisting or applying it.
///
/// Invalid values are rejected, not silently clamped — a corrupted blob or a
/// bad remote update must not be able to disable the watchdog budget or set
/// a zero timeout.
pub fn validate_config(cfg: &SystemConfig) -> Result<(), &'static str> {
    if !(1_000..=120_000).contains(&cfg.wifi.connect_timeout_ms) {
        return Err("wifi.connect_timeout_ms must be 1000–120000");
    }
    for net in &cfg.wifi.networks {
        if net.ssid.is_empty() || net.ssid.len() > 32 {
            return Err("wifi network SSID must be 1–32 bytes");
        }
    }
    if cfg.mqtt.port == 0 {
        return Err("mqtt.port must be non-zero");
    }
    if !(5..=3_600).contains(&cfg.mqtt.keepalive_secs) {
        return Err("mqtt.keepalive_secs must be 5–3600");
    }
    if cfg.mqtt.base_delay_ms == 0 {
        return Err("mqtt.base_delay_ms must be non-zero");
    }
    if cfg.mqtt.max_delay_ms < cfg.mqtt.base_delay_ms {
        return Err("mqtt.max_delay_ms must be >= mqtt.base_delay_ms");
    }
    if cfg.ntp.max_attempts == 0 {
        return Err("ntp.max_attempts must be non-zero");
    }
    if cfg.daemon.max_error_count == 0 {
        return Err("daemon.max_error_count must be non-zero");
    }
    if !(1_000..=600_000).contains(&cfg.daemon.wdt_timeout_ms) {
        return Err("daemon.wdt_timeout_ms must be 1000–600000");
    }
    if cfg.daemon.memory_threshold_pct > 100 {
        return Err("daemon.memory_threshold_pct must be 0–100");
    }
    if !(0.0..=120.0).contains(&cfg.daemon.temp_threshold_c) {
        return Err("daemon.temp_threshold_c must be 0.0–120.0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = SystemConfig::default();
        assert!(validate_config(&c).is_ok());
        assert!(c.mqtt.base_delay_ms > 0);
        assert!(c.mqtt.max_delay_ms >= c.mqtt.base_delay_ms);
        assert!(c.ntp.max_attempts > 0);
        assert!(c.daemon.max_error_count > 0);
    }

    #[test]
    fn serde_roundtrip() {
        let mut c = SystemConfig::default();
        c.wifi.networks.push(WifiNetwork {
            ssid: "HomeNet".into(),
            password: "hunter22".into(),
        });
        c.mqtt.broker = "broker.local".into();
        let json = serde_json::to_string(&c).unwrap();
        let c2: SystemConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c.wifi.networks, c2.wifi.networks);
        assert_eq!(c.mqtt.broker, c2.mqtt.broker);
        assert_eq!(c.mqtt.base_delay_ms, c2.mqtt.base_delay_ms);
        assert_eq!(c.daemon.wdt_timeout_ms, c2.daemon.wdt_timeout_ms);
    }

    #[test]
    fn postcard_roundtrip() {
        let c = SystemConfig::default();
        let bytes = postcard::to_allocvec(&c).unwrap();
        let c2: SystemConfig = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(c.mqtt.port, c2.mqtt.port);
        assert!((c.daemon.temp_threshold_c - c2.daemon.temp_threshold_c).abs() < 0.001);
    }

    #[test]
    fn rejects_zero_backoff_base() {
        let mut c = SystemConfig::default();
        c.mqtt.base_delay_ms = 0;
        assert!(validate_config(&c).is_err());
    }

    #[test]
    fn rejects_cap_below_base() {
        let mut c = SystemConfig::default();
        c.mqtt.base_delay_ms = 5_000;
        c.mqtt.max_delay_ms = 1_000;
        assert!(validate_config(&c).is_err());
    }

    #[test]
    fn rejects_oversized_ssid() {
        let mut c = SystemConfig::default();
        c.wifi.networks.push(WifiNetwork {
            ssid: "x".repeat(33),
            password: String::new(),
        });
        assert!(validate_config(&c).is_err());
    }

    #[test]
    fn rejects_disabled_error_budget() {
        let mut c = SystemConfig::default();
        c.daemon.max_error_count = 0;
        assert!(validate_config(&c).is_err());
    }
}
