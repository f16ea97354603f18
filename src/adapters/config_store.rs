//! Persistent system configuration.
//!
//! The full [`SystemConfig`] is stored as one postcard blob in NVS (compact,
//! schema-stable). Loads fall back to defaults on first boot or corruption;
//! saves are range-validated first so a bad remote update can never persist
//! dangerous parameters.

use crate::config::{validate_config, SystemConfig};
use crate::error::KvError;
use log::{info, warn};

#[cfg(target_os = "espidf")]
const CONFIG_NAMESPACE: &str = "nodelink";
#[cfg(target_os = "espidf")]
const CONFIG_KEY: &str = "syscfg";
#[cfg(target_os = "espidf")]
const MAX_BLOB_SIZE: usize = 2048;

pub struct ConfigStore {
    #[cfg(not(target_os = "espidf"))]
    sim_blob: Option<Vec<u8>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            sim_blob: None,
        }
    }

    /// Load the stored configuration, or defaults when nothing (valid) is
    /// stored. Never fails the boot.
    pub fn load(&self) -> SystemConfig {
        match self.platform_read() {
            Ok(Some(bytes)) => match postcard::from_bytes::<SystemConfig>(&bytes) {
                Ok(cfg) => {
                    if let Err(e) = validate_config(&cfg) {
                        warn!("ConfigStore: stored config invalid ({e}), using defaults");
                        SystemConfig::default()
                    } else {
                        info!("ConfigStore: config loaded ({} bytes)", bytes.len());
                        cfg
                    }
                }
                Err(_) => {
                    warn!("ConfigStore: stored config corrupted, using defaults");
                    SystemConfig::default()
                }
            },
            Ok(None) => {
                info!("ConfigStore: no stored config, using defaults");
                SystemConfig::default()
            }
            Err(e) => {
                warn!("ConfigStore: load failed ({e}), using defaults");
                SystemConfig::default()
            }
        }
    }

    /// Validate and persist a configuration.
    pub fn save(&mut self, config: &SystemConfig) -> Result<(), KvError> {
        if let Err(e) = validate_config(config) {
            warn!("ConfigStore: refusing to save invalid config: {e}");
            return Err(KvError::Corrupted);
        }
        let bytes = postcard::to_allocvec(config).map_err(|_| KvError::IoError)?;
        self.platform_write(&bytes)?;
        info!("ConfigStore: config saved ({} bytes)", bytes.len());
        Ok(())
    }

    // ── Platform: ESP-IDF ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_read(&self) -> Result<Option<Vec<u8>>, KvError> {
        use super::kv::{c_key, nvs_with_handle};
        use esp_idf_svc::sys::*;

        let result = nvs_with_handle(CONFIG_NAMESPACE, false, |handle| {
            let key = c_key(CONFIG_KEY);
            let mut size: usize = 0;
            let ret = unsafe {
                nvs_get_blob(handle, key.as_ptr() as *const _, core::ptr::null_mut(), &mut size)
            };
            if ret == ESP_ERR_NVS_NOT_FOUND {
                return Err(ESP_ERR_NVS_NOT_FOUND);
            }
            if ret != ESP_OK || size == 0 || size > MAX_BLOB_SIZE {
                return Err(ret);
            }
            let mut buf = vec![0u8; size];
            let ret = unsafe {
                nvs_get_blob(
                    handle,
                    key.as_ptr() as *const _,
                    buf.as_mut_ptr() as *mut _,
                    &mut size,
                )
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(buf)
        });

        match result {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e == esp_idf_svc::sys::ESP_ERR_NVS_NOT_FOUND => Ok(None),
            Err(_) => Err(KvError::IoError),
        }
    }

    #[cfg(target_os = "espidf")]
    fn platform_write(&mut self, bytes: &[u8]) -> Result<(), KvError> {
        use super::kv::{c_key, nvs_with_handle};
        use esp_idf_svc::sys::*;

        if bytes.len() > MAX_BLOB_SIZE {
            return Err(KvError::Full);
        }
        nvs_with_handle(CONFIG_NAMESPACE, true, |handle| {
            let key = c_key(CONFIG_KEY);
            let ret = unsafe {
                nvs_set_blob(
                    handle,
                    key.as_ptr() as *const _,
                    bytes.as_ptr() as *const _,
                    bytes.len(),
                )
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        })
        .map_err(|_| KvError::IoError)
    }

    // ── Platform: simulation ──────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    fn platform_read(&self) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.sim_blob.clone())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_write(&mut self, bytes: &[u8]) -> Result<(), KvError> {
        self.sim_blob = Some(bytes.to_vec());
        Ok(())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WifiNetwork;

    #[test]
    fn load_without_store_yields_defaults() {
        let store = ConfigStore::new();
        let cfg = store.load();
        assert_eq!(cfg.mqtt.port, 1883);
    }

    #[test]
    fn save_load_roundtrip() {
        let mut store = ConfigStore::new();
        let mut cfg = SystemConfig::default();
        cfg.wifi.networks.push(WifiNetwork {
            ssid: "HomeNet".into(),
            password: "hunter22".into(),
        });
        cfg.mqtt.broker = "broker.local".into();
        store.save(&cfg).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.wifi.networks, cfg.wifi.networks);
        assert_eq!(loaded.mqtt.broker, "broker.local");
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut store = ConfigStore::new();
        let mut cfg = SystemConfig::default();
        cfg.daemon.max_error_count = 0;
        assert!(store.save(&cfg).is_err());
    }

    #[test]
    fn corrupted_blob_falls_back_to_defaults() {
        let mut store = ConfigStore::new();
        store.sim_blob = Some(vec![0xFF; 7]);
        let cfg = store.load();
        assert_eq!(cfg.mqtt.port, 1883);
    }
}
