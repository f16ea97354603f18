//! Debounced persistent key-value cache.
//!
//! A flat JSON object (`{"last_successful_ssid": "...", ...}`) that lives in
//! RAM and is flushed to flash through a write debounce: a write happens only
//! when the cache is dirty *and* the quiet period (default 5000 ms) has
//! elapsed since the last write. Frequent `set()` calls therefore cost one
//! flash write, not one per call.
//!
//! Backends: NVS blob on `target_os = "espidf"`, in-memory flash image on
//! host targets (round-trips through the same JSON bytes so tests cover the
//! serialisation path).

use crate::error::KvError;
use log::{info, warn};
use serde_json::{Map, Value};

/// Quiet period before a dirty cache is written out.
pub const DEFAULT_DEBOUNCE_MS: u64 = 5_000;

#[cfg(target_os = "espidf")]
const KV_NAMESPACE: &str = "nodelink";
#[cfg(target_os = "espidf")]
const KV_KEY: &str = "kvcache";
#[cfg(target_os = "espidf")]
const MAX_BLOB_SIZE: usize = 4000;

pub struct PersistentKv {
    cache: Map<String, Value>,
    debounce_ms: u64,
    dirty: bool,
    last_write_ms: u64,
    #[cfg(not(target_os = "espidf"))]
    sim_flash: Option<Vec<u8>>,
}

impl PersistentKv {
    pub fn new(debounce_ms: u64) -> Self {
        let mut kv = Self {
            cache: Map::new(),
            debounce_ms,
            dirty: false,
            last_write_ms: 0,
            #[cfg(not(target_os = "espidf"))]
            sim_flash: None,
        };
        kv.load();
        kv
    }

    /// Read a value, or `default` when the key is absent.
    pub fn get<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.cache.get(key).unwrap_or(default)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.cache.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.cache.get(key).and_then(Value::as_u64)
    }

    /// Set a value; marks the cache dirty only when the value changed.
    pub fn set(&mut self, key: &str, value: Value) {
        if self.cache.get(key) == Some(&value) {
            return;
        }
        self.cache.insert(key.to_string(), value);
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Debounced flush. Call once per main-loop iteration; writes only if
    /// dirty and the quiet period since the last write has elapsed.
    /// Returns `true` when a write happened.
    pub fn flush(&mut self, now_ms: u64) -> bool {
        if !self.dirty || now_ms.saturating_sub(self.last_write_ms) < self.debounce_ms {
            return false;
        }
        self.write_out(now_ms)
    }

    /// Ignore the debounce — used before a deliberate reset.
    pub fn force_flush(&mut self, now_ms: u64) -> bool {
        if !self.dirty {
            return false;
        }
        self.write_out(now_ms)
    }

    // ── Internal ──────────────────────────────────────────────

    fn write_out(&mut self, now_ms: u64) -> bool {
        let bytes = match serde_json::to_vec(&self.cache) {
            Ok(b) => b,
            Err(e) => {
                warn!("KV: serialize failed: {}", e);
                return false;
            }
        };
        match self.platform_write(&bytes) {
            Ok(()) => {
                self.dirty = false;
                self.last_write_ms = now_ms;
                info!("KV: cache flushed ({} bytes)", bytes.len());
                true
            }
            Err(e) => {
                warn!("KV: flush failed: {}", e);
                false
            }
        }
    }

    fn load(&mut self) {
        match self.platform_read() {
            Ok(Some(bytes)) => match serde_json::from_slice::<Map<String, Value>>(&bytes) {
                Ok(map) => {
                    info!("KV: loaded {} keys", map.len());
                    self.cache = map;
                }
                Err(_) => {
                    warn!("KV: stored cache corrupted, starting empty");
                    self.cache = Map::new();
                }
            },
            Ok(None) => {
                info!("KV: no stored cache, starting empty");
            }
            Err(e) => {
                warn!("KV: load failed ({}), starting empty", e);
            }
        }
    }

    // ── Platform: ESP-IDF ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_write(&mut self, bytes: &[u8]) -> Result<(), KvError> {
        use esp_idf_svc::sys::*;

        if bytes.len() > MAX_BLOB_SIZE {
            return Err(KvError::Full);
        }
        nvs_with_handle(KV_NAMESPACE, true, |handle| {
            let key = c_key(KV_KEY);
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

    #[cfg(target_os = "espidf")]
    fn platform_read(&mut self) -> Result<Option<Vec<u8>>, KvError> {
        use esp_idf_svc::sys::*;

        let result = nvs_with_handle(KV_NAMESPACE, false, |handle| {
            let key = c_key(KV_KEY);
            let mut size: usize = 0;
            let ret = unsafe {
                nvs_get_blob(
                    handle,
                    key.as_ptr() as *const _,
                    core::ptr::null_mut(),
                    &mut size,
                )
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

    // ── Platform: simulation ──────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    fn platform_write(&mut self, bytes: &[u8]) -> Result<(), KvError> {
        self.sim_flash = Some(bytes.to_vec());
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_read(&mut self) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.sim_flash.clone())
    }

    /// Raw flash image, for tests asserting on what actually persisted.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_flash_bytes(&self) -> Option<&[u8]> {
        self.sim_flash.as_deref()
    }
}

impl Default for PersistentKv {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS)
    }
}

// ── NVS helpers (espidf) ───────────────────────────────────────

/// Open an NVS namespace, run `f` with the handle, then close.
#[cfg(target_os = "espidf")]
pub(crate) fn nvs_with_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
where
    F: FnOnce(esp_idf_svc::sys::nvs_handle_t) -> Result<T, i32>,
{
    use esp_idf_svc::sys::*;

    let ns = c_key(namespace);
    let mut handle: nvs_handle_t = 0;
    let mode = if write {
        nvs_open_mode_t_NVS_READWRITE
    } else {
        nvs_open_mode_t_NVS_READONLY
    };

    let ret = unsafe { nvs_open(ns.as_ptr() as *const _, mode, &mut handle) };
    if ret != ESP_OK {
        return Err(ret);
    }

    let result = f(handle);
    unsafe {
        nvs_close(handle);
    }
    result
}

/// NVS keys are limited to 15 bytes plus NUL.
#[cfg(target_os = "espidf")]
pub(crate) fn c_key(key: &str) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let bytes = key.as_bytes();
    let len = bytes.len().min(15);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
