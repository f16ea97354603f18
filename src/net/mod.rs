//! Connection orchestrator: WiFi → time-sync → MQTT.
//!
//! ```text
//!            ┌─────────────────────────────────────────────┐
//!            │ ConnectionOrchestrator                      │
//!  connect() │  ┌─────────┐   ┌──────────┐   ┌──────────┐  │
//!  ─────────▶│  │ WifiLink │──▶│ SntpLink │──▶│ MqttLink │  │
//!  poll()    │  └─────────┘   └──────────┘   └──────────┘  │
//!  ─────────▶│   backoff       bounded        backoff      │
//!  reconcile()  per link       attempts       per link     │
//!  ─────────▶│                                             │
//!            └───────────────┬─────────────────────────────┘
//!                            │ edge-triggered state events
//!                            ▼
//!                     wifi.state_change / mqtt.state_change / ...
//! ```
//!
//! Rules of the house:
//! - Nothing here blocks past a bounded timeout; `poll()` is a step
//!   function driven by the main loop.
//! - Every cross-attempt retry delay lives in a per-link [`BackoffState`];
//!   drivers never retry on their own.
//! - A failed time-sync is logged and ignored — it must not block MQTT.
//! - Link state events fire only on transition. Polling an unchanged link
//!   twice emits nothing.
//! - WiFi loss cascades: MQTT is marked disconnected the moment WiFi drops,
//!   before the MQTT driver's own keepalive would notice.

pub mod backoff;
pub mod mqtt;
pub mod ntp;
pub mod wifi;

use crate::adapters::kv::PersistentKv;
use crate::config::SystemConfig;
use crate::error::HandlerError;
use crate::events::{
    Event, EventPayload, LinkState, Outbox, SystemErrorKind, MAX_SSID_LEN,
};
use backoff::BackoffState;
use log::{info, warn};
use mqtt::MqttLink;
use ntp::SntpLink;
use serde_json::json;
use wifi::WifiLink;

/// WiFi reconnect backoff: 2s doubling to a 60s ceiling.
const WIFI_BASE_DELAY_MS: u32 = 2_000;
const WIFI_MAX_DELAY_MS: u32 = 60_000;

/// A failed sync cycle is retried while connected, 1min doubling to 1h.
const SNTP_CYCLE_BASE_DELAY_MS: u32 = 60_000;
const SNTP_CYCLE_MAX_DELAY_MS: u32 = 3_600_000;

/// Persistent cache keys.
pub const KV_LAST_SSID: &str = "last_successful_ssid";
pub const KV_LAST_CONNECT: &str = "last_connection_time";

/// Snapshot of orchestrator state for logs and telemetry.
#[derive(Debug, Clone, Copy)]
pub struct NetStatus {
    pub wifi: LinkState,
    pub mqtt: LinkState,
    pub time_synced: bool,
    pub wifi_failures: u32,
    pub mqtt_failures: u32,
}

pub struct ConnectionOrchestrator {
    wifi: WifiLink,
    sntp: SntpLink,
    mqtt: MqttLink,

    wifi_cfg: crate::config::WifiConfig,
    mqtt_cfg: crate::config::MqttConfig,

    wifi_backoff: BackoffState,
    mqtt_backoff: BackoffState,
    sntp_backoff: BackoffState,

    /// Last-known per-link state; mutated only here, never by drivers.
    wifi_state: LinkState,
    mqtt_state: LinkState,

    /// Connection goal is active (set by `connect`, cleared by `disconnect`).
    armed: bool,
    /// Re-entrancy guard: at most one MQTT attempt in flight.
    mqtt_inflight: bool,
    /// Sync cycle kicked off for the current WiFi session.
    sntp_started: bool,
    /// The terminal retries-exhausted event fired for this cycle.
    mqtt_terminal_reported: bool,
    /// A failed sync cycle has been charged to the sntp backoff.
    sntp_failure_charged: bool,

    outbox: Outbox,
}

impl ConnectionOrchestrator {
    /// Deterministic backoff (no jitter) — used by tests.
    pub fn new(config: &SystemConfig) -> Self {
        Self::build(config, None)
    }

    /// Production constructor: retry delays jittered ±20%.
    pub fn with_jitter_seed(config: &SystemConfig, seed: u32) -> Self {
        Self::build(config, Some(seed))
    }

    fn build(config: &SystemConfig, seed: Option<u32>) -> Self {
        let m = &config.mqtt;
        let (wifi_backoff, mqtt_backoff) = match seed {
            Some(seed) => (
                BackoffState::with_jitter(WIFI_BASE_DELAY_MS, WIFI_MAX_DELAY_MS, 2, 0, seed),
                BackoffState::with_jitter(
                    m.base_delay_ms,
                    m.max_delay_ms,
                    2,
                    m.max_retries,
                    seed.rotate_left(16) | 1,
                ),
            ),
            None => (
                BackoffState::new(WIFI_BASE_DELAY_MS, WIFI_MAX_DELAY_MS, 2, 0),
                BackoffState::new(m.base_delay_ms, m.max_delay_ms, 2, m.max_retries),
            ),
        };

        Self {
            wifi: WifiLink::new(),
            sntp: SntpLink::new(config.ntp.clone()),
            mqtt: MqttLink::new(),
            wifi_cfg: config.wifi.clone(),
            mqtt_cfg: config.mqtt.clone(),
            wifi_backoff,
            mqtt_backoff,
            sntp_backoff: BackoffState::new(
                SNTP_CYCLE_BASE_DELAY_MS,
                SNTP_CYCLE_MAX_DELAY_MS,
                2,
                0,
            ),
            wifi_state: LinkState::Disconnected,
            mqtt_state: LinkState::Disconnected,
            armed: false,
            mqtt_inflight: false,
            sntp_started: false,
            mqtt_terminal_reported: false,
            sntp_failure_charged: false,
            outbox: Outbox::new(),
        }
    }

    // ── Goal management ───────────────────────────────────────

    /// Arm the connection sequence. Non-blocking; `poll()` does the work.
    /// Re-arming resets the retry budgets — a fresh cycle gets fresh
    /// patience.
    pub fn connect(&mut self) {
        if self.armed && self.is_connected() {
            return;
        }
        info!("Net: connection sequence armed");
        self.armed = true;
        self.mqtt_terminal_reported = false;
        self.wifi_backoff.reset();
        self.mqtt_backoff.reset();
    }

    /// Tear everything down and disarm.
    pub fn disconnect(&mut self) {
        info!("Net: disconnecting all links");
        self.armed = false;
        self.mqtt.disconnect();
        self.set_mqtt_state(LinkState::Disconnected);
        self.wifi.disconnect();
        self.set_wifi_state(LinkState::Disconnected, None);
        self.sntp_started = false;
    }

    /// Drop links and start a fresh cycle (e.g. on an operator command).
    pub fn force_reconnect(&mut self) {
        warn!("Net: forced reconnect");
        self.disconnect();
        self.connect();
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// WiFi is up — the node can reach the network.
    pub fn is_connected(&self) -> bool {
        self.wifi.is_connected()
    }

    /// Full connectivity: WiFi and MQTT.
    pub fn is_fully_connected(&self) -> bool {
        self.wifi.is_connected() && self.mqtt.is_connected()
    }

    pub fn is_time_synced(&self) -> bool {
        self.sntp.is_synced()
    }

    pub fn status(&self) -> NetStatus {
        NetStatus {
            wifi: self.wifi_state,
            mqtt: self.mqtt_state,
            time_synced: self.sntp.is_synced(),
            wifi_failures: self.wifi_backoff.failures(),
            mqtt_failures: self.mqtt_backoff.failures(),
        }
    }

    // ── Main-loop step ────────────────────────────────────────

    /// One cooperative step of the WiFi → SNTP → MQTT sequence.
    pub fn poll(&mut self, kv: &mut PersistentKv, now_ms: u64) {
        if !self.armed {
            return;
        }

        // 0. Link supervision first, so a stale association flag from a
        //    dropped link can never block a fresh attempt with `Busy`.
        self.wifi.poll();

        // 1. WiFi first — everything else rides on it.
        if !self.wifi.is_connected() {
            self.sntp_started = false;
            if self.wifi_backoff.ready(now_ms) {
                self.attempt_wifi(kv, now_ms);
            }
        }

        if self.wifi.is_connected() {
            // 2. Time sync: kicked once per WiFi session, retried on a slow
            //    cycle backoff after a terminal failure. Never blocks MQTT.
            if !self.sntp_started {
                self.sntp_started = true;
                self.sntp_failure_charged = false;
                self.sntp.start(now_ms, &mut self.outbox);
            }
            self.sntp.poll(now_ms, &mut self.outbox);
            self.drive_sntp_cycle(now_ms);

            // 3. MQTT, once the sync cycle has reached a terminal state.
            if self.sntp.is_done()
                && !self.mqtt.is_connected()
                && !self.mqtt_inflight
                && self.mqtt_backoff.ready(now_ms)
            {
                self.attempt_mqtt(now_ms);
            }

            if self.mqtt_backoff.exhausted() && !self.mqtt_terminal_reported {
                self.mqtt_terminal_reported = true;
                warn!(
                    "Net: MQTT retries exhausted after {} attempts",
                    self.mqtt_backoff.failures()
                );
                let _ = self.outbox.push(EventPayload::system_error(
                    SystemErrorKind::RetriesExhausted,
                    "mqtt",
                    0,
                ));
            }
        }

        // 4. MQTT keepalive and inbound drain.
        self.mqtt.poll(now_ms, &mut self.outbox);
    }

    /// Compare live driver connectivity with the last-known state and emit
    /// events only on transitions.
    pub fn reconcile(&mut self, _now_ms: u64) {
        let wifi_live = self.wifi.is_connected();

        if self.wifi_state == LinkState::Connected && !wifi_live {
            warn!("Net: WiFi link lost");
            self.set_wifi_state(LinkState::Disconnected, None);
            self.sntp_started = false;
            // Cascade: MQTT cannot survive without WiFi, even if its own
            // keepalive has not noticed yet.
            if self.mqtt_state == LinkState::Connected {
                self.mqtt.disconnect();
                self.set_mqtt_state(LinkState::Disconnected);
            }
        } else if self.wifi_state != LinkState::Connected && wifi_live {
            let ssid = self.wifi.current_ssid().map(truncate_ssid);
            self.set_wifi_state(LinkState::Connected, ssid);
        }

        let mqtt_live = self.mqtt.is_connected();
        if self.mqtt_state == LinkState::Connected && !mqtt_live {
            warn!("Net: MQTT session lost");
            self.set_mqtt_state(LinkState::Disconnected);
        } else if self.mqtt_state != LinkState::Connected && mqtt_live {
            self.set_mqtt_state(LinkState::Connected);
        }
    }

    /// Drain events emitted since the last call.
    pub fn take_events(&mut self) -> Outbox {
        core::mem::take(&mut self.outbox)
    }

    /// React to bus traffic routed here by the runtime. Inbound MQTT
    /// commands drive operator actions.
    pub fn handle_bus_event(&mut self, event: &Event) -> Result<(), HandlerError> {
        if let EventPayload::MqttMessage { topic, .. } = &event.payload {
            if topic.as_str().ends_with("/reconnect") {
                self.force_reconnect();
            }
        }
        Ok(())
    }

    // ── Internal: WiFi attempt ────────────────────────────────

    /// Scan, filter to configured networks, and try candidates strongest
    /// first — except that the last network that worked gets the first shot.
    fn attempt_wifi(&mut self, kv: &mut PersistentKv, now_ms: u64) {
        self.wifi_backoff.record_attempt(now_ms);
        self.set_wifi_state(LinkState::Connecting, None);

        let scan = self.wifi.scan(self.wifi_cfg.scan_timeout_ms);

        let mut candidates: Vec<(String, String)> = Vec::new();
        for rec in &scan {
            if let Some(net) = self
                .wifi_cfg
                .networks
                .iter()
                .find(|n| n.ssid == rec.ssid.as_str())
            {
                candidates.push((net.ssid.clone(), net.password.clone()));
            }
        }

        if let Some(last) = kv.get_str(KV_LAST_SSID) {
            if let Some(pos) = candidates.iter().position(|(ssid, _)| ssid == last) {
                let preferred = candidates.remove(pos);
                candidates.insert(0, preferred);
            }
        }

        if candidates.is_empty() {
            warn!("Net: no configured network visible in scan");
            self.wifi_backoff.record_failure();
            self.set_wifi_state(LinkState::Disconnected, None);
            return;
        }

        for (ssid, password) in &candidates {
            match self
                .wifi
                .connect(ssid, password, self.wifi_cfg.connect_timeout_ms)
            {
                Ok(()) => {
                    self.wifi_backoff.record_success();
                    self.set_wifi_state(LinkState::Connected, Some(truncate_ssid(ssid)));
                    kv.set(KV_LAST_SSID, json!(ssid));
                    kv.set(KV_LAST_CONNECT, json!(now_ms));
                    return;
                }
                Err(e) => {
                    info!("Net: candidate '{}' failed: {}", ssid, e);
                }
            }
        }

        self.wifi_backoff.record_failure();
        self.set_wifi_state(LinkState::Disconnected, None);
    }

    // ── Internal: MQTT attempt ────────────────────────────────

    fn attempt_mqtt(&mut self, now_ms: u64) {
        self.mqtt_inflight = true;
        self.mqtt_backoff.record_attempt(now_ms);
        self.set_mqtt_state(LinkState::Connecting);

        match self.mqtt.connect(&self.mqtt_cfg, now_ms) {
            Ok(()) => {
                self.mqtt_backoff.record_success();
                self.mqtt_terminal_reported = false;
                for topic in &self.mqtt_cfg.topics {
                    if let Err(e) = self.mqtt.subscribe(topic) {
                        warn!("Net: subscribe '{}' failed: {}", topic, e);
                    }
                }
                self.set_mqtt_state(LinkState::Connected);
            }
            Err(e) => {
                warn!("Net: MQTT attempt failed: {}", e);
                self.mqtt_backoff.record_failure();
                self.set_mqtt_state(LinkState::Disconnected);
            }
        }

        self.mqtt_inflight = false;
    }

    // ── Internal: SNTP cycle retry ────────────────────────────

    fn drive_sntp_cycle(&mut self, now_ms: u64) {
        use ntp::SyncStatus;
        match self.sntp.status() {
            SyncStatus::Synced => {
                self.sntp_backoff.reset();
                self.sntp_failure_charged = false;
            }
            SyncStatus::Failed => {
                if !self.sntp_failure_charged {
                    self.sntp_failure_charged = true;
                    self.sntp_backoff.record_attempt(now_ms);
                    self.sntp_backoff.record_failure();
                } else if self.sntp_backoff.ready(now_ms) {
                    self.sntp_failure_charged = false;
                    self.sntp.start(now_ms, &mut self.outbox);
                }
            }
            SyncStatus::Idle | SyncStatus::InProgress => {}
        }
    }

    // ── Internal: edge-triggered state mutation ───────────────

    fn set_wifi_state(
        &mut self,
        state: LinkState,
        ssid: Option<heapless::String<MAX_SSID_LEN>>,
    ) {
        if self.wifi_state != state {
            self.wifi_state = state;
            if self
                .outbox
                .push(EventPayload::WifiState { state, ssid })
                .is_err()
            {
                warn!("Net: outbox full, wifi state event dropped");
            }
        }
    }

    fn set_mqtt_state(&mut self, state: LinkState) {
        if self.mqtt_state != state {
            self.mqtt_state = state;
            if self.outbox.push(EventPayload::MqttState { state }).is_err() {
                warn!("Net: outbox full, mqtt state event dropped");
            }
        }
    }

    // ── Simulation test hooks ─────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    pub fn wifi_mut(&mut self) -> &mut WifiLink {
        &mut self.wifi
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn mqtt_mut(&mut self) -> &mut MqttLink {
        &mut self.mqtt
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sntp_mut(&mut self) -> &mut SntpLink {
        &mut self.sntp
    }
}

fn truncate_ssid(ssid: &str) -> heapless::String<MAX_SSID_LEN> {
    let mut s = heapless::String::new();
    for ch in ssid.chars() {
        if s.push(ch).is_err() {
            break;
        }
    }
    s
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
