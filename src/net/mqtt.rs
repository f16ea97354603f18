//! MQTT link driver.
//!
//! Wraps the broker session: connect, disconnect, topic subscription,
//! keepalive pings, and inbound message draining. Inbound messages are
//! staged in a fixed-capacity [`ObjectPool`] — the transport callback fills
//! a slot, `poll()` converts it into an `mqtt.message` event and releases
//! it. An exhausted pool drops the message and raises one warning, which
//! re-arms as soon as a slot frees up.
//!
//! The driver itself never retries a failed connect — the orchestrator owns
//! that policy.

use crate::adapters::pool::{ObjectPool, PoolSlot};
use crate::config::MqttConfig;
use crate::error::LinkError;
use crate::events::{EventPayload, Outbox, SystemErrorKind, MAX_MSG_LEN, MAX_TOPIC_LEN};
use log::{info, warn};

/// Staged inbound messages (pool capacity).
pub const INBOUND_POOL_SIZE: usize = 8;

/// One staged inbound message.
#[derive(Debug, Default, Clone)]
pub struct MsgBuf {
    pub topic: heapless::String<MAX_TOPIC_LEN>,
    pub payload: heapless::String<MAX_MSG_LEN>,
}

pub struct MqttLink {
    connected: bool,
    keepalive_ms: u64,
    last_ping_ms: u64,
    subscriptions: heapless::Vec<heapless::String<MAX_TOPIC_LEN>, 8>,
    pool: ObjectPool<MsgBuf, INBOUND_POOL_SIZE>,
    /// Staged slots in arrival order.
    inbound: heapless::Deque<PoolSlot, INBOUND_POOL_SIZE>,
    /// One-shot pool-exhaustion warning latch.
    pool_warned: bool,
    #[cfg(not(target_os = "espidf"))]
    sim_fail_attempts: u32,
}

impl MqttLink {
    pub fn new() -> Self {
        Self {
            connected: false,
            keepalive_ms: 60_000,
            last_ping_ms: 0,
            subscriptions: heapless::Vec::new(),
            pool: ObjectPool::new(),
            inbound: heapless::Deque::new(),
            pool_warned: false,
            #[cfg(not(target_os = "espidf"))]
            sim_fail_attempts: 0,
        }
    }

    /// One bounded connection attempt against the configured broker.
    pub fn connect(&mut self, cfg: &MqttConfig, now_ms: u64) -> Result<(), LinkError> {
        if cfg.broker.is_empty() {
            return Err(LinkError::ConnectFailed);
        }
        if self.connected {
            return Err(LinkError::Busy);
        }

        info!("MQTT: connecting to {}:{}", cfg.broker, cfg.port);
        self.platform_connect(cfg)?;
        self.connected = true;
        self.keepalive_ms = u64::from(cfg.keepalive_secs) * 1_000;
        self.last_ping_ms = now_ms;
        info!("MQTT: connected (keepalive {}s)", cfg.keepalive_secs);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.connected {
            self.platform_disconnect();
            info!("MQTT: disconnected");
        }
        self.connected = false;
        self.subscriptions.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Subscribe a topic on the live session; tracked for introspection.
    pub fn subscribe(&mut self, topic: &str) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::TransportDown);
        }
        self.platform_subscribe(topic)?;
        let mut t = heapless::String::new();
        for ch in topic.chars() {
            if t.push(ch).is_err() {
                break;
            }
        }
        if !self.subscriptions.contains(&t) {
            let _ = self.subscriptions.push(t);
        }
        info!("MQTT: subscribed '{}'", topic);
        Ok(())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Keepalive ping when due, then drain staged inbound messages into
    /// `mqtt.message` events. Never blocks.
    pub fn poll(&mut self, now_ms: u64, outbox: &mut Outbox) {
        if !self.connected {
            return;
        }

        // Ping at half the keepalive interval, the usual client practice.
        if now_ms.saturating_sub(self.last_ping_ms) >= self.keepalive_ms / 2 {
            self.last_ping_ms = now_ms;
            if self.platform_ping().is_err() {
                warn!("MQTT: keepalive ping failed, marking disconnected");
                self.connected = false;
                return;
            }
        }

        while let Some(slot) = self.inbound.pop_front() {
            if let Some(buf) = self.pool.get(slot) {
                if outbox
                    .push(EventPayload::MqttMessage {
                        topic: buf.topic.clone(),
                        payload: buf.payload.clone(),
                    })
                    .is_err()
                {
                    warn!("MQTT: outbox full, inbound message dropped");
                }
            }
            self.pool.release(slot);
        }
        if self.pool.free_count() > 0 {
            self.pool_warned = false;
        }
    }

    /// Stage one inbound message from the transport callback. Returns
    /// `false` (dropping the message) when the pool is exhausted.
    pub fn stage_inbound(&mut self, topic: &str, payload: &str, outbox: &mut Outbox) -> bool {
        let Some(slot) = self.pool.acquire() else {
            warn!("MQTT: inbound pool exhausted, message dropped");
            if !self.pool_warned {
                self.pool_warned = true;
                let _ = outbox.push(EventPayload::system_error(
                    SystemErrorKind::PoolExhausted,
                    "mqtt inbound pool",
                    0,
                ));
            }
            return false;
        };

        if let Some(buf) = self.pool.get_mut(slot) {
            buf.topic.clear();
            for ch in topic.chars() {
                if buf.topic.push(ch).is_err() {
                    break;
                }
            }
            buf.payload.clear();
            for ch in payload.chars() {
                if buf.payload.push(ch).is_err() {
                    break;
                }
            }
        }
        // Deque capacity equals pool capacity, so this cannot fail.
        let _ = self.inbound.push_back(slot);
        true
    }

    // ── Platform: ESP-IDF ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self, _cfg: &MqttConfig) -> Result<(), LinkError> {
        // EspMqttClient::new(&format!("mqtt://{}:{}", broker, port), &MqttClientConfiguration {
        //     client_id, username, password, keep_alive_interval, ..
        // }, callback)
        // The callback forwards Received events into stage_inbound().
        info!("MQTT(espidf): client wiring deferred until transport bring-up");
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_disconnect(&mut self) {}

    #[cfg(target_os = "espidf")]
    fn platform_subscribe(&mut self, _topic: &str) -> Result<(), LinkError> {
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_ping(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    // ── Platform: simulation ──────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self, _cfg: &MqttConfig) -> Result<(), LinkError> {
        if self.sim_fail_attempts > 0 {
            self.sim_fail_attempts -= 1;
            return Err(LinkError::BrokerRefused);
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disconnect(&mut self) {}

    #[cfg(not(target_os = "espidf"))]
    fn platform_subscribe(&mut self, _topic: &str) -> Result<(), LinkError> {
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_ping(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    // ── Simulation test hooks ─────────────────────────────────

    /// Make the next `n` connect attempts fail with `BrokerRefused`.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_fail_attempts(&mut self, n: u32) {
        self.sim_fail_attempts = n;
    }

    /// Drop the session as if the broker went away.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_drop_link(&mut self) {
        self.connected = false;
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    fn cfg() -> MqttConfig {
        MqttConfig {
            broker: "broker.local".into(),
            ..MqttConfig::default()
        }
    }

    #[test]
    fn connect_requires_broker() {
        let mut m = MqttLink::new();
        let empty = MqttConfig::default();
        assert_eq!(m.connect(&empty, 0), Err(LinkError::ConnectFailed));
    }

    #[test]
    fn connect_roundtrip_and_subscribe() {
        let mut m = MqttLink::new();
        m.connect(&cfg(), 0).unwrap();
        assert!(m.is_connected());
        m.subscribe("node/cmd").unwrap();
        m.subscribe("node/cmd").unwrap(); // idempotent
        assert_eq!(m.subscription_count(), 1);

        m.disconnect();
        assert!(!m.is_connected());
        assert_eq!(m.subscription_count(), 0);
    }

    #[test]
    fn subscribe_requires_connection() {
        let mut m = MqttLink::new();
        assert_eq!(m.subscribe("x"), Err(LinkError::TransportDown));
    }

    #[test]
    fn inbound_message_surfaces_as_event() {
        let mut m = MqttLink::new();
        let mut outbox = Outbox::new();
        m.connect(&cfg(), 0).unwrap();

        assert!(m.stage_inbound("node/cmd", "{\"op\":\"ping\"}", &mut outbox));
        m.poll(1, &mut outbox);

        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].kind(), EventKind::MqttMessage);
    }

    #[test]
    fn pool_exhaustion_drops_with_single_warning() {
        let mut m = MqttLink::new();
        let mut outbox = Outbox::new();
        m.connect(&cfg(), 0).unwrap();

        for i in 0..INBOUND_POOL_SIZE {
            assert!(m.stage_inbound("t", &format!("m{i}"), &mut outbox));
        }
        assert!(!m.stage_inbound("t", "overflow-1", &mut outbox));
        assert!(!m.stage_inbound("t", "overflow-2", &mut outbox));

        let warnings = outbox
            .iter()
            .filter(|p| p.kind() == EventKind::SystemError)
            .count();
        assert_eq!(warnings, 1);

        // Draining frees slots and re-arms the warning.
        outbox.clear();
        m.poll(1, &mut outbox);
        for i in 0..INBOUND_POOL_SIZE {
            assert!(m.stage_inbound("t", &format!("n{i}"), &mut outbox));
        }
        outbox.clear();
        assert!(!m.stage_inbound("t", "overflow-3", &mut outbox));
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn failed_connect_does_not_mark_connected() {
        let mut m = MqttLink::new();
        m.sim_fail_attempts(1);
        assert_eq!(m.connect(&cfg(), 0), Err(LinkError::BrokerRefused));
        assert!(!m.is_connected());
        assert!(m.connect(&cfg(), 0).is_ok());
    }
}
