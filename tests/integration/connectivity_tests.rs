//! Connectivity scenarios: orchestrator events observed through the bus.

use nodelink::adapters::kv::PersistentKv;
use nodelink::bus::{BusConfig, BusDelegate, EventBus, HandlerId};
use nodelink::config::{SystemConfig, WifiNetwork};
use nodelink::events::{Event, EventKind, EventPayload, LinkState};
use nodelink::net::ConnectionOrchestrator;
use nodelink::HandlerError;

const OBSERVER: HandlerId = HandlerId(9);

#[derive(Default)]
struct LinkObserver {
    wifi: Vec<LinkState>,
    mqtt: Vec<LinkState>,
}

impl BusDelegate for LinkObserver {
    fn handle(&mut self, _handle: HandlerId, event: &Event) -> Result<(), HandlerError> {
        match &event.payload {
            EventPayload::WifiState { state, .. } => self.wifi.push(*state),
            EventPayload::MqttState { state } => self.mqtt.push(*state),
            _ => {}
        }
        Ok(())
    }
}

fn config() -> SystemConfig {
    let mut c = SystemConfig::default();
    c.wifi.networks.push(WifiNetwork {
        ssid: "HomeNet".into(),
        password: "hunter22".into(),
    });
    c.mqtt.broker = "broker.local".into();
    c
}

fn wired_bus() -> EventBus {
    let mut bus = EventBus::new(BusConfig::default());
    bus.subscribe(EventKind::WifiStateChange, OBSERVER);
    bus.subscribe(EventKind::MqttStateChange, OBSERVER);
    bus
}

/// Publish orchestrator events onto the bus and drain them to the observer.
fn pump(
    net: &mut ConnectionOrchestrator,
    bus: &mut EventBus,
    obs: &mut LinkObserver,
    now_ms: u64,
) {
    for payload in net.take_events() {
        let _ = bus.publish(payload, now_ms);
    }
    while bus.low_len() > 0 || bus.high_len() > 0 {
        bus.dispatch_high(obs, now_ms);
        bus.drain_low(obs, now_ms);
    }
}

#[test]
fn wifi_loss_cascades_to_mqtt_before_its_driver_notices() {
    let cfg = config();
    let mut net = ConnectionOrchestrator::new(&cfg);
    let mut kv = PersistentKv::new(0);
    let mut bus = wired_bus();
    let mut obs = LinkObserver::default();

    net.wifi_mut().sim_add_network("HomeNet", -50);
    net.connect();
    net.poll(&mut kv, 0);
    net.reconcile(0);
    pump(&mut net, &mut bus, &mut obs, 0);
    assert_eq!(obs.wifi.last(), Some(&LinkState::Connected));
    assert_eq!(obs.mqtt.last(), Some(&LinkState::Connected));

    obs.wifi.clear();
    obs.mqtt.clear();

    // WiFi dies under MQTT; only reconcile runs — the MQTT driver never
    // polls before we assert.
    net.wifi_mut().sim_drop_link();
    net.reconcile(1_000);
    pump(&mut net, &mut bus, &mut obs, 1_000);

    assert_eq!(obs.wifi, vec![LinkState::Disconnected]);
    assert_eq!(obs.mqtt, vec![LinkState::Disconnected]);

    // Polling the unchanged state again emits nothing (edge-triggered).
    net.reconcile(2_000);
    net.reconcile(3_000);
    pump(&mut net, &mut bus, &mut obs, 3_000);
    assert_eq!(obs.wifi.len(), 1);
    assert_eq!(obs.mqtt.len(), 1);
}

#[test]
fn reconnect_cycle_emits_one_event_per_transition() {
    let cfg = config();
    let mut net = ConnectionOrchestrator::new(&cfg);
    let mut kv = PersistentKv::new(0);
    let mut bus = wired_bus();
    let mut obs = LinkObserver::default();

    net.wifi_mut().sim_add_network("HomeNet", -50);
    net.connect();
    net.poll(&mut kv, 0);
    pump(&mut net, &mut bus, &mut obs, 0);

    // One connecting + one connected per link, no repeats.
    assert_eq!(
        obs.wifi,
        vec![LinkState::Connecting, LinkState::Connected]
    );
    assert_eq!(
        obs.mqtt,
        vec![LinkState::Connecting, LinkState::Connected]
    );

    // Idle polling produces nothing further.
    net.poll(&mut kv, 1_000);
    net.poll(&mut kv, 2_000);
    pump(&mut net, &mut bus, &mut obs, 2_000);
    assert_eq!(obs.wifi.len(), 2);
    assert_eq!(obs.mqtt.len(), 2);
}

#[test]
fn mqtt_backoff_series_follows_config() {
    // Scenario: base 2000ms, multiplier 2, cap 180000ms, five failures.
    let mut cfg = config();
    cfg.mqtt.base_delay_ms = 2_000;
    cfg.mqtt.max_delay_ms = 180_000;
    let mut net = ConnectionOrchestrator::new(&cfg);
    let mut kv = PersistentKv::new(0);

    net.wifi_mut().sim_add_network("HomeNet", -50);
    net.mqtt_mut().sim_fail_attempts(5);
    net.connect();

    // Attempts land exactly at the cumulative backoff boundaries:
    // t=0, then +2000, +4000, +8000, +16000.
    let attempt_times = [0u64, 2_000, 6_000, 14_000, 30_000];
    for (i, t) in attempt_times.iter().enumerate() {
        // Just before the boundary nothing new is attempted.
        if *t > 0 {
            net.poll(&mut kv, t - 1);
            assert_eq!(net.status().mqtt_failures as usize, i, "early attempt at {}", t);
        }
        net.poll(&mut kv, *t);
        assert_eq!(net.status().mqtt_failures as usize, i + 1, "missed attempt at {}", t);
    }

    // The sixth attempt (after +32000) succeeds and resets the counter.
    net.poll(&mut kv, 62_000);
    assert!(net.is_fully_connected());
    assert_eq!(net.status().mqtt_failures, 0);
}
