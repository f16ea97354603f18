//! Lifecycle scenarios through the assembled runtime.

use nodelink::adapters::kv::PersistentKv;
use nodelink::config::{SystemConfig, WifiNetwork};
use nodelink::drivers::status_led::LedPattern;
use nodelink::drivers::watchdog::Watchdog;
use nodelink::fsm::StateId;
use nodelink::net::ConnectionOrchestrator;
use nodelink::runtime::Runtime;

fn config() -> SystemConfig {
    let mut c = SystemConfig::default();
    c.wifi.networks.push(WifiNetwork {
        ssid: "HomeNet".into(),
        password: "hunter22".into(),
    });
    c.mqtt.broker = "broker.local".into();
    c.mqtt.topics.push("node/cmd".into());
    c
}

fn runtime_with_network(visible: bool) -> Runtime {
    let cfg = config();
    let mut net = ConnectionOrchestrator::new(&cfg);
    if visible {
        net.wifi_mut().sim_add_network("HomeNet", -50);
    }
    let mut rt = Runtime::new(cfg, net, PersistentKv::new(0), Watchdog::new(10_000, true), 0);
    rt.start(0);
    rt
}

/// Advance in 25ms loop steps, one dispatch tick per step.
fn run_span(rt: &mut Runtime, from_ms: u64, to_ms: u64) {
    let mut t = from_ms;
    while t <= to_ms {
        rt.step(1, t);
        t += 25;
    }
}

#[test]
fn connecting_to_running_selects_cruise_pattern() {
    let mut rt = runtime_with_network(true);

    // Boot settle keeps the node in INIT for the first second.
    run_span(&mut rt, 25, 900);
    assert_eq!(rt.components.fsm.current_state(), StateId::Init);
    assert_eq!(rt.components.led.current(), LedPattern::Blink);

    // The orchestrator brings WiFi up and reports full connectivity; the
    // FSM lands in RUNNING with the steady "cruise" pattern.
    run_span(&mut rt, 925, 2_500);
    assert_eq!(rt.components.fsm.current_state(), StateId::Running);
    assert_eq!(rt.components.led.current(), LedPattern::Cruise);
    assert!(rt.components.net.is_fully_connected());
    assert!(rt.components.net.is_time_synced());
}

#[test]
fn error_state_self_retries_after_fifteen_seconds() {
    // No network visible anywhere: connecting runs its 120s bound, drops
    // to ERROR, then self-schedules a retry 15s later.
    let mut rt = runtime_with_network(false);

    let mut t = 25;
    let mut entered_error_at = None;
    while t <= 200_000 {
        rt.step(1, t);
        if entered_error_at.is_none()
            && rt.components.fsm.current_state() == StateId::Error
        {
            entered_error_at = Some(t);
        }
        if let Some(err_t) = entered_error_at {
            if rt.components.fsm.current_state() == StateId::Connecting {
                let dwell = t - err_t;
                assert!(
                    (14_000..=16_500).contains(&dwell),
                    "error dwell was {dwell}ms, expected ~15000ms"
                );
                return;
            }
        }
        t += 500;
    }
    panic!("FSM never completed the Error → Connecting retry cycle");
}

#[test]
fn error_state_shows_sos_pattern() {
    let mut rt = runtime_with_network(false);
    let mut t = 25;
    while rt.components.fsm.current_state() != StateId::Error && t <= 200_000 {
        rt.step(1, t);
        t += 500;
    }
    assert_eq!(rt.components.fsm.current_state(), StateId::Error);
    assert_eq!(rt.components.led.current(), LedPattern::Sos);
}

#[test]
fn watchdog_is_fed_through_error_states() {
    // The watchdog feed must survive every state, including ERROR churn.
    let mut rt = runtime_with_network(false);
    let before = rt.components.watchdog.feed_count();
    let mut steps = 0;
    let mut t = 25;
    while t <= 150_000 {
        rt.step(1, t);
        steps += 1;
        t += 500;
    }
    assert_eq!(rt.components.watchdog.feed_count(), before + steps);
}

#[test]
fn network_appearing_late_recovers_the_node() {
    let mut rt = runtime_with_network(false);

    // Let the node churn through Connecting/Error for a while.
    let mut t = 25;
    while t <= 150_000 {
        rt.step(1, t);
        t += 500;
    }

    // The AP comes online; the next cycle must succeed.
    rt.components.net.wifi_mut().sim_add_network("HomeNet", -50);
    while t <= 350_000 {
        rt.step(1, t);
        if rt.components.fsm.current_state() == StateId::Running {
            assert!(rt.components.net.is_fully_connected());
            return;
        }
        t += 500;
    }
    panic!("node never recovered after the network appeared");
}
