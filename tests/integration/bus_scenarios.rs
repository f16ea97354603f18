//! End-to-end event bus scenarios: saturation, warnings, breaker recovery.

use nodelink::bus::{BusConfig, BusDelegate, EventBus, HandlerId, PublishOutcome};
use nodelink::events::{Event, EventKind, EventPayload, SystemErrorKind};
use nodelink::fsm::StateId;
use nodelink::HandlerError;

const OBSERVER: HandlerId = HandlerId(7);

/// Counts deliveries per kind; optionally fails every call.
struct Observer {
    deliveries: Vec<Event>,
    fail_all: bool,
}

impl Observer {
    fn new() -> Self {
        Self {
            deliveries: Vec::new(),
            fail_all: false,
        }
    }

    fn count(&self, kind: EventKind) -> usize {
        self.deliveries.iter().filter(|e| e.kind() == kind).count()
    }

    fn queue_full_warnings(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|e| {
                matches!(
                    e.payload,
                    EventPayload::SystemError {
                        kind: SystemErrorKind::QueueFull,
                        ..
                    }
                )
            })
            .count()
    }
}

impl BusDelegate for Observer {
    fn handle(&mut self, _handle: HandlerId, event: &Event) -> Result<(), HandlerError> {
        self.deliveries.push(event.clone());
        if self.fail_all {
            Err(HandlerError::new("observer failure"))
        } else {
            Ok(())
        }
    }
}

fn high_payload() -> EventPayload {
    EventPayload::SystemState {
        state: StateId::Running,
    }
}

#[test]
fn thirty_third_high_publish_fails_with_single_warning() {
    // Total capacity 64, split 32 high / 32 low.
    let mut bus = EventBus::new(BusConfig::default());
    bus.subscribe(EventKind::SystemStateChange, OBSERVER);
    bus.subscribe(EventKind::SystemError, OBSERVER);

    for i in 0..32 {
        assert_eq!(bus.publish(high_payload(), i), PublishOutcome::Accepted);
    }
    assert_eq!(bus.publish(high_payload(), 100), PublishOutcome::QueueFull);
    // Further overflows stay silent: the warning is latched.
    assert_eq!(bus.publish(high_payload(), 101), PublishOutcome::QueueFull);
    assert_eq!(bus.publish(high_payload(), 102), PublishOutcome::QueueFull);

    // Drain everything in timer-tick batches of 5.
    let mut obs = Observer::new();
    let mut tick = 200;
    while bus.high_len() > 0 {
        bus.dispatch_high(&mut obs, tick);
        tick += 25;
    }

    assert_eq!(obs.count(EventKind::SystemStateChange), 32);
    assert_eq!(obs.queue_full_warnings(), 1);
}

#[test]
fn warning_rearms_only_below_eighty_percent() {
    let mut bus = EventBus::new(BusConfig::default());
    bus.subscribe(EventKind::SystemStateChange, OBSERVER);
    bus.subscribe(EventKind::SystemError, OBSERVER);

    for i in 0..33 {
        let _ = bus.publish(high_payload(), i);
    }

    let mut obs = Observer::new();
    // One batch of 5 leaves occupancy above 80% — refill and overflow
    // again: still latched, no second warning.
    bus.dispatch_high(&mut obs, 100);
    while bus.publish(high_payload(), 101) == PublishOutcome::Accepted {}
    while bus.high_len() > 0 {
        bus.dispatch_high(&mut obs, 200);
    }
    assert_eq!(obs.queue_full_warnings(), 1);

    // Queue is now empty (<80%): the next excursion warns again.
    for i in 0..33 {
        let _ = bus.publish(high_payload(), 300 + i);
    }
    while bus.high_len() > 0 {
        bus.dispatch_high(&mut obs, 400);
    }
    assert_eq!(obs.queue_full_warnings(), 2);
}

#[test]
fn breaker_suspends_and_recovers_dispatch() {
    let mut cfg = BusConfig::default();
    cfg.breaker_threshold = 3;
    cfg.breaker_recovery_ms = 5_000;
    let mut bus = EventBus::new(cfg);
    bus.subscribe(EventKind::SystemStateChange, OBSERVER);

    let mut obs = Observer::new();
    obs.fail_all = true;

    for i in 0..6 {
        let _ = bus.publish(high_payload(), i);
    }
    bus.dispatch_high(&mut obs, 10);
    assert!(bus.breaker_is_open());
    let delivered_while_failing = obs.deliveries.len();

    // Open breaker: publishes accepted, nothing dispatched.
    assert_eq!(bus.publish(high_payload(), 20), PublishOutcome::Accepted);
    bus.dispatch_high(&mut obs, 30);
    assert_eq!(obs.deliveries.len(), delivered_while_failing);

    // After the recovery window the counter is reset and dispatch resumes.
    obs.fail_all = false;
    bus.dispatch_high(&mut obs, 5_010);
    assert!(!bus.breaker_is_open());
    assert!(obs.deliveries.len() > delivered_while_failing);
}

#[test]
fn low_queue_never_dispatches_from_timer_tick() {
    let mut bus = EventBus::new(BusConfig::default());
    bus.subscribe(EventKind::SensorData, OBSERVER);

    let _ = bus.publish(
        EventPayload::SensorData {
            sensor_id: 1,
            value: 21.5,
        },
        0,
    );

    let mut obs = Observer::new();
    for t in 0..10 {
        bus.dispatch_high(&mut obs, t * 25);
    }
    assert!(obs.deliveries.is_empty());

    bus.drain_low(&mut obs, 300);
    assert_eq!(obs.count(EventKind::SensorData), 1);
}
