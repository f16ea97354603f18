//! Closed event taxonomy for the in-process event bus.
//!
//! Every event is a variant of one tagged union — there are no bare-string
//! identifiers and no loosely-typed payloads. Subscribers match exhaustively
//! on [`EventPayload`], so adding a kind is a compile-time-visible change.
//!
//! Kinds are statically partitioned into two priority classes (mirroring the
//! device's failure policy): lifecycle and error events are HIGH and drain
//! from the timer tick; link chatter and telemetry are LOW and drain when the
//! main loop polls.

use crate::fsm::StateId;

/// Maximum SSID length carried in an event payload.
pub const MAX_SSID_LEN: usize = 32;
/// Maximum MQTT topic length carried in an event payload.
pub const MAX_TOPIC_LEN: usize = 64;
/// Maximum MQTT message body carried in an event payload.
pub const MAX_MSG_LEN: usize = 128;
/// Maximum context string attached to a system error event.
pub const MAX_ERR_CTX_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// The closed set of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    WifiStateChange = 0,
    MqttStateChange = 1,
    MqttMessage = 2,
    SystemStateChange = 3,
    SystemError = 4,
    NtpStateChange = 5,
    SensorData = 6,
}

impl EventKind {
    /// Total number of kinds — used to size per-kind tables.
    pub const COUNT: usize = 7;

    /// Stable dotted name, used only for log output.
    pub fn name(self) -> &'static str {
        match self {
            Self::WifiStateChange => "wifi.state_change",
            Self::MqttStateChange => "mqtt.state_change",
            Self::MqttMessage => "mqtt.message",
            Self::SystemStateChange => "system.state_change",
            Self::SystemError => "system.error",
            Self::NtpStateChange => "ntp.state_change",
            Self::SensorData => "sensor.data",
        }
    }

    /// Static priority partition. HIGH events dispatch from the timer tick;
    /// LOW events dispatch when the main loop drains.
    pub fn is_high_priority(self) -> bool {
        matches!(self, Self::SystemError | Self::SystemStateChange)
    }

    /// Index into per-kind tables (subscriptions, throttle windows).
    pub fn index(self) -> usize {
        self as usize
    }

    /// Iterate all kinds in discriminant order.
    pub fn all() -> [Self; Self::COUNT] {
        [
            Self::WifiStateChange,
            Self::MqttStateChange,
            Self::MqttMessage,
            Self::SystemStateChange,
            Self::SystemError,
            Self::NtpStateChange,
            Self::SensorData,
        ]
    }
}

// ---------------------------------------------------------------------------
// Payload field enums
// ---------------------------------------------------------------------------

/// Connectivity state carried by `wifi.state_change` / `mqtt.state_change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl core::fmt::Display for LinkState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Time-sync progress carried by `ntp.state_change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Started,
    Success,
    Failed,
}

/// Discriminates `system.error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemErrorKind {
    /// A subscriber handle failed during dispatch.
    CallbackError,
    /// A bounded event queue rejected a publish (one-shot, hysteretic).
    QueueFull,
    /// The message buffer pool had no free slot.
    PoolExhausted,
    /// A link exhausted its configured retry bound.
    RetriesExhausted,
    /// A Running-state health probe crossed its threshold.
    HealthWarning,
    /// A state handler failed and was demoted to the Error state.
    StateHandlerFailed,
}

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

/// Kind-specific payloads. The variant *is* the event kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    WifiState {
        state: LinkState,
        ssid: Option<heapless::String<MAX_SSID_LEN>>,
    },
    MqttState {
        state: LinkState,
    },
    MqttMessage {
        topic: heapless::String<MAX_TOPIC_LEN>,
        payload: heapless::String<MAX_MSG_LEN>,
    },
    SystemState {
        state: StateId,
    },
    SystemError {
        kind: SystemErrorKind,
        context: heapless::String<MAX_ERR_CTX_LEN>,
        /// Synthesis depth for errors the bus generates about failing
        /// handlers; bounds error amplification.
        depth: u8,
    },
    NtpState {
        state: SyncState,
    },
    SensorData {
        sensor_id: u8,
        value: f32,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::WifiState { .. } => EventKind::WifiStateChange,
            Self::MqttState { .. } => EventKind::MqttStateChange,
            Self::MqttMessage { .. } => EventKind::MqttMessage,
            Self::SystemState { .. } => EventKind::SystemStateChange,
            Self::SystemError { .. } => EventKind::SystemError,
            Self::NtpState { .. } => EventKind::NtpStateChange,
            Self::SensorData { .. } => EventKind::SensorData,
        }
    }

    /// Build a `system.error` payload from a static context string.
    /// Oversized contexts are truncated, never rejected.
    pub fn system_error(kind: SystemErrorKind, context: &str, depth: u8) -> Self {
        let mut ctx = heapless::String::new();
        for ch in context.chars() {
            if ctx.push(ch).is_err() {
                break;
            }
        }
        Self::SystemError {
            kind,
            context: ctx,
            depth,
        }
    }
}

/// Events accumulated by components during one update or dispatch step.
/// The runtime flushes the outbox to the bus afterwards, so nothing
/// re-enters `publish` from inside dispatch.
pub type Outbox = heapless::Vec<EventPayload, 16>;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A queued event: payload plus enqueue timestamp. Identity is transient —
/// events are created at publish and destroyed at dispatch (or drop).
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub payload: EventPayload,
    /// Monotonic milliseconds at enqueue time.
    pub timestamp_ms: u64,
}

impl Event {
    pub fn new(payload: EventPayload, timestamp_ms: u64) -> Self {
        Self {
            payload,
            timestamp_ms,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
