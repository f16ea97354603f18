//! Unified error types for the NodeLink firmware.
//!
//! Follows embedded best practice: a single `Error` enum that every subsystem
//! can convert into, keeping the top-level control loop's error handling
//! uniform. All variants are `Copy` so they can be cheaply passed through the
//! event bus and FSM without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A network link (WiFi / MQTT / SNTP) operation failed.
    Link(LinkError),
    /// The event bus rejected an operation.
    Bus(BusError),
    /// Persistent key-value storage failed.
    Kv(KvError),
    /// Peripheral initialisation failed.
    Init(&'static str),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Bus(e) => write!(f, "bus: {e}"),
            Self::Kv(e) => write!(f, "kv: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Link errors (transient — retried with backoff, never fatal by themselves)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// No WiFi credentials configured.
    NoCredentials,
    /// SSID invalid (must be 1-32 printable ASCII bytes).
    InvalidSsid,
    /// Password invalid (must be 8-64 bytes for WPA2, or empty for open).
    InvalidPassword,
    /// Scan found none of the configured networks.
    NoKnownNetwork,
    /// Association did not complete within the bounded timeout.
    AssociationTimeout,
    /// The driver reported a connection failure.
    ConnectFailed,
    /// Operation requires WiFi but WiFi is down.
    TransportDown,
    /// The MQTT broker refused the connection.
    BrokerRefused,
    /// A connection attempt is already in flight.
    Busy,
    /// SNTP sync exhausted its bounded attempt count.
    SyncFailed,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => {
                write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)")
            }
            Self::NoKnownNetwork => write!(f, "no configured network found in scan"),
            Self::AssociationTimeout => write!(f, "association timed out"),
            Self::ConnectFailed => write!(f, "connection failed"),
            Self::TransportDown => write!(f, "transport (WiFi) is down"),
            Self::BrokerRefused => write!(f, "broker refused connection"),
            Self::Busy => write!(f, "connection attempt already in flight"),
            Self::SyncFailed => write!(f, "time sync failed"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Bus errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The target priority queue is at capacity.
    QueueFull,
    /// The publish fell inside the per-kind throttle window.
    Throttled,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "event queue full"),
            Self::Throttled => write!(f, "publish throttled"),
        }
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

// ---------------------------------------------------------------------------
// Handler errors (isolated at the bus boundary)
// ---------------------------------------------------------------------------

/// Returned by a subscriber handle that failed to process an event.
///
/// The bus catches this, logs it, feeds the circuit breaker, and — when the
/// event was not itself a `system.error` — synthesizes a depth-bounded error
/// event. It never propagates past the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerError {
    /// Short static description for logging and the synthesized error event.
    pub context: &'static str,
}

impl HandlerError {
    pub const fn new(context: &'static str) -> Self {
        Self { context }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler failed: {}", self.context)
    }
}

// ---------------------------------------------------------------------------
// Key-value storage errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvError {
    /// Requested key does not exist.
    NotFound,
    /// Stored blob failed deserialization.
    Corrupted,
    /// Storage partition is full.
    Full,
    /// Generic I/O error from the storage backend.
    IoError,
}

impl fmt::Display for KvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Corrupted => write!(f, "stored value corrupted"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<KvError> for Error {
    fn from(e: KvError) -> Self {
        Self::Kv(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
