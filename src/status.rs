// MIT License - Copyright (c) 2026 Peter Wright
// Alarm status model and wear-limited persistence tracking

use tracing::{info, warn};

use crate::storage::StatusStore;

/// Overall alarm state, as reported by the panel's status frames.
///
/// The byte values are the persisted encoding and must stay stable across
/// releases; a status file written by an older build has to restore
/// correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlarmStatus {
    Disarmed = 0,
    ArmedTotal = 1,
    ArmedPartial = 2,
    Triggered = 3,
    Chime = 4,
    ArmingTotal = 5,
    ArmingPartial = 6,
}

impl AlarmStatus {
    /// Stable single-byte encoding used by the status store.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Disarmed),
            1 => Some(Self::ArmedTotal),
            2 => Some(Self::ArmedPartial),
            3 => Some(Self::Triggered),
            4 => Some(Self::Chime),
            5 => Some(Self::ArmingTotal),
            6 => Some(Self::ArmingPartial),
            _ => None,
        }
    }

    /// Interpret a persisted byte at startup. An interrupted arming cycle
    /// restores as the corresponding armed state (the panel will have
    /// finished arming long before we come back up), and anything invalid
    /// falls back to disarmed.
    pub fn from_persisted(byte: u8) -> Self {
        match Self::from_u8(byte) {
            Some(Self::ArmingTotal) => Self::ArmedTotal,
            Some(Self::ArmingPartial) => Self::ArmedPartial,
            Some(status) => status,
            None => Self::Disarmed,
        }
    }

    /// Wire/display payload. Total over the enum so every state is
    /// representable at the boundary.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disarmed => "disarmed",
            Self::ArmedTotal => "armed_total",
            Self::ArmedPartial => "armed_partial",
            Self::Triggered => "triggered",
            Self::Chime => "chime",
            Self::ArmingTotal => "arming_total",
            Self::ArmingPartial => "arming_partial",
        }
    }
}

impl std::fmt::Display for AlarmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds the authoritative alarm status and the wear-limiting write policy.
///
/// Every status report replaces the status wholesale and is always worth
/// publishing (subscribers rely on the periodic confirmation), but the
/// backing store is only written when the persisted byte would actually
/// change. The in-memory value stays authoritative when a write fails.
pub struct AlarmTracker {
    current: AlarmStatus,
    /// Last byte known to be in the store, `None` when unknown.
    persisted: Option<u8>,
    store: Box<dyn StatusStore + Send>,
}

impl AlarmTracker {
    /// Load the persisted status from the store.
    pub fn restore(mut store: Box<dyn StatusStore + Send>) -> Self {
        let (current, persisted) = match store.load() {
            Ok(Some(byte)) => {
                let status = AlarmStatus::from_persisted(byte);
                info!("Restored alarm status: {status} (stored byte {byte})");
                (status, Some(byte))
            }
            Ok(None) => (AlarmStatus::Disarmed, None),
            Err(e) => {
                warn!("Failed to load persisted status, assuming disarmed: {e}");
                (AlarmStatus::Disarmed, None)
            }
        };
        Self {
            current,
            persisted,
            store,
        }
    }

    pub fn current(&self) -> AlarmStatus {
        self.current
    }

    /// Apply a newly decoded status. Returns whether the value changed.
    pub fn apply(&mut self, next: AlarmStatus) -> bool {
        let changed = next != self.current;
        if changed {
            info!("Alarm status: {} -> {next}", self.current);
        }
        self.current = next;

        if self.persisted != Some(next.as_u8()) {
            match self.store.store(next.as_u8()) {
                Ok(()) => self.persisted = Some(next.as_u8()),
                // Non-fatal: memory stays authoritative, retry on the next
                // change.
                Err(e) => warn!("Failed to persist alarm status: {e}"),
            }
        }
        changed
    }
}
