// MIT License - Copyright (c) 2026 Peter Wright
// Error taxonomy

/// Errors surfaced by the persistent status store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the keypad bus engine.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus never went quiet; the panel is continuously transmitting.
    #[error("bus busy: no quiet window within {waited_ms} ms")]
    BusBusy { waited_ms: u64 },

    /// The panel's clock stopped toggling mid-transmission. The data line
    /// has already been released when this is returned.
    #[error("clock stalled while transmitting bit {bit}")]
    ClockTimeout { bit: usize },

    /// Too many transmissions queued and not yet sent.
    #[error("transmit queue full")]
    QueueFull,

    /// The engine or transmit worker has shut down.
    #[error("engine shut down")]
    ChannelClosed,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl BusError {
    /// Whether the command may simply be retried later (the bus was busy
    /// or stalled, rather than the engine being gone).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BusError::BusBusy { .. } | BusError::ClockTimeout { .. } | BusError::QueueFull
        )
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
