// MIT License - Copyright (c) 2026 Peter Wright
// Decoded bus events

use crate::decode::ZoneEvent;
use crate::status::AlarmStatus;

/// Everything the engine reports to its subscribers.
///
/// Subscribe via [`BusEngine::subscribe`](crate::engine::BusEngine::subscribe)
/// or [`EngineHandle::subscribe`](crate::engine::EngineHandle::subscribe).
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A zone report named this zone.
    Zone(ZoneEvent),
    /// A status report was decoded. Published for every report, changed or
    /// not, so subscribers get a periodic confirmation.
    Status {
        status: AlarmStatus,
        changed: bool,
    },
    /// Raw and destuffed hex of a completed frame. Only published while
    /// protocol tracing is enabled.
    FrameTrace {
        raw: String,
        destuffed: String,
    },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<BusEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<BusEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
