// MIT License - Copyright (c) 2026 Peter Wright
// Protocol engine facade

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::decode::decode_frame;
use crate::error::{BusError, Result};
use crate::event::{BusEvent, EventReceiver, EventSender, event_channel};
use crate::frame::{BitBuf, destuff};
use crate::sampler::{EdgeSampler, LineState};
use crate::status::{AlarmStatus, AlarmTracker};
use crate::storage::StatusStore;
use crate::transmit::{Key, TransmitQueue, TransmitRequest};
use crate::variant::VariantSpec;

/// The main-context half of the keypad bus protocol engine.
///
/// [`BusEngine::new`] wires up the three pieces a host has to place:
///
/// - the returned [`EdgeSampler`] goes into the clock-line interrupt
///   handler;
/// - the returned [`TransmitQueue`] feeds a
///   [`Transmitter`](crate::transmit::Transmitter) on a dedicated thread;
/// - the engine itself runs [`run`](BusEngine::run) on the async runtime,
///   decoding frame snapshots as the sampler hands them over.
///
/// All state lives in the instance; independent engines can run side by
/// side (one per bus).
pub struct BusEngine {
    spec: &'static VariantSpec,
    line: Arc<LineState>,
    event_tx: EventSender,
    frame_rx: mpsc::Receiver<BitBuf>,
    cmd_tx: mpsc::Sender<TransmitRequest>,
    tracker: AlarmTracker,
    trace: Arc<AtomicBool>,
    status_cell: Arc<AtomicU8>,
}

impl BusEngine {
    /// Build an engine, restoring the alarm status from `store`.
    pub fn new(
        config: BridgeConfig,
        store: Box<dyn StatusStore + Send>,
    ) -> (Self, EdgeSampler, TransmitQueue) {
        let spec = config.variant.spec();
        let line = Arc::new(LineState::new());
        let (event_tx, _) = event_channel(config.event_capacity.max(1));
        let (frame_tx, frame_rx) = mpsc::channel(config.frame_queue.max(1));
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_queue.max(1));

        let sampler = EdgeSampler::new(spec, line.clone(), frame_tx);
        let tracker = AlarmTracker::restore(store);
        let status_cell = Arc::new(AtomicU8::new(tracker.current().as_u8()));
        let trace = Arc::new(AtomicBool::new(config.trace));

        let engine = Self {
            spec,
            line,
            event_tx,
            frame_rx,
            cmd_tx,
            tracker,
            trace,
            status_cell,
        };
        (engine, sampler, cmd_rx)
    }

    /// Subscribe to decoded bus events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    /// Shared line state, for wiring up a transmitter.
    pub fn line(&self) -> Arc<LineState> {
        self.line.clone()
    }

    /// Cloneable handle for command submission and runtime toggles.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            cmd_tx: self.cmd_tx.clone(),
            event_tx: self.event_tx.clone(),
            trace: self.trace.clone(),
            status_cell: self.status_cell.clone(),
            line: self.line.clone(),
        }
    }

    /// Current alarm status.
    pub fn current_status(&self) -> AlarmStatus {
        self.tracker.current()
    }

    /// Decode loop. Runs until the sampler (and with it the frame channel)
    /// is dropped.
    pub async fn run(mut self) {
        info!("Keypad bus engine running ({})", self.spec.name);
        while let Some(raw) = self.frame_rx.recv().await {
            self.process_frame(raw);
        }
        debug!("Frame channel closed, engine stopping");
    }

    /// Decode one raw frame snapshot and publish whatever it yields.
    fn process_frame(&mut self, raw: BitBuf) {
        let frame = match self.spec.stuffing {
            Some(rule) => destuff(&raw, rule),
            None => raw,
        };

        if self.trace.load(Ordering::Relaxed) {
            let _ = self.event_tx.send(BusEvent::FrameTrace {
                raw: raw.to_hex(),
                destuffed: frame.to_hex(),
            });
        }

        if frame.len() % 8 != 0 {
            debug!(
                "Discarding malformed frame: {} bits after destuffing",
                frame.len()
            );
            return;
        }

        let Some(decoded) = decode_frame(&frame, self.spec, self.tracker.current()) else {
            debug!("Ignoring {}-bit frame", frame.len());
            return;
        };

        for event in decoded.zones.iter() {
            info!("Zone {} {:?}", event.zone, event.kind);
            let _ = self.event_tx.send(BusEvent::Zone(*event));
        }

        if let Some(next) = decoded.status {
            let changed = self.tracker.apply(next);
            self.status_cell.store(next.as_u8(), Ordering::Relaxed);
            // Published even when unchanged; subscribers use the repeats as
            // a periodic confirmation.
            let _ = self.event_tx.send(BusEvent::Status {
                status: next,
                changed,
            });
        }
    }
}

/// Cloneable handle onto a running [`BusEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<TransmitRequest>,
    event_tx: EventSender,
    trace: Arc<AtomicBool>,
    status_cell: Arc<AtomicU8>,
    line: Arc<LineState>,
}

impl EngineHandle {
    /// Subscribe to decoded bus events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    /// Shared line state.
    pub fn line(&self) -> Arc<LineState> {
        self.line.clone()
    }

    /// Toggle protocol tracing at runtime.
    pub fn set_trace(&self, enabled: bool) {
        self.trace.store(enabled, Ordering::Relaxed);
        info!(
            "Protocol trace {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace.load(Ordering::Relaxed)
    }

    /// Last known alarm status.
    pub fn status(&self) -> AlarmStatus {
        AlarmStatus::from_u8(self.status_cell.load(Ordering::Relaxed))
            .unwrap_or(AlarmStatus::Disarmed)
    }

    /// Queue a key sequence for transmission and wait for the outcome.
    ///
    /// The request is rejected immediately with
    /// [`BusError::QueueFull`] when too many commands are pending; once
    /// queued, the returned future resolves when the transmit worker has
    /// sent the sequence (or failed trying).
    pub async fn send_keys(&self, keys: &[Key]) -> Result<()> {
        let (done, outcome) = oneshot::channel();
        self.cmd_tx
            .try_send(TransmitRequest {
                keys: keys.to_vec(),
                done,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BusError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => BusError::ChannelClosed,
            })?;
        outcome.await.map_err(|_| BusError::ChannelClosed)?
    }

    /// Queue a single keypress.
    pub async fn send_key(&self, key: Key) -> Result<()> {
        self.send_keys(&[key]).await
    }

    /// Arm in total mode. Enter first wakes the keypad bus up.
    pub async fn arm_total(&self) -> Result<()> {
        self.send_keys(&[Key::Enter, Key::ArmTotal]).await
    }

    /// Arm in partial mode.
    pub async fn arm_partial(&self) -> Result<()> {
        self.send_keys(&[Key::Enter, Key::ArmPartial]).await
    }

    /// Trigger the panic alarm.
    pub async fn trigger_panic(&self) -> Result<()> {
        self.send_keys(&[Key::Enter, Key::Panic]).await
    }

    /// Disarm by keying in the user code. Non-digit characters in `code`
    /// are ignored.
    pub async fn disarm(&self, code: &str) -> Result<()> {
        let mut keys = vec![Key::Enter];
        keys.extend(code.chars().filter_map(Key::digit));
        keys.push(Key::Enter);
        self.send_keys(&keys).await
    }

    /// Ask the panel to report its status.
    pub async fn refresh_status(&self) -> Result<()> {
        self.send_keys(&[Key::Digit(1), Key::Enter]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::stuff;
    use crate::storage::MemoryStore;
    use crate::variant::PanelVariant;

    fn engine() -> (BusEngine, EdgeSampler, TransmitQueue) {
        BusEngine::new(BridgeConfig::default(), Box::new(MemoryStore::new()))
    }

    /// A destuffed 72-bit frame with the given bit offsets set.
    fn frame_with(set: &[usize]) -> BitBuf {
        (0..72).map(|i| set.contains(&i)).collect()
    }

    fn recv_now(rx: &mut EventReceiver) -> BusEvent {
        rx.try_recv().expect("event pending")
    }

    #[test]
    fn test_zone_frame_emits_events() {
        let (mut engine, _sampler, _queue) = engine();
        let mut events = engine.subscribe();

        let fields = &engine.spec.fields;
        let raw = stuff(
            &frame_with(&[fields.zone_active + 2]),
            engine.spec.stuffing.unwrap(),
        );
        engine.process_frame(raw);

        match recv_now(&mut events) {
            BusEvent::Zone(event) => {
                assert_eq!(event.zone, 3);
            }
            other => panic!("expected zone event, got {other:?}"),
        }
    }

    #[test]
    fn test_status_published_even_when_unchanged() {
        let (mut engine, _sampler, _queue) = engine();
        let mut events = engine.subscribe();

        let fields = engine.spec.fields;
        let status_frame = frame_with(&[
            fields.discriminant,
            fields.armed_total,
            fields.confirm,
        ]);
        let raw = stuff(&status_frame, engine.spec.stuffing.unwrap());

        engine.process_frame(raw);
        engine.process_frame(raw);

        match recv_now(&mut events) {
            BusEvent::Status { status, changed } => {
                assert_eq!(status, AlarmStatus::ArmedTotal);
                assert!(changed);
            }
            other => panic!("expected status event, got {other:?}"),
        }
        match recv_now(&mut events) {
            BusEvent::Status { status, changed } => {
                assert_eq!(status, AlarmStatus::ArmedTotal);
                assert!(!changed);
            }
            other => panic!("expected status event, got {other:?}"),
        }
    }

    #[test]
    fn test_wear_limited_persistence_through_engine() {
        let store = MemoryStore::new();
        let handle = store.clone();
        let (mut engine, _sampler, _queue) =
            BusEngine::new(BridgeConfig::default(), Box::new(store));

        let fields = engine.spec.fields;
        let raw = stuff(
            &frame_with(&[fields.discriminant, fields.armed_total, fields.confirm]),
            engine.spec.stuffing.unwrap(),
        );
        engine.process_frame(raw);
        engine.process_frame(raw);

        assert_eq!(handle.write_count(), 1);
        assert_eq!(engine.current_status(), AlarmStatus::ArmedTotal);
    }

    #[test]
    fn test_trace_events_follow_the_flag() {
        let (mut engine, _sampler, _queue) = engine();
        let handle = engine.handle();
        let mut events = engine.subscribe();

        let raw = frame_with(&[]);
        engine.process_frame(raw);
        assert!(events.try_recv().is_err(), "trace disabled by default");

        handle.set_trace(true);
        engine.process_frame(raw);
        match recv_now(&mut events) {
            BusEvent::FrameTrace { destuffed, .. } => {
                assert_eq!(destuffed.len(), 72 / 8 * 2);
            }
            other => panic!("expected trace event, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_and_unknown_lengths_are_ignored() {
        let (mut engine, _sampler, _queue) = engine();
        let mut events = engine.subscribe();

        // 70 bits: not byte aligned after destuffing.
        let ragged: BitBuf = (0..70).map(|_| false).collect();
        engine.process_frame(ragged);

        // 64 bits: aligned but not a recognized frame.
        let short: BitBuf = (0..64).map(|_| false).collect();
        engine.process_frame(short);

        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_handle_status_mirrors_engine() {
        let (mut engine, _sampler, _queue) = engine();
        let handle = engine.handle();
        assert_eq!(handle.status(), AlarmStatus::Disarmed);

        let fields = engine.spec.fields;
        let raw = stuff(
            &frame_with(&[fields.discriminant, fields.armed_total, fields.confirm]),
            engine.spec.stuffing.unwrap(),
        );
        engine.process_frame(raw);
        assert_eq!(handle.status(), AlarmStatus::ArmedTotal);
    }

    #[tokio::test]
    async fn test_send_keys_reports_queue_shutdown() {
        let (engine, _sampler, queue) = engine();
        let handle = engine.handle();
        drop(queue);
        match handle.send_key(Key::Enter).await {
            Err(BusError::ChannelClosed) => {}
            other => panic!("expected ChannelClosed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_keys_queue_full() {
        let config = BridgeConfig::builder().command_queue(1).build();
        let (engine, _sampler, _queue) =
            BusEngine::new(config, Box::new(MemoryStore::new()));
        let handle = engine.handle();

        // First request parks in the queue (no worker is draining it), the
        // second must bounce.
        let first = handle.clone();
        let parked = tokio::spawn(async move { first.send_key(Key::Enter).await });
        tokio::task::yield_now().await;

        match handle.send_key(Key::Enter).await {
            Err(BusError::QueueFull) => {}
            other => panic!("expected QueueFull, got {other:?}"),
        }
        parked.abort();
    }
}
