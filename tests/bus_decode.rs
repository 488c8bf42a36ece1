// MIT License - Copyright (c) 2026 Peter Wright
// End-to-end decode tests: raw edge stream in, semantic events out.

use std::time::Duration;

use crow_bus_bridge::frame::{BitBuf, stuff};
use crow_bus_bridge::{
    AlarmStatus, BridgeConfig, BusEngine, BusEvent, EdgeSampler, EventReceiver, MemoryStore,
    PanelVariant, VariantSpec, ZoneEventKind,
};

/// Wire bits of one frame: opening flag, stuffed payload, closing flag.
/// `set` holds bit offsets relative to the frame start (opening flag
/// included), matching the decoder's field map.
fn wire_frame(spec: &VariantSpec, set: &[usize]) -> Vec<bool> {
    let flag_len = spec.flag.len();
    let payload: BitBuf = (flag_len..spec.frame_bits - flag_len)
        .map(|i| set.contains(&i))
        .collect();
    let payload = match spec.stuffing {
        Some(rule) => stuff(&payload, rule),
        None => payload,
    };

    let mut bits: Vec<bool> = spec.flag.to_vec();
    bits.extend(payload.iter());
    bits.extend_from_slice(spec.flag);
    bits
}

/// Idle the bus until the capture window has filled and the boundary
/// detector has synchronized to outside-frame.
fn settle(sampler: &mut EdgeSampler, spec: &VariantSpec) {
    for _ in 0..=spec.window_bits {
        sampler.on_clock_edge(false);
    }
}

fn feed(sampler: &mut EdgeSampler, bits: &[bool]) {
    for &bit in bits {
        sampler.on_clock_edge(bit);
    }
}

async fn next_event(events: &mut EventReceiver) -> BusEvent {
    tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel open")
}

#[tokio::test]
async fn test_zone_report_end_to_end() {
    let (engine, mut sampler, _commands) =
        BusEngine::new(BridgeConfig::default(), Box::new(MemoryStore::new()));
    let mut events = engine.subscribe();
    tokio::spawn(engine.run());

    let spec = PanelVariant::Runner816.spec();
    settle(&mut sampler, spec);

    // Zones 1-5 active: five consecutive 1s in the payload, so the wire
    // stream carries a stuffed 0 the decoder must strip again.
    let set: Vec<usize> = (0..5).map(|i| spec.fields.zone_active + i).collect();
    let frame = wire_frame(spec, &set);
    assert!(frame.len() > spec.frame_bits, "stuffing lengthens the frame");
    feed(&mut sampler, &frame);

    for zone in 1..=5u8 {
        match next_event(&mut events).await {
            BusEvent::Zone(event) => {
                assert_eq!(event.zone, zone);
                assert_eq!(event.kind, ZoneEventKind::Activated);
            }
            other => panic!("expected zone event, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_status_report_end_to_end_with_wear_limiting() {
    let store = MemoryStore::new();
    let probe = store.clone();
    let (engine, mut sampler, _commands) =
        BusEngine::new(BridgeConfig::default(), Box::new(store));
    let mut events = engine.subscribe();
    tokio::spawn(engine.run());

    let spec = PanelVariant::Runner816.spec();
    let fields = &spec.fields;
    settle(&mut sampler, spec);

    let frame = wire_frame(
        spec,
        &[fields.discriminant, fields.armed_total, fields.confirm],
    );
    feed(&mut sampler, &frame);
    feed(&mut sampler, &frame);

    // Both reports are published, only the first marks a change.
    match next_event(&mut events).await {
        BusEvent::Status { status, changed } => {
            assert_eq!(status, AlarmStatus::ArmedTotal);
            assert!(changed);
        }
        other => panic!("expected status event, got {other:?}"),
    }
    match next_event(&mut events).await {
        BusEvent::Status { status, changed } => {
            assert_eq!(status, AlarmStatus::ArmedTotal);
            assert!(!changed);
        }
        other => panic!("expected status event, got {other:?}"),
    }

    // One persisted write across both reports.
    assert_eq!(probe.write_count(), 1);
    assert_eq!(probe.value(), Some(AlarmStatus::ArmedTotal.as_u8()));
}

#[tokio::test]
async fn test_powerwave_zone_trigger_forces_alarm() {
    let config = BridgeConfig::builder()
        .variant(PanelVariant::PowerWave16)
        .build();
    let (engine, mut sampler, _commands) =
        BusEngine::new(config, Box::new(MemoryStore::new()));
    let mut events = engine.subscribe();
    tokio::spawn(engine.run());

    let spec = PanelVariant::PowerWave16.spec();
    settle(&mut sampler, spec);

    feed(
        &mut sampler,
        &wire_frame(spec, &[spec.fields.zone_triggered]),
    );

    match next_event(&mut events).await {
        BusEvent::Zone(event) => {
            assert_eq!(event.zone, 1);
            assert_eq!(event.kind, ZoneEventKind::Triggered);
        }
        other => panic!("expected zone event, got {other:?}"),
    }
    match next_event(&mut events).await {
        BusEvent::Status { status, changed } => {
            assert_eq!(status, AlarmStatus::Triggered);
            assert!(changed);
        }
        other => panic!("expected status event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let (engine, mut sampler, _commands) =
        BusEngine::new(BridgeConfig::default(), Box::new(MemoryStore::new()));
    let mut events = engine.subscribe();
    tokio::spawn(engine.run());

    let spec = PanelVariant::Runner816.spec();
    let fields = &spec.fields;
    settle(&mut sampler, spec);

    // A ragged 21-bit frame: flag, five zeros, flag. Not byte aligned
    // after destuffing, so it must vanish without an event.
    let mut ragged: Vec<bool> = spec.flag.to_vec();
    ragged.extend([false; 5]);
    ragged.extend_from_slice(spec.flag);
    feed(&mut sampler, &ragged);

    // The next well-formed report comes straight through.
    feed(
        &mut sampler,
        &wire_frame(spec, &[fields.discriminant, fields.armed_partial, fields.confirm]),
    );

    match next_event(&mut events).await {
        BusEvent::Status { status, .. } => assert_eq!(status, AlarmStatus::ArmedPartial),
        other => panic!("expected status event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_quiet_window_signal_through_the_facade() {
    let (engine, mut sampler, _commands) =
        BusEngine::new(BridgeConfig::default(), Box::new(MemoryStore::new()));
    let line = engine.line();
    tokio::spawn(engine.run());

    let spec = PanelVariant::Runner816.spec();
    settle(&mut sampler, spec);
    assert!(!line.transmit_window_open());

    // Ten idle 1s outside a frame open the transmit window; any 0 closes
    // it again.
    for _ in 0..10 {
        sampler.on_clock_edge(true);
    }
    assert!(line.transmit_window_open());
    sampler.on_clock_edge(false);
    assert!(!line.transmit_window_open());
}
