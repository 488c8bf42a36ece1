//! Example: feed a canned keypad-bus edge stream through the engine and
//! print the decoded events. No hardware required.

use crow_bus_bridge::frame::{BitBuf, stuff};
use crow_bus_bridge::{
    BridgeConfig, BusEngine, BusEvent, MemoryStore, PanelVariant, VariantSpec,
};

/// Wire bits of one frame: opening flag, stuffed payload, closing flag.
/// `set` holds bit offsets relative to the frame start (opening flag
/// included), the way the decoder's field map counts them.
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

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = BridgeConfig::builder()
        .variant(PanelVariant::Runner816)
        .build();
    let (engine, mut sampler, _commands) =
        BusEngine::new(config, Box::new(MemoryStore::new()));
    let mut events = engine.subscribe();
    tokio::spawn(engine.run());

    let spec = PanelVariant::Runner816.spec();
    let fields = &spec.fields;

    // Idle bus until the capture window has filled and the boundary
    // detector has synchronized.
    for _ in 0..=spec.window_bits {
        sampler.on_clock_edge(false);
    }

    // A zone report (zone 3 active) followed by a status report (armed
    // total, confirmed).
    let frames = [
        wire_frame(spec, &[fields.zone_active + 2]),
        wire_frame(
            spec,
            &[fields.discriminant, fields.armed_total, fields.confirm],
        ),
    ];
    for frame in &frames {
        for &bit in frame {
            sampler.on_clock_edge(bit);
        }
    }

    for _ in 0..2 {
        match events.recv().await.expect("event") {
            BusEvent::Zone(zone) => println!("zone {} {:?}", zone.zone, zone.kind),
            BusEvent::Status { status, changed } => {
                println!("status {status} (changed: {changed})")
            }
            BusEvent::FrameTrace { raw, destuffed } => {
                println!("frame raw={raw} destuffed={destuffed}")
            }
        }
    }
}
