// MIT License - Copyright (c) 2026 Peter Wright
//
//! # crow-bus-bridge
//!
//! Protocol engine for the Crow Runner 8/16 and PowerWave 16 alarm keypad
//! bus: a proprietary two-wire (clock + data) bit-serial protocol, decoded
//! into semantic zone and status events and re-encoded to simulate keypad
//! keypresses.
//!
//! The engine is split along the two execution contexts of the host:
//!
//! - [`EdgeSampler`] runs in the clock-line interrupt handler. It is O(1)
//!   and allocation-free, and publishes completed frame snapshots through a
//!   bounded queue.
//! - [`BusEngine`] runs on the async runtime and does everything else:
//!   destuffing, frame decoding, the alarm state machine, wear-limited
//!   status persistence, and event publication.
//! - [`Transmitter`](transmit::Transmitter) bit-bangs keypress frames onto
//!   the data line from a dedicated thread, synchronized to the panel's own
//!   clock and gated on a detected quiet window.
//!
//! ## Quick Start
//!
//! ```no_run
//! use crow_bus_bridge::{BridgeConfig, BusEngine, BusEvent, MemoryStore, PanelVariant};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = BridgeConfig::builder()
//!         .variant(PanelVariant::Runner816)
//!         .build();
//!     let (engine, mut sampler, _commands) =
//!         BusEngine::new(config, Box::new(MemoryStore::new()));
//!
//!     let mut events = engine.subscribe();
//!     tokio::spawn(engine.run());
//!
//!     // The host's interrupt handler calls this once per falling clock
//!     // edge with the sampled data-line level.
//!     sampler.on_clock_edge(true);
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             BusEvent::Zone(zone) => println!("zone {} {:?}", zone.zone, zone.kind),
//!             BusEvent::Status { status, .. } => println!("status {status}"),
//!             BusEvent::FrameTrace { raw, .. } => println!("frame {raw}"),
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod event;
pub mod frame;
pub mod sampler;
pub mod status;
pub mod storage;
pub mod transmit;
pub mod variant;

// Re-exports for convenience
pub use config::{BridgeConfig, BridgeConfigBuilder};
pub use decode::{StatusBits, ZoneEvent, ZoneEventKind};
pub use engine::{BusEngine, EngineHandle};
pub use error::{BusError, Result, StorageError};
pub use event::{BusEvent, EventReceiver};
pub use frame::BitBuf;
pub use sampler::{EdgeSampler, LineState};
pub use status::AlarmStatus;
pub use storage::{FileStore, MemoryStore, StatusStore};
pub use transmit::{DataPin, HostDelay, Key, Transmitter};
pub use variant::{PanelVariant, VariantSpec};
