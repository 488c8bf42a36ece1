// MIT License - Copyright (c) 2026 Peter Wright
// Keypress encoding and clock-synchronized transmission

use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::InputPin;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::error::{BusError, Result};
use crate::frame::{BitBuf, stuff};
use crate::sampler::LineState;
use crate::variant::VariantSpec;

/// A simulated keypad press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Digit key 0-9.
    Digit(u8),
    Enter,
    ArmTotal,
    ArmPartial,
    Panic,
}

impl Key {
    /// The key code the keypad puts on the wire.
    pub fn code(self) -> u8 {
        match self {
            Key::Digit(d) => d,
            Key::Enter => 17,
            Key::ArmTotal => 13,
            Key::ArmPartial => 14,
            Key::Panic => 32,
        }
    }

    /// Map an ASCII digit to its key.
    pub fn digit(c: char) -> Option<Self> {
        c.to_digit(10).map(|d| Key::Digit(d as u8))
    }
}

/// One queued transmission: a key sequence plus a completion channel.
#[derive(Debug)]
pub struct TransmitRequest {
    pub keys: Vec<Key>,
    pub done: oneshot::Sender<Result<()>>,
}

/// Receiving end of the transmit queue, consumed by
/// [`Transmitter::run_worker`].
pub type TransmitQueue = mpsc::Receiver<TransmitRequest>;

/// Bidirectional data line.
///
/// The line idles as an input while the panel talks; the transmitter claims
/// it as an output for the duration of one frame. embedded-hal has no
/// bidirectional pin trait, so hosts implement this thin seam over their
/// HAL's IO pin type.
pub trait DataPin {
    fn set_output(&mut self);
    fn write(&mut self, high: bool);
    fn set_input(&mut self);
}

/// Build the wire bits for one keypress: opening flag, header, bit-reversed
/// key code (least-significant bit first on the wire), closing flag. The
/// region between the flags is bit-stuffed on variants that stuff.
pub fn encode_keypress(key: Key, spec: &VariantSpec) -> BitBuf {
    let mut inner = BitBuf::new();
    inner.push_byte(spec.command_header[0]);
    inner.push_byte(spec.command_header[1]);
    inner.push_byte(key.code().reverse_bits());
    let inner = match spec.stuffing {
        Some(rule) => stuff(&inner, rule),
        None => inner,
    };

    let mut out = BitBuf::new();
    for &bit in spec.flag {
        out.push(bit);
    }
    out.extend(&inner);
    for &bit in spec.flag {
        out.push(bit);
    }
    out
}

const QUIET_POLL_US: u32 = 100;
const CLOCK_POLL_US: u32 = 10;

/// Drives keypress frames onto the data line, synchronized to the panel's
/// own clock.
///
/// The transmitter is the only writer of the data line and is not
/// reentrant; run it on a dedicated thread via
/// [`run_worker`](Transmitter::run_worker), fed by the engine's transmit
/// queue. Every wait is a bounded short-sleep poll, so the thread keeps
/// yielding to the scheduler and can never spin forever on a dead bus.
pub struct Transmitter<CLK, DAT, D>
where
    CLK: InputPin,
    DAT: DataPin,
    D: DelayNs,
{
    clk: CLK,
    dat: DAT,
    delay: D,
    spec: &'static VariantSpec,
    line: Arc<LineState>,
    quiet_timeout_ms: u64,
    clock_timeout_ms: u64,
    inter_key_gap_ms: u64,
}

impl<CLK, DAT, D> Transmitter<CLK, DAT, D>
where
    CLK: InputPin,
    DAT: DataPin,
    D: DelayNs,
{
    pub fn new(
        clk: CLK,
        dat: DAT,
        delay: D,
        line: Arc<LineState>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            clk,
            dat,
            delay,
            spec: config.variant.spec(),
            line,
            quiet_timeout_ms: config.quiet_timeout_ms,
            clock_timeout_ms: config.clock_timeout_ms,
            inter_key_gap_ms: config.inter_key_gap_ms,
        }
    }

    /// Block until the bus is quiet enough to inject a frame.
    fn wait_quiet(&mut self) -> Result<()> {
        let polls = self.quiet_timeout_ms * 1_000 / QUIET_POLL_US as u64;
        for _ in 0..polls {
            if self.line.transmit_window_open() {
                return Ok(());
            }
            self.delay.delay_us(QUIET_POLL_US);
        }
        Err(BusError::BusBusy {
            waited_ms: self.quiet_timeout_ms,
        })
    }

    /// Block until the clock line reaches `high`, bounded by the clock
    /// timeout.
    fn wait_clock(&mut self, high: bool, bit: usize) -> Result<()> {
        let polls = self.clock_timeout_ms * 1_000 / CLOCK_POLL_US as u64;
        for _ in 0..polls {
            if self.clk.is_high().unwrap_or(false) == high {
                return Ok(());
            }
            self.delay.delay_us(CLOCK_POLL_US);
        }
        Err(BusError::ClockTimeout { bit })
    }

    /// Transmit one frame. Waits for the transmit window, then clocks each
    /// bit out against the panel's clock. Nothing is driven onto the line
    /// before the window opens.
    pub fn send_frame(&mut self, frame: &BitBuf) -> Result<()> {
        self.wait_quiet()?;
        self.line.begin_transmit();
        self.dat.set_output();
        let result = self.clock_out(frame);
        // Hand the line back even on a stalled clock; holding it low would
        // jam the whole bus.
        self.dat.set_input();
        self.line.end_transmit();
        result
    }

    fn clock_out(&mut self, frame: &BitBuf) -> Result<()> {
        for (bit_idx, bit) in frame.iter().enumerate() {
            self.wait_clock(false, bit_idx)?;
            self.dat.write(bit);
            self.wait_clock(true, bit_idx)?;
        }

        // Trailing handshake: one final 0, then park the line high for a
        // clock period before releasing it.
        let end = frame.len();
        self.wait_clock(false, end)?;
        self.dat.write(false);
        self.wait_clock(true, end)?;
        self.wait_clock(false, end)?;
        self.dat.write(true);
        self.wait_clock(true, end)?;
        Ok(())
    }

    /// Transmit a key sequence, one frame per key, pausing between keys the
    /// way a human on the keypad would.
    pub fn send_keys(&mut self, keys: &[Key]) -> Result<()> {
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                self.delay.delay_ms(self.inter_key_gap_ms as u32);
            }
            let frame = encode_keypress(*key, self.spec);
            debug!("Transmitting key {key:?} ({})", frame.to_hex());
            self.send_frame(&frame)?;
        }
        Ok(())
    }

    /// Worker loop: take requests off the transmit queue until the engine
    /// shuts down. One transmission in flight at a time; queued requests
    /// wait their turn.
    pub fn run_worker(mut self, mut requests: TransmitQueue) {
        while let Some(request) = requests.blocking_recv() {
            let outcome = self.send_keys(&request.keys);
            if let Err(e) = &outcome {
                warn!("Keypress transmission failed: {e}");
            }
            let _ = request.done.send(outcome);
        }
        debug!("Transmit worker stopped");
    }
}

/// [`DelayNs`] backed by the OS scheduler, for hosts that bit-bang from a
/// regular thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostDelay;

impl DelayNs for HostDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(ns as u64));
    }
}
