// MIT License - Copyright (c) 2026 Peter Wright
// Interrupt-context bit capture and frame boundary detection

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use heapless::Deque;
use tokio::sync::mpsc;

use crate::frame::BitBuf;
use crate::variant::VariantSpec;

/// Upper bound on the capture window, across all variants.
pub const WINDOW_CAPACITY: usize = 256;

/// Line state shared between the interrupt context and everything else.
///
/// Two single-word flags, written from one side each: the sampler publishes
/// the transmit window, the transmitter publishes that it is driving the
/// line. Relaxed ordering is enough; neither flag guards other memory, and
/// frame handoff has its own synchronization.
#[derive(Debug, Default)]
pub struct LineState {
    transmit_window: AtomicBool,
    transmitting: AtomicBool,
    frames_dropped: AtomicU64,
}

impl LineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while the bus is idle and the receiver is outside a frame, i.e.
    /// a keypress frame can be injected without colliding with the panel.
    pub fn transmit_window_open(&self) -> bool {
        self.transmit_window.load(Ordering::Relaxed)
    }

    pub(crate) fn set_transmit_window(&self, open: bool) {
        self.transmit_window.store(open, Ordering::Relaxed);
    }

    /// True while the transmitter owns the data line.
    pub fn is_transmitting(&self) -> bool {
        self.transmitting.load(Ordering::Relaxed)
    }

    pub(crate) fn begin_transmit(&self) {
        self.transmitting.store(true, Ordering::Relaxed);
    }

    pub(crate) fn end_transmit(&self) {
        self.transmitting.store(false, Ordering::Relaxed);
    }

    /// Completed frames lost because the decode task fell behind.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    fn note_dropped_frame(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Frame boundary bookkeeping.
#[derive(Debug)]
struct BoundaryState {
    inside_frame: bool,
    /// Bits seen since the last boundary toggle. -1 after a forced resync
    /// so the next sample lands on 0.
    age: i32,
}

/// The interrupt-context half of the receiver.
///
/// The host calls [`on_clock_edge`](EdgeSampler::on_clock_edge) once per
/// falling clock edge with the sampled data-line level. The handler is O(1)
/// and allocation-free: it appends the bit to the rolling window, maintains
/// boundary and quiet-window bookkeeping, and on a completed frame publishes
/// an immutable snapshot to the decode task. Nothing else may touch the
/// window.
pub struct EdgeSampler {
    spec: &'static VariantSpec,
    window: Deque<bool, WINDOW_CAPACITY>,
    boundary: BoundaryState,
    ones_run: u8,
    line: Arc<LineState>,
    frame_tx: mpsc::Sender<BitBuf>,
}

impl EdgeSampler {
    pub(crate) fn new(
        spec: &'static VariantSpec,
        line: Arc<LineState>,
        frame_tx: mpsc::Sender<BitBuf>,
    ) -> Self {
        Self {
            spec,
            window: Deque::new(),
            // Assume mid-frame until the first boundary proves otherwise.
            boundary: BoundaryState {
                inside_frame: true,
                age: 0,
            },
            ones_run: 0,
            line,
            frame_tx,
        }
    }

    /// Feed one sampled bit. Call once per falling clock edge.
    pub fn on_clock_edge(&mut self, data_high: bool) {
        // While we drive the data line ourselves there is nothing to sample.
        if self.line.is_transmitting() {
            return;
        }

        if self.window.len() == self.spec.window_bits {
            let _ = self.window.pop_front();
        }
        let _ = self.window.push_back(data_high);
        self.boundary.age += 1;
        self.ones_run = if data_high {
            self.ones_run.saturating_add(1)
        } else {
            0
        };

        // Quiet-window detection runs ahead of full boundary recognition:
        // transmission must be able to start before the next frame begins.
        self.line.set_transmit_window(
            !self.boundary.inside_frame && self.ones_run >= self.spec.quiet_run,
        );

        // Boundary handling only once the window has filled, so start-up
        // garbage cannot produce a bogus frame.
        if self.window.len() == self.spec.window_bits && self.tail_matches_flag() {
            if self.boundary.inside_frame {
                let frame_len = self.boundary.age as usize + self.spec.flag.len();
                if frame_len <= self.window.len() {
                    self.publish_frame(frame_len);
                }
            }
            self.boundary.inside_frame = !self.boundary.inside_frame;
            self.boundary.age = 0;
        }

        // A boundary older than the window means we lost sync (or the bus
        // went silent). Force a clean outside state and start over.
        if self.boundary.age > self.spec.window_bits as i32 {
            self.boundary.inside_frame = false;
            self.boundary.age = -1;
        }
    }

    /// Whether the receiver currently believes it is inside a frame.
    pub fn inside_frame(&self) -> bool {
        self.boundary.inside_frame
    }

    fn bit_at(&self, idx: usize) -> bool {
        let (head, tail) = self.window.as_slices();
        if idx < head.len() {
            head[idx]
        } else {
            tail[idx - head.len()]
        }
    }

    fn tail_matches_flag(&self) -> bool {
        let flag = self.spec.flag;
        let len = self.window.len();
        if len < flag.len() {
            return false;
        }
        let start = len - flag.len();
        flag.iter()
            .enumerate()
            .all(|(i, &expected)| self.bit_at(start + i) == expected)
    }

    /// Snapshot the trailing `frame_len` bits and hand them to the decode
    /// task. A full queue drops the frame; decode latency must never stall
    /// the interrupt context.
    fn publish_frame(&mut self, frame_len: usize) {
        let start = self.window.len() - frame_len;
        let mut frame = BitBuf::new();
        for idx in start..self.window.len() {
            frame.push(self.bit_at(idx));
        }
        if self.frame_tx.try_send(frame).is_err() {
            self.line.note_dropped_frame();
        }
    }
}
