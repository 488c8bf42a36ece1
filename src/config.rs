// MIT License - Copyright (c) 2026 Peter Wright
// Engine configuration

use crate::variant::PanelVariant;

/// Configuration for a [`BusEngine`](crate::engine::BusEngine).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Panel generation on the bus (determines framing and field offsets).
    pub variant: PanelVariant,
    /// Completed frames buffered between the interrupt context and the
    /// decode task. Overflow drops frames rather than stalling the sampler.
    pub frame_queue: usize,
    /// Pending keypress transmissions.
    pub command_queue: usize,
    /// Event broadcast capacity.
    pub event_capacity: usize,
    /// How long a transmission waits for a quiet bus before giving up.
    pub quiet_timeout_ms: u64,
    /// How long a transmission waits for a single clock transition.
    pub clock_timeout_ms: u64,
    /// Pause between the keypress frames of a multi-key command.
    pub inter_key_gap_ms: u64,
    /// Whether protocol tracing starts enabled.
    pub trace: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            variant: PanelVariant::Runner816,
            frame_queue: 32,
            command_queue: 8,
            event_capacity: 64,
            quiet_timeout_ms: 10_000,
            clock_timeout_ms: 500,
            inter_key_gap_ms: 50,
            trace: false,
        }
    }
}

impl BridgeConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }
}

/// Builder for [`BridgeConfig`].
#[derive(Debug, Clone, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    pub fn variant(mut self, variant: PanelVariant) -> Self {
        self.config.variant = variant;
        self
    }

    pub fn frame_queue(mut self, capacity: usize) -> Self {
        self.config.frame_queue = capacity;
        self
    }

    pub fn command_queue(mut self, capacity: usize) -> Self {
        self.config.command_queue = capacity;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn quiet_timeout_ms(mut self, ms: u64) -> Self {
        self.config.quiet_timeout_ms = ms;
        self
    }

    pub fn clock_timeout_ms(mut self, ms: u64) -> Self {
        self.config.clock_timeout_ms = ms;
        self
    }

    pub fn inter_key_gap_ms(mut self, ms: u64) -> Self {
        self.config.inter_key_gap_ms = ms;
        self
    }

    pub fn trace(mut self, trace: bool) -> Self {
        self.config.trace = trace;
        self
    }

    pub fn build(self) -> BridgeConfig {
        self.config
    }
}
