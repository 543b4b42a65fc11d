//! Ambient configuration for a [`crate::Context`].
//!
//! The core never reads a file or an environment variable itself — an
//! external filesystem-dictionary persistence adapter is responsible for
//! turning on-disk configuration into an `EngineConfig`.

/// Tunables for a single [`crate::Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of element slots per allocation segment.
    pub segment_capacity: u32,
    /// Initial capacity hint for the system-identifier dictionary.
    pub dictionary_capacity_hint: usize,
    /// Bounded capacity of the event queue between commit and dispatch.
    pub event_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            segment_capacity: 4096,
            dictionary_capacity_hint: 256,
            event_queue_capacity: 4096,
        }
    }
}

impl EngineConfig {
    /// Returns a config with the given segment capacity, keeping other defaults.
    #[must_use]
    pub const fn with_segment_capacity(mut self, segment_capacity: u32) -> Self {
        self.segment_capacity = segment_capacity;
        self
    }
}
