//! The recording gate.
//!
//! One gate is shared by every storage engine of a `Database`. While it is
//! closed no metric write reaches storage: no validation happens, no error is
//! counted and nothing is persisted.

use crate::metric::CommonMetricData;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide upload switch, injected into each storage engine.
#[derive(Debug)]
pub struct RecordingGate {
    upload_enabled: AtomicBool,
}

impl RecordingGate {
    /// Create a gate in the given state.
    pub fn new(upload_enabled: bool) -> RecordingGate {
        RecordingGate {
            upload_enabled: AtomicBool::new(upload_enabled),
        }
    }

    /// Whether the global upload switch is on.
    pub fn is_open(&self) -> bool {
        self.upload_enabled.load(Ordering::Acquire)
    }

    /// Whether a write for the given metric may proceed.
    ///
    /// False if the metric is disabled in its definition or if upload is
    /// globally disabled.
    pub fn should_record(&self, meta: &CommonMetricData) -> bool {
        !meta.disabled && self.is_open()
    }

    /// Flip the global upload switch.
    ///
    /// Writes already past the gate complete; writes arriving after the flip
    /// observe the new state. Applications normally reach this through
    /// `Database::set_upload_enabled`.
    pub fn set_upload_enabled(&self, enabled: bool) {
        self.upload_enabled.store(enabled, Ordering::Release);
    }
}

impl Default for RecordingGate {
    fn default() -> RecordingGate {
        RecordingGate::new(true)
    }
}
