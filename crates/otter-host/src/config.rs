//! Configuration for script execution.
//!
//! `HostConfig` is loaded from JSON (camelCase keys, every field optional)
//! or assembled with the builder setters.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HostError, HostResult};

/// Default number of engine steps between progress callbacks.
pub const DEFAULT_PROGRESS_STEP_THRESHOLD: u64 = 10_000;

/// Default nesting limit for host-mediated calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1_000;

/// Execution control settings shared by every run of a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostConfig {
    /// Wall-clock budget per top-level run in milliseconds.
    /// Zero or negative disables timeout enforcement.
    /// Default: 0
    pub timeout_millis: i64,

    /// Propagate script failures to the caller instead of swallowing them.
    /// Default: false
    pub throw_on_script_error: bool,

    /// Engine steps between progress callbacks.
    /// Default: 10 000
    pub progress_step_threshold: u64,

    /// Nested calls allowed before a run fails with a stack overflow.
    /// Default: 1 000
    pub max_call_depth: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            timeout_millis: 0,
            throw_on_script_error: false,
            progress_step_threshold: DEFAULT_PROGRESS_STEP_THRESHOLD,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl HostConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Config that propagates every script failure to the caller.
    pub fn strict() -> Self {
        Self {
            throw_on_script_error: true,
            ..Default::default()
        }
    }

    /// Set the per-run timeout in milliseconds (`<= 0` disables it).
    pub fn timeout_millis(mut self, millis: i64) -> Self {
        self.timeout_millis = millis;
        self
    }

    /// Enable or disable strict error propagation.
    pub fn throw_on_script_error(mut self, enabled: bool) -> Self {
        self.throw_on_script_error = enabled;
        self
    }

    /// Set the step threshold for the progress callback.
    pub fn progress_step_threshold(mut self, steps: u64) -> Self {
        self.progress_step_threshold = steps.max(1);
        self
    }

    /// Set the nested call limit.
    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth.max(1);
        self
    }

    /// The enforced timeout, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_millis > 0 {
            Some(Duration::from_millis(self.timeout_millis as u64))
        } else {
            None
        }
    }

    /// Parse a JSON document. Missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> HostResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()
    }

    /// Load a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> HostResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Merge another config into this one (other takes precedence for
    /// values that differ from the defaults).
    pub fn merge(mut self, other: Self) -> Self {
        let defaults = Self::default();
        if other.timeout_millis != defaults.timeout_millis {
            self.timeout_millis = other.timeout_millis;
        }
        if other.throw_on_script_error != defaults.throw_on_script_error {
            self.throw_on_script_error = other.throw_on_script_error;
        }
        if other.progress_step_threshold != defaults.progress_step_threshold {
            self.progress_step_threshold = other.progress_step_threshold;
        }
        if other.max_call_depth != defaults.max_call_depth {
            self.max_call_depth = other.max_call_depth;
        }
        self
    }

    fn validate(self) -> HostResult<Self> {
        if self.progress_step_threshold == 0 {
            return Err(HostError::config("progressStepThreshold must be positive"));
        }
        if self.max_call_depth == 0 {
            return Err(HostError::config("maxCallDepth must be positive"));
        }
        Ok(self)
    }
}
