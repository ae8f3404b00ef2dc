//! Replay configuration.

use serde::{Deserialize, Serialize};

/// Replay options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayOptions {
    /// Reset resources to their initial contents before a full replay
    pub apply_initial_contents: bool,
    /// Wait for the backend after every scope submission
    pub wait_after_submit: bool,
    /// Collect per-kind chunk statistics while loading
    pub collect_stats: bool,
}

impl ReplayOptions {
    /// Set initial contents application
    #[must_use]
    pub fn with_apply_initial_contents(mut self, enabled: bool) -> Self {
        self.apply_initial_contents = enabled;
        self
    }

    /// Set waiting after submission
    #[must_use]
    pub fn with_wait_after_submit(mut self, enabled: bool) -> Self {
        self.wait_after_submit = enabled;
        self
    }

    /// Set statistics collection
    #[must_use]
    pub fn with_collect_stats(mut self, enabled: bool) -> Self {
        self.collect_stats = enabled;
        self
    }
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            apply_initial_contents: true,
            wait_after_submit: false,
            collect_stats: true,
        }
    }
}
