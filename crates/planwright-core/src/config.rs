//! Engine tuning knobs.
//!
//! Loading and persistence live in the adapters crate; this is only the shape
//! and its defaults.

use crate::protocol::StabilityWindow;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_transient_step_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_delay_increment_ms: u64,
    /// Generation attempts per step before a patch or content failure escalates.
    pub max_content_repair_attempts: u32,
    pub diagnostics_stable_timeout_ms: u64,
    pub diagnostics_poll_initial_ms: u64,
    pub diagnostics_poll_max_ms: u64,
    pub command_timeout_ms: u64,
    pub auto_approve_commands: bool,
    pub model: String,
    pub max_self_correction_cycles: u32,
    /// Extra glob patterns excluded from plans, on top of the built-in directories.
    pub ignore_patterns: Vec<String>,
    /// Shell command whose `path:line:col: severity: message` output feeds diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics_command: Option<String>,
    /// Full-file rewrites shorter than this need a second opinion.
    pub min_full_file_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_transient_step_retries: 3,
            retry_base_delay_ms: 1_000,
            retry_delay_increment_ms: 2_000,
            max_content_repair_attempts: 3,
            diagnostics_stable_timeout_ms: 15_000,
            diagnostics_poll_initial_ms: 200,
            diagnostics_poll_max_ms: 2_000,
            command_timeout_ms: 300_000,
            auto_approve_commands: false,
            model: DEFAULT_MODEL.to_string(),
            max_self_correction_cycles: 2,
            ignore_patterns: Vec::new(),
            diagnostics_command: None,
            min_full_file_chars: 40,
        }
    }
}

impl EngineConfig {
    /// Delay before transient retry number `attempt` (1-based): `base + attempt * increment`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let extra = self
            .retry_delay_increment_ms
            .saturating_mul(u64::from(attempt));
        Duration::from_millis(self.retry_base_delay_ms.saturating_add(extra))
    }

    pub fn stability_window(&self) -> StabilityWindow {
        StabilityWindow {
            timeout: Duration::from_millis(self.diagnostics_stable_timeout_ms),
            initial_poll: Duration::from_millis(self.diagnostics_poll_initial_ms),
            max_poll: Duration::from_millis(self.diagnostics_poll_max_ms),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Clamp values that would stall or spin the engine.
    pub fn sanitize(&mut self) {
        if self.model.trim().is_empty() {
            self.model = DEFAULT_MODEL.to_string();
        }
        if self.diagnostics_poll_initial_ms == 0 {
            self.diagnostics_poll_initial_ms = 1;
        }
        if self.diagnostics_poll_max_ms < self.diagnostics_poll_initial_ms {
            self.diagnostics_poll_max_ms = self.diagnostics_poll_initial_ms;
        }
        if self.command_timeout_ms == 0 {
            self.command_timeout_ms = EngineConfig::default().command_timeout_ms;
        }
        self.diagnostics_command = self
            .diagnostics_command
            .take()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
    }
}
