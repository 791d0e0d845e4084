//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for evaluation and recalculation. Every field has a default, so
/// an empty document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum relationship hops the context builder follows.
    pub max_depth: usize,
    /// Evaluator budget for AST nesting plus on-demand property evaluation.
    pub recursion_limit: usize,
    /// Fail on missing references instead of yielding null.
    pub strict: bool,
    pub recalc: RecalcConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_depth: 50,
            recursion_limit: 256,
            strict: false,
            recalc: RecalcConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecalcMode {
    /// Debounce notifications per entity and recompute in batches.
    #[default]
    Batched,
    /// Recompute on every notification.
    Eager,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecalcConfig {
    pub mode: RecalcMode,
    pub batch_delay_ms: u64,
    /// Actor recorded for timer-driven and notification-driven passes.
    pub system_actor: String,
}

impl Default for RecalcConfig {
    fn default() -> Self {
        RecalcConfig {
            mode: RecalcMode::Batched,
            batch_delay_ms: 250,
            system_actor: "system".to_string(),
        }
    }
}

impl RecalcConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}
