//! formulary-eval: evaluating formulas against entities.
//!
//! The evaluator walks a parsed [`formulary_core::Expression`] against an
//! [`EvaluationContext`] of pre-fetched entities. Around it sit the context
//! builder (what to fetch), the computation service (recompute and write
//! back one entity's derived properties) and the recalculation handler
//! (react to staleness notifications, eagerly or in debounced batches).

pub mod compute;
pub mod config;
pub mod context;
pub mod context_builder;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod numeric;
pub mod recalc;

pub use compute::{ComputationOutcome, ComputationService, ComputeOptions, PropertyResult};
pub use config::{EngineConfig, RecalcConfig, RecalcMode};
pub use context::EvaluationContext;
pub use context_builder::ContextBuilder;
pub use error::{ComputeError, EvaluationError, EvaluationErrorKind};
pub use evaluator::{evaluate, is_truthy, render_template, Evaluator};
pub use recalc::{BatchState, FlushReport, RecalcStats, RecalculationHandler};
