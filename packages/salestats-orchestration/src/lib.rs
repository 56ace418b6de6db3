/*
 * Salestats Orchestration - staged batch pipeline substrate
 *
 * Runs the three-stage sales statistics pipeline with the guarantees the
 * core computation assumes:
 *
 * - Stage DAG with phase barriers (a stage starts only after every
 *   upstream output is fully published)
 * - Published, immutable stage outputs in their text wire formats
 * - Job state machine with stage-identifying failures and retry backoff
 * - Per-stage parallel fold over record partitions (rayon)
 */

// Public modules
pub mod dag;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod stages;
pub mod store;

// Re-exports
pub use dag::{PipelineDAG, StageKeys, StageNode};
pub use error::{ErrorCategory, PipelineError, Result};
pub use job::{Job, JobState, JobStateMachine, StageId};
pub use orchestrator::{PipelineOrchestrator, PipelineResult};
pub use pipeline::{
    StageConfig, StageContext, StageHandler, StageInput, StageMetrics, StageOutput,
};
pub use stages::{AggregateStage, RollupStage, TopKStage};
pub use store::{decode_lines, encode_lines, StageStore};
