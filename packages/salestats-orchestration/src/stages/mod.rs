// Stage implementations
pub mod aggregate_stage;
pub mod rollup_stage;
pub mod topk_stage;

// Re-exports
pub use aggregate_stage::AggregateStage;
pub use rollup_stage::RollupStage;
pub use topk_stage::TopKStage;
