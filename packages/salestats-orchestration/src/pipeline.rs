use crate::dag::StageKeys;
use crate::error::Result;
use crate::job::StageId;
use crate::store::StageStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Stage context passed to handlers
#[derive(Clone)]
pub struct StageContext {
    pub job_id: Uuid,
    pub dataset_id: String,
    pub run_id: String,
    pub keys: StageKeys,
    pub store: Arc<StageStore>,
    /// Rows kept per region by the final stage; `<= 0` means none.
    pub top_k: i32,
}

/// Stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub parallel_workers: usize,
    /// Raw lines folded per rayon partition in the aggregate stage.
    pub partition_size: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            parallel_workers: (num_cpus::get() * 3 / 4).max(1), // 75% of cores
            partition_size: 1024,
        }
    }
}

/// Stage input
pub struct StageInput {
    /// Raw dataset lines. Only the aggregate stage reads these; later
    /// stages read their dependencies' published outputs from `upstream`.
    pub records: Vec<String>,
    /// Published outputs of dependency stages, keyed by stage output key.
    pub upstream: HashMap<String, Vec<u8>>,
    /// Stage configuration
    pub config: StageConfig,
}

/// Stage output
pub struct StageOutput {
    /// Output rows in the stage's wire format, ready to publish.
    pub lines: Vec<String>,
    pub metrics: StageMetrics,
}

/// Stage metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageMetrics {
    pub records_read: usize,
    pub records_skipped: usize,
    pub rows_emitted: usize,
    pub duration_ms: u64,
}

/// Stage handler trait (pluggable stages)
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Stage identifier
    fn stage_id(&self) -> StageId;

    /// Execute stage
    async fn execute(&self, input: StageInput, ctx: &mut StageContext) -> Result<StageOutput>;

    /// Output keys this stage reads from its dependencies
    fn required_keys(&self, _ctx: &StageContext) -> Vec<String> {
        vec![]
    }

    /// Key the stage's output is published under
    fn output_key(&self, ctx: &StageContext) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use salestats_core::DEFAULT_TOP_K;

    fn test_context(store: Arc<StageStore>) -> StageContext {
        StageContext {
            job_id: Uuid::new_v4(),
            dataset_id: "bmw".to_string(),
            run_id: "run1".to_string(),
            keys: StageKeys::new("bmw".to_string(), "run1".to_string()),
            store,
            top_k: DEFAULT_TOP_K,
        }
    }

    #[test]
    fn test_stage_config_default() {
        let config = StageConfig::default();
        assert!(config.parallel_workers > 0);
        assert_eq!(config.partition_size, 1024);
    }

    #[test]
    fn test_stage_metrics_default() {
        let metrics = StageMetrics::default();
        assert_eq!(metrics.records_read, 0);
        assert_eq!(metrics.rows_emitted, 0);
    }

    // Mock stage handler for testing
    struct MockStage {
        id: StageId,
    }

    #[async_trait]
    impl StageHandler for MockStage {
        fn stage_id(&self) -> StageId {
            self.id
        }

        async fn execute(&self, input: StageInput, _ctx: &mut StageContext) -> Result<StageOutput> {
            Ok(StageOutput {
                lines: vec!["row".to_string()],
                metrics: StageMetrics {
                    records_read: input.records.len(),
                    records_skipped: 0,
                    rows_emitted: 1,
                    duration_ms: 1,
                },
            })
        }

        fn output_key(&self, ctx: &StageContext) -> String {
            ctx.keys.key_for_stage(self.id)
        }
    }

    #[tokio::test]
    async fn test_mock_stage_execution() {
        let stage = MockStage {
            id: StageId::Aggregate,
        };
        let mut ctx = test_context(Arc::new(StageStore::in_memory()));

        let input = StageInput {
            records: vec!["line".to_string()],
            upstream: HashMap::new(),
            config: StageConfig::default(),
        };

        let output = stage.execute(input, &mut ctx).await.unwrap();

        assert_eq!(output.metrics.records_read, 1);
        assert_eq!(output.lines, vec!["row".to_string()]);
        assert_eq!(stage.output_key(&ctx), "aggregate:bmw:run1");
    }
}
