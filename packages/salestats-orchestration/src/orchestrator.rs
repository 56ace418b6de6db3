use crate::dag::{PipelineDAG, StageKeys, StageNode};
use crate::error::{ErrorCategory, PipelineError, Result};
use crate::job::{Job, JobState, JobStateMachine, StageId};
use crate::pipeline::{StageConfig, StageContext, StageHandler, StageInput, StageMetrics, StageOutput};
use crate::stages::{AggregateStage, RollupStage, TopKStage};
use crate::store::{encode_lines, StageStore};
use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Pipeline result (aggregated metrics from all stages)
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub records_read: usize,
    pub records_skipped: usize,
    pub rows_emitted: usize,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn merge_metrics(&mut self, metrics: &StageMetrics) {
        self.records_read += metrics.records_read;
        self.records_skipped += metrics.records_skipped;
        self.rows_emitted += metrics.rows_emitted;
        self.duration_ms += metrics.duration_ms;
    }
}

/// Runs the stage DAG phase by phase against a stage store.
///
/// A phase starts only after every stage of every earlier phase has
/// published its full output — that is the barrier the stage contracts
/// rely on. A failing stage halts the pipeline with a stage-identifying
/// error; outputs published by completed stages are left in the store
/// for diagnosis.
pub struct PipelineOrchestrator {
    dag: Arc<PipelineDAG>,
    store: Arc<StageStore>,
    stage_handlers: HashMap<StageId, Arc<dyn StageHandler>>,
    worker_id: String,
}

impl PipelineOrchestrator {
    /// Create a new orchestrator over the default sales pipeline DAG.
    pub fn new(store: Arc<StageStore>) -> Result<Self> {
        let dag = PipelineDAG::sales_pipeline()?;

        Ok(Self {
            dag: Arc::new(dag),
            store,
            stage_handlers: HashMap::new(),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        })
    }

    /// Create with custom DAG
    pub fn with_dag(dag: PipelineDAG, store: Arc<StageStore>) -> Self {
        Self {
            dag: Arc::new(dag),
            store,
            stage_handlers: HashMap::new(),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }

    /// Orchestrator with the three sales stages already registered.
    pub fn with_sales_stages(store: Arc<StageStore>) -> Result<Self> {
        let mut orchestrator = Self::new(store)?;
        orchestrator.register_handler(Arc::new(AggregateStage));
        orchestrator.register_handler(Arc::new(RollupStage));
        orchestrator.register_handler(Arc::new(TopKStage));
        Ok(orchestrator)
    }

    /// Register a stage handler
    pub fn register_handler(&mut self, handler: Arc<dyn StageHandler>) {
        self.stage_handlers.insert(handler.stage_id(), handler);
    }

    /// Execute a job against a raw dataset file (main entry point).
    pub async fn execute_job(
        &self,
        mut job: Job,
        dataset_path: PathBuf,
    ) -> Result<(Job, PipelineResult)> {
        let job_id = job.id;
        let start_time = Instant::now();

        info!(
            "Starting job {} for dataset {} (run: {}, top_k: {})",
            job_id, job.dataset_id, job.run_id, job.top_k
        );
        info!("Execution plan:\n{}", self.dag.execution_plan());

        // Transition: QUEUED → RUNNING
        let mut state_machine = JobStateMachine::new(job);
        state_machine.start(self.worker_id.clone(), StageId::Aggregate)?;
        job = state_machine.into_job();

        let keys = StageKeys::new(job.dataset_id.clone(), job.run_id.clone());

        // Stages already published under these keys (for resume)
        let completed = self.store.completed_stages(&keys).await?;
        if !completed.is_empty() {
            info!(
                "Resuming - {} stages already published: {:?}",
                completed.len(),
                completed
            );
        }

        let result = self.run_dag(&job, &keys, &completed, &dataset_path).await;
        let elapsed = start_time.elapsed();

        match result {
            Ok(mut pipeline_result) => {
                pipeline_result.duration_ms = elapsed.as_millis() as u64;

                info!(
                    "Job {} completed - read {} records ({} skipped), emitted {} rows in {}ms",
                    job_id,
                    pipeline_result.records_read,
                    pipeline_result.records_skipped,
                    pipeline_result.rows_emitted,
                    pipeline_result.duration_ms
                );

                let mut sm = JobStateMachine::new(job);
                sm.complete(pipeline_result.records_read)?;
                Ok((sm.into_job(), pipeline_result))
            }
            Err((failed_stage, e)) => {
                error!("Job {} failed at stage {}: {}", job_id, failed_stage, e);

                // Convert to anyhow::Error for classification
                let anyhow_err: anyhow::Error = e.into();
                let error_category = self.classify_error(&anyhow_err);

                let mut sm = JobStateMachine::new(job);
                let retry_count = match &sm.job().state {
                    JobState::Failed { retry_count, .. } => *retry_count + 1,
                    _ => 0,
                };

                sm.fail(
                    anyhow_err.to_string(),
                    error_category,
                    failed_stage,
                    retry_count,
                )?;
                let failed_job = sm.into_job();

                // Outputs of completed stages stay in the store for diagnosis
                let empty_result = PipelineResult {
                    duration_ms: elapsed.as_millis() as u64,
                    ..Default::default()
                };

                Ok((failed_job, empty_result))
            }
        }
    }

    /// Execute DAG phases in order; each phase is a barrier.
    async fn run_dag(
        &self,
        job: &Job,
        keys: &StageKeys,
        completed: &HashSet<StageId>,
        dataset_path: &Path,
    ) -> std::result::Result<PipelineResult, (StageId, PipelineError)> {
        let records =
            Self::read_dataset(dataset_path).map_err(|e| (StageId::Aggregate, e))?;
        info!("Job {}: {} raw dataset lines", job.id, records.len());

        let mut overall_result = PipelineResult::default();

        for (phase_idx, parallel_group) in self.dag.execution_order().iter().enumerate() {
            // Skip stages already published (resume)
            let to_execute: Vec<StageId> = parallel_group
                .iter()
                .filter(|id| !completed.contains(id))
                .copied()
                .collect();

            if to_execute.is_empty() {
                info!(
                    "Job {}: Phase {} already published, skipping",
                    job.id,
                    phase_idx + 1
                );
                continue;
            }

            info!(
                "Job {}: Phase {} - {} stage{}",
                job.id,
                phase_idx + 1,
                to_execute.len(),
                if to_execute.len() > 1 { "s (parallel)" } else { "" }
            );

            let mut tasks = Vec::new();
            for stage_id in &to_execute {
                let stage = self.dag.get_stage(*stage_id).ok_or_else(|| {
                    (*stage_id, PipelineError::StageNotFound(stage_id.to_string()))
                })?;

                let handler = self
                    .stage_handlers
                    .get(stage_id)
                    .ok_or_else(|| {
                        (
                            *stage_id,
                            PipelineError::Config(format!(
                                "No handler registered for stage {}",
                                stage_id
                            )),
                        )
                    })?
                    .clone();

                let ctx = StageContext {
                    job_id: job.id,
                    dataset_id: job.dataset_id.clone(),
                    run_id: job.run_id.clone(),
                    keys: keys.clone(),
                    store: self.store.clone(),
                    top_k: job.top_k,
                };
                let stage_node = stage.clone();
                let stage_records = records.clone();

                tasks.push(tokio::spawn(async move {
                    Self::execute_stage(handler, stage_node, ctx, stage_records).await
                }));
            }

            // Barrier: the next phase starts only after every stage of this
            // phase has finished and published.
            let results = futures::future::join_all(tasks).await;

            for (i, task_result) in results.into_iter().enumerate() {
                let stage_id = to_execute[i];

                match task_result {
                    Ok(Ok(output)) => {
                        let key = keys.key_for_stage(stage_id);
                        let data = encode_lines(&output.lines);
                        self.store
                            .publish(&key, &data)
                            .await
                            .map_err(|e| (stage_id, e))?;

                        overall_result.merge_metrics(&output.metrics);

                        info!(
                            "Job {}: Stage {} published {} rows ({} bytes) in {}ms",
                            job.id,
                            stage_id,
                            output.metrics.rows_emitted,
                            data.len(),
                            output.metrics.duration_ms
                        );
                    }
                    Ok(Err(e)) => {
                        error!("Job {}: Stage {} failed: {}", job.id, stage_id, e);
                        return Err((stage_id, e));
                    }
                    Err(join_err) => {
                        error!("Job {}: Stage {} panicked: {}", job.id, stage_id, join_err);
                        return Err((
                            stage_id,
                            PipelineError::StageExecutionFailed(format!(
                                "Stage {} panicked: {}",
                                stage_id, join_err
                            )),
                        ));
                    }
                }
            }
        }

        Ok(overall_result)
    }

    /// Execute a single stage
    async fn execute_stage(
        handler: Arc<dyn StageHandler>,
        stage_node: StageNode,
        mut ctx: StageContext,
        records: Vec<String>,
    ) -> Result<StageOutput> {
        info!("Executing stage: {} ({})", stage_node.name, stage_node.id);

        // Load dependency outputs published by earlier phases
        let mut upstream = HashMap::new();
        for dep_id in &stage_node.dependencies {
            let key = ctx.keys.key_for_stage(*dep_id);
            match ctx.store.fetch(&key).await? {
                Some(data) => {
                    info!("Loaded {} output ({} bytes)", dep_id, data.len());
                    upstream.insert(key, data);
                }
                None => {
                    return Err(PipelineError::MissingDependency(format!(
                        "Output of stage {} not published: {}",
                        dep_id, key
                    )));
                }
            }
        }

        let input = StageInput {
            records,
            upstream,
            config: StageConfig::default(),
        };

        // Execute with timeout
        let timeout = tokio::time::Duration::from_millis(stage_node.timeout_ms);
        let result = tokio::time::timeout(timeout, handler.execute(input, &mut ctx)).await;

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PipelineError::Timeout(format!(
                "Stage {} timed out after {}ms",
                stage_node.id, stage_node.timeout_ms
            ))),
        }
    }

    /// Read the raw dataset, one entry per line.
    fn read_dataset(path: &Path) -> Result<Vec<String>> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let lines = reader.lines().collect::<std::io::Result<Vec<String>>>()?;
        Ok(lines)
    }

    /// Classify error for retry logic
    fn classify_error(&self, error: &anyhow::Error) -> ErrorCategory {
        let error_str = error.to_string().to_lowercase();

        if error_str.contains("timed out") || error_str.contains("timeout") {
            ErrorCategory::Transient
        } else if error_str.contains("no space") || error_str.contains("out of memory") {
            ErrorCategory::Infrastructure
        } else if error_str.contains("configuration") || error_str.contains("invalid") {
            ErrorCategory::Permanent
        } else {
            ErrorCategory::Transient // Default to retry
        }
    }
}
