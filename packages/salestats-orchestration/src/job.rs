use crate::error::{ErrorCategory, PipelineError, Result};
use chrono::{DateTime, Utc};
use salestats_core::DEFAULT_TOP_K;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageId {
    /// Stage 1: (region, model) aggregation
    Aggregate,
    /// Stage 2: per-region volume totals
    Rollup,
    /// Stage 3: join, enrich and rank top-K per region
    TopK,
}

impl StageId {
    /// Every stage, in pipeline order.
    pub const ALL: [StageId; 3] = [StageId::Aggregate, StageId::Rollup, StageId::TopK];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Aggregate => "aggregate",
            StageId::Rollup => "rollup",
            StageId::TopK => "topk",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "aggregate" => Ok(StageId::Aggregate),
            "rollup" => Ok(StageId::Rollup),
            "topk" => Ok(StageId::TopK),
            _ => Err(PipelineError::parse(format!("Invalid stage ID: {}", s))),
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job state enum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobState {
    Queued {
        queued_at: DateTime<Utc>,
        priority: i32,
    },
    Running {
        started_at: DateTime<Utc>,
        worker_id: String,
        current_stage: StageId,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
        records_processed: usize,
    },
    Failed {
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        error: String,
        error_category: ErrorCategory,
        failed_stage: StageId,
        retry_count: u32,
        next_retry_at: Option<DateTime<Utc>>,
    },
    Cancelled {
        cancelled_at: DateTime<Utc>,
        reason: String,
    },
}

impl JobState {
    pub fn state_name(&self) -> &'static str {
        match self {
            JobState::Queued { .. } => "queued",
            JobState::Running { .. } => "running",
            JobState::Completed { .. } => "completed",
            JobState::Failed { .. } => "failed",
            JobState::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed { .. } | JobState::Failed { .. } | JobState::Cancelled { .. }
        )
    }
}

/// One pipeline run over one dataset.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub dataset_id: String,
    pub run_id: String,
    /// Rows emitted per region by the final stage; `<= 0` means none.
    pub top_k: i32,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new queued job with the default top-K.
    pub fn new_queued(dataset_id: String, run_id: String, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            dataset_id,
            run_id,
            top_k: DEFAULT_TOP_K,
            state: JobState::Queued {
                queued_at: now,
                priority,
            },
            created_at: now,
            updated_at: now,
        }
    }

    /// Override the number of rows kept per region.
    pub fn with_top_k(mut self, top_k: i32) -> Self {
        self.top_k = top_k;
        self
    }
}

/// Job state machine for transitions
pub struct JobStateMachine {
    job: Job,
}

impl JobStateMachine {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_job(self) -> Job {
        self.job
    }

    /// Transition: QUEUED → RUNNING
    pub fn start(&mut self, worker_id: String, current_stage: StageId) -> Result<()> {
        match &self.job.state {
            JobState::Queued { .. } => {
                let now = Utc::now();
                self.job.state = JobState::Running {
                    started_at: now,
                    worker_id,
                    current_stage,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(PipelineError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "running".to_string(),
            }),
        }
    }

    /// Transition: RUNNING → COMPLETED
    pub fn complete(&mut self, records_processed: usize) -> Result<()> {
        match &self.job.state {
            JobState::Running { started_at, .. } => {
                let now = Utc::now();
                let duration_ms = (now - *started_at).num_milliseconds() as u64;

                self.job.state = JobState::Completed {
                    started_at: *started_at,
                    completed_at: now,
                    duration_ms,
                    records_processed,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(PipelineError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "completed".to_string(),
            }),
        }
    }

    /// Transition: RUNNING → FAILED
    pub fn fail(
        &mut self,
        error: String,
        error_category: ErrorCategory,
        failed_stage: StageId,
        retry_count: u32,
    ) -> Result<()> {
        match &self.job.state {
            JobState::Running { started_at, .. } | JobState::Failed { started_at, .. } => {
                let now = Utc::now();

                // Exponential backoff (2s, 4s, 8s) for transient failures only
                let next_retry_at = if retry_count < 3 && error_category == ErrorCategory::Transient
                {
                    let backoff_secs = 2u64.pow(retry_count);
                    Some(now + chrono::Duration::seconds(backoff_secs as i64))
                } else {
                    None
                };

                self.job.state = JobState::Failed {
                    started_at: *started_at,
                    failed_at: now,
                    error,
                    error_category,
                    failed_stage,
                    retry_count,
                    next_retry_at,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(PipelineError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "failed".to_string(),
            }),
        }
    }

    /// Transition: FAILED → QUEUED (retry)
    pub fn retry(&mut self) -> Result<()> {
        match &self.job.state {
            JobState::Failed {
                retry_count,
                next_retry_at,
                ..
            } => {
                if next_retry_at.is_none() {
                    return Err(PipelineError::Config(
                        "No retry scheduled (max retries exceeded)".to_string(),
                    ));
                }

                let now = Utc::now();
                self.job.state = JobState::Queued {
                    queued_at: now,
                    priority: *retry_count as i32, // Higher priority for retries
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(PipelineError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "queued (retry)".to_string(),
            }),
        }
    }

    /// Transition: * → CANCELLED
    pub fn cancel(&mut self, reason: String) -> Result<()> {
        if self.job.state.is_terminal() {
            return Err(PipelineError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "cancelled".to_string(),
            });
        }

        let now = Utc::now();
        self.job.state = JobState::Cancelled {
            cancelled_at: now,
            reason,
        };
        self.job.updated_at = now;
        Ok(())
    }

    /// Update current stage (for running jobs)
    pub fn update_stage(&mut self, stage: StageId) -> Result<()> {
        match &mut self.job.state {
            JobState::Running { current_stage, .. } => {
                *current_stage = stage;
                self.job.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(PipelineError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "update_stage".to_string(),
            }),
        }
    }
}
