use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("DAG cycle detected")]
    DagCycleDetected,

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Stage execution failed: {0}")]
    StageExecutionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }
}

/// Error category for retry logic at the substrate level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Transient error - retry automatically (e.g., timeout, unavailable input)
    Transient,
    /// Permanent error - don't retry (e.g., invalid configuration)
    Permanent,
    /// Infrastructure error - alert ops (e.g., OOM, disk full)
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(PipelineError::parse(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
