use thiserror::Error;

/// Cycle-level failures of the rating and prediction pipeline.
///
/// Row-level problems (ambiguous joins, missing features, teams without form)
/// are not errors: the affected rows are dropped or defaulted and counted in
/// the stage reports.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("data source {source_name} unavailable: {message}")]
    SourceUnavailable { source_name: String, message: String },

    #[error("not enough training data: {samples} usable matchups")]
    InsufficientTrainingData { samples: usize },

    #[error("model fit failed: {0}")]
    ModelFit(String),
}

impl PipelineError {
    pub fn source_unavailable(source_name: &str, message: impl ToString) -> Self {
        PipelineError::SourceUnavailable {
            source_name: source_name.to_string(),
            message: message.to_string(),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
