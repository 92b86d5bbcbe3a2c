use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::types::StageId;

/// Error type for producer, transform, configuration, and persistence failures.
///
/// Cloneable so a failure cached inside a replayable stream is observed
/// identically by every cursor that reaches it.
#[derive(Clone, Debug, Error)]
pub enum PipelineError {
    #[error("producer for stage '{stage_id}' failed: {reason}")]
    Producer { stage_id: StageId, reason: String },
    #[error("transform in stage '{stage_id}' failed: {reason}")]
    Transform { stage_id: StageId, reason: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error(transparent)]
    Io(Arc<io::Error>),
}

impl From<io::Error> for PipelineError {
    fn from(err: io::Error) -> Self {
        PipelineError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Persistence(err.to_string())
    }
}

impl PipelineError {
    /// Attribute a transform failure to the stage that ran the transform.
    pub fn in_stage(self, stage: &str) -> Self {
        match self {
            PipelineError::Transform { reason, .. } => PipelineError::Transform {
                stage_id: stage.to_string(),
                reason,
            },
            other => other,
        }
    }
}
