//! The contract every link of a chain offers to its downstream neighbor.
//!
//! Ownership model:
//! - A chain owns its nodes top to bottom through `Arc`s.
//! - A stage only references its upstream (`Arc<dyn DataNode<T>>`); several
//!   downstream consumers may share one upstream node.
//! - Requests recurse upstream to the source; each node wraps its output in
//!   its own replayable stream on the way back down.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::Payload;
use crate::errors::PipelineError;
use crate::stream::StreamCursor;

/// Training-phase state of a node.
///
/// Non-trainable nodes start (and stay) `Trained`. Trainable nodes start
/// `Untrained`, pass through `Training` during their single train sweep, and
/// end `Trained`, or `Failed` when the sweep returned an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrainPhase {
    /// The train sweep has not run yet.
    Untrained,
    /// The train sweep is consuming upstream training data.
    Training,
    /// Training finished; test data may be requested.
    Trained,
    /// The train sweep failed. The sweep is never re-run; the run has to be
    /// restarted with a fresh chain.
    Failed,
}

impl fmt::Display for TrainPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainPhase::Untrained => f.write_str("untrained"),
            TrainPhase::Training => f.write_str("training"),
            TrainPhase::Trained => f.write_str("trained"),
            TrainPhase::Failed => f.write_str("failed"),
        }
    }
}

/// Pull interface between adjacent nodes of a chain.
///
/// Both requests are idempotent: the first call computes the node's output
/// once and every call returns a fresh cursor over that same output.
pub trait DataNode<T: Payload>: Send + Sync {
    /// Stable node identifier used in logs and persistence paths.
    fn id(&self) -> &str;

    /// Fresh cursor over this node's training output.
    ///
    /// The first call runs the node's train sweep if it is trainable. With
    /// `use_test_data` the sweep also trains on upstream test data.
    fn request_training_data(&self, use_test_data: bool)
    -> Result<StreamCursor<T>, PipelineError>;

    /// Fresh cursor over this node's test output.
    ///
    /// # Panics
    ///
    /// Implementations panic when called before their train sweep finished;
    /// continuing would hand out data from an undertrained node.
    fn request_test_data(&self) -> Result<StreamCursor<T>, PipelineError>;

    /// Current training-phase state.
    fn train_phase(&self) -> TrainPhase {
        TrainPhase::Trained
    }

    /// Best-effort dump of learned state below `result_dir`.
    fn store_state(&self, _result_dir: &Path) -> Result<(), PipelineError> {
        Ok(())
    }
}
