use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

pub use crate::types::ClassLabel;

/// Bounds every instance payload must satisfy to travel through a chain.
///
/// Payloads are cloned out of cached streams and may be consumed on other
/// threads, so they must be `Clone + Send + Sync`.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Payload for T {}

/// One instance plus its class label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Labeled<T> {
    /// Opaque payload; only transforms look inside it.
    pub instance: T,
    /// Class the instance belongs to.
    pub label: ClassLabel,
}

impl<T> Labeled<T> {
    /// Pair `instance` with `label`.
    pub fn new(instance: T, label: impl Into<ClassLabel>) -> Self {
        Self {
            instance,
            label: label.into(),
        }
    }
}

/// Item yielded by every stream cursor.
pub type StreamItem<T> = Result<Labeled<T>, PipelineError>;

/// Which side of the train/test protocol a request belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    /// Data used to train downstream stages.
    Training,
    /// Held-out data, only available once training finished.
    Test,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Training => f.write_str("training"),
            Phase::Test => f.write_str("test"),
        }
    }
}

/// A labeled instance tagged with whether it arrived as training data.
///
/// Sinks that treat training and test data differently carry this tag next
/// to the instance instead of mutating the payload, and drop it with
/// [`PhaseTagged::into_labeled`] once it is no longer needed.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseTagged<T> {
    /// The instance and its label.
    pub sample: Labeled<T>,
    /// `true` when the instance came from a training request.
    pub training: bool,
}

impl<T> PhaseTagged<T> {
    /// Tag `sample` with the phase it was requested for.
    pub fn new(sample: Labeled<T>, phase: Phase) -> Self {
        Self {
            sample,
            training: phase == Phase::Training,
        }
    }

    /// Phase this instance was requested for.
    pub fn phase(&self) -> Phase {
        if self.training {
            Phase::Training
        } else {
            Phase::Test
        }
    }

    /// Drop the tag, keeping the instance and its label.
    pub fn into_labeled(self) -> Labeled<T> {
        self.sample
    }
}
