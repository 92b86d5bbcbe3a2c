//! Per-instance transforms applied by stages.
//!
//! A stage hands every retained instance to its [`Transformer`] on the way
//! downstream. Trainable transformers additionally see every upstream
//! training instance once, during the stage's train sweep.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::constants::persistence::{CENTERING_STATE_FILENAME, CENTERING_STATE_VERSION};
use crate::errors::PipelineError;
use crate::types::ClassLabel;

/// Transform applied by a stage to every instance it emits.
pub trait Transformer<T>: Send + Sync {
    /// Returns `true` when the owning stage must run a train sweep.
    fn is_trainable(&self) -> bool {
        false
    }

    /// Update learned state with one training instance.
    fn train(&mut self, _instance: &T, _label: &ClassLabel) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Finalize learned state after the last training instance.
    fn stop_training(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Transform one instance.
    fn execute(&self, instance: T) -> Result<T, PipelineError>;

    /// Write learned state into `stage_dir`. Defaults to storing nothing.
    fn store_state(&self, _stage_dir: &Path) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Forwards instances unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl<T> Transformer<T> for Identity {
    fn execute(&self, instance: T) -> Result<T, PipelineError> {
        Ok(instance)
    }
}

/// Stateless transform backed by a closure.
pub struct MapTransform<F> {
    map: F,
}

impl<F> MapTransform<F> {
    /// Wrap `map`.
    pub fn new(map: F) -> Self {
        Self { map }
    }
}

impl<T, F> Transformer<T> for MapTransform<F>
where
    F: Fn(T) -> T + Send + Sync,
{
    fn execute(&self, instance: T) -> Result<T, PipelineError> {
        Ok((self.map)(instance))
    }
}

/// Stored form of a trained [`MeanCentering`].
#[derive(Clone, Debug, Serialize, Deserialize)]
struct CenteringState {
    version: u8,
    mean: Vec<f64>,
    retained: Option<usize>,
    samples: u64,
    stored_at: DateTime<Utc>,
}

/// Learns the per-feature mean of `Vec<f64>` instances and subtracts it.
///
/// Optionally keeps only the first `retained` centered features. A centering
/// loaded from disk is already trained and skips the train sweep.
#[derive(Clone, Debug)]
pub struct MeanCentering {
    retained: Option<usize>,
    sums: Vec<f64>,
    samples: u64,
    mean: Option<Vec<f64>>,
    trainable: bool,
}

impl MeanCentering {
    /// Untrained centering; `retained` caps the emitted feature count.
    pub fn new(retained: Option<usize>) -> Self {
        Self {
            retained,
            sums: Vec::new(),
            samples: 0,
            mean: None,
            trainable: true,
        }
    }

    /// Load a centering previously written by [`Transformer::store_state`].
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let bytes = fs::read(path)?;
        let state: CenteringState = serde_json::from_slice(&bytes)?;
        if state.version != CENTERING_STATE_VERSION {
            return Err(PipelineError::Persistence(format!(
                "centering state version {} is not supported",
                state.version
            )));
        }
        Ok(Self {
            retained: state.retained,
            sums: Vec::new(),
            samples: state.samples,
            mean: Some(state.mean),
            trainable: false,
        })
    }

    /// Learned mean, once training finished.
    pub fn mean(&self) -> Option<&[f64]> {
        self.mean.as_deref()
    }

    fn failure(reason: String) -> PipelineError {
        PipelineError::Transform {
            stage_id: "mean_centering".into(),
            reason,
        }
    }
}

impl Transformer<Vec<f64>> for MeanCentering {
    fn is_trainable(&self) -> bool {
        self.trainable
    }

    fn train(&mut self, instance: &Vec<f64>, _label: &ClassLabel) -> Result<(), PipelineError> {
        if self.samples == 0 {
            self.sums = vec![0.0; instance.len()];
        } else if instance.len() != self.sums.len() {
            return Err(Self::failure(format!(
                "expected {} features, got {}",
                self.sums.len(),
                instance.len()
            )));
        }
        for (sum, value) in self.sums.iter_mut().zip(instance) {
            *sum += value;
        }
        self.samples += 1;
        Ok(())
    }

    fn stop_training(&mut self) -> Result<(), PipelineError> {
        if self.samples == 0 {
            return Err(Self::failure("no training instances observed".into()));
        }
        let count = self.samples as f64;
        self.mean = Some(self.sums.iter().map(|sum| sum / count).collect());
        Ok(())
    }

    fn execute(&self, instance: Vec<f64>) -> Result<Vec<f64>, PipelineError> {
        let mean = self
            .mean
            .as_ref()
            .ok_or_else(|| Self::failure("executed before training finished".into()))?;
        if instance.len() != mean.len() {
            return Err(Self::failure(format!(
                "expected {} features, got {}",
                mean.len(),
                instance.len()
            )));
        }
        let keep = self.retained.unwrap_or(mean.len()).min(mean.len());
        Ok(instance
            .iter()
            .zip(mean)
            .take(keep)
            .map(|(value, avg)| value - avg)
            .collect())
    }

    fn store_state(&self, stage_dir: &Path) -> Result<(), PipelineError> {
        let Some(mean) = self.mean.as_ref() else {
            return Ok(());
        };
        fs::create_dir_all(stage_dir)?;
        let state = CenteringState {
            version: CENTERING_STATE_VERSION,
            mean: mean.clone(),
            retained: self.retained,
            samples: self.samples,
            stored_at: Utc::now(),
        };
        let path = stage_dir.join(CENTERING_STATE_FILENAME);
        fs::write(&path, serde_json::to_vec_pretty(&state)?)?;
        info!(path = %path.display(), features = mean.len(), "stored centering state");
        Ok(())
    }
}
