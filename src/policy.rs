//! Class-aware retention policies.
//!
//! Every policy shuffles each label group with one shared
//! [`DeterministicShuffler`] (groups visited in sorted label order) and keeps
//! a prefix of the shuffled group. Policies differ only in how long that
//! prefix is.

use serde::{Deserialize, Serialize};

use crate::constants::selection::FULL_PERCENTAGE;
use crate::data::Labeled;
use crate::errors::PipelineError;
use crate::partition::LabeledPartition;
use crate::shuffle::DeterministicShuffler;
use crate::types::ClassLabel;

/// A validated retention percentage in `0..=100`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionPercentage {
    value: f64,
    requested: f64,
}

impl SelectionPercentage {
    /// Retain every instance.
    pub const FULL: Self = Self {
        value: FULL_PERCENTAGE,
        requested: FULL_PERCENTAGE,
    };

    /// Validate `requested`, clamping values above 100.
    ///
    /// Negative and non-finite values are configuration errors. Callers can
    /// detect the clamp through [`SelectionPercentage::was_clamped`].
    pub fn new(requested: f64) -> Result<Self, PipelineError> {
        if !requested.is_finite() || requested < 0.0 {
            return Err(PipelineError::Configuration(format!(
                "selection percentage must be a finite value in 0..=100, got {requested}"
            )));
        }
        Ok(Self {
            value: requested.min(FULL_PERCENTAGE),
            requested,
        })
    }

    /// Effective percentage after clamping.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Percentage as configured.
    pub fn requested(&self) -> f64 {
        self.requested
    }

    /// Returns `true` when the configured value exceeded 100.
    pub fn was_clamped(&self) -> bool {
        self.requested > self.value
    }

    /// Returns `true` when every instance is kept.
    pub fn is_full(&self) -> bool {
        self.value >= FULL_PERCENTAGE
    }

    /// Instances kept out of `count`: `round(count * value / 100)`, ties
    /// rounded away from zero, never more than `count`.
    pub fn retained_count(&self, count: usize) -> usize {
        let scaled = (count as f64 * self.value / FULL_PERCENTAGE).round();
        (scaled as usize).min(count)
    }
}

impl Default for SelectionPercentage {
    fn default() -> Self {
        Self::FULL
    }
}

/// How a resampling stage decides which instances of each class survive.
#[derive(Clone, Debug, PartialEq)]
pub enum SamplingPolicy {
    /// Keep the same share of every class, preserving the class ratio.
    Proportional(SelectionPercentage),
    /// Keep every class in full except `label`, which is reduced to
    /// `percentage`. Deliberately changes the class ratio.
    ReduceClass {
        /// The only class that is subsampled.
        label: ClassLabel,
        /// Share of `label` that is kept.
        percentage: SelectionPercentage,
    },
    /// Keep as many instances of every class as the smallest class has.
    Balance,
}

impl SamplingPolicy {
    /// Number of instances kept from a group of `count` instances of `label`.
    ///
    /// `smallest_group` is only consulted by [`SamplingPolicy::Balance`].
    pub fn quota(&self, label: &str, count: usize, smallest_group: usize) -> usize {
        match self {
            SamplingPolicy::Proportional(percentage) => percentage.retained_count(count),
            SamplingPolicy::ReduceClass {
                label: target,
                percentage,
            } => {
                if target == label {
                    percentage.retained_count(count)
                } else {
                    count
                }
            }
            SamplingPolicy::Balance => smallest_group.min(count),
        }
    }

    /// Apply the policy to `partition`.
    ///
    /// Each group is shuffled (even groups kept in full, so the shuffler
    /// stream advances identically regardless of the quotas) and truncated to
    /// its quota. The retained instances are returned group after group in
    /// label order, each group in shuffled order.
    pub fn select<T>(
        &self,
        partition: LabeledPartition<T>,
        shuffler: &mut DeterministicShuffler,
    ) -> Vec<Labeled<T>> {
        let smallest_group = partition.min_group_len().unwrap_or(0);
        let mut retained = Vec::new();
        for (label, mut instances) in partition.into_groups() {
            shuffler.shuffle(&mut instances);
            let keep = self.quota(&label, instances.len(), smallest_group);
            instances.truncate(keep);
            retained.extend(instances.into_iter().map(|instance| Labeled {
                instance,
                label: label.clone(),
            }));
        }
        retained
    }
}
