use serde::{Deserialize, Serialize};

use crate::constants::selection::{DEFAULT_TEST_PERCENTAGE, DEFAULT_TRAIN_PERCENTAGE};
use crate::constants::stage::{DEFAULT_CACHING, DEFAULT_RUN_NUMBER};
use crate::data::Phase;
use crate::types::{ClassLabel, RunSeed, StageId};

/// Per-stage construction settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique id of the stage within its chain.
    pub id: StageId,
    /// Memoize the stage's output streams so replays never recompute.
    ///
    /// When disabled, every replay re-runs the stage's producer (and pulls a
    /// fresh cursor from upstream), trading recomputation for memory.
    pub caching: bool,
    /// Seed for every shuffle this stage performs during the current run.
    pub run_seed: RunSeed,
}

impl StageConfig {
    /// Create a caching stage config with the default run seed.
    pub fn new(id: impl Into<StageId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            id: StageId::new(),
            caching: DEFAULT_CACHING,
            run_seed: DEFAULT_RUN_NUMBER,
        }
    }
}

/// Retention settings for an instance-selection stage.
///
/// Percentages are validated when the stage is built: values above 100 are
/// clamped (and reported at error level), negative or non-finite values are
/// rejected.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceSelectionConfig {
    /// Percentage of each class's training instances forwarded downstream.
    pub train_percentage_selected: f64,
    /// Percentage of each class's test instances forwarded downstream.
    pub test_percentage_selected: f64,
    /// Reduce only this class; every other class is forwarded in full.
    ///
    /// Only takes effect while the relevant percentage is below 100.
    pub reduce_class: Option<ClassLabel>,
}

impl Default for InstanceSelectionConfig {
    fn default() -> Self {
        Self {
            train_percentage_selected: DEFAULT_TRAIN_PERCENTAGE,
            test_percentage_selected: DEFAULT_TEST_PERCENTAGE,
            reduce_class: None,
        }
    }
}

/// Options for a [`ClassCollector`](crate::collector::ClassCollector) sink.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Keep only instances of this class.
    pub limit_to_class: Option<ClassLabel>,
    /// Skip the training request.
    pub skip_training: bool,
    /// Skip the test request.
    pub skip_test: bool,
}

impl CollectorConfig {
    /// Returns `true` when the collector pulls data for `phase`.
    pub fn requests(&self, phase: Phase) -> bool {
        match phase {
            Phase::Training => !self.skip_training,
            Phase::Test => !self.skip_test,
        }
    }

    /// Returns `true` when instances labeled `label` are kept.
    pub fn accepts(&self, label: &str) -> bool {
        self.limit_to_class
            .as_deref()
            .is_none_or(|limit| limit == label)
    }
}

/// Settings shared by every stage of one chain execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Index of this run; doubles as the run seed so runs differ from one
    /// another while each stays reproducible.
    pub run_number: u64,
    /// Caching default handed to every stage of the run.
    pub caching: bool,
}

impl RunConfig {
    /// Seed used by every stage in this run.
    pub fn run_seed(&self) -> RunSeed {
        self.run_number
    }

    /// Stage config for `id` carrying this run's seed and caching default.
    pub fn stage(&self, id: impl Into<StageId>) -> StageConfig {
        StageConfig {
            id: id.into(),
            caching: self.caching,
            run_seed: self.run_seed(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_number: DEFAULT_RUN_NUMBER,
            caching: DEFAULT_CACHING,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_config_stamps_seed_into_every_stage() {
        let run = RunConfig {
            run_number: 7,
            caching: false,
        };
        let first = run.stage("selection");
        let second = run.stage("balance");
        assert_eq!(first.run_seed, 7);
        assert_eq!(second.run_seed, 7);
        assert!(!first.caching);
        assert_eq!(second.id, "balance");
    }

    #[test]
    fn selection_config_defaults_keep_everything() {
        let config: InstanceSelectionConfig =
            serde_json::from_str(r#"{"reduce_class":"Standard"}"#).unwrap();
        assert_eq!(config.train_percentage_selected, 100.0);
        assert_eq!(config.test_percentage_selected, 100.0);
        assert_eq!(config.reduce_class.as_deref(), Some("Standard"));
    }

    #[test]
    fn collector_config_filters_by_class_and_phase() {
        let config: CollectorConfig =
            serde_json::from_str(r#"{"limit_to_class":"Target","skip_test":true}"#).unwrap();
        assert!(config.requests(Phase::Training));
        assert!(!config.requests(Phase::Test));
        assert!(config.accepts("Target"));
        assert!(!config.accepts("Standard"));
        assert!(CollectorConfig::default().accepts("anything"));
    }
}
