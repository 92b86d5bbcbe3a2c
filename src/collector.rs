//! Terminal sink that gathers phase-tagged instances from a chain tail.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::CollectorConfig;
use crate::data::{Labeled, Payload, Phase, PhaseTagged};
use crate::errors::PipelineError;
use crate::metrics::{ClassSkew, class_skew};
use crate::node::DataNode;
use crate::types::ClassLabel;

/// Instances gathered by a [`ClassCollector`], in arrival order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Collected<T> {
    /// Training instances first, then test instances.
    pub entries: Vec<PhaseTagged<T>>,
    /// Instance count per phase and label.
    pub counts: BTreeMap<(Phase, ClassLabel), usize>,
}

impl<T> Collected<T> {
    fn push(&mut self, tagged: PhaseTagged<T>) {
        *self
            .counts
            .entry((tagged.phase(), tagged.sample.label.clone()))
            .or_default() += 1;
        self.entries.push(tagged);
    }

    /// Number of gathered instances.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing was gathered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Per-label counts for one phase.
    pub fn class_counts(&self, phase: Phase) -> BTreeMap<ClassLabel, usize> {
        self.counts
            .iter()
            .filter(|((entry_phase, _), _)| *entry_phase == phase)
            .map(|((_, label), count)| (label.clone(), *count))
            .collect()
    }

    /// Class imbalance of one phase, if anything was gathered for it.
    pub fn skew(&self, phase: Phase) -> Option<ClassSkew> {
        class_skew(&self.class_counts(phase))
    }

    /// Instances gathered for `phase`.
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &Labeled<T>> {
        self.entries
            .iter()
            .filter(move |tagged| tagged.phase() == phase)
            .map(|tagged| &tagged.sample)
    }

    /// Drop every phase tag.
    pub fn into_labeled(self) -> Vec<Labeled<T>> {
        self.entries
            .into_iter()
            .map(PhaseTagged::into_labeled)
            .collect()
    }
}

/// Sink that drains the training and test output of one node.
#[derive(Clone, Debug, Default)]
pub struct ClassCollector {
    config: CollectorConfig,
}

impl ClassCollector {
    /// Create a collector with `config`.
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// Options in effect.
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Pull training data (when requested) and then test data (when
    /// requested) from `node`, tagging each instance with its phase.
    ///
    /// The training request always runs before the test request, so a
    /// trainable upstream finishes its train sweep first.
    pub fn collect<T: Payload>(
        &self,
        node: &dyn DataNode<T>,
        use_test_data: bool,
    ) -> Result<Collected<T>, PipelineError> {
        let mut collected = Collected {
            entries: Vec::new(),
            counts: BTreeMap::new(),
        };
        for phase in [Phase::Training, Phase::Test] {
            if !self.config.requests(phase) {
                continue;
            }
            let cursor = match phase {
                Phase::Training => node.request_training_data(use_test_data)?,
                Phase::Test => node.request_test_data()?,
            };
            for item in cursor {
                let sample = item?;
                if self.config.accepts(&sample.label) {
                    collected.push(PhaseTagged::new(sample, phase));
                }
            }
        }
        debug!(node_id = node.id(), instances = collected.len(), "collected instances");
        Ok(collected)
    }
}
