//! Linear chain composition from a source to a tail stage.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::info;

use crate::constants::stage::DEFAULT_SOURCE_ID;
use crate::data::{Labeled, Payload};
use crate::errors::PipelineError;
use crate::node::{DataNode, TrainPhase};
use crate::source::MemorySource;
use crate::stage::Stage;
use crate::stream::StreamCursor;
use crate::types::StageId;

/// Ordered, id-addressable path of nodes.
///
/// The chain owns its nodes; each pushed stage is connected to the node that
/// was the tail before it, so the references always form a path back to the
/// source.
pub struct Chain<T: Payload> {
    nodes: IndexMap<StageId, Arc<dyn DataNode<T>>>,
}

impl<T: Payload> Chain<T> {
    /// Start a chain at `source`.
    pub fn new(source: impl DataNode<T> + 'static) -> Self {
        let source: Arc<dyn DataNode<T>> = Arc::new(source);
        let mut nodes = IndexMap::new();
        nodes.insert(source.id().to_string(), source);
        Self { nodes }
    }

    /// Start a chain at an in-memory source named
    /// [`DEFAULT_SOURCE_ID`].
    pub fn from_samples(training: Vec<Labeled<T>>, test: Vec<Labeled<T>>) -> Self {
        Self::new(MemorySource::new(DEFAULT_SOURCE_ID, training, test))
    }

    /// Append `stage` below the current tail.
    ///
    /// Returns a handle to the connected stage; fails when the id is taken.
    pub fn push(&mut self, mut stage: Stage<T>) -> Result<Arc<Stage<T>>, PipelineError> {
        let id = stage.id().to_string();
        if self.nodes.contains_key(&id) {
            return Err(PipelineError::Configuration(format!(
                "duplicate stage id '{id}'"
            )));
        }
        stage.connect(Arc::clone(self.tail()));
        let stage = Arc::new(stage);
        self.nodes
            .insert(id, Arc::clone(&stage) as Arc<dyn DataNode<T>>);
        Ok(stage)
    }

    /// Builder form of [`Chain::push`].
    pub fn then(mut self, stage: Stage<T>) -> Result<Self, PipelineError> {
        self.push(stage)?;
        Ok(self)
    }

    /// The last node; requests made here recurse to the source.
    pub fn tail(&self) -> &Arc<dyn DataNode<T>> {
        match self.nodes.last() {
            Some((_, node)) => node,
            None => unreachable!("a chain always holds its source"),
        }
    }

    /// Node registered under `id`.
    pub fn get(&self, id: &str) -> Option<&Arc<dyn DataNode<T>>> {
        self.nodes.get(id)
    }

    /// Node ids from source to tail.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Number of nodes, source included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: the source is never removed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns `true` once every node finished training.
    pub fn is_trained(&self) -> bool {
        self.nodes
            .values()
            .all(|node| node.train_phase() == TrainPhase::Trained)
    }

    /// Drain the tail's training output; returns the instance count.
    ///
    /// This drives every train sweep in the chain.
    pub fn train(&self, use_test_data: bool) -> Result<usize, PipelineError> {
        let count = drain(self.tail().request_training_data(use_test_data)?)?;
        info!(tail = self.tail().id(), instances = count, "chain training pass finished");
        Ok(count)
    }

    /// Drain the tail's test output; returns the instance count.
    ///
    /// # Panics
    ///
    /// Panics when a trainable stage has not run its train sweep yet, e.g.
    /// when [`Chain::train`] was never called.
    pub fn test(&self) -> Result<usize, PipelineError> {
        let count = drain(self.tail().request_test_data()?)?;
        info!(tail = self.tail().id(), instances = count, "chain test pass finished");
        Ok(count)
    }

    /// Ask every node to write its learned state below `result_dir`.
    pub fn store_state(&self, result_dir: &Path) -> Result<(), PipelineError> {
        for node in self.nodes.values() {
            node.store_state(result_dir)?;
        }
        info!(dir = %result_dir.display(), nodes = self.nodes.len(), "stored chain state");
        Ok(())
    }
}

fn drain<T: Payload>(cursor: StreamCursor<T>) -> Result<usize, PipelineError> {
    let mut count = 0;
    for item in cursor {
        item?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageConfig;
    use crate::transform::MapTransform;

    fn source() -> MemorySource<i64> {
        MemorySource::new(
            "source",
            (0..6).map(|idx| Labeled::new(idx, "x")).collect(),
            (0..2).map(|idx| Labeled::new(idx, "y")).collect(),
        )
    }

    #[test]
    fn pushed_stages_connect_to_previous_tail() {
        let mut chain = Chain::new(source());
        chain
            .push(Stage::transform(
                StageConfig::new("negate"),
                MapTransform::new(|value: i64| -value),
            ))
            .unwrap();
        chain
            .push(Stage::transform(
                StageConfig::new("shift"),
                MapTransform::new(|value: i64| value + 10),
            ))
            .unwrap();

        assert_eq!(chain.ids().collect::<Vec<_>>(), vec!["source", "negate", "shift"]);
        assert_eq!(chain.tail().id(), "shift");
        let values: Vec<i64> = chain
            .tail()
            .request_training_data(false)
            .unwrap()
            .map(|item| item.unwrap().instance)
            .collect();
        assert_eq!(values, vec![10, 9, 8, 7, 6, 5]);
        assert_eq!(chain.train(false).unwrap(), 6);
        assert_eq!(chain.test().unwrap(), 2);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let chain = Chain::new(source())
            .then(Stage::balancing(StageConfig::new("balance")))
            .unwrap();
        let err = chain
            .then(Stage::balancing(StageConfig::new("balance")))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn source_id_cannot_be_reused() {
        let mut chain = Chain::from_samples(vec![Labeled::new(1u8, "a")], Vec::new());
        assert!(chain.push(Stage::balancing(StageConfig::new("source"))).is_err());
        assert_eq!(chain.len(), 1);
        assert!(!chain.is_empty());
    }
}
