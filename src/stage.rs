//! Pipeline stages: pull protocol, train sweep, and resampling.

use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, error, info};

use crate::config::{InstanceSelectionConfig, StageConfig};
use crate::data::{Labeled, Payload, Phase, StreamItem};
use crate::errors::PipelineError;
use crate::node::{DataNode, TrainPhase};
use crate::partition::LabeledPartition;
use crate::policy::{SamplingPolicy, SelectionPercentage};
use crate::shuffle::DeterministicShuffler;
use crate::stream::{ReplayableStream, StreamCursor};
use crate::transform::{Identity, Transformer};
use crate::types::{ClassLabel, RunSeed, StageId};

type SharedTransformer<T> = Arc<RwLock<Box<dyn Transformer<T>>>>;

/// Validated instance-selection settings.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceSelection {
    /// Share of each class's training instances kept.
    pub train: SelectionPercentage,
    /// Share of each class's test instances kept.
    pub test: SelectionPercentage,
    /// Only this class is reduced when set.
    pub reduce_class: Option<ClassLabel>,
}

impl InstanceSelection {
    /// Validate `config`; percentages above 100 are clamped.
    pub fn from_config(config: &InstanceSelectionConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            train: SelectionPercentage::new(config.train_percentage_selected)?,
            test: SelectionPercentage::new(config.test_percentage_selected)?,
            reduce_class: config.reduce_class.clone(),
        })
    }

    /// Percentage that applies to `phase`.
    pub fn percentage(&self, phase: Phase) -> SelectionPercentage {
        match phase {
            Phase::Training => self.train,
            Phase::Test => self.test,
        }
    }

    /// Policy for `phase`: single-class reduction while a target class is set
    /// and the percentage is below 100, proportional retention otherwise.
    pub fn policy(&self, phase: Phase) -> SamplingPolicy {
        let percentage = self.percentage(phase);
        match &self.reduce_class {
            Some(label) if !percentage.is_full() => SamplingPolicy::ReduceClass {
                label: label.clone(),
                percentage,
            },
            _ => SamplingPolicy::Proportional(percentage),
        }
    }
}

/// How a stage decides which upstream instances it forwards.
#[derive(Clone, Debug, PartialEq)]
pub enum Resampling {
    /// Forward every upstream instance lazily, in upstream order.
    Passthrough,
    /// Keep a share of every class (or of one target class).
    Select(InstanceSelection),
    /// Trim every class to the size of the smallest one.
    Balance,
}

impl Resampling {
    /// Policy applied to `phase`, or `None` for pass-through.
    pub fn policy(&self, phase: Phase) -> Option<SamplingPolicy> {
        match self {
            Resampling::Passthrough => None,
            Resampling::Select(selection) => Some(selection.policy(phase)),
            Resampling::Balance => Some(SamplingPolicy::Balance),
        }
    }
}

/// Mutable stage state; every field is guarded by the stage lock.
struct StageState<T: Payload> {
    phase: TrainPhase,
    train_sweeps: usize,
    sweep_failure: Option<PipelineError>,
    training_stream: Option<ReplayableStream<T>>,
    test_stream: Option<ReplayableStream<T>>,
}

impl<T: Payload> StageState<T> {
    fn slot(&self, phase: Phase) -> Option<&ReplayableStream<T>> {
        match phase {
            Phase::Training => self.training_stream.as_ref(),
            Phase::Test => self.test_stream.as_ref(),
        }
    }

    fn populate(&mut self, phase: Phase, stream: ReplayableStream<T>) -> &ReplayableStream<T> {
        let slot = match phase {
            Phase::Training => &mut self.training_stream,
            Phase::Test => &mut self.test_stream,
        };
        assert!(slot.is_none(), "{phase} stream slot populated twice");
        slot.insert(stream)
    }
}

/// One link of a chain.
///
/// A stage references exactly one upstream node. On its first training
/// request it runs its train sweep (when its transformer is trainable),
/// pulls upstream training data, resamples it, and memoizes the transformed
/// result; later requests replay that result. Test requests work the same way
/// without the sweep and are only legal once the stage is trained.
pub struct Stage<T: Payload> {
    id: StageId,
    upstream: Option<Arc<dyn DataNode<T>>>,
    transformer: SharedTransformer<T>,
    resampling: Resampling,
    caching: bool,
    run_seed: RunSeed,
    state: Mutex<StageState<T>>,
}

impl<T: Payload> Stage<T> {
    /// Create an unconnected stage.
    pub fn new(
        config: StageConfig,
        transformer: impl Transformer<T> + 'static,
        resampling: Resampling,
    ) -> Self {
        let phase = if transformer.is_trainable() {
            TrainPhase::Untrained
        } else {
            TrainPhase::Trained
        };
        Self {
            id: config.id,
            upstream: None,
            transformer: Arc::new(RwLock::new(Box::new(transformer))),
            resampling,
            caching: config.caching,
            run_seed: config.run_seed,
            state: Mutex::new(StageState {
                phase,
                train_sweeps: 0,
                sweep_failure: None,
                training_stream: None,
                test_stream: None,
            }),
        }
    }

    /// Stage that forwards upstream data through `transformer`.
    pub fn transform(config: StageConfig, transformer: impl Transformer<T> + 'static) -> Self {
        Self::new(config, transformer, Resampling::Passthrough)
    }

    /// Stage that keeps a configured share of each class.
    ///
    /// Percentages above 100 are clamped and reported at error level.
    pub fn instance_selection(
        config: StageConfig,
        selection: &InstanceSelectionConfig,
    ) -> Result<Self, PipelineError> {
        let selection = InstanceSelection::from_config(selection)?;
        for phase in [Phase::Training, Phase::Test] {
            let percentage = selection.percentage(phase);
            if percentage.was_clamped() {
                error!(
                    stage_id = %config.id,
                    phase = %phase,
                    requested = percentage.requested(),
                    "selection percentage reduced to 100"
                );
            }
        }
        Ok(Self::new(config, Identity, Resampling::Select(selection)))
    }

    /// Stage that balances classes down to the smallest one.
    pub fn balancing(config: StageConfig) -> Self {
        Self::new(config, Identity, Resampling::Balance)
    }

    /// Attach the upstream node this stage pulls from.
    pub fn connect(&mut self, upstream: Arc<dyn DataNode<T>>) {
        self.upstream = Some(upstream);
    }

    /// Builder form of [`Stage::connect`].
    pub fn with_upstream(mut self, upstream: Arc<dyn DataNode<T>>) -> Self {
        self.connect(upstream);
        self
    }

    /// Seed used for every shuffle in this run.
    pub fn run_seed(&self) -> RunSeed {
        self.run_seed
    }

    /// Resampling behavior of this stage.
    pub fn resampling(&self) -> &Resampling {
        &self.resampling
    }

    /// Returns `true` when the stage runs a train sweep.
    pub fn is_trainable(&self) -> bool {
        self.transformer
            .read()
            .expect("stage transformer poisoned")
            .is_trainable()
    }

    /// Train sweeps still pending: 1 before training, 0 afterwards. A failed
    /// sweep stays pending for good.
    pub fn remaining_train_phase(&self) -> usize {
        match self.lock_state().phase {
            TrainPhase::Trained => 0,
            TrainPhase::Untrained | TrainPhase::Training | TrainPhase::Failed => 1,
        }
    }

    /// Number of completed train sweeps (never more than one).
    pub fn train_sweep_count(&self) -> usize {
        self.lock_state().train_sweeps
    }

    /// Times the cached `phase` stream started its producer; 0 while the
    /// slot is empty.
    pub fn producer_invocations(&self, phase: Phase) -> usize {
        self.lock_state()
            .slot(phase)
            .map(ReplayableStream::producer_invocations)
            .unwrap_or(0)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, StageState<T>> {
        self.state.lock().expect("stage state poisoned")
    }

    fn upstream(&self) -> &Arc<dyn DataNode<T>> {
        match self.upstream.as_ref() {
            Some(upstream) => upstream,
            None => panic!("stage '{}' has no upstream node", self.id),
        }
    }

    fn request(
        &self,
        phase: Phase,
        use_test_data: bool,
    ) -> Result<StreamCursor<T>, PipelineError> {
        let upstream = Arc::clone(self.upstream());
        debug!(stage_id = %self.id, phase = %phase, "data requested");
        let mut state = self.lock_state();
        if let Some(stream) = state.slot(phase) {
            return Ok(stream.fresh());
        }
        match phase {
            Phase::Training => self.train_sweep(&mut state, upstream.as_ref(), use_test_data)?,
            Phase::Test => assert!(
                state.phase == TrainPhase::Trained,
                "stage '{}' received a test request while {}",
                self.id,
                state.phase
            ),
        }
        debug!(stage_id = %self.id, phase = %phase, "producing data");
        let stream = self.build_stream(upstream, phase, use_test_data)?;
        Ok(state.populate(phase, stream).fresh())
    }

    fn train_sweep(
        &self,
        state: &mut StageState<T>,
        upstream: &dyn DataNode<T>,
        use_test_data: bool,
    ) -> Result<(), PipelineError> {
        if let Some(err) = &state.sweep_failure {
            return Err(err.clone());
        }
        if state.phase != TrainPhase::Untrained {
            return Ok(());
        }
        state.phase = TrainPhase::Training;
        match self.consume_for_training(upstream, use_test_data) {
            Ok(instances) => {
                state.phase = TrainPhase::Trained;
                state.train_sweeps += 1;
                info!(stage_id = %self.id, instances, "train sweep finished");
                Ok(())
            }
            Err(err) => {
                // The transformer may hold partial state; a second sweep
                // would train on top of it.
                error!(stage_id = %self.id, error = %err, "train sweep failed");
                state.phase = TrainPhase::Failed;
                state.sweep_failure = Some(err.clone());
                Err(err)
            }
        }
    }

    fn consume_for_training(
        &self,
        upstream: &dyn DataNode<T>,
        use_test_data: bool,
    ) -> Result<usize, PipelineError> {
        let mut transformer = self.transformer.write().expect("stage transformer poisoned");
        let mut instances = 0;
        for item in upstream.request_training_data(use_test_data)? {
            let sample = item?;
            transformer
                .train(&sample.instance, &sample.label)
                .map_err(|err| err.in_stage(&self.id))?;
            instances += 1;
        }
        if use_test_data {
            for item in upstream.request_test_data()? {
                let sample = item?;
                transformer
                    .train(&sample.instance, &sample.label)
                    .map_err(|err| err.in_stage(&self.id))?;
                instances += 1;
            }
        }
        transformer
            .stop_training()
            .map_err(|err| err.in_stage(&self.id))?;
        Ok(instances)
    }

    fn build_stream(
        &self,
        upstream: Arc<dyn DataNode<T>>,
        phase: Phase,
        use_test_data: bool,
    ) -> Result<ReplayableStream<T>, PipelineError> {
        let transformer = Arc::clone(&self.transformer);
        let stage_id: Arc<str> = Arc::from(self.id.as_str());
        let first = pull(upstream.as_ref(), phase, use_test_data)?;
        let Some(policy) = self.resampling.policy(phase) else {
            // The first replay reuses the cursor pulled above; later replays
            // (only without caching) pull a fresh one.
            let pending = Mutex::new(Some(first));
            return Ok(ReplayableStream::new(
                move || {
                    let taken = pending.lock().expect("pending cursor poisoned").take();
                    let cursor = match taken {
                        Some(cursor) => Ok(cursor),
                        None => pull(upstream.as_ref(), phase, use_test_data),
                    };
                    let transformer = Arc::clone(&transformer);
                    let stage_id = Arc::clone(&stage_id);
                    let items: Box<dyn Iterator<Item = StreamItem<T>> + Send> = match cursor {
                        Ok(cursor) => Box::new(
                            cursor.map(move |item| apply(&stage_id, &transformer, item)),
                        ),
                        Err(err) => Box::new(std::iter::once(Err(err))),
                    };
                    items
                },
                self.caching,
            ));
        };

        let partition = LabeledPartition::from_stream(first)?;
        debug!(
            stage_id = %self.id,
            phase = %phase,
            counts = ?partition.counts(),
            "partitioned upstream instances"
        );
        let mut shuffler = DeterministicShuffler::new(self.run_seed);
        let retained = Arc::new(policy.select(partition, &mut shuffler));
        debug!(
            stage_id = %self.id,
            phase = %phase,
            retained = retained.len(),
            "resampled upstream instances"
        );
        Ok(ReplayableStream::new(
            move || {
                let retained = Arc::clone(&retained);
                let transformer = Arc::clone(&transformer);
                let stage_id = Arc::clone(&stage_id);
                (0..retained.len())
                    .map(move |idx| apply(&stage_id, &transformer, Ok(retained[idx].clone())))
            },
            self.caching,
        ))
    }
}

fn pull<T: Payload>(
    upstream: &dyn DataNode<T>,
    phase: Phase,
    use_test_data: bool,
) -> Result<StreamCursor<T>, PipelineError> {
    match phase {
        Phase::Training => upstream.request_training_data(use_test_data),
        Phase::Test => upstream.request_test_data(),
    }
}

fn apply<T: Payload>(
    stage_id: &str,
    transformer: &SharedTransformer<T>,
    item: StreamItem<T>,
) -> StreamItem<T> {
    let Labeled { instance, label } = item?;
    let transformer = transformer.read().expect("stage transformer poisoned");
    let instance = transformer
        .execute(instance)
        .map_err(|err| err.in_stage(stage_id))?;
    Ok(Labeled { instance, label })
}

impl<T: Payload> DataNode<T> for Stage<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn request_training_data(
        &self,
        use_test_data: bool,
    ) -> Result<StreamCursor<T>, PipelineError> {
        self.request(Phase::Training, use_test_data)
    }

    fn request_test_data(&self) -> Result<StreamCursor<T>, PipelineError> {
        self.request(Phase::Test, false)
    }

    fn train_phase(&self) -> TrainPhase {
        self.lock_state().phase
    }

    fn store_state(&self, result_dir: &Path) -> Result<(), PipelineError> {
        if self.train_phase() != TrainPhase::Trained {
            debug!(stage_id = %self.id, "skipping state storage for untrained stage");
            return Ok(());
        }
        let transformer = self.transformer.read().expect("stage transformer poisoned");
        transformer.store_state(&result_dir.join(&self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Trainable transform that counts the calls it receives.
    #[derive(Default)]
    struct CountingTransform {
        trained: Arc<AtomicUsize>,
        executed: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    impl Transformer<u32> for CountingTransform {
        fn is_trainable(&self) -> bool {
            true
        }

        fn train(&mut self, _instance: &u32, _label: &ClassLabel) -> Result<(), PipelineError> {
            self.trained.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn stop_training(&mut self) -> Result<(), PipelineError> {
            self.stops.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn execute(&self, instance: u32) -> Result<u32, PipelineError> {
            self.executed.fetch_add(1, Ordering::Relaxed);
            Ok(instance + 1000)
        }
    }

    fn source(train: usize, test: usize) -> Arc<dyn DataNode<u32>> {
        let label = |idx: usize| if idx % 3 == 0 { "a" } else { "b" };
        Arc::new(MemorySource::new(
            "source",
            (0..train)
                .map(|idx| Labeled::new(idx as u32, label(idx)))
                .collect(),
            (0..test)
                .map(|idx| Labeled::new(100 + idx as u32, label(idx)))
                .collect(),
        ))
    }

    fn values(cursor: StreamCursor<u32>) -> Vec<u32> {
        cursor.map(|item| item.unwrap().instance).collect()
    }

    #[test]
    fn passthrough_forwards_in_upstream_order() {
        let stage =
            Stage::transform(StageConfig::new("identity"), Identity).with_upstream(source(4, 2));
        assert_eq!(stage.train_phase(), TrainPhase::Trained);
        assert_eq!(values(stage.request_training_data(false).unwrap()), vec![0, 1, 2, 3]);
        assert_eq!(values(stage.request_test_data().unwrap()), vec![100, 101]);
    }

    #[test]
    fn trainable_stage_sweeps_once_and_transforms_lazily() {
        let counter = CountingTransform::default();
        let trained = Arc::clone(&counter.trained);
        let executed = Arc::clone(&counter.executed);
        let stops = Arc::clone(&counter.stops);
        let stage =
            Stage::transform(StageConfig::new("counting"), counter).with_upstream(source(6, 3));

        assert_eq!(stage.train_phase(), TrainPhase::Untrained);
        assert_eq!(stage.remaining_train_phase(), 1);

        let cursor = stage.request_training_data(false).unwrap();
        assert_eq!(stage.train_phase(), TrainPhase::Trained);
        assert_eq!(stage.remaining_train_phase(), 0);
        assert_eq!(trained.load(Ordering::Relaxed), 6);
        assert_eq!(stops.load(Ordering::Relaxed), 1);
        assert_eq!(executed.load(Ordering::Relaxed), 0);

        let first = values(cursor);
        let second = values(stage.request_training_data(false).unwrap());
        assert_eq!(first, vec![1000, 1001, 1002, 1003, 1004, 1005]);
        assert_eq!(first, second);
        assert_eq!(executed.load(Ordering::Relaxed), 6);
        assert_eq!(stage.train_sweep_count(), 1);
        assert_eq!(trained.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn use_test_data_also_trains_on_upstream_test_stream() {
        let counter = CountingTransform::default();
        let trained = Arc::clone(&counter.trained);
        let stage =
            Stage::transform(StageConfig::new("counting"), counter).with_upstream(source(5, 4));
        stage.request_training_data(true).unwrap();
        assert_eq!(trained.load(Ordering::Relaxed), 9);
    }

    #[test]
    #[should_panic(expected = "received a test request while untrained")]
    fn test_request_before_training_is_fatal() {
        let stage = Stage::transform(StageConfig::new("counting"), CountingTransform::default())
            .with_upstream(source(3, 3));
        let _ = stage.request_test_data();
    }

    #[test]
    #[should_panic(expected = "has no upstream node")]
    fn missing_upstream_is_fatal() {
        let stage: Stage<u32> = Stage::balancing(StageConfig::new("orphan"));
        let _ = stage.request_training_data(false);
    }

    #[test]
    fn uncached_stage_recomputes_transform_on_each_replay() {
        let counter = CountingTransform::default();
        let executed = Arc::clone(&counter.executed);
        let config = StageConfig {
            caching: false,
            ..StageConfig::new("counting")
        };
        let stage = Stage::transform(config, counter).with_upstream(source(4, 0));
        let first = values(stage.request_training_data(false).unwrap());
        let second = values(stage.request_training_data(false).unwrap());
        assert_eq!(first, second);
        assert_eq!(executed.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn selection_uses_train_and_test_percentages() {
        let selection = InstanceSelectionConfig {
            train_percentage_selected: 50.0,
            test_percentage_selected: 0.0,
            reduce_class: None,
        };
        let stage = Stage::instance_selection(StageConfig::new("select"), &selection)
            .unwrap()
            .with_upstream(source(12, 6));
        // 12 training instances: 4 of "a", 8 of "b".
        assert_eq!(values(stage.request_training_data(false).unwrap()).len(), 6);
        assert!(values(stage.request_test_data().unwrap()).is_empty());
    }

    #[test]
    fn clamped_selection_keeps_everything() {
        let selection = InstanceSelectionConfig {
            train_percentage_selected: 250.0,
            ..InstanceSelectionConfig::default()
        };
        let stage = Stage::instance_selection(StageConfig::new("select"), &selection)
            .unwrap()
            .with_upstream(source(9, 0));
        let Resampling::Select(resolved) = stage.resampling() else {
            panic!("expected selection resampling");
        };
        assert!(resolved.train.was_clamped());
        assert_eq!(values(stage.request_training_data(false).unwrap()).len(), 9);
    }

    #[test]
    fn negative_selection_is_rejected() {
        let selection = InstanceSelectionConfig {
            test_percentage_selected: -5.0,
            ..InstanceSelectionConfig::default()
        };
        let result = Stage::<u32>::instance_selection(StageConfig::new("select"), &selection);
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn reduce_class_policy_only_below_full_percentage() {
        let selection = InstanceSelection {
            train: SelectionPercentage::new(40.0).unwrap(),
            test: SelectionPercentage::FULL,
            reduce_class: Some("a".into()),
        };
        assert!(matches!(
            selection.policy(Phase::Training),
            SamplingPolicy::ReduceClass { ref label, .. } if label == "a"
        ));
        assert!(matches!(
            selection.policy(Phase::Test),
            SamplingPolicy::Proportional(p) if p.is_full()
        ));
    }

    #[test]
    fn producer_failure_propagates_from_partitioning() {
        let failing = ReplayableStream::new(
            || {
                vec![
                    Ok(Labeled::new(1u32, "a")),
                    Err(PipelineError::Producer {
                        stage_id: "reader".into(),
                        reason: "corrupt row".into(),
                    }),
                ]
            },
            true,
        );
        let upstream: Arc<dyn DataNode<u32>> = Arc::new(MemorySource::from_streams(
            "reader",
            failing,
            ReplayableStream::from_samples(Vec::new(), true),
        ));
        let stage = Stage::balancing(StageConfig::new("balance")).with_upstream(upstream);
        let err = stage.request_training_data(false).err().unwrap();
        assert!(matches!(err, PipelineError::Producer { .. }));
    }

    #[test]
    fn failed_sweep_is_terminal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let producer_calls = Arc::clone(&calls);
        let flaky = ReplayableStream::new(
            move || {
                let mut items = vec![Ok(Labeled::new(2u32, "a"))];
                if producer_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    items.push(Err(PipelineError::Producer {
                        stage_id: "flaky".into(),
                        reason: "connection reset".into(),
                    }));
                } else {
                    items.push(Ok(Labeled::new(4u32, "a")));
                }
                items
            },
            false,
        );
        let upstream: Arc<dyn DataNode<u32>> = Arc::new(MemorySource::from_streams(
            "flaky",
            flaky,
            ReplayableStream::from_samples(vec![Labeled::new(3u32, "a")], false),
        ));
        let counter = CountingTransform::default();
        let trained = Arc::clone(&counter.trained);
        let stops = Arc::clone(&counter.stops);
        let stage = Stage::transform(StageConfig::new("counting"), counter).with_upstream(upstream);

        let first = stage.request_training_data(false).err().unwrap();
        assert_eq!(stage.train_phase(), TrainPhase::Failed);
        assert_eq!(trained.load(Ordering::SeqCst), 1);

        let second = stage.request_training_data(false).err().unwrap();
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(trained.load(Ordering::SeqCst), 1);
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        assert_eq!(stage.train_sweep_count(), 0);
        assert_eq!(stage.remaining_train_phase(), 1);
    }
}
