#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Linear chain composition and whole-chain passes.
pub mod chain;
/// Phase-tagged terminal sink.
pub mod collector;
/// Stage, selection, run, and collector configuration.
pub mod config;
/// Centralized constants used by stages, selection, and persistence.
pub mod constants;
/// Labeled instances, phases, and phase tags.
pub mod data;
/// Class imbalance metrics.
pub mod metrics;
/// The pull contract between adjacent nodes.
pub mod node;
/// Class-grouped views over a materialized stream.
pub mod partition;
/// Retention percentages and class-stratified sampling policies.
pub mod policy;
/// Seeded, platform-independent shuffling.
pub mod shuffle;
/// In-memory chain sources.
pub mod source;
/// Pipeline stages and resampling.
pub mod stage;
/// Memoized, replayable streams and their cursors.
pub mod stream;
/// Per-instance transforms and their training lifecycle.
pub mod transform;
/// Shared type aliases.
pub mod types;

mod errors;

pub use chain::Chain;
pub use collector::{ClassCollector, Collected};
pub use config::{CollectorConfig, InstanceSelectionConfig, RunConfig, StageConfig};
pub use data::{Labeled, Payload, Phase, PhaseTagged, StreamItem};
pub use errors::PipelineError;
pub use metrics::{ClassShare, ClassSkew, class_skew};
pub use node::{DataNode, TrainPhase};
pub use partition::LabeledPartition;
pub use policy::{SamplingPolicy, SelectionPercentage};
pub use shuffle::DeterministicShuffler;
pub use source::MemorySource;
pub use stage::{InstanceSelection, Resampling, Stage};
pub use stream::{ReplayableStream, StreamCursor};
pub use transform::{Identity, MapTransform, MeanCentering, Transformer};
pub use types::{ClassLabel, RunSeed, StageId};
