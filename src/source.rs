use crate::data::{Labeled, Payload};
use crate::errors::PipelineError;
use crate::node::DataNode;
use crate::stream::{ReplayableStream, StreamCursor};
use crate::types::StageId;

/// Chain source serving fixed training and test samples.
///
/// Always `Trained`; both streams are built once and replayed in the order
/// the samples were given.
pub struct MemorySource<T: Payload> {
    id: StageId,
    training: ReplayableStream<T>,
    test: ReplayableStream<T>,
}

impl<T: Payload> MemorySource<T> {
    /// Create a source from prebuilt training and test samples.
    pub fn new(
        id: impl Into<StageId>,
        training: Vec<Labeled<T>>,
        test: Vec<Labeled<T>>,
    ) -> Self {
        Self {
            id: id.into(),
            training: ReplayableStream::from_samples(training, false),
            test: ReplayableStream::from_samples(test, false),
        }
    }

    /// Create a source whose streams come from arbitrary (possibly failing)
    /// producers, e.g. a reader that parses files lazily.
    pub fn from_streams(
        id: impl Into<StageId>,
        training: ReplayableStream<T>,
        test: ReplayableStream<T>,
    ) -> Self {
        Self {
            id: id.into(),
            training,
            test,
        }
    }
}

impl<T: Payload> DataNode<T> for MemorySource<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn request_training_data(
        &self,
        _use_test_data: bool,
    ) -> Result<StreamCursor<T>, PipelineError> {
        Ok(self.training.fresh())
    }

    fn request_test_data(&self) -> Result<StreamCursor<T>, PipelineError> {
        Ok(self.test.fresh())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TrainPhase;

    #[test]
    fn serves_training_and_test_samples_repeatedly() {
        let source = MemorySource::new(
            "source",
            vec![Labeled::new(1u8, "a"), Labeled::new(2u8, "b")],
            vec![Labeled::new(9u8, "a")],
        );
        assert_eq!(source.train_phase(), TrainPhase::Trained);
        for _ in 0..2 {
            let training: Vec<u8> = source
                .request_training_data(false)
                .unwrap()
                .map(|item| item.unwrap().instance)
                .collect();
            assert_eq!(training, vec![1, 2]);
        }
        let test: Vec<u8> = source
            .request_test_data()
            .unwrap()
            .map(|item| item.unwrap().instance)
            .collect();
        assert_eq!(test, vec![9]);
    }
}
