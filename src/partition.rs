use std::collections::BTreeMap;

use crate::data::{Labeled, StreamItem};
use crate::errors::PipelineError;
use crate::types::ClassLabel;

/// Instances grouped by class label.
///
/// Groups keep first-seen order and are iterated in sorted label order, which
/// fixes the order in which a shuffler consumes its stream. Every scanned
/// instance lands in exactly one group.
#[derive(Clone, Debug)]
pub struct LabeledPartition<T> {
    groups: BTreeMap<ClassLabel, Vec<T>>,
    total: usize,
}

impl<T> Default for LabeledPartition<T> {
    fn default() -> Self {
        Self {
            groups: BTreeMap::new(),
            total: 0,
        }
    }
}

impl<T> LabeledPartition<T> {
    /// Create an empty partition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain `items` into a partition, stopping at the first failure.
    pub fn from_stream<I>(items: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = StreamItem<T>>,
    {
        let mut partition = Self::new();
        for item in items {
            let Labeled { instance, label } = item?;
            partition.push(label, instance);
        }
        Ok(partition)
    }

    /// Append `instance` to its label's group, opening the group on first sight.
    pub fn push(&mut self, label: ClassLabel, instance: T) {
        self.groups.entry(label).or_default().push(instance);
        self.total += 1;
    }

    /// Total instances across all groups.
    pub fn len(&self) -> usize {
        self.total
    }

    /// Returns `true` when no instance was scanned.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Number of distinct labels.
    pub fn label_count(&self) -> usize {
        self.groups.len()
    }

    /// Instances of `label` in first-seen order.
    pub fn group(&self, label: &str) -> Option<&[T]> {
        self.groups.get(label).map(Vec::as_slice)
    }

    /// Per-label instance counts in label order.
    pub fn counts(&self) -> BTreeMap<ClassLabel, usize> {
        self.groups
            .iter()
            .map(|(label, instances)| (label.clone(), instances.len()))
            .collect()
    }

    /// Size of the smallest group, or `None` for an empty partition.
    pub fn min_group_len(&self) -> Option<usize> {
        self.groups.values().map(Vec::len).min()
    }

    /// Iterate groups in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&ClassLabel, &[T])> {
        self.groups
            .iter()
            .map(|(label, instances)| (label, instances.as_slice()))
    }

    /// Consume the partition into its groups, in label order.
    pub fn into_groups(self) -> impl Iterator<Item = (ClassLabel, Vec<T>)> {
        self.groups.into_iter()
    }
}

impl<T> FromIterator<Labeled<T>> for LabeledPartition<T> {
    fn from_iter<I: IntoIterator<Item = Labeled<T>>>(iter: I) -> Self {
        let mut partition = Self::new();
        for Labeled { instance, label } in iter {
            partition.push(label, instance);
        }
        partition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_by_label_preserving_first_seen_order() {
        let partition: LabeledPartition<u32> = [
            Labeled::new(1, "b"),
            Labeled::new(2, "a"),
            Labeled::new(3, "b"),
            Labeled::new(4, "a"),
            Labeled::new(5, "c"),
        ]
        .into_iter()
        .collect();

        assert_eq!(partition.len(), 5);
        assert_eq!(partition.label_count(), 3);
        assert_eq!(partition.group("a"), Some(&[2, 4][..]));
        assert_eq!(partition.group("b"), Some(&[1, 3][..]));
        assert_eq!(partition.min_group_len(), Some(1));

        let labels: Vec<&str> = partition.iter().map(|(label, _)| label.as_str()).collect();
        assert_eq!(labels, ["a", "b", "c"]);
        let total: usize = partition.counts().values().sum();
        assert_eq!(total, partition.len());
    }

    #[test]
    fn from_stream_surfaces_the_first_failure() {
        let items: Vec<StreamItem<u32>> = vec![
            Ok(Labeled::new(1, "a")),
            Err(PipelineError::Producer {
                stage_id: "upstream".into(),
                reason: "disk vanished".into(),
            }),
            Ok(Labeled::new(2, "a")),
        ];
        let err = LabeledPartition::from_stream(items).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Producer { ref reason, .. } if reason == "disk vanished"
        ));
    }

    #[test]
    fn empty_partition_has_no_minimum() {
        let partition = LabeledPartition::<u8>::new();
        assert!(partition.is_empty());
        assert_eq!(partition.min_group_len(), None);
        assert_eq!(partition.into_groups().count(), 0);
    }
}
