use std::collections::BTreeMap;

use crate::types::ClassLabel;

/// Imbalance summary of per-class instance counts.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassSkew {
    /// Instances across every class.
    pub total: usize,
    /// Size of the smallest class.
    pub min: usize,
    /// Size of the largest class.
    pub max: usize,
    /// `max / min`; infinite when some class has no instances.
    pub ratio: f64,
    /// Largest class first, ties broken by label.
    pub per_class: Vec<ClassShare>,
}

impl ClassSkew {
    /// Returns `true` when every class holds the same number of instances.
    pub fn is_balanced(&self) -> bool {
        self.min == self.max
    }

    /// Number of classes observed.
    pub fn classes(&self) -> usize {
        self.per_class.len()
    }
}

/// One class's share of a stream.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassShare {
    pub label: ClassLabel,
    pub count: usize,
    pub share: f64,
}

/// Summarize per-class counts, or `None` when no class was observed.
pub fn class_skew(counts: &BTreeMap<ClassLabel, usize>) -> Option<ClassSkew> {
    let total: usize = counts.values().sum();
    let mut per_class: Vec<ClassShare> = counts
        .iter()
        .map(|(label, &count)| ClassShare {
            label: label.clone(),
            count,
            share: if total == 0 {
                0.0
            } else {
                count as f64 / total as f64
            },
        })
        .collect();
    // Stable sort keeps BTreeMap label order among equal counts.
    per_class.sort_by(|a, b| b.count.cmp(&a.count));

    let max = per_class.first()?.count;
    let min = per_class.last()?.count;
    let ratio = match min {
        0 => f64::INFINITY,
        _ => max as f64 / min as f64,
    };
    Some(ClassSkew {
        total,
        min,
        max,
        ratio,
        per_class,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, usize)]) -> BTreeMap<ClassLabel, usize> {
        pairs
            .iter()
            .map(|(label, count)| (label.to_string(), *count))
            .collect()
    }

    #[test]
    fn empty_counts_have_no_skew() {
        assert!(class_skew(&BTreeMap::new()).is_none());
    }

    #[test]
    fn skew_reports_shares_and_ratio() {
        let skew = class_skew(&counts(&[("a", 5), ("b", 2), ("c", 9)])).unwrap();
        assert_eq!(skew.total, 16);
        assert_eq!(skew.classes(), 3);
        assert_eq!((skew.min, skew.max), (2, 9));
        assert!((skew.ratio - 4.5).abs() < 1e-12);
        assert!((skew.per_class[0].share - 9.0 / 16.0).abs() < 1e-12);
        assert!(!skew.is_balanced());
        let order: Vec<&str> = skew.per_class.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn ties_sort_by_label_and_count_as_balanced() {
        let skew = class_skew(&counts(&[("b", 3), ("a", 3)])).unwrap();
        assert!(skew.is_balanced());
        assert_eq!(skew.per_class[0].label, "a");
        assert_eq!(skew.ratio, 1.0);
    }

    #[test]
    fn empty_class_makes_ratio_infinite() {
        let skew = class_skew(&counts(&[("a", 0), ("b", 4)])).unwrap();
        assert!(skew.ratio.is_infinite());
        assert_eq!(skew.per_class[1].share, 0.0);
    }
}
