//! Stratified K-fold splitter.

use crate::types::{DatasetError, DatasetResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Train/validation indices of one fold. Both lists are sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSplit {
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
}

/// K-fold splitter that keeps each class's share roughly equal across folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StratifiedKFold {
    pub n_splits: usize,
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for StratifiedKFold {
    fn default() -> Self {
        Self {
            n_splits: 5,
            shuffle: true,
            seed: 42,
        }
    }
}

impl StratifiedKFold {
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn without_shuffle(mut self) -> Self {
        self.shuffle = false;
        self
    }

    fn check_units(&self, units: usize) -> DatasetResult<()> {
        if self.n_splits < 2 || self.n_splits > units {
            return Err(DatasetError::FoldCount {
                samples: units,
                folds: self.n_splits,
            });
        }
        Ok(())
    }

    /// Deal the members of every stratum round-robin over the folds.
    ///
    /// The start fold of each stratum continues where the previous one stopped, so
    /// fold sizes never differ by more than one unit.
    fn deal(&self, strata: BTreeMap<u8, Vec<usize>>) -> Vec<Vec<usize>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut folds = vec![Vec::new(); self.n_splits];
        let mut cursor = 0usize;
        for (_, mut members) in strata {
            if self.shuffle {
                members.shuffle(&mut rng);
            }
            for unit in members {
                folds[cursor % self.n_splits].push(unit);
                cursor += 1;
            }
        }
        folds
    }

    fn materialize(n: usize, valid_sets: Vec<Vec<usize>>) -> Vec<FoldSplit> {
        valid_sets
            .into_iter()
            .map(|mut valid| {
                valid.sort_unstable();
                let mut in_valid = vec![false; n];
                for &i in &valid {
                    in_valid[i] = true;
                }
                let train = (0..n).filter(|&i| !in_valid[i]).collect();
                FoldSplit { train, valid }
            })
            .collect()
    }

    /// Split sample indices `0..labels.len()` stratified by `labels`.
    pub fn split(&self, labels: &[u8]) -> DatasetResult<Vec<FoldSplit>> {
        self.check_units(labels.len())?;
        let mut strata: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
        for (i, &label) in labels.iter().enumerate() {
            strata.entry(label).or_default().push(i);
        }
        let folds = self.deal(strata);
        Ok(Self::materialize(labels.len(), folds))
    }

    /// Split so that all samples sharing a group id land in the same validation set.
    ///
    /// Groups are stratified by the label of their first sample.
    pub fn split_grouped(&self, labels: &[u8], groups: &[usize]) -> DatasetResult<Vec<FoldSplit>> {
        if labels.len() != groups.len() {
            return Err(DatasetError::Other(format!(
                "{} labels for {} group ids",
                labels.len(),
                groups.len()
            )));
        }
        let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, &g) in groups.iter().enumerate() {
            members.entry(g).or_default().push(i);
        }
        self.check_units(members.len())?;
        let mut strata: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
        for (&group, idxs) in &members {
            strata.entry(labels[idxs[0]]).or_default().push(group);
        }
        let folds = self
            .deal(strata)
            .into_iter()
            .map(|groups_in_fold| {
                groups_in_fold
                    .iter()
                    .flat_map(|g| members.get(g).into_iter().flatten().copied())
                    .collect()
            })
            .collect();
        Ok(Self::materialize(labels.len(), folds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_sizes_differ_by_at_most_one() {
        let labels: Vec<u8> = (0..23).map(|i| (i % 4) as u8).collect();
        let folds = StratifiedKFold::default().split(&labels).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|f| f.valid.len()).collect();
        let min = sizes.iter().min().copied().unwrap();
        let max = sizes.iter().max().copied().unwrap();
        assert!(max - min <= 1, "sizes {sizes:?}");
    }

    #[test]
    fn each_class_spreads_over_folds() {
        // 10 samples per class, 5 folds: exactly 2 of each class per fold.
        let labels: Vec<u8> = (0..30).map(|i| (i / 10) as u8).collect();
        let folds = StratifiedKFold::default().split(&labels).unwrap();
        for fold in &folds {
            for class in 0..3u8 {
                let n = fold.valid.iter().filter(|&&i| labels[i] == class).count();
                assert_eq!(n, 2);
            }
        }
    }

    #[test]
    fn too_many_folds_is_an_error() {
        let err = StratifiedKFold::new(5).split(&[0, 1, 2]).unwrap_err();
        assert!(matches!(err, DatasetError::FoldCount { samples: 3, folds: 5 }));
        assert!(StratifiedKFold::new(1).split(&[0, 1, 2]).is_err());
    }

    #[test]
    fn unshuffled_split_is_index_ordered() {
        let folds = StratifiedKFold::new(2)
            .without_shuffle()
            .split(&[0, 0, 0, 0])
            .unwrap();
        assert_eq!(folds[0].valid, vec![0, 2]);
        assert_eq!(folds[0].train, vec![1, 3]);
        assert_eq!(folds[1].valid, vec![1, 3]);
    }
}
