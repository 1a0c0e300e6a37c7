// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Prerequisite ordering of data types.
//!
//! Types are grouped into levels with Kahn's algorithm: every prerequisite of
//! a type sits in an earlier level, so a level can run concurrently once the
//! previous one has completed.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::data_type::DataType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    #[error("prerequisite cycle between {0:?}")]
    Cycle(Vec<DataType>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    levels: Vec<Vec<DataType>>,
}

impl DependencyGraph {
    /// Order `types` by their descriptors' prerequisites.
    pub fn new(types: impl IntoIterator<Item = DataType>) -> Result<Self, DependencyError> {
        Self::with_prerequisites(types, |dt| dt.descriptor().prerequisites)
    }

    /// Order `types` by an arbitrary prerequisite table. Prerequisites outside
    /// `types` don't constrain the order.
    pub fn with_prerequisites<F>(
        types: impl IntoIterator<Item = DataType>,
        prerequisites: F,
    ) -> Result<Self, DependencyError>
    where
        F: Fn(DataType) -> &'static [DataType],
    {
        let nodes: BTreeSet<DataType> = types.into_iter().collect();
        let mut in_degree: BTreeMap<DataType, usize> = nodes.iter().map(|&dt| (dt, 0)).collect();
        let mut dependents: BTreeMap<DataType, Vec<DataType>> = BTreeMap::new();

        for &dt in &nodes {
            let mut seen = BTreeSet::new();
            for &pre in prerequisites(dt) {
                if pre == dt {
                    return Err(DependencyError::Cycle(vec![dt]));
                }
                if nodes.contains(&pre) && seen.insert(pre) {
                    dependents.entry(pre).or_default().push(dt);
                    *in_degree.entry(dt).or_default() += 1;
                }
            }
        }

        let mut levels = Vec::new();
        let mut ready: Vec<DataType> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(&dt, _)| dt)
            .collect();
        let mut placed = 0;

        while !ready.is_empty() {
            let mut next = BTreeSet::new();
            for dt in &ready {
                for dependent in dependents.get(dt).map(Vec::as_slice).unwrap_or_default() {
                    if let Some(d) = in_degree.get_mut(dependent) {
                        *d -= 1;
                        if *d == 0 {
                            next.insert(*dependent);
                        }
                    }
                }
            }
            placed += ready.len();
            levels.push(std::mem::replace(&mut ready, next.into_iter().collect()));
        }

        if placed < nodes.len() {
            let stuck = in_degree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(dt, _)| dt)
                .collect();
            return Err(DependencyError::Cycle(stuck));
        }

        Ok(Self { levels })
    }

    /// Levels in execution order; types within a level are sorted.
    #[must_use]
    pub fn levels(&self) -> &[Vec<DataType>] {
        &self.levels
    }

    /// Every type in execution order.
    pub fn iter(&self) -> impl Iterator<Item = DataType> + '_ {
        self.levels.iter().flatten().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}
