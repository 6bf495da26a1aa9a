//! The stage registry and its adjacency maps.
//!
//! The graph is built incrementally: a stage can only depend on ports of
//! stages that already exist, and its own key is not registered until the
//! whole addition has been validated. Acyclicity therefore holds by
//! construction, and a failed addition leaves the graph exactly as it was.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::engine::{Key, Stage};
use crate::error::Error;

/// Registry plus forward and reverse adjacency, keyed by stage key.
///
/// The four maps always share exactly the same key set, and for every key
/// `k` and every `u` in `upstream[k]`, `k` appears in `downstream[u]` (and
/// the reverse), with multiplicity preserved.
pub(crate) struct Graph {
    stages: HashMap<Key, Arc<dyn Stage>>,
    upstream: HashMap<Key, Vec<Key>>,
    downstream: HashMap<Key, Vec<Key>>,
    in_degree: HashMap<Key, usize>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            stages: HashMap::new(),
            upstream: HashMap::new(),
            downstream: HashMap::new(),
            in_degree: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.stages.keys()
    }

    pub fn stage(&self, key: &Key) -> Option<&Arc<dyn Stage>> {
        self.stages.get(key)
    }

    pub fn upstream_of(&self, key: &Key) -> &[Key] {
        self.upstream.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn downstream_of(&self, key: &Key) -> &[Key] {
        self.downstream.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn in_degree_of(&self, key: &Key) -> usize {
        self.in_degree.get(key).copied().unwrap_or(0)
    }

    /// Registers a stage, wiring forward and reverse edges.
    ///
    /// Validation happens before any mutation, so an error leaves all four
    /// maps untouched.
    pub fn insert(&mut self, stage: Arc<dyn Stage>) -> Result<(), Error> {
        let key = stage.key().clone();

        if self.stages.contains_key(&key) {
            return Err(Error::StageAlreadyExists(key));
        }

        let upstream = stage.upstream();
        for dep in &upstream {
            if !self.stages.contains_key(dep) {
                return Err(Error::UnknownStage(dep.clone()));
            }
        }

        self.in_degree.insert(key.clone(), upstream.len());
        self.downstream.insert(key.clone(), Vec::new());

        for dep in &upstream {
            // Validated above, the entry exists.
            self.downstream.get_mut(dep).unwrap().push(key.clone());
        }

        self.upstream.insert(key.clone(), upstream);
        self.stages.insert(key, stage);

        Ok(())
    }

    /// The set of stages transitively required to compute `target`,
    /// inclusive, found by breadth-first traversal of the upstream edges.
    pub fn closure(&self, target: &Key) -> Result<HashSet<Key>, Error> {
        let mut members = HashSet::new();
        let mut frontier = VecDeque::new();

        members.insert(target.clone());
        frontier.push_back(target.clone());

        while let Some(curr) = frontier.pop_front() {
            let upstream = self
                .upstream
                .get(&curr)
                .ok_or_else(|| Error::UnknownStage(curr.clone()))?;

            for dep in upstream {
                if members.insert(dep.clone()) {
                    frontier.push_back(dep.clone());
                }
            }
        }

        Ok(members)
    }
}
