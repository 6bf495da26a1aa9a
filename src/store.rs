use std::collections::HashMap;
use std::sync::Mutex;

use crate::engine::{Dynamic, Key, reify};
use crate::error::Error;

/// The per-run mapping from stage key to its erased output.
///
/// Writes occur only from the producing stage, and reads only from its
/// downstream consumers, which the scheduler guarantees run afterwards. A
/// single mutex around reads and writes is enough; contention is bounded by
/// the worker count and most time is spent in user computations anyway.
pub(crate) struct ResultStore {
    values: Mutex<HashMap<Key, Dynamic>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
        }
    }

    /// Drops every value from the previous run.
    pub fn clear(&self) {
        self.values.lock().unwrap().clear();
    }

    pub fn publish(&self, key: Key, value: Dynamic) {
        self.values.lock().unwrap().insert(key, value);
    }

    /// Fetches the erased value produced under `key`.
    pub fn raw(&self, key: &Key) -> Result<Dynamic, Error> {
        self.values
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::UnknownStage(key.clone()))
    }

    /// Fetches several erased values under one lock acquisition, in order.
    pub fn raw_many(&self, keys: &[Key]) -> Result<Vec<Dynamic>, Error> {
        let values = self.values.lock().unwrap();

        keys.iter()
            .map(|key| {
                values
                    .get(key)
                    .cloned()
                    .ok_or_else(|| Error::UnknownStage(key.clone()))
            })
            .collect()
    }

    /// Reads the entry under `key` and reifies it to `T`, leaving the
    /// store unchanged.
    pub fn peek<T>(&self, key: &Key) -> Result<T, Error>
    where
        T: Clone + Send + Sync + 'static,
    {
        let value = self
            .values
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::UnknownStage(key.clone()))?;

        Ok(reify::<T>(key, &value)?.clone())
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().unwrap().contains_key(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.values.lock().unwrap().len()
    }
}
