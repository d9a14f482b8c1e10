use std::collections::{BTreeMap, BTreeSet};

use crate::{RecordId, RecordWrite, StoreError};

/// Host-provided key-value access to widget configuration records.
pub trait RecordStore {
    /// Identifiers of every record currently in existence.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the host cannot enumerate its records.
    fn record_ids(&self) -> Result<Vec<RecordId>, StoreError>;

    /// # Errors
    /// Returns [`StoreError`] when the underlying storage cannot be read.
    fn get(&self, id: RecordId, key: &str) -> Result<Option<String>, StoreError>;

    /// # Errors
    /// Returns [`StoreError`] when the underlying storage cannot be written.
    fn set(&mut self, id: RecordId, key: &str, value: &str) -> Result<(), StoreError>;

    /// Apply every write for one record, all or nothing. The default writes key by key;
    /// stores that can do better must override it.
    ///
    /// # Errors
    /// Returns [`StoreError`] when any write fails.
    fn set_all(&mut self, id: RecordId, writes: &[RecordWrite]) -> Result<(), StoreError> {
        for write in writes {
            self.set(id, &write.key, &write.value)?;
        }
        Ok(())
    }
}

/// Process-wide, persisted completion flags keyed by migration name.
pub trait FlagStore {
    /// # Errors
    /// Returns [`StoreError`] when the flag cannot be read.
    fn is_applied(&self, name: &str) -> Result<bool, StoreError>;

    /// # Errors
    /// Returns [`StoreError`] when the flag cannot be persisted.
    fn set_applied(&mut self, name: &str, applied: bool) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryFlagStore {
    flags: BTreeMap<String, bool>,
}

impl MemoryFlagStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_applied<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self { flags: names.into_iter().map(|name| (name.to_string(), true)).collect() }
    }

    #[must_use]
    pub fn flags(&self) -> &BTreeMap<String, bool> {
        &self.flags
    }
}

impl FlagStore for MemoryFlagStore {
    fn is_applied(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.flags.get(name).copied().unwrap_or(false))
    }

    fn set_applied(&mut self, name: &str, applied: bool) -> Result<(), StoreError> {
        self.flags.insert(name.to_string(), applied);
        Ok(())
    }
}

/// In-memory record store. Records listed in `failing` reject every read and write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryRecordStore {
    records: BTreeMap<RecordId, BTreeMap<String, String>>,
    failing: BTreeSet<RecordId>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<'a>(
        &mut self,
        id: RecordId,
        values: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) {
        let entry = self.records.entry(id).or_default();
        for (key, value) in values {
            entry.insert(key.to_string(), value.to_string());
        }
    }

    pub fn remove(&mut self, id: RecordId) {
        self.records.remove(&id);
    }

    /// Make every storage access for `id` fail, mimicking unavailable persistence.
    pub fn fail_record(&mut self, id: RecordId) {
        self.failing.insert(id);
    }

    #[must_use]
    pub fn values(&self, id: RecordId) -> Option<&BTreeMap<String, String>> {
        self.records.get(&id)
    }

    fn check(&self, id: RecordId) -> Result<&BTreeMap<String, String>, StoreError> {
        if self.failing.contains(&id) {
            return Err(StoreError::new(format!("record {id} is unavailable")));
        }
        self.records.get(&id).ok_or_else(|| StoreError::new(format!("record {id} does not exist")))
    }
}

impl RecordStore for MemoryRecordStore {
    fn record_ids(&self) -> Result<Vec<RecordId>, StoreError> {
        Ok(self.records.keys().copied().collect())
    }

    fn get(&self, id: RecordId, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.check(id)?.get(key).cloned())
    }

    fn set(&mut self, id: RecordId, key: &str, value: &str) -> Result<(), StoreError> {
        self.check(id)?;
        if let Some(values) = self.records.get_mut(&id) {
            values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn set_all(&mut self, id: RecordId, writes: &[RecordWrite]) -> Result<(), StoreError> {
        self.check(id)?;
        if let Some(values) = self.records.get_mut(&id) {
            for write in writes {
                values.insert(write.key.clone(), write.value.clone());
            }
        }
        Ok(())
    }
}
