//! In-process store honoring the same identity and upsert contracts as
//! [`PgStore`](crate::store::PgStore). Backs `--memory-store` dry runs and
//! the test suites.

use std::collections::{BTreeMap, HashMap};
#[cfg(test)]
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::params::CanonicalParameterSet;
use crate::store::{
    identity_value, LookupError, LookupResolver, LookupTable, PersistenceError, PersistenceGateway,
};

/// One stored instance row.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    pub id: i64,
    pub state_type_id: i32,
    pub site_id: i32,
    pub params: CanonicalParameterSet,
}

#[derive(Debug, Default)]
struct Tables {
    lookups: HashMap<(LookupTable, String), i32>,
    instances: Vec<InstanceRecord>,
    identities: HashMap<(String, String, i32), i64>,
    config_items: BTreeMap<(i64, String), Option<String>>,
    config_writes: usize,
    #[cfg(test)]
    rejected_keys: HashSet<String>,
}

impl Tables {
    #[cfg(test)]
    fn check_rejected(&self, params: &CanonicalParameterSet) -> Result<(), PersistenceError> {
        match params.keys().find(|key| self.rejected_keys.contains(*key)) {
            Some(key) => Err(PersistenceError::Constraint(format!("config_item.key '{}' rejected", key))),
            None => Ok(()),
        }
    }

    #[cfg(not(test))]
    fn check_rejected(&self, _params: &CanonicalParameterSet) -> Result<(), PersistenceError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference row.
    pub fn with_lookup(self, table: LookupTable, code: impl Into<String>, id: i32) -> Self {
        if let Ok(mut tables) = self.tables.lock() {
            tables.lookups.insert((table, code.into()), id);
        }
        self
    }

    pub fn instance_count(&self) -> usize {
        self.lock().map(|t| t.instances.len()).unwrap_or(0)
    }

    pub fn instance(&self, id: i64) -> Option<InstanceRecord> {
        let tables = self.lock().ok()?;
        tables.instances.iter().find(|record| record.id == id).cloned()
    }

    /// Config items of one instance, ordered by key.
    pub fn config_items(&self, instance_id: i64) -> Vec<(String, Option<String>)> {
        self.lock()
            .map(|tables| {
                tables
                    .config_items
                    .range((instance_id, String::new())..)
                    .take_while(|((id, _), _)| *id == instance_id)
                    .map(|((_, key), value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn config_item_count(&self) -> usize {
        self.lock().map(|t| t.config_items.len()).unwrap_or(0)
    }

    /// Row inserts and value changes performed so far; identical re-writes
    /// are not counted.
    pub fn config_writes(&self) -> usize {
        self.lock().map(|t| t.config_writes).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, PersistenceError> {
        self.tables
            .lock()
            .map_err(|_| PersistenceError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Make the store refuse a config key, standing in for a failing constraint.
    #[cfg(test)]
    fn reject_key(&self, key: &str) {
        self.tables.lock().unwrap().rejected_keys.insert(key.to_string());
    }
}

impl LookupResolver for MemoryStore {
    fn resolve_id(&self, table: LookupTable, code: &str, context: &str) -> Result<i32, LookupError> {
        let tables = self.lock()?;
        tables
            .lookups
            .get(&(table, code.to_string()))
            .copied()
            .ok_or_else(|| LookupError::NotFound {
                table,
                code: code.to_string(),
                context: context.to_string(),
            })
    }
}

impl PersistenceGateway for MemoryStore {
    fn get_or_create_instance(
        &self,
        state_id: i32,
        site_id: i32,
        params: &CanonicalParameterSet,
        context: &str,
    ) -> Result<i64, PersistenceError> {
        let uid = identity_value(params, "uid")?;
        let instance_name = identity_value(params, "instance_name")?;

        let mut tables = self.lock()?;
        let identity = (uid.to_string(), instance_name.to_string(), site_id);

        if let Some(id) = tables.identities.get(&identity) {
            tracing::debug!(instance_id = *id, context, "Found existing instance");
            return Ok(*id);
        }

        let id = tables.instances.len() as i64 + 1;
        tables.instances.push(InstanceRecord {
            id,
            state_type_id: state_id,
            site_id,
            params: params.clone(),
        });
        tables.identities.insert(identity, id);

        tracing::debug!(instance_id = id, context, "Created instance");
        Ok(id)
    }

    fn insert_config_items(&self, instance_id: i64, params: &CanonicalParameterSet) -> Result<(), PersistenceError> {
        let mut tables = self.lock()?;

        if !tables.instances.iter().any(|record| record.id == instance_id) {
            return Err(PersistenceError::Constraint(format!(
                "config_item.instance_id {} references no instance",
                instance_id
            )));
        }
        tables.check_rejected(params)?;

        // all checks passed, so the batch applies in full
        for (key, value) in params {
            let slot = (instance_id, key.clone());
            if tables.config_items.get(&slot) != Some(value) {
                tables.config_items.insert(slot, value.clone());
                tables.config_writes += 1;
            }
        }

        Ok(())
    }
}
