//! Derives canonical (legacy) keys from workflow-specific keys.

use std::sync::Arc;

use crate::params::{CanonicalParameterSet, WorkflowType};
use crate::rules::KeyExtensionTable;

/// Expands a parameter set into the canonical superset using the
/// key-extension rules of one workflow.
///
/// Rules run in the table's application order against the set being built,
/// so a chained rule sees the value its producer just wrote. No key is ever
/// removed.
#[derive(Debug, Clone)]
pub struct LegacySchemaTranslator {
    table: Arc<KeyExtensionTable>,
}

impl LegacySchemaTranslator {
    pub fn new(table: Arc<KeyExtensionTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &KeyExtensionTable {
        &self.table
    }

    /// Apply `workflow`'s rules to `params`.
    ///
    /// A present source (null included) overwrites its targets; an absent
    /// source leaves its targets exactly as they were.
    pub fn extend(&self, params: &CanonicalParameterSet, workflow: WorkflowType) -> CanonicalParameterSet {
        let mut extended = params.clone();
        let mut applied = 0usize;

        for rule in self.table.rules_for(workflow) {
            if let Some(value) = extended.get(&rule.source).cloned() {
                extended.insert(rule.target.clone(), value);
                applied += 1;
            }
        }

        tracing::debug!(
            workflow = %workflow,
            applied,
            keys = extended.len(),
            "Extended parameters to canonical schema"
        );

        extended
    }
}

impl Default for LegacySchemaTranslator {
    fn default() -> Self {
        Self::new(KeyExtensionTable::builtin())
    }
}
