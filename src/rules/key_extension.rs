//! Per-workflow key-extension rules.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::params::WorkflowType;
use crate::rules::RuleError;

/// Copy the value at `source` into `target` when `source` is present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyExtensionRule {
    pub source: String,
    pub target: String,
}

impl KeyExtensionRule {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Run-property keys emitted by the graph and hydraulic workflows, mapped to
/// the legacy keys downstream consumers expect.
const RUN_PROPERTY_EXTENSIONS: &[(&str, &[&str])] = &[
    ("suite.physical_location", &["physical_location", "monitoring.rmqmessaging.locationname"]),
    ("suite.instance_name", &["instance_name"]),
    ("instance_name", &["instancename"]),
    ("suite.uid", &["uid"]),
    ("suite.adcirc.gridname", &["ADCIRCgrid", "adcirc.gridname"]),
    ("time.currentdate", &["currentdate"]),
    ("time.currentcycle", &["currentcycle"]),
    ("forcing.advisory", &["advisory"]),
    ("forcing.ensemblename", &["asgs.enstorm", "enstorm"]),
    ("forcing.stormname", &["stormname", "forcing.tropicalcyclone.stormname"]),
    ("forcing.waves", &["config.coupling.waves"]),
    ("forcing.vortexmodel", &["forcing.tropicalcyclone.vortexmodel"]),
    ("output.downloadurl", &["downloadurl"]),
];

/// Rule table keyed by workflow type.
///
/// A workflow without an entry has no rules; translation leaves its messages
/// untouched. Rules may chain (the target of one is the source of another) as
/// long as no chain loops back on itself. Each workflow's rules are kept in
/// application order: a rule comes after the rule producing its source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyExtensionTable {
    rules: HashMap<WorkflowType, Vec<KeyExtensionRule>>,
}

impl KeyExtensionTable {
    /// Build and validate a table.
    pub fn new(rules: HashMap<WorkflowType, Vec<KeyExtensionRule>>) -> Result<Self, RuleError> {
        let mut table = Self { rules };
        table.seal()?;
        Ok(table)
    }

    /// Built-in table, constructed once per process.
    pub fn builtin() -> Arc<KeyExtensionTable> {
        static BUILTIN: OnceLock<Arc<KeyExtensionTable>> = OnceLock::new();
        BUILTIN
            .get_or_init(|| Arc::new(Self::builtin_rules()))
            .clone()
    }

    fn builtin_rules() -> Self {
        let run_properties: Vec<KeyExtensionRule> = RUN_PROPERTY_EXTENSIONS
            .iter()
            .flat_map(|(source, targets)| {
                targets.iter().map(move |target| KeyExtensionRule::new(*source, *target))
            })
            .collect();

        let mut rules = HashMap::new();
        rules.insert(WorkflowType::Graph, run_properties.clone());
        rules.insert(WorkflowType::Hydraulic, run_properties);

        let mut table = Self { rules };
        table
            .seal()
            .expect("built-in key-extension rules are acyclic and conflict-free");
        table
    }

    /// Rules for a workflow, in application order.
    pub fn rules_for(&self, workflow: WorkflowType) -> &[KeyExtensionRule] {
        self.rules.get(&workflow).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replace the rules of one workflow. Only used while assembling a table
    /// before it is shared; call [`seal`](Self::seal) afterwards.
    pub(crate) fn set_rules(&mut self, workflow: WorkflowType, rules: Vec<KeyExtensionRule>) {
        self.rules.insert(workflow, rules);
    }

    pub fn workflows(&self) -> impl Iterator<Item = WorkflowType> + '_ {
        self.rules.keys().copied()
    }

    /// Check the table for empty keys, conflicting sources and cycles.
    pub fn validate(&self) -> Result<(), RuleError> {
        for workflow in self.sorted_workflows() {
            application_order(workflow, &self.rules[&workflow])?;
        }
        Ok(())
    }

    /// Validate the table and put every workflow's rules in application order.
    pub(crate) fn seal(&mut self) -> Result<(), RuleError> {
        for workflow in self.sorted_workflows() {
            if let Some(rules) = self.rules.get_mut(&workflow) {
                *rules = application_order(workflow, rules)?;
            }
        }
        Ok(())
    }

    fn sorted_workflows(&self) -> Vec<WorkflowType> {
        let mut workflows: Vec<WorkflowType> = self.rules.keys().copied().collect();
        workflows.sort();
        workflows
    }
}

/// Order `rules` so each runs after the rule that produces its source.
///
/// Every target has a single producer, so the producers form a forest and a
/// rule's rank is the length of the producer chain above its source. The sort
/// is stable, rules of equal rank keep their declaration order.
fn application_order(
    workflow: WorkflowType,
    rules: &[KeyExtensionRule],
) -> Result<Vec<KeyExtensionRule>, RuleError> {
    let mut producers: BTreeMap<&str, &str> = BTreeMap::new();

    for rule in rules {
        if rule.source.is_empty() || rule.target.is_empty() {
            return Err(RuleError::EmptyKey { workflow });
        }
        if let Some(previous) = producers.insert(&rule.target, &rule.source) {
            if previous != rule.source {
                return Err(RuleError::Conflict {
                    workflow,
                    target: rule.target.clone(),
                    sources: (previous.to_string(), rule.source.clone()),
                });
            }
        }
    }

    let mut ranked = Vec::with_capacity(rules.len());
    for rule in rules {
        let mut rank = 0usize;
        let mut key = rule.source.as_str();
        while let Some(source) = producers.get(key) {
            rank += 1;
            // a chain longer than the number of producers revisits a key
            if rank > producers.len() {
                return Err(RuleError::Cycle {
                    workflow,
                    key: rule.source.clone(),
                });
            }
            key = *source;
        }
        ranked.push((rank, rule.clone()));
    }

    ranked.sort_by_key(|(rank, _)| *rank);
    Ok(ranked.into_iter().map(|(_, rule)| rule).collect())
}
