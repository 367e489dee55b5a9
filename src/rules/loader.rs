//! YAML rule-file loader.
//!
//! A rule file may replace the key-extension rules of individual workflows
//! and/or the whole value-transform table:
//!
//! ```yaml
//! key_extensions:
//!   GRAPH:
//!     - source: suite.uid
//!       targets: [uid]
//! value_transforms:
//!   forcing.stormnumber: INTEGER
//! ```
//!
//! Sections that are left out keep their built-in defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::params::WorkflowType;
use crate::rules::{KeyExtensionRule, KeyExtensionTable, RuleError, ValueRules};

/// One source key fanned out to its target keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionGroup {
    pub source: String,
    pub targets: Vec<String>,
}

/// Rule file as written on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    #[serde(default)]
    pub key_extensions: Option<BTreeMap<WorkflowType, Vec<ExtensionGroup>>>,

    #[serde(default)]
    pub value_transforms: Option<ValueRules>,
}

/// Both rule tables, ready to be handed to a pipeline.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub key_extensions: Arc<KeyExtensionTable>,
    pub value_rules: ValueRules,
}

impl RuleSet {
    pub fn builtin() -> Self {
        Self {
            key_extensions: KeyExtensionTable::builtin(),
            value_rules: ValueRules::builtin(),
        }
    }

    /// Load a rule file, overlaying it on the built-in tables.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, RuleError> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .map_err(|e| RuleError::Load(format!("failed to read rule file {}: {}", path.display(), e)))?;

        let rules = Self::from_yaml_str(&contents)?;

        tracing::info!(
            path = %path.display(),
            value_rules = rules.value_rules.len(),
            "Loaded rule file"
        );

        Ok(rules)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, RuleError> {
        let file: RuleFile = serde_yaml::from_str(contents)
            .map_err(|e| RuleError::Load(format!("failed to parse YAML: {}", e)))?;

        Self::from_rule_file(file)
    }

    pub fn from_rule_file(file: RuleFile) -> Result<Self, RuleError> {
        let key_extensions = match file.key_extensions {
            Some(groups) => {
                let mut table = (*KeyExtensionTable::builtin()).clone();

                for (workflow, groups) in groups {
                    let rules = groups
                        .into_iter()
                        .flat_map(|group| {
                            let source = group.source;
                            group
                                .targets
                                .into_iter()
                                .map(move |target| KeyExtensionRule::new(source.clone(), target))
                        })
                        .collect();
                    table.set_rules(workflow, rules);
                }

                table.seal()?;
                Arc::new(table)
            }
            None => KeyExtensionTable::builtin(),
        };

        let value_rules = file.value_transforms.unwrap_or_else(ValueRules::builtin);

        Ok(Self {
            key_extensions,
            value_rules,
        })
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::TransformKind;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_rule_file(dir: &Path, yaml: &str) -> std::path::PathBuf {
        let file_path = dir.join("rules.yaml");
        let mut file = fs::File::create(&file_path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file_path
    }

    #[test]
    fn test_load_overrides_one_workflow() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_rule_file(
            temp_dir.path(),
            r#"
key_extensions:
  HYDRAULIC:
    - source: run.uid
      targets: [uid, suite.uid]
"#,
        );

        let rules = RuleSet::load_from_file(&path).unwrap();

        assert_eq!(
            rules.key_extensions.rules_for(WorkflowType::Hydraulic),
            &[
                KeyExtensionRule::new("run.uid", "uid"),
                KeyExtensionRule::new("run.uid", "suite.uid"),
            ]
        );
        // untouched workflows keep the built-in rules
        assert_eq!(
            rules.key_extensions.rules_for(WorkflowType::Graph),
            KeyExtensionTable::builtin().rules_for(WorkflowType::Graph)
        );
        assert_eq!(rules.value_rules, ValueRules::builtin());
    }

    #[test]
    fn test_load_value_transforms() {
        let rules = RuleSet::from_yaml_str(
            r#"
value_transforms:
  storm: FLOAT
  stormname: LOWERCASE
"#,
        )
        .unwrap();

        assert_eq!(rules.value_rules.len(), 2);
        assert_eq!(rules.value_rules.get("storm"), Some(TransformKind::Float));
        assert_eq!(rules.value_rules.get("forcing.stormnumber"), None);
        assert!(Arc::ptr_eq(&rules.key_extensions, &KeyExtensionTable::builtin()));
    }

    #[test]
    fn test_load_rejects_conflicting_rules() {
        let result = RuleSet::from_yaml_str(
            r#"
key_extensions:
  GRAPH:
    - source: suite.uid
      targets: [uid]
    - source: run.uid
      targets: [uid]
"#,
        );

        assert!(matches!(result, Err(RuleError::Conflict { .. })));
    }

    #[test]
    fn test_load_rejects_unknown_kind_and_fields() {
        let result = RuleSet::from_yaml_str("value_transforms:\n  storm: TITLECASE\n");
        assert!(matches!(result, Err(RuleError::Load(_))));

        let result = RuleSet::from_yaml_str("value_transform:\n  storm: FLOAT\n");
        assert!(matches!(result, Err(RuleError::Load(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = RuleSet::load_from_file(temp_dir.path().join("missing.yaml"));

        match result {
            Err(RuleError::Load(msg)) => assert!(msg.contains("missing.yaml")),
            other => panic!("expected load error, got {:?}", other),
        }
    }
}
