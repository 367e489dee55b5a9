//! Declarative rule tables driving normalization.
//!
//! Two tables exist: per-workflow key-extension rules consumed by the
//! [`LegacySchemaTranslator`](crate::translator::LegacySchemaTranslator) and
//! global value-transform rules consumed by the
//! [`FieldValueTransformer`](crate::transformer::FieldValueTransformer).
//! Both have built-in defaults and can be replaced from a YAML rule file.
//! Tables are validated when built and never mutated once shared.

pub mod key_extension;
pub mod value_transform;
pub mod loader;

use std::fmt;

use crate::params::WorkflowType;

pub use key_extension::{KeyExtensionRule, KeyExtensionTable};
pub use value_transform::{TransformKind, ValueRules};
pub use loader::{RuleFile, RuleSet};

/// Error raised while building or loading a rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// Two different source keys feed the same target key.
    Conflict {
        workflow: WorkflowType,
        target: String,
        sources: (String, String),
    },
    /// Following rule sources back through their producers loops, so no
    /// application order exists.
    Cycle {
        workflow: WorkflowType,
        key: String,
    },
    /// A rule names an empty key.
    EmptyKey {
        workflow: WorkflowType,
    },
    /// The rule file could not be read or parsed.
    Load(String),
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleError::Conflict { workflow, target, sources } => write!(
                f,
                "Translation rule conflict in {}: '{}' is targeted by both '{}' and '{}'",
                workflow, target, sources.0, sources.1
            ),
            RuleError::Cycle { workflow, key } => write!(
                f,
                "Translation rule conflict in {}: the rules feeding '{}' form a cycle",
                workflow, key
            ),
            RuleError::EmptyKey { workflow } => {
                write!(f, "Translation rule in {} has an empty key", workflow)
            }
            RuleError::Load(msg) => write!(f, "Failed to load rules: {}", msg),
        }
    }
}

impl std::error::Error for RuleError {}
