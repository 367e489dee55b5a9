//! Parameter sets, workflow tags and inbound message parsing.
//!
//! Every workflow publishes its run properties as a flat JSON object of
//! string-or-null values. The legacy workflow additionally nests most of its
//! properties in a `param_list` array of `[key, value]` pairs, which is
//! flattened here so that every downstream stage sees one shape.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Key/value view of a run-property message. Insertion order is kept for
/// diagnostics only.
pub type CanonicalParameterSet = IndexMap<String, Option<String>>;

/// Key holding the legacy workflow's nested `[key, value]` pairs.
const PARAM_LIST_KEY: &str = "param_list";

/// The three producer workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowType {
    /// Legacy batch workflow (ASGS)
    Legacy,
    /// Graph-based scheduler workflow (ecFlow)
    Graph,
    /// Hydraulic-modeling workflow (HEC-RAS)
    Hydraulic,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 3] = [WorkflowType::Legacy, WorkflowType::Graph, WorkflowType::Hydraulic];

    /// Tag written to the `workflow_type` parameter before persistence.
    pub fn store_tag(self) -> &'static str {
        match self {
            WorkflowType::Legacy => "ASGS",
            WorkflowType::Graph => "ECFLOW",
            WorkflowType::Hydraulic => "HECRAS",
        }
    }

    /// Queue the workflow publishes its run properties to.
    pub fn queue_name(self) -> &'static str {
        match self {
            WorkflowType::Legacy => "asgs_props",
            WorkflowType::Graph => "ecflow_rp",
            WorkflowType::Hydraulic => "hecras_rp",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowType::Legacy => "LEGACY",
            WorkflowType::Graph => "GRAPH",
            WorkflowType::Hydraulic => "HYDRAULIC",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for WorkflowType {
    type Err = String;

    /// Accepts either the workflow name or its store tag, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LEGACY" | "ASGS" => Ok(WorkflowType::Legacy),
            "GRAPH" | "ECFLOW" => Ok(WorkflowType::Graph),
            "HYDRAULIC" | "HECRAS" => Ok(WorkflowType::Hydraulic),
            other => Err(format!(
                "unknown workflow type '{}'; expected one of: legacy, graph, hydraulic",
                other
            )),
        }
    }
}

/// Malformed inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

impl From<serde_json::Error> for ParseError {
    fn from(e: serde_json::Error) -> Self {
        ParseError::new(format!("invalid JSON: {}", e))
    }
}

/// A run-property message exactly as received, flattened to key/value form.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    params: CanonicalParameterSet,
}

impl RawMessage {
    /// Parse a UTF-8 JSON object payload.
    ///
    /// Numbers and booleans are stringified, `null` is kept as a null value.
    /// A top-level `param_list` array of `[key, value]` pairs is flattened
    /// into the set, its pairs taking precedence over top-level keys.
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(body)
            .map_err(|e| ParseError::new(format!("payload is not valid UTF-8: {}", e)))?;

        let object = match serde_json::from_str::<JsonValue>(text)? {
            JsonValue::Object(map) => map,
            other => {
                return Err(ParseError::new(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let mut params = CanonicalParameterSet::with_capacity(object.len());
        let mut pairs = None;

        for (key, value) in object {
            if key == PARAM_LIST_KEY {
                if let JsonValue::Array(items) = value {
                    pairs = Some(items);
                    continue;
                }
            }
            let scalar = scalar_value(&key, value)?;
            params.insert(key, scalar);
        }

        if let Some(items) = pairs {
            for (index, item) in items.into_iter().enumerate() {
                let (key, value) = param_pair(index, item)?;
                params.insert(key, value);
            }
        }

        Ok(Self { params })
    }

    pub fn params(&self) -> &CanonicalParameterSet {
        &self.params
    }

    pub fn into_params(self) -> CanonicalParameterSet {
        self.params
    }
}

impl From<CanonicalParameterSet> for RawMessage {
    fn from(params: CanonicalParameterSet) -> Self {
        Self { params }
    }
}

fn scalar_value(key: &str, value: JsonValue) -> Result<Option<String>, ParseError> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) => Ok(Some(s)),
        JsonValue::Number(n) => Ok(Some(n.to_string())),
        JsonValue::Bool(b) => Ok(Some(b.to_string())),
        other => Err(ParseError::new(format!(
            "value for key '{}' is a nested {}",
            key,
            json_kind(&other)
        ))),
    }
}

fn param_pair(index: usize, item: JsonValue) -> Result<(String, Option<String>), ParseError> {
    let invalid = || ParseError::new(format!("{}[{}] is not a [key, value] pair", PARAM_LIST_KEY, index));

    let mut pair = match item {
        JsonValue::Array(pair) if pair.len() == 2 => pair,
        _ => return Err(invalid()),
    };

    let value = pair.pop().ok_or_else(invalid)?;
    let key = match pair.pop() {
        Some(JsonValue::String(key)) => key,
        _ => return Err(invalid()),
    };

    let value = scalar_value(&key, value)?;
    Ok((key, value))
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
