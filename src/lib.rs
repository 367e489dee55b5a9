//! # Runprops: Run-Property Normalization
//!
//! Runprops turns the run-property messages emitted by three simulation
//! workflows into one canonical parameter set and persists it idempotently.
//!
//! ## Workflows
//!
//! - **LEGACY** (ASGS): already canonical, `param_list` pairs are flattened
//! - **GRAPH** (ecFlow): prefixed keys such as `suite.uid` are extended to canonical aliases
//! - **HYDRAULIC** (HEC-RAS): same key extension as GRAPH
//!
//! ## Per-message flow
//!
//! ```text
//! bytes -> RawMessage -> LegacySchemaTranslator -> FieldValueTransformer
//!       -> LookupResolver (state type, site) -> PersistenceGateway
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use runprops::{LookupTable, MemoryStore, NormalizationPipeline, PipelineConfig, RuleSet, WorkflowType};
//!
//! let store = Arc::new(
//!     MemoryStore::new()
//!         .with_lookup(LookupTable::StateType, "RUNN", 1)
//!         .with_lookup(LookupTable::Site, "RENCI", 7),
//! );
//! let pipeline = NormalizationPipeline::new(
//!     PipelineConfig::new(WorkflowType::Graph),
//!     RuleSet::builtin(),
//!     store,
//! );
//! let normalized = pipeline.process(br#"{"suite.uid": "1", "suite.instance_name": "a", "suite.physical_location": "RENCI"}"#)?;
//! ```

// Message model
pub mod params;

// Declarative rule tables
pub mod rules;

// Normalization stages
pub mod translator;
pub mod transformer;

// Lookup and persistence
pub mod store;

// Orchestration
pub mod pipeline;

// NATS JetStream integration
pub mod nats;

// Environment-driven worker settings
pub mod config;

pub use params::{CanonicalParameterSet, ParseError, RawMessage, WorkflowType};
pub use rules::{RuleError, RuleSet, TransformKind, ValueRules};
pub use translator::LegacySchemaTranslator;
pub use transformer::{CoercionError, FieldValueTransformer};
pub use store::{
    Database, DatabaseConfig, LookupError, LookupResolver, LookupTable, MemoryStore, PersistenceError,
    PersistenceGateway, PgStore,
};
pub use pipeline::{
    DeliveryContext, NormalizationPipeline, Normalized, PipelineConfig, PipelineError, PipelineState,
};
pub use nats::{DeadLetter, Disposition, NatsClient, NatsConfig, RelayError, RelayPublisher, RelaySink};
pub use config::WorkerSettings;
