//! Per-message normalization pipeline.
//!
//! ```text
//! RECEIVED -> TRANSLATED -> VALUE_TRANSFORMED -> RESOLVED -> PERSISTED
//!     \______________\_______________\______________\_____-> FAILED
//! ```
//!
//! One pipeline is bound to one workflow (one queue). It never retries and
//! never panics on message content: every outcome is returned to the caller,
//! which owns acknowledgement and redelivery.

use std::fmt;
use std::sync::Arc;

use crate::params::{CanonicalParameterSet, ParseError, RawMessage, WorkflowType};
use crate::rules::RuleSet;
use crate::store::{LookupError, LookupResolver, LookupTable, PersistenceError, PersistenceGateway};
use crate::transformer::{CoercionError, FieldValueTransformer};
use crate::translator::LegacySchemaTranslator;

/// Parameter key holding the site code.
pub const SITE_KEY: &str = "physical_location";

/// Processing states of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Translated,
    ValueTransformed,
    Resolved,
    Persisted,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Received => "RECEIVED",
            PipelineState::Translated => "TRANSLATED",
            PipelineState::ValueTransformed => "VALUE_TRANSFORMED",
            PipelineState::Resolved => "RESOLVED",
            PipelineState::Persisted => "PERSISTED",
            PipelineState::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// Reason a message ended in `FAILED`.
#[derive(Debug)]
pub enum PipelineError {
    Parse(ParseError),
    Lookup(LookupError),
    Persistence(PersistenceError),
}

impl PipelineError {
    /// Last state the message reached before failing.
    pub fn last_state(&self) -> PipelineState {
        match self {
            PipelineError::Parse(_) => PipelineState::Received,
            PipelineError::Lookup(_) => PipelineState::ValueTransformed,
            PipelineError::Persistence(_) => PipelineState::Resolved,
        }
    }

    /// Whether redelivering the same payload can never succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            PipelineError::Parse(_) => true,
            PipelineError::Lookup(LookupError::NotFound { .. }) => false,
            PipelineError::Lookup(LookupError::Store(e)) => e.is_permanent(),
            PipelineError::Persistence(e) => e.is_permanent(),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Parse(e) => write!(f, "{}", e),
            PipelineError::Lookup(e) => write!(f, "{}", e),
            PipelineError::Persistence(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<ParseError> for PipelineError {
    fn from(e: ParseError) -> Self {
        PipelineError::Parse(e)
    }
}

impl From<LookupError> for PipelineError {
    fn from(e: LookupError) -> Self {
        PipelineError::Lookup(e)
    }
}

impl From<PersistenceError> for PipelineError {
    fn from(e: PersistenceError) -> Self {
        PipelineError::Persistence(e)
    }
}

/// Settings of one pipeline instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub workflow: WorkflowType,
    /// State-type code resolved for incoming run properties
    pub state_code: String,
    /// Value stamped into `supervisor_job_status`
    pub initial_status: String,
}

impl PipelineConfig {
    pub fn new(workflow: WorkflowType) -> Self {
        Self {
            workflow,
            state_code: "RUNN".to_string(),
            initial_status: "new".to_string(),
        }
    }
}

/// Transport metadata of one delivery. Only used for log context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryContext {
    pub subject: String,
    pub delivered: i64,
}

/// Successful outcome of one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub instance_id: i64,
    pub params: CanonicalParameterSet,
    pub coercion_errors: Vec<CoercionError>,
}

/// Translator → transformer → resolver → gateway for one workflow.
pub struct NormalizationPipeline<S> {
    config: PipelineConfig,
    translator: LegacySchemaTranslator,
    transformer: FieldValueTransformer,
    store: Arc<S>,
}

impl<S> NormalizationPipeline<S>
where
    S: LookupResolver + PersistenceGateway,
{
    pub fn new(config: PipelineConfig, rules: RuleSet, store: Arc<S>) -> Self {
        Self {
            config,
            translator: LegacySchemaTranslator::new(rules.key_extensions),
            transformer: FieldValueTransformer::new(rules.value_rules),
            store,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Translate, transform and stamp a message without touching the store.
    pub fn normalize(&self, raw: &RawMessage) -> (CanonicalParameterSet, Vec<CoercionError>) {
        let workflow = self.config.workflow;

        let translated = self.translator.extend(raw.params(), workflow);
        tracing::trace!(state = %PipelineState::Translated, keys = translated.len());

        let (mut params, coercion_errors) = self.transformer.transform(translated);
        tracing::trace!(
            state = %PipelineState::ValueTransformed,
            coercion_errors = coercion_errors.len()
        );

        params.insert("workflow_type".to_string(), Some(workflow.store_tag().to_string()));
        params.insert(
            "supervisor_job_status".to_string(),
            Some(self.config.initial_status.clone()),
        );

        (params, coercion_errors)
    }

    /// Run one payload through every state.
    pub fn process(&self, body: &[u8]) -> Result<Normalized, PipelineError> {
        let raw = RawMessage::parse(body)?;
        tracing::trace!(state = %PipelineState::Received, keys = raw.params().len());

        let (params, coercion_errors) = self.normalize(&raw);
        let context = format!("{} run properties", self.config.workflow);

        let state_id = self
            .store
            .resolve_id(LookupTable::StateType, &self.config.state_code, &context)?;
        let site_code = params.get(SITE_KEY).and_then(|v| v.as_deref()).unwrap_or_default();
        let site_id = self.store.resolve_id(LookupTable::Site, site_code, &context)?;
        tracing::trace!(state = %PipelineState::Resolved, state_id, site_id);

        let instance_id = self
            .store
            .get_or_create_instance(state_id, site_id, &params, &context)?;
        self.store.insert_config_items(instance_id, &params)?;
        tracing::trace!(state = %PipelineState::Persisted, instance_id);

        Ok(Normalized {
            instance_id,
            params,
            coercion_errors,
        })
    }

    /// Process one delivery and log its outcome. The transport keeps the
    /// result to decide acknowledgement.
    pub fn process_delivery(&self, delivery: &DeliveryContext, body: &[u8]) -> Result<Normalized, PipelineError> {
        let outcome = self.process(body);

        match &outcome {
            Ok(normalized) => tracing::info!(
                workflow = %self.config.workflow,
                subject = %delivery.subject,
                instance_id = normalized.instance_id,
                params = normalized.params.len(),
                coercion_errors = normalized.coercion_errors.len(),
                state = %PipelineState::Persisted,
                "Run properties persisted"
            ),
            Err(e) => tracing::error!(
                workflow = %self.config.workflow,
                subject = %delivery.subject,
                delivered = delivery.delivered,
                last_state = %e.last_state(),
                permanent = e.is_permanent(),
                state = %PipelineState::Failed,
                "Failed to process run properties: {}",
                e
            ),
        }

        outcome
    }

    /// Queue callback entry point: true once the message is persisted.
    pub fn handle(&self, delivery: &DeliveryContext, body: &[u8]) -> bool {
        self.process_delivery(delivery, body).is_ok()
    }
}
