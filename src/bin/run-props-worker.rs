/// Run-property worker - consumes one workflow's queue from NATS JetStream,
/// normalizes every message and persists it
///
/// Acknowledgement follows processing, see [`runprops::Disposition`].

use async_nats::jetstream::{self, consumer::PullConsumer};
use clap::Parser;
use futures::StreamExt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use runprops::{
    Database, DeadLetter, DeliveryContext, Disposition, LookupResolver, LookupTable, MemoryStore, NatsClient,
    NormalizationPipeline, PersistenceGateway, PgStore, PipelineConfig, PipelineError, RelayPublisher,
    RuleSet, WorkerSettings, WorkflowType,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(name = "run-props-worker")]
#[command(about = "Normalize and persist run-property messages from one workflow queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Workflow whose queue to consume (legacy, graph, hydraulic)
    #[arg(long, env = "WORKFLOW")]
    workflow: WorkflowType,

    /// YAML rule file overriding the built-in rule tables
    #[arg(long, env = "RULES_FILE")]
    rules: Option<PathBuf>,

    /// State-type code resolved for incoming run properties
    #[arg(long, env = "STATE_CODE", default_value = "RUNN")]
    state_code: String,

    /// Value stamped into supervisor_job_status
    #[arg(long, env = "INITIAL_STATUS", default_value = "new")]
    initial_status: String,

    /// Subject the normalized parameter set is relayed to after persisting
    #[arg(long, env = "RELAY_SUBJECT")]
    relay_subject: Option<String>,

    /// Keep everything in memory instead of PostgreSQL (dry run)
    #[arg(long)]
    memory_store: bool,

    /// Site code known to the in-memory store (repeatable)
    #[arg(long = "seed-site", requires = "memory_store")]
    seed_sites: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Worker stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let settings = WorkerSettings::from_env(cli.workflow);

    let rules = match &cli.rules {
        Some(path) => RuleSet::load_from_file(path)?,
        None => RuleSet::builtin(),
    };

    let mut config = PipelineConfig::new(cli.workflow);
    config.state_code = cli.state_code.clone();
    config.initial_status = cli.initial_status.clone();

    if cli.memory_store {
        let store = seeded_memory_store(&config.state_code, &cli.seed_sites);
        tracing::warn!("Using in-memory store; nothing will be persisted across restarts");
        consume(NormalizationPipeline::new(config, rules, Arc::new(store)), &cli, &settings).await
    } else {
        let database_url = settings
            .database_url
            .clone()
            .ok_or("DATABASE_URL must be set unless --memory-store is given")?;
        let db = Database::new_with_config(&database_url, settings.database.clone())?;
        db.test_connection()?;

        let store = PgStore::new(db);
        store.ensure_tables()?;

        consume(NormalizationPipeline::new(config, rules, Arc::new(store)), &cli, &settings).await
    }
}

fn seeded_memory_store(state_code: &str, sites: &[String]) -> MemoryStore {
    let store = MemoryStore::new().with_lookup(LookupTable::StateType, state_code, 1);
    sites
        .iter()
        .zip(1..)
        .fold(store, |store, (site, id)| store.with_lookup(LookupTable::Site, site.as_str(), id))
}

/// Main message processing loop
async fn consume<S>(
    pipeline: NormalizationPipeline<S>,
    cli: &Cli,
    settings: &WorkerSettings,
) -> Result<(), BoxError>
where
    S: LookupResolver + PersistenceGateway,
{
    let workflow = cli.workflow;

    let nats = NatsClient::connect(settings.nats.clone()).await?;
    let consumer: PullConsumer = nats
        .consumer(workflow, &settings.consumer_name)
        .await?;
    let relay = RelayPublisher::new(nats.jetstream().clone());

    tracing::info!(
        "Worker ready - workflow {} consuming from stream '{}' with consumer '{}'",
        workflow,
        settings.nats.stream_name,
        settings.consumer_name
    );

    loop {
        // Fetch batch of messages
        let mut messages = match consumer
            .fetch()
            .max_messages(settings.batch_size)
            .messages()
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!("Failed to fetch messages: {}", e);
                tokio::time::sleep(settings.poll_interval).await;
                continue;
            }
        };

        while let Some(msg) = messages.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!("Error receiving message: {}", e);
                    continue;
                }
            };

            let delivery = DeliveryContext {
                subject: msg.subject.to_string(),
                delivered: msg.info().map(|info| info.delivered).unwrap_or(1),
            };

            match pipeline.process_delivery(&delivery, &msg.payload) {
                Ok(normalized) => {
                    settle(&msg, Disposition::Ack).await;

                    if let Some(subject) = &cli.relay_subject {
                        relay.relay_params(subject, &normalized.params).await;
                    }
                }
                Err(e) => {
                    settle_failure(&nats, &msg, workflow, &delivery, &e, settings).await;
                }
            }
        }

        // Small delay between batches
        tokio::time::sleep(settings.poll_interval).await;
    }
}

/// Decide the fate of a message the pipeline rejected
async fn settle_failure(
    nats: &NatsClient,
    msg: &jetstream::Message,
    workflow: WorkflowType,
    delivery: &DeliveryContext,
    error: &PipelineError,
    settings: &WorkerSettings,
) {
    let disposition = match Disposition::for_failure(error, delivery.delivered, settings.max_deliver) {
        Disposition::DeadLetter => {
            // Max deliveries reached - park it on the dead-letter subject
            tracing::warn!(
                "Message on {} failed after {} attempts, sending to DLQ",
                delivery.subject,
                delivery.delivered
            );

            let letter = DeadLetter::new(workflow, &msg.payload, error.to_string(), delivery.delivered);
            let published = match nats.publish_dead_letter(&letter).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Failed to publish to DLQ, keeping message for redelivery: {}", e);
                    false
                }
            };

            Disposition::after_dead_letter(published, settings.dead_letter_retry)
        }
        other => other,
    };

    settle(msg, disposition).await;
}

async fn settle(msg: &jetstream::Message, disposition: Disposition) {
    let Some(kind) = disposition.ack_kind() else {
        return;
    };

    if let Err(e) = msg.ack_with(kind).await {
        tracing::error!("Failed to settle message as {:?}: {}", disposition, e);
    }
}
