//! Fraud Risk Orchestrator - Main Entry Point
//!
//! Consumes transaction contexts from NATS, evaluates each one with the
//! scoring agents, and publishes decision records.

use anyhow::Result;
use fraud_risk_orchestrator::{
    agents::{
        deepfake::NatsBiometricModel, DeepfakeDetectionAgent, ScoringAgent,
        TransactionMonitorAgent,
    },
    config::{AppConfig, LoggingConfig},
    consumer::TransactionConsumer,
    evidence::InMemoryHistorySource,
    explanation::TemplateSummarizer,
    metrics::{EvaluationMetrics, MetricsReporter},
    models::OnnxTransactionModel,
    producer::{DecisionProducer, DecisionRecord},
    EvaluationError, InMemoryEscalationStore, RiskOrchestrator,
};
use futures::StreamExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))?
        .add_directive("fraud_risk_orchestrator=info".parse()?);

    if logging.format == "pretty" {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    }
    Ok(())
}

fn load_history(path: Option<&str>) -> Result<InMemoryHistorySource> {
    match path {
        Some(path) if Path::new(path).exists() => {
            let source = InMemoryHistorySource::from_file(path)?;
            info!(path = %path, accounts = source.len(), "Account history loaded");
            Ok(source)
        }
        Some(path) => {
            warn!(path = %path, "History file not found; every account is treated as new");
            Ok(InMemoryHistorySource::new())
        }
        None => Ok(InMemoryHistorySource::new()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("Starting Fraud Risk Orchestrator");
    info!(
        medium = config.fusion.bands.medium,
        high = config.fusion.bands.high,
        critical = config.fusion.bands.critical,
        top_k = config.fusion.top_k,
        "Configuration loaded"
    );

    let metrics = Arc::new(EvaluationMetrics::new());
    let history = Arc::new(load_history(config.evidence.history_file.as_deref())?);

    let transaction_model = Arc::new(OnnxTransactionModel::new(&config.models)?);
    info!(model = %transaction_model.name(), "Transaction model ready");

    let client = async_nats::connect(&config.nats.url).await?;
    info!(url = %config.nats.url, "Connected to NATS");

    let biometric_model = Arc::new(NatsBiometricModel::new(
        client.clone(),
        &config.nats.biometric_subject,
    ));

    let agents: Vec<Arc<dyn ScoringAgent>> = vec![
        Arc::new(TransactionMonitorAgent::new(
            transaction_model,
            config.agents.transaction_monitor_timeout(),
        )),
        Arc::new(DeepfakeDetectionAgent::new(
            biometric_model,
            config.agents.deepfake_timeout(),
        )),
    ];

    let orchestrator = Arc::new(
        RiskOrchestrator::from_config(
            &config,
            history,
            agents,
            Arc::new(InMemoryEscalationStore::new()),
        )
        .with_summarizer(Arc::new(TemplateSummarizer))
        .with_metrics(metrics.clone()),
    );

    let consumer = TransactionConsumer::new(client.clone(), &config.nats.transaction_subject);
    let producer = DecisionProducer::new(client.clone(), &config.nats.decision_subject);

    info!(
        workers = config.pipeline.workers,
        transactions = %consumer.subject(),
        decisions = %producer.subject(),
        "Starting evaluation loop"
    );

    let semaphore = Arc::new(Semaphore::new(config.pipeline.workers));
    let processed_count = Arc::new(AtomicU64::new(0));

    let reporter = MetricsReporter::new(metrics.clone(), 30);
    tokio::spawn(reporter.start());

    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        let permit = semaphore.clone().acquire_owned().await?;

        let orchestrator = orchestrator.clone();
        let producer = producer.clone();
        let processed_count = processed_count.clone();

        tokio::spawn(async move {
            let ctx = match TransactionConsumer::decode(&message.payload) {
                Ok(ctx) => ctx,
                Err(e) => {
                    warn!(error = %e, "Dropping undecodable message");
                    return;
                }
            };

            let record = match orchestrator.evaluate(&ctx).await {
                Ok(evaluation) => Some(DecisionRecord::from_evaluation(evaluation)),
                Err(e @ EvaluationError::Escalation { .. }) => {
                    let current = orchestrator.replay(&ctx.transaction_id).await.ok().flatten();
                    DecisionRecord::from_rejection(&e, current)
                }
                Err(_) => None,
            };

            if let Some(record) = record {
                if let Err(e) = producer.publish(&record).await {
                    error!(
                        transaction_id = %record.transaction_id,
                        error = %e,
                        "Failed to publish decision record"
                    );
                } else {
                    debug!(
                        transaction_id = %record.transaction_id,
                        band = %record.verdict.band,
                        "Decision published"
                    );
                }
            }

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 {
                info!(processed = count, "Processing milestone");
            }

            drop(permit);
        });
    }

    info!("Orchestrator shutting down");
    metrics.print_summary();

    Ok(())
}
