//! Test Transaction Producer
//!
//! Publishes synthetic transaction contexts to NATS for end-to-end runs.
//!
//! Usage: test-producer [nats_url] [subject] [count] [fraud_rate] [delay_ms]

use chrono::{Duration as ChronoDuration, Timelike, Utc};
use fraud_risk_orchestrator::types::{DeviceMetadata, MediaRef, TransactionContext};
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

/// Accounts seeded in `data/history.json`
const KNOWN_ACCOUNTS: [&str; 3] = ["acct_0001", "acct_0002", "acct_0003"];

struct ContextGenerator {
    rng: rand::rngs::ThreadRng,
    counter: u64,
}

impl ContextGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            counter: 0,
        }
    }

    fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("tx_{:012}", self.counter)
    }

    /// Ordinary purchase by a known account on a known device
    fn generate_legitimate(&mut self) -> TransactionContext {
        let transaction_id = self.next_id();
        let account = self.random_choice(&KNOWN_ACCOUNTS);
        let amount = self.rng.gen_range(10.0..400.0);
        let currency = self.random_choice(&["USD", "EUR", "GBP"]);
        let now = Utc::now();

        let mut ctx = TransactionContext::new(transaction_id.clone(), account, amount, currency, now)
            .with_device(DeviceMetadata {
                device_id: Some(format!("dev_{}_main", account)),
                channel: Some(self.random_choice(&["online", "mobile", "pos"]).to_string()),
                location: Some(self.random_choice(&["US", "UK", "DE"]).to_string()),
            });

        if self.rng.gen_bool(0.3) {
            ctx = ctx.with_media(MediaRef {
                uri: format!("s3://kyc-uploads/{}.jpg", transaction_id),
                expected_code: Some(format!("{:04}", self.rng.gen_range(0..10_000))),
            });
        }
        ctx
    }

    /// Large night-time transfer from an unseen device, usually with a
    /// biometric sample attached
    fn generate_suspicious(&mut self) -> TransactionContext {
        let transaction_id = self.next_id();
        let account = if self.rng.gen_bool(0.5) {
            self.random_choice(&KNOWN_ACCOUNTS).to_string()
        } else {
            format!("acct_new_{:06}", self.rng.gen_range(0..1_000_000))
        };
        let amount = self.rng.gen_range(2_000.0..15_000.0);
        let hours_back = self.rng.gen_range(0..24);
        let night = (Utc::now() - ChronoDuration::hours(hours_back))
            .with_hour(self.rng.gen_range(1..5))
            .unwrap_or_else(Utc::now);

        let mut ctx = TransactionContext::new(transaction_id.clone(), account, amount, "USD", night)
            .with_device(DeviceMetadata {
                device_id: Some(format!("dev_{:016x}", self.rng.gen::<u64>())),
                channel: Some("online".to_string()),
                location: Some(self.random_choice(&["RU", "NG", "US"]).to_string()),
            });

        if self.rng.gen_bool(0.7) {
            ctx = ctx.with_media(MediaRef {
                uri: format!("s3://kyc-uploads/{}.mp4", transaction_id),
                expected_code: Some(format!("{:04}", self.rng.gen_range(0..10_000))),
            });
        }
        ctx
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("transactions");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let fraud_rate: f64 = args
        .get(4)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.1f64)
        .clamp(0.0, 1.0);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        fraud_rate = fraud_rate,
        delay_ms = delay_ms,
        "Starting test producer"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS; printing samples instead");
            None
        }
    };

    let mut generator = ContextGenerator::new();
    let mut rng = rand::thread_rng();
    let mut suspicious_count = 0u64;

    for i in 0..count {
        let ctx = if rng.gen_bool(fraud_rate) {
            suspicious_count += 1;
            generator.generate_suspicious()
        } else {
            generator.generate_legitimate()
        };

        match &client {
            Some(client) => {
                let payload = serde_json::to_vec(&ctx)?;
                client.publish(subject.to_string(), payload.into()).await?;
            }
            None if i == 0 || (i + 1) % 10 == 0 => {
                info!("Sample context {}:\n{}", i + 1, serde_json::to_string_pretty(&ctx)?);
            }
            None => {}
        }

        if (i + 1) % 10 == 0 {
            info!(
                published = i + 1,
                total = count,
                suspicious = suspicious_count,
                "Progress"
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    if let Some(client) = client {
        client.flush().await?;
    }
    info!(count = count, suspicious = suspicious_count, "Done");
    Ok(())
}
