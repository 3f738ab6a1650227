use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::watch;
use tokio::time::{Duration, sleep, timeout};
use tracing::{info, warn};

use courier_core::domain::{Envelope, HandlerError, Message};
use courier_core::telemetry::init_tracing;
use courier_core::typed::{Handler, MessageCodec};
use courier_core::{QueueClient, RegistryBuilder, RegistryConfig};

#[derive(Debug, Parser)]
#[command(name = "courier", about = "Ping/Pong demo for the courier message queue")]
struct Args {
    /// TOML file with registry settings (retry_count, whitelist, backoff).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of Ping messages to publish.
    #[arg(long, default_value_t = 3)]
    messages: u32,

    /// Fail this many handler calls before succeeding.
    #[arg(long, default_value_t = 0)]
    fail_first: u32,

    /// Give up waiting for the pings to settle after this many seconds.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ping {
    text: String,
}

impl Message for Ping {
    const TYPE: &'static str = "Ping";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Pong {
    echo: String,
}

impl Message for Pong {
    const TYPE: &'static str = "Pong";
}

struct PingHandler {
    remaining_failures: AtomicU32,
}

impl PingHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<Ping> for PingHandler {
    type Response = Pong;

    async fn handle(&self, envelope: Envelope<Ping>) -> Result<Option<Pong>, HandlerError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(HandlerError::retryable(format!("intentional failure (left={left})")));
        }
        Ok(Some(Pong {
            echo: envelope.body.text,
        }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    // (A) config + registry
    let config = match &args.config {
        Some(path) => RegistryConfig::load(path)?,
        None => RegistryConfig::default(),
    };
    let client = QueueClient::in_memory();
    let registry = RegistryBuilder::new(client.clone())
        .config(config)
        .register::<Ping, _>(PingHandler::new(args.fail_first))?
        .expect_types(&[Ping::TYPE])
        .build()?;
    let registry = Arc::new(registry);

    // (B) supervisor: drains whenever Ping.inq receives a message
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let arrivals = client.store().subscribe();
    let supervisor = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.supervise(arrivals, shutdown_rx).await })
    };

    // (C) publish
    for i in 0..args.messages {
        let id = client.publish(Ping {
            text: format!("ping #{i}"),
        })?;
        println!("published: id={id}");
    }
    info!(messages = args.messages, "pings published");

    // (D) wait until every Ping was processed or dead-lettered; replies may be
    // dropped by the whitelist, so count handler stats rather than Pongs
    let expected = args.messages as u64;
    let settle = async {
        loop {
            let processed = registry.stats().total_messages_processed;
            let dead = client.store().len("Ping.dlq") as u64;
            if processed + dead >= expected {
                return (processed, dead);
            }
            sleep(Duration::from_millis(20)).await;
        }
    };
    match timeout(Duration::from_secs(args.timeout_secs), settle).await {
        Ok((processed, dead)) => info!(processed, dead, "pings settled"),
        Err(_) => warn!(timeout_secs = args.timeout_secs, "gave up waiting for pings to settle"),
    }

    while let Some(pong) = client.get::<Pong>("Pong.inq")? {
        println!("reply: {} (reply_id={:?})", pong.body.echo, pong.reply_id.map(|id| id.to_string()));
    }
    while let Some(bytes) = client.poll("Ping.dlq") {
        let (type_name, dead) = MessageCodec::decode_untyped(&bytes)?;
        println!("dead-lettered {type_name}: {}", serde_json::to_string(&dead)?);
    }

    // (E) graceful shutdown
    info!("shutting down supervisor");
    shutdown_tx.send(true)?;
    supervisor.await?;
    println!("{}", registry.stats_description());
    Ok(())
}
