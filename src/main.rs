use std::io::BufRead;

use anyhow::Context;

use poolgraph::handlers::Outcome;
use poolgraph::{ChainEvent, Config, Dispatcher, StaticPriceSource};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Stream NDJSON events from the configured file, in file order, through the
/// dispatcher. The file is the host's stand-in: one decoded chain event per
/// line, already in canonical chain order.
async fn run(config: Config) -> anyhow::Result<()> {
    let store = poolgraph::init_store(&config.database_path)
        .await
        .context("failed to initialize store")?;

    let dispatcher = Dispatcher::new(
        Box::new(store),
        Box::new(StaticPriceSource::new()),
        config.deployment.lending_core.clone(),
    );

    let file = std::fs::File::open(&config.events_path)
        .with_context(|| format!("failed to open events file {}", config.events_path))?;
    let reader = std::io::BufReader::new(file);

    let mut processed: u64 = 0;
    let mut replayed: u64 = 0;
    for (line_number, line) in reader.lines().enumerate() {
        let line = line.context("failed to read events file")?;
        if line.trim().is_empty() {
            continue;
        }
        let event: ChainEvent = serde_json::from_str(&line)
            .with_context(|| format!("malformed event at line {}", line_number + 1))?;
        match dispatcher
            .process(&event)
            .await
            .with_context(|| format!("event at line {} failed", line_number + 1))?
        {
            Outcome::Processed { .. } => processed += 1,
            Outcome::Replayed => replayed += 1,
        }
    }

    tracing::info!(
        network = %config.network,
        processed,
        replayed,
        "event stream fully applied"
    );
    Ok(())
}
