//! Ingestion pipeline demonstration
//!
//! Ingests a small listening history into an in-memory database, first
//! directly and then through the task server.
//!
//! Run with:
//! ```bash
//! # Pretty format (default in debug)
//! cargo run -p core-indexing --example ingest_demo
//!
//! # JSON format with a custom filter
//! cargo run -p core-indexing --example ingest_demo -- json "core_indexing=debug,core_library=debug"
//! ```

use async_trait::async_trait;
use core_indexing::{
    open_store, IndexUserHandler, Indexer, IndexingError, RawPlay, ScrobbleSource, TaskServer,
    TestTaskHandler,
};
use core_runtime::config::{IndexerConfig, WorkerConfig};
use core_runtime::events::{CoreEvent, EventBus, EventStream};
use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Source serving a fixed history for every user
struct FixedSource {
    plays: Vec<RawPlay>,
}

#[async_trait]
impl ScrobbleSource for FixedSource {
    async fn fetch_plays(&self, _username: &str, _token: &str) -> core_indexing::Result<Vec<RawPlay>> {
        Ok(self.plays.clone())
    }
}

fn history() -> Vec<RawPlay> {
    vec![
        RawPlay::new("Boards of Canada", Some("Geogaddi"), "Julie and Candy", 1_700_000_000),
        RawPlay::new("Boards of Canada", Some("Geogaddi"), "Dawn Chorus", 1_700_000_300),
        RawPlay::new("Boards of Canada", Some("Geogaddi"), "Dawn Chorus", 1_700_000_600),
        RawPlay::new("Burial", None, "Archangel", 1_700_000_900),
    ]
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    let format = match args.get(1).map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::default(),
    };

    let mut logging = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Info)
        .with_spans(true);
    if let Some(filter) = args.get(2) {
        logging = logging.with_filter(filter.clone());
    }
    init_logging(logging).expect("Failed to initialize logging");

    if let Err(e) = run().await {
        error!(error = %e, "Demo failed");
    }
}

async fn run() -> Result<(), IndexingError> {
    let config = IndexerConfig::builder()
        .database_path(":memory:")
        .chunk_size(2)
        .worker(WorkerConfig::new("ingest", 4))
        .poll_interval(Duration::from_millis(50))
        .build()
        .map_err(|e| IndexingError::InvalidInput {
            field: "config".to_string(),
            message: e.to_string(),
        })?;

    let pool = open_store(&config).await?;
    let source = Arc::new(FixedSource { plays: history() });
    let indexer = Arc::new(Indexer::from_config(pool.clone(), &config).with_source(source));

    let summary = indexer.ingest_plays("flicker", &history()).await?;
    info!(?summary, "Direct ingestion finished");

    let events = EventBus::default();
    let mut stream = EventStream::new(events.subscribe())
        .filter(|event| matches!(event, CoreEvent::Indexing(_)));

    let mut server = TaskServer::connect(pool, &config, events).await?;
    server.register(Arc::new(IndexUserHandler::new(indexer)));
    server.register(Arc::new(TestTaskHandler));
    server.launch_workers();

    server.send_test_task("hello from the demo", "t0k3n").await?;
    server.send_index_user_task("flicker", "t0k3n").await?;

    match tokio::time::timeout(Duration::from_secs(5), stream.recv()).await {
        Ok(Ok(event)) => info!(event = event.description(), "Background ingestion finished"),
        _ => error!("No indexing event within 5 seconds"),
    }

    server.shutdown().await;
    info!(stats = ?server.stats().await?, "Queue drained");
    Ok(())
}
