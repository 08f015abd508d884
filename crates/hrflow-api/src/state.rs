//! Application state wiring the engine and dispatcher together.
//!
//! The engine and dispatcher are generic over repository and sink traits;
//! AppState pins them to the SQLite adapters and the configured sink.

use std::path::PathBuf;
use std::sync::Arc;

use hrflow_core::event::bus::EventBus;
use hrflow_core::workflow::dispatch::NotificationDispatcher;
use hrflow_core::workflow::engine::Engine;
use hrflow_infra::config;
use hrflow_infra::sink::ConfiguredSink;
use hrflow_infra::sqlite::outbox::SqliteOutboxRepository;
use hrflow_infra::sqlite::pool::DatabasePool;
use hrflow_infra::sqlite::workflow::SqliteWorkflowRepository;

pub type ConcreteEngine = Engine<SqliteWorkflowRepository, SqliteOutboxRepository>;

pub type ConcreteDispatcher = NotificationDispatcher<SqliteOutboxRepository, ConfiguredSink>;

/// Shared application state, used by both CLI commands and HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub dispatcher: Arc<ConcreteDispatcher>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Open state in the configured data directory.
    pub async fn init() -> anyhow::Result<Self> {
        Self::open(config::data_dir()).await
    }

    /// Open state rooted at `data_dir`: load `hrflow.toml`, open the
    /// database, and wire engine, sink, and dispatcher.
    pub async fn open(data_dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;

        let engine_config = config::load_config(&data_dir).await;
        let db_pool = DatabasePool::new(&config::database_url(&data_dir)).await?;

        let outbox = SqliteOutboxRepository::new(db_pool.clone());
        let event_bus = EventBus::new(engine_config.event_bus_capacity);
        let sink = ConfiguredSink::from_url(engine_config.webhook_url.as_deref())?;
        let dispatch_config = engine_config.dispatch.clone();

        let engine = Engine::new(
            SqliteWorkflowRepository::new(db_pool),
            outbox.clone(),
            engine_config,
            event_bus.clone(),
        );
        let dispatcher = NotificationDispatcher::new(
            outbox,
            sink,
            dispatch_config,
            event_bus,
            engine.dispatch_signal(),
        );

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");

        Ok(Self {
            engine: Arc::new(engine),
            dispatcher: Arc::new(dispatcher),
            data_dir,
        })
    }
}
