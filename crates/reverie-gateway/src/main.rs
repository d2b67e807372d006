use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{info, warn};

use reverie_embedding::{Embedder, EmbeddingWorker, WorkerEmbedder};
use reverie_jobs::queue::QueueLane;
use reverie_jobs::{JobQueue, JobRepo, RedisJobQueue, RedisResultStore, ResultStore};
use reverie_memory::directory::PgUserDirectory;
use reverie_memory::{MemoryStore, UserDirectory};
use reverie_settings::{CacheInvalidate, LlmConfigResolver, PersonaResolver, SettingsStore};
use reverie_workers::audio::HttpTranscriber;
use reverie_workers::image::HttpVisionDescriber;
use reverie_workers::import::ImportProcessor;
use reverie_workers::pool::{run_pool, GenerationHandler, PreprocessingHandler};
use reverie_workers::{GenerationWorker, OpenAiCompatProvider, ReasoningRules};

mod app;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reverie_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path > REVERIE_CONFIG env > ~/.reverie/reverie.toml
    let config_path = std::env::var("REVERIE_CONFIG").ok();
    let config = reverie_core::ReverieConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        reverie_core::ReverieConfig::default()
    });

    // ── storage ───────────────────────────────────────────────────────────────
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    reverie_memory::db::init_db(&pool).await?;
    PgUserDirectory::init_db(&pool).await?;
    SettingsStore::init_db(&pool).await?;
    PersonaResolver::init_db(&pool).await?;
    JobRepo::init_db(&pool).await?;

    let redis_client = redis::Client::open(config.redis.url.as_str())?;
    let redis_manager = redis::aio::ConnectionManager::new(redis_client.clone()).await?;

    // ── embedding worker process ──────────────────────────────────────────────
    let embedder: Arc<dyn Embedder> = match EmbeddingWorker::spawn(&config.embedding).await {
        Ok(worker) => Arc::new(WorkerEmbedder::new(worker)),
        Err(e) => {
            // Degrade: retrieval and duplicate detection are disabled, the
            // pipeline itself stays up.
            warn!(err = %e, "embedding worker unavailable; starting degraded");
            Arc::new(NullEmbedder)
        }
    };

    // ── collaborators ─────────────────────────────────────────────────────────
    let queue_impl = RedisJobQueue::new(redis_manager.clone());
    queue_impl.ensure_groups().await?;
    let queue: Arc<dyn JobQueue> = Arc::new(queue_impl);
    let results: Arc<dyn ResultStore> = Arc::new(RedisResultStore::new(redis_manager.clone()));
    let repo = Arc::new(JobRepo::new(pool.clone()));
    let memory = Arc::new(MemoryStore::new(pool.clone(), Arc::clone(&embedder)));
    let directory: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::new(pool.clone()));
    let settings = Arc::new(LlmConfigResolver::with_ttl(
        SettingsStore::new(pool.clone()),
        Duration::from_secs(config.memory.settings_cache_ttl_secs),
    ));
    let personas = Arc::new(PersonaResolver::new(
        pool.clone(),
        Duration::from_secs(config.memory.settings_cache_ttl_secs),
    ));
    let provider = Arc::new(OpenAiCompatProvider::new(
        config.llm.api_key.clone(),
        config.llm.base_url.clone(),
    ));
    let reasoning = ReasoningRules::load(config.llm.reasoning_rules_path.as_deref());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── background loops ──────────────────────────────────────────────────────
    tokio::spawn(reverie_memory::run_outbox_sweeper(
        Arc::clone(&memory),
        config.memory.outbox_drain_secs,
        shutdown_rx.clone(),
    ));
    tokio::spawn(reverie_jobs::run_stuck_job_sweeper(
        Arc::clone(&repo),
        shutdown_rx.clone(),
    ));
    tokio::spawn(reverie_settings::run_cache_sweeper(
        Arc::clone(&settings),
        shutdown_rx.clone(),
    ));
    tokio::spawn(reverie_settings::run_persona_cache_sweeper(
        Arc::clone(&personas),
        shutdown_rx.clone(),
    ));
    let sinks: Vec<Arc<dyn CacheInvalidate>> = vec![
        Arc::clone(&settings) as Arc<dyn CacheInvalidate>,
        Arc::clone(&personas) as Arc<dyn CacheInvalidate>,
    ];
    tokio::spawn(reverie_settings::run_invalidation_listener(
        redis_client,
        sinks,
        shutdown_rx.clone(),
    ));

    // ── worker pools ──────────────────────────────────────────────────────────
    let preprocessing = Arc::new(PreprocessingHandler {
        transcriber: Arc::new(HttpTranscriber::new(
            config.llm.base_url.clone(),
            config.llm.api_key.clone(),
            config.llm.transcription_model.clone(),
        )),
        describer: Arc::new(HttpVisionDescriber::new(
            config.llm.base_url.clone(),
            config.llm.api_key.clone(),
        )),
        importer: ImportProcessor::new(),
        results: Arc::clone(&results),
        repo: Arc::clone(&repo),
        image_fanout: config.workers.image_fanout,
        fallback_vision_model: config.llm.fallback_vision_model.clone(),
    });
    tokio::spawn(run_pool(
        Arc::clone(&queue),
        QueueLane::Preprocessing,
        preprocessing,
        config.workers.preprocessing_concurrency,
        "preprocessing".to_string(),
        shutdown_rx.clone(),
    ));

    let generation_worker = Arc::new(GenerationWorker::new(
        provider,
        Arc::clone(&embedder),
        Arc::clone(&memory),
        Arc::clone(&settings),
        Arc::clone(&results),
        Arc::clone(&repo),
        Arc::clone(&directory),
        Arc::clone(&personas),
        reasoning,
        Duration::from_secs(config.workers.dependency_wait_secs),
    ));
    let generation = Arc::new(GenerationHandler {
        worker: generation_worker,
        repo: Arc::clone(&repo),
    });
    tokio::spawn(run_pool(
        Arc::clone(&queue),
        QueueLane::Generation,
        generation,
        config.workers.generation_concurrency,
        "generation".to_string(),
        shutdown_rx.clone(),
    ));

    // ── HTTP surface ──────────────────────────────────────────────────────────
    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config, queue, repo, embedder));
    let router = app::build_router(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Reverie gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Stop sweepers, pools, and the dedup cache on the way out.
    let _ = shutdown_tx.send(true);
    state.dedup.dispose();
    info!("shutdown complete");
    Ok(())
}

/// Stand-in embedder used when the worker process failed to start.
/// Every embed degrades to `None`; health reports the model unloaded.
struct NullEmbedder;

#[async_trait::async_trait]
impl Embedder for NullEmbedder {
    async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }

    async fn health(&self) -> reverie_embedding::EmbeddingHealth {
        reverie_embedding::EmbeddingHealth {
            model_loaded: false,
        }
    }

    fn is_ready(&self) -> bool {
        false
    }
}
