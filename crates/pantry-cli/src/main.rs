//! Single binary for every pipeline stage. Which stage a process runs is
//! selected by subcommand, grounded on the teacher's `rootsignal-server`
//! binary (one process, `clap::Parser` config path, `tracing_subscriber`
//! startup) generalized from "one server" to "one worker per queue" —
//! the same binary is deployed four times, once per [`pantry_domain::JobType`].

mod stages;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pantry_aligner::HsdsAligner;
use pantry_config::Config;
use pantry_geocoding::{GeocodingProviderSet, HttpGeocodingProvider, ProviderKind};
use pantry_llm::{AnthropicClient, LLMClientSet, LlmClient, OpenAiClient};
use pantry_queue::QueueBus;
use pantry_reconciler::Reconciler;
use pantry_recorder::Recorder;
use pantry_validator::ValidatorEnricher;
use pantry_worker::{StageHandler, Worker, WorkerConfig};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use stages::{LlmStage, RecorderStage, ReconcilerStage, ValidatorStage};

/// Default base URLs for the geocoding providers `pantry-geocoding` knows
/// how to speak to. `pantry-geocoding` itself is provider-agnostic about
/// endpoints; wiring them to real public APIs is a deployment concern.
fn default_base_url(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::ArcGis => "https://geocode.arcgis.com/arcgis/rest/services/World/GeocodeServer",
        ProviderKind::Census => "https://geocoding.geo.census.gov/geocoder",
        ProviderKind::Nominatim => "https://nominatim.openstreetmap.org",
    }
}

#[derive(Parser)]
#[command(name = "pantry", about = "Pantry Pirate Radio pipeline worker", version)]
struct Cli {
    /// Port the /livez and /readyz probes are served on.
    #[arg(long, env = "HEALTH_PORT", default_value_t = 8080)]
    health_port: u16,

    /// Max concurrent jobs this process processes at once.
    #[arg(long, env = "WORKER_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the LLM alignment stage: raw content in, an HSDS draft out.
    Llm,
    /// Run the validation/enrichment stage: geocodes and scores a draft.
    Validator,
    /// Run the reconciliation stage: matches and merges into canonical rows.
    Reconciler,
    /// Run the recorder stage: archives finished job results to disk.
    Recorder,
    /// Apply pending database migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;
    config.log_redacted();

    if matches!(cli.command, Commands::Migrate) {
        let pool = sqlx::PgPool::connect(&config.database_url).await.context("connecting to postgres")?;
        sqlx::migrate!("../../migrations").run(&pool).await.context("running migrations")?;
        tracing::info!("migrations applied");
        return Ok(());
    }

    let queue = Arc::new(
        QueueBus::connect(&config.redis_url, config.queue_max_attempts, Duration::from_secs(config.result_ttl_s))
            .await
            .context("connecting to redis queue")?,
    );

    let worker_config = WorkerConfig {
        concurrency: cli.concurrency,
        visibility_timeout: config.queue_visibility_timeout(),
        highwater: config.queue_highwater,
        ..WorkerConfig::default()
    };

    match cli.command {
        Commands::Llm => {
            let llm_client: Arc<dyn LlmClient> = build_llm_client(&config);
            let llm_set = Arc::new(LLMClientSet::new(
                llm_client,
                config.llm_max_retries,
                Duration::from_secs(config.llm_quota_base_delay_s),
                Duration::from_secs(config.llm_quota_max_delay_s),
                config.llm_quota_backoff_mult,
            ));
            let aligner = HsdsAligner::new(llm_set, config.align_min_confidence as f32, config.align_max_retries);
            let handler = Arc::new(LlmStage::new(aligner, queue.clone()));
            run_stage(queue, handler, worker_config, vec!["validator".to_string()], cli.health_port).await
        }
        Commands::Validator => {
            let geocoding = Arc::new(build_geocoding_set(&config));
            let enricher = ValidatorEnricher::new(
                geocoding,
                config.validation_verified_threshold,
                config.validation_rejection_threshold,
                &config.validation_test_patterns,
                &config.validation_placeholder_patterns,
            )
            .context("compiling validation pattern lists")?;
            let handler = Arc::new(ValidatorStage::new(enricher, queue.clone()));
            run_stage(
                queue,
                handler,
                worker_config,
                vec!["reconciler".to_string(), "recorder".to_string()],
                cli.health_port,
            )
            .await
        }
        Commands::Reconciler => {
            let pool = sqlx::PgPool::connect(&config.database_url).await.context("connecting to postgres")?;
            let reconciler = Reconciler::new(
                pool,
                config.org_proximity_threshold,
                config.location_coord_tolerance,
                config.validation_rejection_threshold,
                config.db_max_retries,
            );
            let handler = Arc::new(ReconcilerStage::new(reconciler));
            run_stage(queue, handler, worker_config, vec![], cli.health_port).await
        }
        Commands::Recorder => {
            let recorder = Recorder::new(config.archive_root.clone());
            let handler = Arc::new(RecorderStage::new(recorder));
            run_stage(queue, handler, worker_config, vec![], cli.health_port).await
        }
        Commands::Migrate => unreachable!("handled above before the queue connects"),
    }
}

fn build_llm_client(config: &Config) -> Arc<dyn LlmClient> {
    match config.llm_provider.as_str() {
        "openai" => Arc::new(OpenAiClient::new(config.llm_api_key.clone(), config.llm_model.clone())),
        _ => Arc::new(AnthropicClient::new(config.llm_api_key.clone(), config.llm_model.clone())),
    }
}

fn build_geocoding_set(config: &Config) -> GeocodingProviderSet {
    let http = reqwest::Client::builder().timeout(config.geocoding_timeout()).build().expect("reqwest client");

    let providers = config
        .geocoding_providers
        .iter()
        .filter_map(|name| {
            let kind = ProviderKind::from_name(name)?;
            let provider: Arc<dyn pantry_geocoding::GeocodingProvider> =
                Arc::new(HttpGeocodingProvider::new(kind, http.clone(), default_base_url(kind)));
            Some(provider)
        })
        .collect();

    GeocodingProviderSet::new(
        providers,
        Duration::from_secs(config.geocoding_cache_ttl_s),
        config.geocoding_breaker_threshold,
        Duration::from_secs(config.geocoding_breaker_cooldown_s),
        config.geocoding_max_attempts,
        Duration::from_millis(200),
    )
}

/// Runs one stage's [`Worker`] alongside its health-probe server until
/// Ctrl-C, then lets the worker drain in-flight jobs before returning.
async fn run_stage<H: StageHandler + 'static>(
    queue: Arc<QueueBus>,
    handler: Arc<H>,
    config: WorkerConfig,
    downstream_queues: Vec<String>,
    health_port: u16,
) -> Result<()> {
    let worker = Worker::new(queue, handler, config, downstream_queues);
    let health = worker.health();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let addr = SocketAddr::from(([0, 0, 0, 0], health_port));
    let listener = tokio::net::TcpListener::bind(addr).await.context("binding health probe listener")?;
    let health_router = pantry_worker::health::router(health, Duration::from_secs(30));
    let health_server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, health_router).await {
            tracing::warn!(%err, "health probe server exited");
        }
    });

    let worker_run = tokio::spawn(async move { worker.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutdown signal received, draining in-flight jobs");
    let _ = shutdown_tx.send(true);

    worker_run.await.context("worker task panicked")?.context("worker run failed")?;
    health_server.abort();
    Ok(())
}
