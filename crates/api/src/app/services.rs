//! Infrastructure wiring: stores, submission service, job pipeline.
//!
//! Without `REDIS_URL` the cache and the job queue are in-process; the
//! relational store and object storage are always real (SQLite file, local
//! directory) unless a test builds `AppServices` from its own `Backends`.

use std::sync::Arc;

use anyhow::Context;

use safework_ai::{HttpCompletionClient, TextCompletion};
use safework_core::{SharedClock, SystemClock};
use safework_infra::cache::{InMemoryKvStore, KvStore};
use safework_infra::db::{Database, run_migrations};
use safework_infra::jobs::{
    CleanupScheduler, ConsumerConfig, ConsumerHandle, InMemoryQueue, JobContext, JobDispatcher, MessageQueue,
    QueueConsumer, SchedulerHandle,
};
use safework_infra::storage::{LocalObjectStore, ObjectStore};
use safework_infra::surveys::{AuditLog, SubmissionService, SurveyRepository};
use safework_infra::{AppConfig, PipelineMetrics, StatisticsAggregator};

/// The adapters a service graph is built from.
pub struct Backends {
    pub database: Database,
    pub cache: Arc<dyn KvStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn MessageQueue>,
    pub ai: Arc<dyn TextCompletion>,
    pub clock: SharedClock,
}

pub struct AppServices {
    pub config: AppConfig,
    pub database: Database,
    pub submissions: SubmissionService,
    pub stats: StatisticsAggregator,
    pub cache: Arc<dyn KvStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn MessageQueue>,
    pub metrics: Arc<PipelineMetrics>,
    pub clock: SharedClock,
    pub jobs: Arc<JobContext>,
}

impl AppServices {
    pub fn from_backends(config: AppConfig, backends: Backends) -> Self {
        let Backends {
            database,
            cache,
            storage,
            queue,
            ai,
            clock,
        } = backends;
        let metrics = Arc::new(PipelineMetrics::new());

        let submissions = SubmissionService::new(
            SurveyRepository::new(database.clone()),
            AuditLog::new(database.clone()),
            cache.clone(),
            clock.clone(),
            metrics.clone(),
            config.mirror_ttl,
        );
        let stats = StatisticsAggregator::new(database.clone(), clock.clone(), config.stats_window_days);
        let jobs = Arc::new(JobContext {
            surveys: SurveyRepository::new(database.clone()),
            cache: cache.clone(),
            storage: storage.clone(),
            ai,
            clock: clock.clone(),
            settings: config.job_settings(),
        });

        Self {
            config,
            database,
            submissions,
            stats,
            cache,
            storage,
            queue,
            metrics,
            clock,
            jobs,
        }
    }

    pub fn dispatcher(&self) -> JobDispatcher {
        JobDispatcher::with_default_handlers(self.jobs.clone())
    }

    /// Start the embedded queue consumer and the cleanup scheduler.
    pub fn spawn_workers(&self) -> Workers {
        let consumer = QueueConsumer::new(
            self.queue.clone(),
            self.dispatcher(),
            self.metrics.clone(),
            ConsumerConfig::default()
                .with_name("safework-jobs")
                .with_batch_size(self.config.queue_batch_size)
                .with_poll_interval(self.config.queue_poll_interval),
        )
        .spawn();
        let scheduler =
            CleanupScheduler::new(self.queue.clone(), self.clock.clone(), self.config.cleanup_interval).spawn();
        Workers { consumer, scheduler }
    }
}

pub struct Workers {
    pub consumer: ConsumerHandle,
    pub scheduler: SchedulerHandle,
}

impl Workers {
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
        self.consumer.shutdown().await;
    }
}

/// Connect every backend named by `config` and run migrations.
pub async fn build_services(config: AppConfig) -> anyhow::Result<AppServices> {
    let database = Database::connect(&config.database_url)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;
    run_migrations(&database).await.context("schema migration failed")?;

    let clock = SystemClock::shared();
    let storage: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(config.storage_dir.clone()));
    let ai: Arc<dyn TextCompletion> =
        Arc::new(HttpCompletionClient::from_env().context("invalid AI client configuration")?);
    let (cache, queue) = connect_cache_and_queue(&config).await?;

    Ok(AppServices::from_backends(
        config,
        Backends {
            database,
            cache,
            storage,
            queue,
            ai,
            clock,
        },
    ))
}

#[cfg(feature = "redis")]
async fn connect_cache_and_queue(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn KvStore>, Arc<dyn MessageQueue>)> {
    use std::time::Duration;

    use safework_infra::cache::RedisKvStore;
    use safework_infra::jobs::RedisStreamsQueue;

    let Some(redis_url) = config.redis_url.as_deref() else {
        return Ok(in_process_cache_and_queue(config));
    };
    let cache = RedisKvStore::connect(redis_url, "safework")
        .await
        .context("failed to connect Redis cache")?;
    let consumer = format!("consumer-{}", uuid::Uuid::now_v7());
    let queue = RedisStreamsQueue::connect(redis_url, consumer, config.retry_policy(), Duration::from_secs(60))
        .await
        .context("failed to connect Redis Streams queue")?;
    tracing::info!("using Redis cache and Redis Streams job queue");
    Ok((Arc::new(cache), Arc::new(queue)))
}

#[cfg(not(feature = "redis"))]
async fn connect_cache_and_queue(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn KvStore>, Arc<dyn MessageQueue>)> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the `redis` feature is disabled; using in-process cache and queue");
    }
    Ok(in_process_cache_and_queue(config))
}

fn in_process_cache_and_queue(config: &AppConfig) -> (Arc<dyn KvStore>, Arc<dyn MessageQueue>) {
    (
        Arc::new(InMemoryKvStore::new()),
        Arc::new(InMemoryQueue::new(config.retry_policy())),
    )
}
