//! Dispatch of ingestion jobs out of the request path

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use uuid::Uuid;

use super::ingestion::{IngestionService, SYSTEM_ACTOR};

// Environment variable names
const ENV_REDIS_HOST: &str = "RISK_INTEL_REDIS_HOST";
const ENV_REDIS_PORT: &str = "RISK_INTEL_REDIS_PORT";
const ENV_REDIS_PASSWORD: &str = "RISK_INTEL_REDIS_PASSWORD";
const ENV_REDIS_DB: &str = "RISK_INTEL_REDIS_DB";

// Default values
const DEFAULT_REDIS_HOST: &str = "127.0.0.1";
const DEFAULT_REDIS_PORT: &str = "6379";
const DEFAULT_REDIS_DB: &str = "0";

const QUEUE_KEY: &str = "ingestion:queue";
const PROCESSING_KEY: &str = "ingestion:processing";

/// Seconds a worker blocks waiting for the next job
const POLL_TIMEOUT_SECS: f64 = 5.0;
const ERROR_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum QueueError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),
}

/// Hands a job id to whatever runs ingestions in the background
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn submit(&self, job_id: Uuid) -> Result<(), QueueError>;
}

/// Runs each job on a tokio task in this process
pub struct InProcessDispatcher {
    ingestion: Arc<IngestionService>,
}

impl InProcessDispatcher {
    pub fn new(ingestion: Arc<IngestionService>) -> Self {
        Self { ingestion }
    }
}

#[async_trait]
impl JobDispatcher for InProcessDispatcher {
    async fn submit(&self, job_id: Uuid) -> Result<(), QueueError> {
        let ingestion = Arc::clone(&self.ingestion);
        tokio::spawn(async move {
            if let Err(e) = ingestion.process(job_id, SYSTEM_ACTOR).await {
                tracing::error!(job_id = %job_id, error = %e, "Background ingestion failed");
            }
        });
        tracing::debug!(job_id = %job_id, "Spawned in-process ingestion");
        Ok(())
    }
}

/// Reliable Redis list queue
///
/// Workers move an entry atomically from the queue into a processing list
/// and remove it only after the job reached a terminal state, so a crashed
/// worker's entries are delivered again when a worker next starts. A
/// redelivered job whose processing lease is still held by another worker
/// is skipped and acknowledged by the receiving worker.
#[derive(Clone)]
pub struct RedisJobQueue {
    client: Client,
}

impl RedisJobQueue {
    /// Connect and verify the server answers
    ///
    /// Configuration via environment variables:
    /// - `RISK_INTEL_REDIS_HOST` - Redis host (default: 127.0.0.1)
    /// - `RISK_INTEL_REDIS_PORT` - Redis port (default: 6379)
    /// - `RISK_INTEL_REDIS_PASSWORD` - Redis password (default: none)
    /// - `RISK_INTEL_REDIS_DB` - Redis database number (default: 0)
    pub async fn new() -> Result<Self, QueueError> {
        let host = env::var(ENV_REDIS_HOST).unwrap_or_else(|_| DEFAULT_REDIS_HOST.to_string());
        let port = env::var(ENV_REDIS_PORT).unwrap_or_else(|_| DEFAULT_REDIS_PORT.to_string());
        let password = env::var(ENV_REDIS_PASSWORD).ok();
        let db = env::var(ENV_REDIS_DB).unwrap_or_else(|_| DEFAULT_REDIS_DB.to_string());

        let redis_url = match password {
            Some(pwd) if !pwd.is_empty() => format!("redis://:{}@{}:{}/{}", pwd, host, port, db),
            _ => format!("redis://{}:{}/{}", host, port, db),
        };

        tracing::debug!(host = %host, port = %port, db = %db, "Connecting to Redis");

        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        tracing::info!(host = %host, port = %port, "Redis job queue connected");

        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Move entries left in the processing list back onto the queue
    pub async fn requeue_stale(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let mut moved = 0;
        loop {
            let entry: Option<String> = redis::cmd("LMOVE")
                .arg(PROCESSING_KEY)
                .arg(QUEUE_KEY)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await?;
            if entry.is_none() {
                break;
            }
            moved += 1;
        }

        if moved > 0 {
            tracing::warn!(count = moved, "Requeued unacknowledged ingestion jobs");
        }
        Ok(moved)
    }

    /// Block until a job is available or the poll timeout passes
    async fn next(&self, conn: &mut MultiplexedConnection) -> Result<Option<String>, QueueError> {
        let entry: Option<String> = redis::cmd("BLMOVE")
            .arg(QUEUE_KEY)
            .arg(PROCESSING_KEY)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(POLL_TIMEOUT_SECS)
            .query_async(conn)
            .await?;
        Ok(entry)
    }

    async fn ack(&self, conn: &mut MultiplexedConnection, entry: &str) -> Result<(), QueueError> {
        let _: i64 = conn.lrem(PROCESSING_KEY, 1, entry).await?;
        Ok(())
    }
}

#[async_trait]
impl JobDispatcher for RedisJobQueue {
    async fn submit(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.lpush(QUEUE_KEY, job_id.to_string()).await?;
        tracing::debug!(job_id = %job_id, "Queued ingestion job");
        Ok(())
    }
}

/// Drain the Redis queue forever, one job at a time
pub async fn run_worker(queue: RedisJobQueue, ingestion: Arc<IngestionService>) {
    if let Err(e) = queue.requeue_stale().await {
        tracing::warn!(error = %e, "Failed to requeue stale ingestion jobs");
    }

    tracing::info!("Ingestion worker started");

    let mut conn: Option<MultiplexedConnection> = None;
    loop {
        let active = match conn.as_mut() {
            Some(active) => active,
            None => match queue.connection().await {
                Ok(fresh) => conn.insert(fresh),
                Err(e) => {
                    tracing::warn!(error = %e, "Worker cannot reach Redis");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    continue;
                }
            },
        };

        let entry = match queue.next(active).await {
            Ok(Some(entry)) => entry,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to poll ingestion queue");
                conn = None;
                tokio::time::sleep(ERROR_BACKOFF).await;
                continue;
            }
        };

        match Uuid::parse_str(&entry) {
            Ok(job_id) => match ingestion.process(job_id, SYSTEM_ACTOR).await {
                Ok(job) => {
                    tracing::info!(job_id = %job_id, status = %job.status, "Worker finished job");
                }
                Err(e) => {
                    // left unacknowledged so a later worker start retries it
                    tracing::error!(job_id = %job_id, error = %e, "Worker could not record job outcome");
                    continue;
                }
            },
            Err(_) => {
                tracing::warn!(entry = %entry, "Dropping malformed queue entry");
            }
        }

        if let Err(e) = queue.ack(active, &entry).await {
            tracing::warn!(error = %e, "Failed to acknowledge ingestion job");
        }
    }
}
