//! Job queue over Redis Streams.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;

const DEDUP_TTL_SECS: u64 = 3600;
const RETRY_TTL_SECS: i64 = 86400;

/// Consumer-side contract the worker depends on.
///
/// One production implementation (`JobQueue` over Redis Streams) plus test
/// doubles; the executor never sees the broker transport.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Prepare the source for consumption (idempotent).
    async fn init(&self) -> QueueResult<()>;

    /// Read at most `count` new messages for a named consumer, blocking up
    /// to `block_ms`.
    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>>;

    /// Take over messages left pending by a dead consumer.
    async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>>;

    /// Settle a message as successfully processed.
    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    /// Give up on a message and park it on the dead-letter stream.
    async fn dlq(&self, message_id: &str, job: &QueueJob, error: &str) -> QueueResult<()>;

    /// Record one failed delivery; returns the updated count.
    async fn increment_retry(&self, message_id: &str) -> QueueResult<u32>;

    /// Allow an identical job to be enqueued again.
    async fn clear_dedup(&self, job: &QueueJob) -> QueueResult<()>;

    /// Delivery attempts before a message is dead-lettered.
    fn max_retries(&self) -> u32;
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Max delivery attempts before DLQ
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "renderq:jobs".to_string(),
            consumer_group: "renderq:workers".to_string(),
            dlq_stream_name: "renderq:dlq".to_string(),
            max_retries: 3,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
        }
    }
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a job. Duplicate submissions within the dedup window are
    /// rejected by idempotency key.
    pub async fn enqueue(&self, job: &QueueJob) -> QueueResult<String> {
        let mut conn = self.conn().await?;

        let payload = serde_json::to_string(job)?;
        let dedup_key = self.dedup_key(job);

        let exists: bool = conn.exists(&dedup_key).await?;
        if exists {
            warn!("Duplicate job rejected: {}", job.idempotency_key());
            return Err(QueueError::enqueue_failed("Duplicate job"));
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(job.idempotency_key())
            .query_async(&mut conn)
            .await?;

        conn.set_ex::<_, _, ()>(&dedup_key, "1", DEDUP_TTL_SECS).await?;

        info!("Enqueued job {} as message {}", job.job_id(), message_id);
        Ok(message_id)
    }

    /// Consume new jobs for a named consumer. Blocks for at most `block_ms`.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.conn().await?;

        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                if let Some(job) = self.decode_entry(&entry.id, entry.map.get("job")).await {
                    jobs.push((entry.id, job));
                }
            }
        }
        Ok(jobs)
    }

    /// Claim pending entries idle past `min_idle_ms` (crash recovery for
    /// messages left behind by a dead consumer).
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.conn().await?;

        let pending: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .query_async(&mut conn)
            .await?;

        if pending.count() == 0 {
            return Ok(Vec::new());
        }

        let reply: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        for entry in reply.ids {
            if let Some(job) = self.decode_entry(&entry.id, entry.map.get("job")).await {
                info!("Claimed pending job {}", job.job_id());
                jobs.push((entry.id, job));
            }
        }
        Ok(jobs)
    }

    /// Acknowledge a job (mark as completed and drop it from the stream).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }

    /// Move a job to the dead letter stream and ack the original.
    pub async fn dlq(&self, message_id: &str, job: &QueueJob, error: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let payload = serde_json::to_string(job)?;
        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!("Moved job {} to DLQ: {}", job.job_id(), error);
        Ok(())
    }

    /// Increment the delivery-failure count for a message.
    pub async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.conn().await?;

        let key = self.retry_key(message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, RETRY_TTL_SECS).await?;
        Ok(count)
    }

    /// Remove the dedup key so an identical job can be enqueued again.
    pub async fn clear_dedup(&self, job: &QueueJob) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(self.dedup_key(job)).await?;
        Ok(())
    }

    /// Max delivery attempts from config.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    fn dedup_key(&self, job: &QueueJob) -> String {
        format!("renderq:dedup:{}", job.idempotency_key())
    }

    fn retry_key(&self, message_id: &str) -> String {
        format!("renderq:retry:{}", message_id)
    }

    /// Decode one stream entry; malformed payloads are acked away so they
    /// are not redelivered forever.
    async fn decode_entry(
        &self,
        message_id: &str,
        field: Option<&redis::Value>,
    ) -> Option<QueueJob> {
        let Some(redis::Value::BulkString(payload)) = field else {
            warn!("Stream entry {} has no job field", message_id);
            self.ack(message_id).await.ok();
            return None;
        };

        match serde_json::from_slice::<QueueJob>(payload) {
            Ok(job) => {
                debug!("Decoded job {} from stream", job.job_id());
                Some(job)
            }
            Err(e) => {
                warn!("Failed to parse job payload for {}: {}", message_id, e);
                self.ack(message_id).await.ok();
                None
            }
        }
    }
}

#[async_trait]
impl JobSource for JobQueue {
    async fn init(&self) -> QueueResult<()> {
        JobQueue::init(self).await
    }

    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        JobQueue::consume(self, consumer_name, block_ms, count).await
    }

    async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        JobQueue::claim_pending(self, consumer_name, min_idle_ms, count).await
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        JobQueue::ack(self, message_id).await
    }

    async fn dlq(&self, message_id: &str, job: &QueueJob, error: &str) -> QueueResult<()> {
        JobQueue::dlq(self, message_id, job, error).await
    }

    async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        JobQueue::increment_retry(self, message_id).await
    }

    async fn clear_dedup(&self, job: &QueueJob) -> QueueResult<()> {
        JobQueue::clear_dedup(self, job).await
    }

    fn max_retries(&self) -> u32 {
        JobQueue::max_retries(self)
    }
}
