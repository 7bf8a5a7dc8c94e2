use anyhow::Context as _;
use deadpool_redis::Pool;
use deadpool_redis::redis;
use tracing::info;

use paywell_domain::event::PublishEvent;

use crate::domain::repository::EventPublisher;

/// Approximate cap on stream length.
const STREAM_MAXLEN: usize = 100_000;

/// Writes each event to the log. Used when no broker is configured.
#[derive(Debug, Clone, Default)]
pub struct LogPublisher;

impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &PublishEvent) -> anyhow::Result<()> {
        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            aggregate = %event.aggregate,
            data = %serde_json::Value::Object(event.data.clone()),
            "event published"
        );
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Appends events to a Redis stream with `XADD`.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    pub pool: Pool,
    pub stream: String,
}

impl EventPublisher for RedisStreamPublisher {
    async fn publish(&self, event: &PublishEvent) -> anyhow::Result<()> {
        let body = serde_json::to_string(event).context("encode event")?;
        let mut conn = self.pool.get().await.context("redis pool")?;
        let _entry_id: String = redis::cmd("XADD")
            .arg(&self.stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(STREAM_MAXLEN)
            .arg("*")
            .arg("id")
            .arg(&event.id)
            .arg("type")
            .arg(&event.event_type)
            .arg("event")
            .arg(body)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("XADD {}", self.stream))?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.pool.close();
        Ok(())
    }
}

/// Publisher selected at startup.
#[derive(Clone)]
pub enum EventPublisherBackend {
    Log(LogPublisher),
    RedisStream(RedisStreamPublisher),
}

impl EventPublisher for EventPublisherBackend {
    async fn publish(&self, event: &PublishEvent) -> anyhow::Result<()> {
        match self {
            Self::Log(publisher) => publisher.publish(event).await,
            Self::RedisStream(publisher) => publisher.publish(event).await,
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        match self {
            Self::Log(publisher) => publisher.close().await,
            Self::RedisStream(publisher) => publisher.close().await,
        }
    }
}
