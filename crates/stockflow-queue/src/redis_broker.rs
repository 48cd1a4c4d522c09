// Redis broker backend
//
// Exactly three connections are opened for the whole process, whatever the
// number of named queues: one for regular commands, one dedicated to
// queue-pop reads, one for pub/sub. A naive connection-per-queue layout
// multiplies the pool by the queue count and exhausts managed brokers.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use stockflow_core::{Result, StockflowError};

use crate::broker::{Broker, BusMessage};

fn broker_err(context: &str, e: redis::RedisError) -> StockflowError {
    StockflowError::transient(format!("broker {context}: {e}"))
}

pub struct RedisBroker {
    command: ConnectionManager,
    popper: MultiplexedConnection,
    bus: broadcast::Sender<BusMessage>,
    pubsub_task: JoinHandle<()>,
}

impl RedisBroker {
    /// Open the three shared connections and start the pub/sub reader
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StockflowError::fatal(format!("invalid broker url: {e}")))?;

        let command = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StockflowError::fatal(format!("broker command connection: {e}")))?;
        let popper = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StockflowError::fatal(format!("broker pop connection: {e}")))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| StockflowError::fatal(format!("broker pubsub connection: {e}")))?;
        pubsub
            .psubscribe("*")
            .await
            .map_err(|e| StockflowError::fatal(format!("broker psubscribe: {e}")))?;

        let (bus, _) = broadcast::channel(1024);
        let sender = bus.clone();
        let pubsub_task = tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let topic = msg.get_channel_name().to_string();
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        let _ = sender.send(BusMessage { topic, payload });
                    }
                    Err(e) => warn!(topic, error = %e, "unreadable pub/sub payload"),
                }
            }
            info!("broker pub/sub stream ended");
        });

        Ok(Self {
            command,
            popper,
            bus,
            pubsub_task,
        })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push_back(&self, list: &str, value: &str) -> Result<()> {
        let mut conn = self.command.clone();
        conn.rpush::<_, _, ()>(list, value)
            .await
            .map_err(|e| broker_err("rpush", e))?;
        Ok(())
    }

    async fn pop_to(&self, from: &str, to: &str) -> Result<Option<String>> {
        // Runs on the dedicated pop connection so long drains never
        // head-of-line-block regular commands
        let mut conn = self.popper.clone();
        let value: Option<String> = conn
            .lmove(from, to, redis::Direction::Left, redis::Direction::Right)
            .await
            .map_err(|e| broker_err("lmove", e))?;
        Ok(value)
    }

    async fn remove_from_list(&self, list: &str, value: &str) -> Result<()> {
        let mut conn = self.command.clone();
        conn.lrem::<_, _, ()>(list, 1, value)
            .await
            .map_err(|e| broker_err("lrem", e))?;
        Ok(())
    }

    async fn list_len(&self, list: &str) -> Result<usize> {
        let mut conn = self.command.clone();
        let len: usize = conn.llen(list).await.map_err(|e| broker_err("llen", e))?;
        Ok(len)
    }

    async fn list_range(&self, list: &str) -> Result<Vec<String>> {
        let mut conn = self.command.clone();
        let values: Vec<String> = conn
            .lrange(list, 0, -1)
            .await
            .map_err(|e| broker_err("lrange", e))?;
        Ok(values)
    }

    async fn add_delayed(&self, set: &str, member: &str, due_at_ms: i64) -> Result<()> {
        let mut conn = self.command.clone();
        conn.zadd::<_, _, _, ()>(set, member, due_at_ms)
            .await
            .map_err(|e| broker_err("zadd", e))?;
        Ok(())
    }

    async fn pop_due(&self, set: &str, now_ms: i64) -> Result<Vec<String>> {
        let mut conn = self.command.clone();
        let due: Vec<String> = conn
            .zrangebyscore(set, "-inf", now_ms)
            .await
            .map_err(|e| broker_err("zrangebyscore", e))?;
        if !due.is_empty() {
            conn.zrem::<_, _, ()>(set, due.clone())
                .await
                .map_err(|e| broker_err("zrem", e))?;
        }
        Ok(due)
    }

    async fn delayed_len(&self, set: &str) -> Result<usize> {
        let mut conn = self.command.clone();
        let len: usize = conn.zcard(set).await.map_err(|e| broker_err("zcard", e))?;
        Ok(len)
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        let mut conn = self.command.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| broker_err("set nx px", e))?;
        Ok(reply.is_some())
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<()> {
        let mut conn = self.command.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| broker_err("set px", e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.command.clone();
        let value: Option<String> = conn.get(key).await.map_err(|e| broker_err("get", e))?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.command.clone();
        conn.del::<_, ()>(key).await.map_err(|e| broker_err("del", e))?;
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl_ms: u64) -> Result<i64> {
        let mut conn = self.command.clone();
        let count: i64 = conn.incr(key, 1).await.map_err(|e| broker_err("incr", e))?;
        if count == 1 {
            conn.pexpire::<_, ()>(key, ttl_ms as i64)
                .await
                .map_err(|e| broker_err("pexpire", e))?;
        }
        Ok(count)
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        let mut conn = self.command.clone();
        conn.publish::<_, _, ()>(topic, payload)
            .await
            .map_err(|e| broker_err("publish", e))?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.bus.subscribe()
    }

    async fn close(&self) -> Result<()> {
        // The command and pop connections close when the broker drops; the
        // pub/sub reader holds its connection alive until aborted
        self.pubsub_task.abort();
        info!("broker connections closed");
        Ok(())
    }
}
