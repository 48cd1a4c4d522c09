// Broker abstraction: the primitive operations queues, bus and locks need

use async_trait::async_trait;
use tokio::sync::broadcast;

use stockflow_core::Result;

/// A message observed on the broker's pub/sub plane
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

/// The primitive broker operations
///
/// Implementations must be cheap to clone behind an Arc and safe to share
/// across every queue in the process — the whole point of the shared broker
/// is that N queues do NOT mean N connections.
#[async_trait]
pub trait Broker: Send + Sync {
    // ---- list operations (queue bodies) ----

    /// Append to the tail of a list
    async fn push_back(&self, list: &str, value: &str) -> Result<()>;

    /// Atomically move the head of `from` to the tail of `to`
    async fn pop_to(&self, from: &str, to: &str) -> Result<Option<String>>;

    /// Remove one occurrence of `value` from a list
    async fn remove_from_list(&self, list: &str, value: &str) -> Result<()>;

    async fn list_len(&self, list: &str) -> Result<usize>;

    async fn list_range(&self, list: &str) -> Result<Vec<String>>;

    // ---- delayed members (sorted by due time) ----

    async fn add_delayed(&self, set: &str, member: &str, due_at_ms: i64) -> Result<()>;

    /// Pop every member whose due time is <= `now_ms`
    async fn pop_due(&self, set: &str, now_ms: i64) -> Result<Vec<String>>;

    async fn delayed_len(&self, set: &str) -> Result<usize>;

    // ---- key/value with TTL (locks, leases, counters) ----

    /// SET NX PX: returns true when the key was absent and is now set
    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool>;

    /// Unconditional SET PX
    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Increment a counter, setting the TTL when the key is created.
    /// Backs the per-queue rate limiter window.
    async fn incr_with_ttl(&self, key: &str, ttl_ms: u64) -> Result<i64>;

    // ---- pub/sub ----

    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    /// Subscribe to the whole pub/sub plane; callers filter by topic.
    /// Slow consumers may observe drops — the bus has no replay by design.
    fn subscribe(&self) -> broadcast::Receiver<BusMessage>;

    /// Close the underlying connections. Called once during teardown;
    /// leaking them across serverless invocations exhausts managed brokers.
    async fn close(&self) -> Result<()>;
}
