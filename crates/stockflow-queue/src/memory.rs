// In-memory broker backend
//
// Single-process stand-in for Redis with the same observable semantics.
// Used by tests and local development; TTLs are driven by tokio's clock so
// paused-time tests stay deterministic.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;

use stockflow_core::Result;

use crate::broker::{Broker, BusMessage};

#[derive(Default)]
struct State {
    lists: HashMap<String, VecDeque<String>>,
    delayed: HashMap<String, Vec<(i64, String)>>,
    kv: HashMap<String, (String, Option<Instant>)>,
}

pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
    bus: broadcast::Sender<BusMessage>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(1024);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            bus,
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn expired(deadline: &Option<Instant>) -> bool {
    deadline.map(|d| Instant::now() >= d).unwrap_or(false)
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn push_back(&self, list: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .lists
            .entry(list.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn pop_to(&self, from: &str, to: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        let Some(value) = state.lists.get_mut(from).and_then(|l| l.pop_front()) else {
            return Ok(None);
        };
        state
            .lists
            .entry(to.to_string())
            .or_default()
            .push_back(value.clone());
        Ok(Some(value))
    }

    async fn remove_from_list(&self, list: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(entries) = state.lists.get_mut(list) {
            if let Some(pos) = entries.iter().position(|v| v == value) {
                entries.remove(pos);
            }
        }
        Ok(())
    }

    async fn list_len(&self, list: &str) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state.lists.get(list).map(|l| l.len()).unwrap_or(0))
    }

    async fn list_range(&self, list: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .lists
            .get(list)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_delayed(&self, set: &str, member: &str, due_at_ms: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .delayed
            .entry(set.to_string())
            .or_default()
            .push((due_at_ms, member.to_string()));
        Ok(())
    }

    async fn pop_due(&self, set: &str, now_ms: i64) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        let Some(entries) = state.delayed.get_mut(set) else {
            return Ok(Vec::new());
        };
        entries.sort_by_key(|(due, _)| *due);
        let split = entries.partition_point(|(due, _)| *due <= now_ms);
        let due: Vec<String> = entries.drain(..split).map(|(_, m)| m).collect();
        Ok(due)
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let live = state
            .kv
            .get(key)
            .map(|(_, deadline)| !expired(deadline))
            .unwrap_or(false);
        if live {
            return Ok(false);
        }
        state.kv.insert(
            key.to_string(),
            (
                value.to_string(),
                Some(Instant::now() + Duration::from_millis(ttl_ms)),
            ),
        );
        Ok(true)
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.kv.insert(
            key.to_string(),
            (
                value.to_string(),
                Some(Instant::now() + Duration::from_millis(ttl_ms)),
            ),
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        let (live, stale) = match state.kv.get(key) {
            Some((value, deadline)) if !expired(deadline) => (Some(value.clone()), false),
            Some(_) => (None, true),
            None => (None, false),
        };
        if stale {
            state.kv.remove(key);
        }
        Ok(live)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.kv.remove(key);
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl_ms: u64) -> Result<i64> {
        let mut state = self.state.lock().await;
        let fresh = match state.kv.get(key) {
            Some((_, deadline)) if expired(deadline) => true,
            None => true,
            Some(_) => false,
        };
        let count = if fresh {
            state.kv.insert(
                key.to_string(),
                (
                    "1".to_string(),
                    Some(Instant::now() + Duration::from_millis(ttl_ms)),
                ),
            );
            1
        } else {
            let entry = state.kv.get_mut(key).expect("checked above");
            let next = entry.0.parse::<i64>().unwrap_or(0) + 1;
            entry.0 = next.to_string();
            next
        };
        Ok(count)
    }

    async fn delayed_len(&self, set: &str) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state.delayed.get(set).map(|d| d.len()).unwrap_or(0))
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        // No subscribers is fine; the bus is fire-and-forget
        let _ = self.bus.send(BusMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.bus.subscribe()
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_are_fifo_across_pop_to() {
        let broker = InMemoryBroker::new();
        broker.push_back("w", "a").await.unwrap();
        broker.push_back("w", "b").await.unwrap();
        assert_eq!(broker.pop_to("w", "act").await.unwrap().as_deref(), Some("a"));
        assert_eq!(broker.pop_to("w", "act").await.unwrap().as_deref(), Some("b"));
        assert_eq!(broker.pop_to("w", "act").await.unwrap(), None);
        assert_eq!(broker.list_len("act").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delayed_members_only_pop_once_due() {
        let broker = InMemoryBroker::new();
        broker.add_delayed("d", "later", 10_000).await.unwrap();
        broker.add_delayed("d", "soon", 1_000).await.unwrap();
        assert_eq!(broker.pop_due("d", 500).await.unwrap(), Vec::<String>::new());
        assert_eq!(broker.pop_due("d", 1_000).await.unwrap(), vec!["soon"]);
        assert_eq!(broker.pop_due("d", 20_000).await.unwrap(), vec!["later"]);
    }

    #[tokio::test(start_paused = true)]
    async fn kv_entries_expire() {
        let broker = InMemoryBroker::new();
        assert!(broker.set_nx_px("k", "v", 1_000).await.unwrap());
        assert!(!broker.set_nx_px("k", "v2", 1_000).await.unwrap());
        tokio::time::sleep(Duration::from_millis(1_001)).await;
        assert_eq!(broker.get("k").await.unwrap(), None);
        assert!(broker.set_nx_px("k", "v3", 1_000).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn counters_reset_after_their_window() {
        let broker = InMemoryBroker::new();
        assert_eq!(broker.incr_with_ttl("rl", 5_000).await.unwrap(), 1);
        assert_eq!(broker.incr_with_ttl("rl", 5_000).await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(5_001)).await;
        assert_eq!(broker.incr_with_ttl("rl", 5_000).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let broker = InMemoryBroker::new();
        let mut rx = broker.subscribe();
        broker.publish("m1:progress", "{}").await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "m1:progress");
    }
}
