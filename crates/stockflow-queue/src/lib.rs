// Queue substrate over a shared key/value broker
//
// Named FIFO queues with at-least-once delivery, the per-merchant progress
// bus, and the purchase order advisory lock all ride the same broker. Two
// backends: Redis for deployments, in-memory for tests and single-process
// development.

pub mod broker;
pub mod bus;
pub mod lock;
pub mod memory;
pub mod queue;
pub mod redis_broker;

pub use broker::{Broker, BusMessage};
pub use bus::{MerchantSubscription, ProgressBus};
pub use lock::PoLockService;
pub use memory::InMemoryBroker;
pub use queue::{Job, JobHandler, JobQueues, QueueSettings, QueueStatus};
pub use redis_broker::RedisBroker;
