//! Queue module: per-tenant priority queues and their registry.

mod pq;
mod registry;

pub use pq::{PrioritizedItem, PriorityQueue, PushOutcome, QueueError};
pub use registry::{QueueKey, QueueRegistry};
