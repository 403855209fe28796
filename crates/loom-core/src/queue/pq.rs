//! Bounded, deduplicating priority queue.
//!
//! - 優先度は小さいほど緊急（min-heap 相当）。同じ優先度は push 順（FIFO）。
//! - `hash` はキュー内で一意。既存 hash の再 push は「厳密に小さい」優先度のときだけ反映。
//! - 容量超過の push は拒否（`QueueError::Full`）。ブロックはしない。
//!
//! クリティカルセクションは短く、内部で `.await` しないため `std::sync::Mutex` を使います。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{TaskId, TaskPayload};

/// An entry resident in a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrioritizedItem {
    /// Task record created for this item.
    pub id: TaskId,
    pub priority: i64,
    pub hash: String,
    pub payload: TaskPayload,
}

impl PrioritizedItem {
    pub fn new(id: TaskId, priority: i64, payload: TaskPayload) -> Self {
        Self {
            id,
            priority,
            hash: payload.hash(),
            payload,
        }
    }
}

/// Result of an accepted push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// New hash, new entry.
    Inserted,
    /// Existing hash moved to a strictly lower priority.
    Updated { previous: i64 },
    /// Existing hash with an equal or higher priority; nothing changed.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue {queue_id} is full (capacity {capacity})")]
    Full { queue_id: String, capacity: usize },

    #[error("queue {0} is empty")]
    Empty(String),
}

/// Ordering key: priority first, then insertion sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OrderKey {
    priority: i64,
    seq: u64,
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // lower priority first; ties by push order
        self.priority
            .cmp(&other.priority)
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct QueueState {
    /// Ordered view (key -> hash).
    order: BTreeMap<OrderKey, String>,

    /// hash -> (key, item). Single source of truth for items.
    entries: HashMap<String, (OrderKey, PrioritizedItem)>,

    next_seq: u64,
}

impl QueueState {
    fn take(&mut self, key: OrderKey) -> Option<PrioritizedItem> {
        let hash = self.order.remove(&key)?;
        self.entries.remove(&hash).map(|(_, item)| item)
    }

    fn head_key(&self) -> Option<OrderKey> {
        self.order.keys().next().copied()
    }

    /// Move a resident hash to a strictly lower priority. `None` if absent.
    fn lower(&mut self, hash: &str, priority: i64) -> Option<(TaskId, PushOutcome)> {
        let (key, existing) = self.entries.get_mut(hash)?;
        if priority >= existing.priority {
            return Some((existing.id, PushOutcome::Unchanged));
        }
        let previous = existing.priority;
        let old_key = *key;
        // keep the original position among equals
        let new_key = OrderKey {
            priority,
            seq: old_key.seq,
        };
        *key = new_key;
        existing.priority = priority;
        let id = existing.id;
        self.order.remove(&old_key);
        self.order.insert(new_key, hash.to_string());
        Some((id, PushOutcome::Updated { previous }))
    }
}

/// One queue per (task kind, organisation).
pub struct PriorityQueue {
    id: String,
    capacity: usize,
    state: Mutex<QueueState>,
}

impl PriorityQueue {
    /// `capacity == 0` means unbounded.
    pub fn new(id: impl Into<String>, capacity: usize) -> Self {
        Self {
            id: id.into(),
            capacity,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A panic while holding the lock cannot leave the state half-written
    // (every mutation is a single insert/remove pair), so recover the guard.
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: PrioritizedItem) -> Result<PushOutcome, QueueError> {
        let mut state = self.state();

        if let Some((_, outcome)) = state.lower(&item.hash, item.priority) {
            if let (PushOutcome::Updated { .. }, Some((_, existing))) =
                (outcome, state.entries.get_mut(&item.hash))
            {
                existing.payload = item.payload;
            }
            return Ok(outcome);
        }

        if self.capacity > 0 && state.entries.len() >= self.capacity {
            return Err(QueueError::Full {
                queue_id: self.id.clone(),
                capacity: self.capacity,
            });
        }

        let key = OrderKey {
            priority: item.priority,
            seq: state.next_seq,
        };
        state.next_seq += 1;
        state.order.insert(key, item.hash.clone());
        state.entries.insert(item.hash.clone(), (key, item));
        Ok(PushOutcome::Inserted)
    }

    /// Lower the priority of `hash` only while it is still queued. The check
    /// and the update happen under one lock acquisition, so an item popped in
    /// the meantime is never put back. Returns the resident task id.
    pub fn update_priority(&self, hash: &str, priority: i64) -> Option<(TaskId, PushOutcome)> {
        self.state().lower(hash, priority)
    }

    pub fn pop(&self) -> Result<PrioritizedItem, QueueError> {
        let mut state = self.state();
        state
            .head_key()
            .and_then(|key| state.take(key))
            .ok_or_else(|| QueueError::Empty(self.id.clone()))
    }

    /// Pop the head only if `ready` accepts it. The check and the removal
    /// happen under one lock acquisition.
    pub fn pop_if(&self, ready: impl FnOnce(&PrioritizedItem) -> bool) -> Option<PrioritizedItem> {
        let mut state = self.state();
        let key = state.head_key()?;
        let head = state.order.get(&key).and_then(|hash| state.entries.get(hash))?;
        if !ready(&head.1) {
            return None;
        }
        state.take(key)
    }

    /// The `n` most urgent items, in pop order.
    pub fn peek(&self, n: usize) -> Vec<PrioritizedItem> {
        let state = self.state();
        state
            .order
            .values()
            .take(n)
            .filter_map(|hash| state.entries.get(hash).map(|(_, item)| item.clone()))
            .collect()
    }

    pub fn get(&self, hash: &str) -> Option<PrioritizedItem> {
        self.state().entries.get(hash).map(|(_, item)| item.clone())
    }

    pub fn remove(&self, hash: &str) -> Option<PrioritizedItem> {
        let mut state = self.state();
        let (key, item) = state.entries.remove(hash)?;
        state.order.remove(&key);
        Some(item)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.state().entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.len() >= self.capacity
    }

    /// Remove everything, returning the items in pop order.
    pub fn drain(&self) -> Vec<PrioritizedItem> {
        let mut state = self.state();
        let order = std::mem::take(&mut state.order);
        let mut entries = std::mem::take(&mut state.entries);
        order
            .into_values()
            .filter_map(|hash| entries.remove(&hash).map(|(_, item)| item))
            .collect()
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.order.clear();
        state.entries.clear();
    }
}

impl std::fmt::Debug for PriorityQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReportTask;
    use ulid::Ulid;

    fn item(name: &str, priority: i64) -> PrioritizedItem {
        let payload = TaskPayload::Report(ReportTask {
            organisation: "acme".into(),
            report_recipe_id: name.into(),
        });
        PrioritizedItem::new(TaskId::from_ulid(Ulid::new()), priority, payload)
    }

    fn recipe(item: &PrioritizedItem) -> &str {
        match &item.payload {
            TaskPayload::Report(t) => &t.report_recipe_id,
            _ => unreachable!(),
        }
    }

    #[test]
    fn pops_in_priority_order() {
        let queue = PriorityQueue::new("report-acme", 0);
        for (name, priority) in [("five", 5), ("one", 1), ("three", 3)] {
            assert_eq!(queue.push(item(name, priority)), Ok(PushOutcome::Inserted));
        }

        let order: Vec<i64> = (0..3).map(|_| queue.pop().unwrap().priority).collect();
        assert_eq!(order, vec![1, 3, 5]);
        assert!(matches!(queue.pop(), Err(QueueError::Empty(_))));
    }

    #[test]
    fn equal_priorities_are_fifo() {
        let queue = PriorityQueue::new("report-acme", 0);
        for name in ["first", "second", "third"] {
            queue.push(item(name, 7)).unwrap();
        }

        let names: Vec<String> = (0..3)
            .map(|_| recipe(&queue.pop().unwrap()).to_string())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn push_beyond_capacity_is_rejected_and_leaves_queue_unchanged() {
        let queue = PriorityQueue::new("report-acme", 2);
        queue.push(item("a", 1)).unwrap();
        queue.push(item("b", 2)).unwrap();

        let before = queue.peek(10);
        assert_eq!(
            queue.push(item("c", 3)),
            Err(QueueError::Full {
                queue_id: "report-acme".into(),
                capacity: 2
            })
        );
        assert_eq!(queue.peek(10), before);
        assert_eq!(queue.len(), 2);
        assert!(queue.is_full());

        assert_eq!(recipe(&queue.pop().unwrap()), "a");
        assert_eq!(recipe(&queue.pop().unwrap()), "b");
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let queue = PriorityQueue::new("report-acme", 3);
        for i in 0..20 {
            let _ = queue.push(item(&format!("r{i}"), 20 - i));
            assert!(queue.len() <= 3);
            if i % 4 == 0 {
                let _ = queue.pop();
            }
        }
    }

    #[test]
    fn repush_with_equal_or_higher_priority_is_a_no_op() {
        let queue = PriorityQueue::new("report-acme", 0);
        let original = item("weekly", 10);
        queue.push(original.clone()).unwrap();

        assert_eq!(queue.push(item("weekly", 10)), Ok(PushOutcome::Unchanged));
        assert_eq!(queue.push(item("weekly", 50)), Ok(PushOutcome::Unchanged));
        assert_eq!(queue.peek(10), vec![original]);
    }

    #[test]
    fn repush_with_lower_priority_updates_in_place() {
        let queue = PriorityQueue::new("report-acme", 1);
        let original = item("weekly", 10);
        queue.push(original.clone()).unwrap();

        // a full queue still accepts updates: the size does not change
        assert_eq!(
            queue.push(item("weekly", 4)),
            Ok(PushOutcome::Updated { previous: 10 })
        );
        assert_eq!(queue.len(), 1);

        let head = queue.pop().unwrap();
        assert_eq!(head.priority, 4);
        assert_eq!(head.id, original.id);
    }

    #[test]
    fn update_priority_never_reinserts_a_popped_hash() {
        let queue = PriorityQueue::new("report-acme", 0);
        let weekly = item("weekly", 10);
        queue.push(weekly.clone()).unwrap();

        assert_eq!(
            queue.update_priority(&weekly.hash, 3),
            Some((weekly.id, PushOutcome::Updated { previous: 10 }))
        );
        assert_eq!(
            queue.update_priority(&weekly.hash, 8),
            Some((weekly.id, PushOutcome::Unchanged))
        );

        assert_eq!(queue.pop().unwrap().priority, 3);
        assert_eq!(queue.update_priority(&weekly.hash, 1), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn update_keeps_insertion_position_among_equals() {
        let queue = PriorityQueue::new("report-acme", 0);
        queue.push(item("early", 9)).unwrap();
        queue.push(item("late", 5)).unwrap();
        queue.push(item("early", 5)).unwrap();

        assert_eq!(recipe(&queue.pop().unwrap()), "early");
        assert_eq!(recipe(&queue.pop().unwrap()), "late");
    }

    #[test]
    fn remove_and_contains_track_hashes() {
        let queue = PriorityQueue::new("report-acme", 0);
        let a = item("a", 1);
        let b = item("b", 2);
        queue.push(a.clone()).unwrap();
        queue.push(b.clone()).unwrap();

        assert!(queue.contains(&a.hash));
        assert_eq!(queue.remove(&a.hash), Some(a.clone()));
        assert!(!queue.contains(&a.hash));
        assert_eq!(queue.remove(&a.hash), None);
        assert_eq!(queue.pop().unwrap(), b);
    }

    #[test]
    fn pop_if_leaves_items_that_are_not_ready() {
        let queue = PriorityQueue::new("report-acme", 0);
        queue.push(item("future", 2_000)).unwrap();

        assert_eq!(queue.pop_if(|head| head.priority <= 1_000), None);
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_if(|head| head.priority <= 2_000).is_some());
        assert_eq!(queue.pop_if(|_| true), None);
    }

    #[test]
    fn drain_empties_in_pop_order() {
        let queue = PriorityQueue::new("report-acme", 0);
        queue.push(item("b", 2)).unwrap();
        queue.push(item("a", 1)).unwrap();

        let drained: Vec<i64> = queue.drain().into_iter().map(|i| i.priority).collect();
        assert_eq!(drained, vec![1, 2]);
        assert!(queue.is_empty());

        queue.push(item("c", 3)).unwrap();
        queue.clear();
        assert!(queue.is_empty());
    }
}
