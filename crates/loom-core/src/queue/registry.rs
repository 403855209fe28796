//! Queue registry: one `PriorityQueue` per (task kind, organisation).
//!
//! Registry 自体は RwLock（読み取りが大半）。各キューは自分の Mutex を持つので、
//! ある組織のバックログが別の組織のキュー操作をブロックすることはありません。

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::TaskKind;

use super::pq::{PriorityQueue, PrioritizedItem};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueKey {
    pub kind: TaskKind,
    pub organisation: String,
}

impl QueueKey {
    pub fn new(kind: TaskKind, organisation: impl Into<String>) -> Self {
        Self {
            kind,
            organisation: organisation.into(),
        }
    }

    pub fn queue_id(&self) -> String {
        self.kind.scheduler_id(&self.organisation)
    }

    pub fn parse(queue_id: &str) -> Option<Self> {
        TaskKind::parse_scheduler_id(queue_id).map(|(kind, org)| Self::new(kind, org))
    }
}

pub struct QueueRegistry {
    capacity: usize,
    queues: RwLock<HashMap<QueueKey, Arc<PriorityQueue>>>,
}

impl QueueRegistry {
    /// Every queue created by this registry gets `capacity` (0 = unbounded).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queues: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &QueueKey) -> Option<Arc<PriorityQueue>> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn get_by_id(&self, queue_id: &str) -> Option<Arc<PriorityQueue>> {
        QueueKey::parse(queue_id).and_then(|key| self.get(&key))
    }

    pub fn get_or_create(&self, key: &QueueKey) -> Arc<PriorityQueue> {
        if let Some(queue) = self.get(key) {
            return queue;
        }
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            queues
                .entry(key.clone())
                .or_insert_with(|| Arc::new(PriorityQueue::new(key.queue_id(), self.capacity))),
        )
    }

    /// Drop the queue and hand back whatever was still waiting in it.
    pub fn retire(&self, key: &QueueKey) -> Vec<PrioritizedItem> {
        let removed = self
            .queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        removed.map(|queue| queue.drain()).unwrap_or_default()
    }

    /// Queues of one kind, ordered by organisation.
    pub fn queues_for(&self, kind: TaskKind) -> Vec<Arc<PriorityQueue>> {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<(&QueueKey, &Arc<PriorityQueue>)> =
            queues.iter().filter(|(key, _)| key.kind == kind).collect();
        matching.sort_by(|a, b| a.0.cmp(b.0));
        matching.into_iter().map(|(_, q)| Arc::clone(q)).collect()
    }

    pub fn organisations(&self, kind: TaskKind) -> BTreeSet<String> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|key| key.kind == kind)
            .map(|key| key.organisation.clone())
            .collect()
    }

    /// Every queue, ordered by id.
    pub fn all(&self) -> Vec<Arc<PriorityQueue>> {
        let mut all: Vec<Arc<PriorityQueue>> = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ReportTask, TaskId, TaskPayload};
    use ulid::Ulid;

    #[test]
    fn queues_are_isolated_per_kind_and_organisation() {
        let registry = QueueRegistry::new(5);
        let acme_scan = registry.get_or_create(&QueueKey::new(TaskKind::Scan, "acme"));
        let acme_report = registry.get_or_create(&QueueKey::new(TaskKind::Report, "acme"));
        let beta_scan = registry.get_or_create(&QueueKey::new(TaskKind::Scan, "beta"));

        assert_eq!(acme_scan.id(), "scan-acme");
        assert_eq!(acme_scan.capacity(), 5);
        assert!(!Arc::ptr_eq(&acme_scan, &beta_scan));
        assert!(!Arc::ptr_eq(&acme_scan, &acme_report));

        let again = registry.get_or_create(&QueueKey::new(TaskKind::Scan, "acme"));
        assert!(Arc::ptr_eq(&acme_scan, &again));

        let ids: Vec<String> = registry
            .queues_for(TaskKind::Scan)
            .iter()
            .map(|q| q.id().to_string())
            .collect();
        assert_eq!(ids, vec!["scan-acme", "scan-beta"]);
        assert!(registry.get_by_id("report-acme").is_some());
        assert!(registry.get_by_id("report-beta").is_none());
    }

    #[test]
    fn retire_drains_the_queue() {
        let registry = QueueRegistry::new(0);
        let key = QueueKey::new(TaskKind::Report, "acme");
        let queue = registry.get_or_create(&key);
        let payload = TaskPayload::Report(ReportTask {
            organisation: "acme".into(),
            report_recipe_id: "weekly".into(),
        });
        queue
            .push(PrioritizedItem::new(TaskId::from_ulid(Ulid::new()), 1, payload))
            .unwrap();

        let drained = registry.retire(&key);
        assert_eq!(drained.len(), 1);
        assert!(registry.get(&key).is_none());
        assert!(registry.organisations(TaskKind::Report).is_empty());
        assert!(registry.retire(&key).is_empty());
    }
}
