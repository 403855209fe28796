//! Test doubles for the collaborator ports.
//!
//! Each stub keeps its data behind a `Mutex` so tests can change it between
//! cycles, and has a `fail` switch that turns every call into an
//! `ExternalServiceError`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::domain::{
    ExternalServiceError, Organisation, Plugin, PluginType, RawArtifact, TaskId, TaskKind,
    TaskPayload, Target,
};
use crate::ports::{ArtifactStore, ExecutionSink, FixedClock, ObjectStore, PluginCatalog};

pub(crate) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub(crate) fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(start()))
}

pub(crate) fn boefje(id: &str, scan_level: u8, consumes: &[&str]) -> Plugin {
    Plugin {
        id: id.into(),
        version: None,
        plugin_type: PluginType::Boefje,
        enabled: true,
        scan_level,
        consumes: consumes.iter().map(|s| s.to_string()).collect(),
    }
}

pub(crate) fn normalizer(id: &str, consumes: &[&str]) -> Plugin {
    Plugin {
        id: id.into(),
        version: None,
        plugin_type: PluginType::Normalizer,
        enabled: true,
        scan_level: 0,
        consumes: consumes.iter().map(|s| s.to_string()).collect(),
    }
}

pub(crate) fn target(primary_key: &str, object_type: &str, scan_level: u8) -> Target {
    Target {
        primary_key: primary_key.into(),
        object_type: object_type.into(),
        scan_level,
    }
}

pub(crate) fn raw(id: &str, mime_types: &[&str], produced_at: DateTime<Utc>) -> RawArtifact {
    RawArtifact {
        id: id.into(),
        boefje_id: "dns-records".into(),
        input_ooi: None,
        mime_types: mime_types.iter().map(|s| s.to_string()).collect(),
        produced_at,
    }
}

fn down(service: &str) -> ExternalServiceError {
    ExternalServiceError::new(service, 1, "stub is down")
}

#[derive(Default)]
pub(crate) struct StubCatalog {
    organisations: Mutex<Vec<Organisation>>,
    plugins: Mutex<HashMap<String, Vec<Plugin>>>,
    plugin_calls: AtomicU32,
    flushes: AtomicU32,
    failing: AtomicBool,
}

impl StubCatalog {
    pub(crate) fn new<'a>(organisations: impl IntoIterator<Item = &'a str>) -> Self {
        let stub = Self::default();
        stub.set_organisations(organisations);
        stub
    }

    pub(crate) fn set_organisations<'a>(&self, organisations: impl IntoIterator<Item = &'a str>) {
        *self.organisations.lock().unwrap() =
            organisations.into_iter().map(Organisation::new).collect();
    }

    pub(crate) fn set_plugins(&self, organisation: &str, plugins: Vec<Plugin>) {
        self.plugins
            .lock()
            .unwrap()
            .insert(organisation.to_string(), plugins);
    }

    pub(crate) fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn plugin_calls(&self) -> u32 {
        self.plugin_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn flushes(&self) -> u32 {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PluginCatalog for StubCatalog {
    async fn list_organisations(&self) -> Result<Vec<Organisation>, ExternalServiceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(down("katalogus"));
        }
        Ok(self.organisations.lock().unwrap().clone())
    }

    async fn get_enabled_plugins(
        &self,
        organisation: &str,
    ) -> Result<Vec<Plugin>, ExternalServiceError> {
        self.plugin_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(down("katalogus"));
        }
        Ok(self
            .plugins
            .lock()
            .unwrap()
            .get(organisation)
            .cloned()
            .unwrap_or_default())
    }

    async fn flush_cache(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct StubObjectStore {
    targets: Mutex<HashMap<String, Vec<Target>>>,
    failing: AtomicBool,
}

impl StubObjectStore {
    pub(crate) fn set_targets(&self, organisation: &str, targets: Vec<Target>) {
        self.targets
            .lock()
            .unwrap()
            .insert(organisation.to_string(), targets);
    }

    pub(crate) fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for StubObjectStore {
    async fn get_scan_candidates(
        &self,
        organisation: &str,
        scan_level: u8,
    ) -> Result<Vec<Target>, ExternalServiceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(down("octopoes"));
        }
        Ok(self
            .targets
            .lock()
            .unwrap()
            .get(organisation)
            .map(|targets| {
                targets
                    .iter()
                    .filter(|t| t.scan_level >= scan_level)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub(crate) struct StubArtifactStore {
    last_runs: Mutex<HashMap<(String, String), DateTime<Utc>>>,
    raws: Mutex<HashMap<String, Vec<RawArtifact>>>,
    failing: AtomicBool,
}

impl StubArtifactStore {
    pub(crate) fn set_last_run(&self, plugin_id: &str, target: &str, at: DateTime<Utc>) {
        self.last_runs
            .lock()
            .unwrap()
            .insert((plugin_id.to_string(), target.to_string()), at);
    }

    pub(crate) fn add_raw(&self, organisation: &str, raw: RawArtifact) {
        self.raws
            .lock()
            .unwrap()
            .entry(organisation.to_string())
            .or_default()
            .push(raw);
    }

    pub(crate) fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArtifactStore for StubArtifactStore {
    async fn get_last_run(
        &self,
        _kind: TaskKind,
        plugin_id: &str,
        target: &str,
        _organisation: &str,
    ) -> Result<Option<DateTime<Utc>>, ExternalServiceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(down("bytes"));
        }
        Ok(self
            .last_runs
            .lock()
            .unwrap()
            .get(&(plugin_id.to_string(), target.to_string()))
            .copied())
    }

    async fn get_raw_artifacts(
        &self,
        organisation: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawArtifact>, ExternalServiceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(down("bytes"));
        }
        let mut raws: Vec<RawArtifact> = self
            .raws
            .lock()
            .unwrap()
            .get(organisation)
            .map(|raws| {
                raws.iter()
                    .filter(|r| since.is_none_or(|since| r.produced_at > since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        raws.sort_by_key(|r| r.produced_at);
        Ok(raws)
    }
}

/// Records submissions; rejects the first `failures` of them.
#[derive(Default)]
pub(crate) struct StubSink {
    submitted: Mutex<Vec<(TaskId, TaskPayload)>>,
    failures: AtomicU32,
    delay: Mutex<Option<Duration>>,
}

impl StubSink {
    pub(crate) fn reject_next(&self, failures: u32) {
        self.failures.store(failures, Ordering::SeqCst);
    }

    pub(crate) fn stall(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn submitted(&self) -> Vec<(TaskId, TaskPayload)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionSink for StubSink {
    async fn submit(
        &self,
        task_id: TaskId,
        payload: &TaskPayload,
    ) -> Result<(), ExternalServiceError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let rejected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(ExternalServiceError::new("sink", 1, "rejected"));
        }
        self.submitted
            .lock()
            .unwrap()
            .push((task_id, payload.clone()));
        Ok(())
    }
}
