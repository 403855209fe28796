//! RuntimeBuilder - コンポーネントの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 外部サービス（catalog / objects / artifacts / sink）と store は必須
//! - build() 時に不足をすべて列挙して `BuildError` を返す
//! - clock / id generator は省略するとシステム時刻・ULID を使う

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::LoomConfig;
use crate::domain::{LoomError, TaskKind};
use crate::ports::{
    ArtifactStore, Clock, ExecutionSink, IdGenerator, ObjectStore, PluginCatalog, Store,
    SystemClock, UlidGenerator,
};
use crate::queue::QueueRegistry;
use crate::server::{self, AppState};

use super::collaborators::Collaborators;
use super::dispatcher::Dispatcher;
use super::enqueue::Enqueuer;
use super::populate::{NormalizationPopulator, Populator, ReportPopulator, ScanPopulator};
use super::runtime::Runtime;
use super::scheduler::{Scheduler, SchedulerControl};
use super::status::StatusBoard;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing collaborators: {0:?}")]
    MissingCollaborators(Vec<&'static str>),
}

/// Wires every worker of one scheduler instance.
///
/// ```ignore
/// let runtime = RuntimeBuilder::new(config)
///     .store(store)
///     .catalog(catalog)
///     .objects(objects)
///     .artifacts(artifacts)
///     .sink(sink)
///     .listener(listener)
///     .build()?;
/// let status = runtime.run(shutdown_signal()).await;
/// ```
pub struct RuntimeBuilder {
    config: LoomConfig,
    store: Option<Arc<dyn Store>>,
    catalog: Option<Arc<dyn PluginCatalog>>,
    objects: Option<Arc<dyn ObjectStore>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    sink: Option<Arc<dyn ExecutionSink>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    listener: Option<TcpListener>,
}

impl RuntimeBuilder {
    pub fn new(config: LoomConfig) -> Self {
        Self {
            config,
            store: None,
            catalog: None,
            objects: None,
            artifacts: None,
            sink: None,
            clock: None,
            ids: None,
            listener: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn PluginCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn objects(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ExecutionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Serve the REST API on `listener`. Without one, no server worker is added.
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn build(self) -> Result<Runtime, BuildError> {
        let mut missing = Vec::new();
        if self.store.is_none() {
            missing.push("store");
        }
        if self.catalog.is_none() {
            missing.push("catalog");
        }
        if self.objects.is_none() {
            missing.push("objects");
        }
        if self.artifacts.is_none() {
            missing.push("artifacts");
        }
        if self.sink.is_none() {
            missing.push("sink");
        }
        let (Some(store), Some(catalog), Some(objects), Some(artifacts), Some(sink)) =
            (self.store, self.catalog, self.objects, self.artifacts, self.sink)
        else {
            return Err(BuildError::MissingCollaborators(missing));
        };

        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));

        let queues = Arc::new(QueueRegistry::new(config.pq_maxsize));
        let status = Arc::new(StatusBoard::new());
        let enqueuer = Arc::new(Enqueuer::new(store.clone(), ids, clock.clone()));
        let control = Arc::new(SchedulerControl::new(
            queues.clone(),
            enqueuer.clone(),
            status.clone(),
        ));
        let deadlines = config.deadline_ranker();

        let populators: Vec<Arc<dyn Populator>> = vec![
            Arc::new(ScanPopulator::new(
                catalog.clone(),
                objects.clone(),
                artifacts.clone(),
                enqueuer.clone(),
                status.clone(),
                config.scan_ranker(),
                deadlines.clone(),
            )),
            Arc::new(NormalizationPopulator::new(
                catalog.clone(),
                artifacts.clone(),
                enqueuer.clone(),
            )),
            Arc::new(ReportPopulator::new(enqueuer.clone(), deadlines.clone())),
        ];

        let mut runtime = Runtime::new(config.shutdown_timeout());

        for populator in populators {
            let scheduler = Scheduler::new(
                populator,
                catalog.clone(),
                queues.clone(),
                enqueuer.clone(),
                status.clone(),
                config.populate_interval(),
                config.organisation_refresh_interval(),
            );
            let name = format!("scheduler-{}", scheduler.kind());
            runtime.add_worker(name, move |stop| scheduler.run(stop));
        }

        for kind in TaskKind::ALL {
            let dispatcher = Dispatcher::new(
                kind,
                queues.clone(),
                store.clone(),
                sink.clone(),
                status.clone(),
                clock.clone(),
                config.dispatch_timeout(),
                config.max_dispatch_attempts,
                config.dispatch_interval(),
            );
            runtime.add_worker(format!("dispatcher-{kind}"), move |stop| dispatcher.run(stop));
        }

        let state = AppState {
            store,
            queues,
            enqueuer,
            control,
            status,
            collaborators: Collaborators {
                catalog,
                objects,
                artifacts,
                sink,
            },
            deadlines,
        };

        if let Some(listener) = self.listener {
            let router = server::router(state.clone());
            runtime.add_worker("server", move |mut stop| async move {
                let addr = listener
                    .local_addr()
                    .map_err(|e| LoomError::Internal(format!("listener address: {e}")))?;
                info!(%addr, "rest api listening");
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = stop.wait_for(|stopped| *stopped).await;
                    })
                    .await
                    .map_err(|e| LoomError::Internal(format!("rest api: {e}")))
            });
        }

        info!(workers = ?runtime.worker_names(), "runtime built");
        Ok(runtime.with_state(state))
    }
}
