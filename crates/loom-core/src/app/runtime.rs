//! Runtime - ワーカーの起動と監督
//!
//! すべてのワーカー（Scheduler / Dispatcher / Server）は同じ停止チャネルを受け取ります。
//!
//! # 停止の流れ
//! 1. 外部からの停止要求、またはワーカーの異常終了
//! 2. 停止チャネルに `true` を送る
//! 3. `shutdown_timeout` 以内に全ワーカーの終了を待つ
//! 4. 間に合わなければ残りを abort して `ExitStatus::Forced`（abort の完了は待たない。
//!    同期処理でブロックしているワーカーは abort できないため）

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::domain::LoomError;
use crate::server::AppState;

type WorkerFuture = Pin<Box<dyn Future<Output = Result<(), LoomError>> + Send>>;
type WorkerFn = Box<dyn FnOnce(watch::Receiver<bool>) -> WorkerFuture + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every worker stopped on request.
    Graceful,
    /// A worker failed, panicked or returned on its own.
    Failed,
    /// Some workers ignored the stop signal and were aborted.
    Forced,
}

pub struct Runtime {
    workers: Vec<(String, WorkerFn)>,
    shutdown_timeout: Duration,
    state: Option<AppState>,
}

impl Runtime {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            workers: Vec::new(),
            shutdown_timeout,
            state: None,
        }
    }

    pub fn with_state(mut self, state: AppState) -> Self {
        self.state = Some(state);
        self
    }

    /// Handles shared with the REST server, if the runtime was built with them.
    pub fn state(&self) -> Option<&AppState> {
        self.state.as_ref()
    }

    /// Register a worker. It is started by [`Runtime::run`] and must return
    /// once the stop channel turns `true`.
    pub fn add_worker<F, Fut>(&mut self, name: impl Into<String>, start: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), LoomError>> + Send + 'static,
    {
        let start: WorkerFn = Box::new(move |stop| Box::pin(start(stop)));
        self.workers.push((name.into(), start));
    }

    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Run every worker until `shutdown` resolves or one of them exits.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> ExitStatus {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut workers = JoinSet::new();
        for (name, start) in self.workers {
            let future = start(stop_rx.clone());
            workers.spawn(async move { (name, future.await) });
        }
        info!(workers = workers.len(), "runtime started");

        let mut status = ExitStatus::Graceful;
        tokio::select! {
            _ = shutdown => info!("shutdown requested"),
            Some(joined) = workers.join_next() => {
                if report(joined) {
                    warn!("worker exited before shutdown was requested");
                }
                status = ExitStatus::Failed;
            }
        }

        // Receivers may all be gone already.
        let _ = stop_tx.send(true);

        let drain = async {
            let mut clean = true;
            while let Some(joined) = workers.join_next().await {
                clean &= report(joined);
            }
            clean
        };
        match tokio::time::timeout(self.shutdown_timeout, drain).await {
            Ok(true) => {}
            Ok(false) => status = ExitStatus::Failed,
            Err(_) => {
                warn!(
                    remaining = workers.len(),
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "workers did not stop in time, aborting"
                );
                workers.abort_all();
                workers.detach_all();
                status = ExitStatus::Forced;
            }
        }

        info!(?status, "runtime stopped");
        status
    }
}

/// Log how a worker ended; `true` when it returned `Ok`.
fn report(joined: Result<(String, Result<(), LoomError>), JoinError>) -> bool {
    match joined {
        Ok((name, Ok(()))) => {
            info!(worker = %name, "worker stopped");
            true
        }
        Ok((name, Err(e))) => {
            error!(worker = %name, error = %e, "worker failed");
            false
        }
        Err(e) => {
            error!(error = %e, "worker panicked");
            false
        }
    }
}
