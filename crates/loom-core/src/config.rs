//! Config - 実行時設定
//!
//! CLI（clap + 環境変数 `LOOM_*`）からここに詰め替えます。
//! JSON からも読めるように serde で定義し、未指定の項目はデフォルト値になります。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::RetryPolicy;
use crate::ranker::{DeadlineRanker, ScanRanker};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoomConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Path of the sqlite database, or `:memory:`.
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_pq_maxsize")]
    pub pq_maxsize: usize,
    /// Seconds a target must rest after a run before it is ranked again.
    #[serde(default = "default_pq_grace_period")]
    pub pq_grace_period: u64,

    #[serde(default = "default_populate_interval")]
    pub populate_interval: u64,
    #[serde(default = "default_organisation_refresh_interval")]
    pub organisation_refresh_interval: u64,
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval: u64,
    #[serde(default = "default_max_dispatch_attempts")]
    pub max_dispatch_attempts: u32,
    /// Seconds to wait for the execution sink to accept a task.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout: u64,

    #[serde(default = "default_max_priority")]
    pub max_priority: i64,
    #[serde(default = "default_max_days")]
    pub max_days: i64,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout: u64,
    #[serde(default = "default_http_retries")]
    pub http_retries: u32,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    #[serde(default = "default_katalogus_url")]
    pub katalogus_url: String,
    #[serde(default = "default_octopoes_url")]
    pub octopoes_url: String,
    #[serde(default = "default_bytes_url")]
    pub bytes_url: String,
    #[serde(default = "default_sink_url")]
    pub sink_url: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8004".to_string()
}

fn default_database() -> String {
    ":memory:".to_string()
}

fn default_pq_maxsize() -> usize {
    1000
}

fn default_pq_grace_period() -> u64 {
    86_400
}

fn default_populate_interval() -> u64 {
    60
}

fn default_organisation_refresh_interval() -> u64 {
    300
}

fn default_dispatch_interval() -> u64 {
    1
}

fn default_max_dispatch_attempts() -> u32 {
    3
}

fn default_dispatch_timeout() -> u64 {
    30
}

fn default_max_priority() -> i64 {
    1000
}

fn default_max_days() -> i64 {
    7
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_http_timeout() -> u64 {
    10
}

fn default_http_retries() -> u32 {
    5
}

fn default_shutdown_timeout() -> u64 {
    5
}

fn default_katalogus_url() -> String {
    "http://localhost:8003".to_string()
}

fn default_octopoes_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_bytes_url() -> String {
    "http://localhost:8002".to_string()
}

fn default_sink_url() -> String {
    "http://localhost:8006".to_string()
}

impl Default for LoomConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            database: default_database(),
            pq_maxsize: default_pq_maxsize(),
            pq_grace_period: default_pq_grace_period(),
            populate_interval: default_populate_interval(),
            organisation_refresh_interval: default_organisation_refresh_interval(),
            dispatch_interval: default_dispatch_interval(),
            max_dispatch_attempts: default_max_dispatch_attempts(),
            dispatch_timeout: default_dispatch_timeout(),
            max_priority: default_max_priority(),
            max_days: default_max_days(),
            cache_ttl: default_cache_ttl(),
            http_timeout: default_http_timeout(),
            http_retries: default_http_retries(),
            shutdown_timeout: default_shutdown_timeout(),
            katalogus_url: default_katalogus_url(),
            octopoes_url: default_octopoes_url(),
            bytes_url: default_bytes_url(),
            sink_url: default_sink_url(),
        }
    }
}

impl LoomConfig {
    pub fn populate_interval(&self) -> Duration {
        Duration::from_secs(self.populate_interval)
    }

    pub fn organisation_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.organisation_refresh_interval)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn http_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.http_retries)
    }

    pub fn scan_ranker(&self) -> ScanRanker {
        ScanRanker {
            grace_period: chrono::Duration::seconds(self.pq_grace_period as i64),
            max_priority: self.max_priority,
            max_days: self.max_days,
            ..ScanRanker::default()
        }
    }

    pub fn deadline_ranker(&self) -> DeadlineRanker {
        DeadlineRanker {
            grace_period: chrono::Duration::seconds(self.pq_grace_period as i64),
            ..DeadlineRanker::default()
        }
    }
}
