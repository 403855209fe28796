//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: 開発・テスト用の TaskStore / ScheduleStore
//! - **SqliteStore**: rusqlite による永続化
//! - **http**: 外部サービスの reqwest クライアント（リトライ付き）
//! - **CachingPluginCatalog**: 任意の PluginCatalog に TTL キャッシュを被せる

pub mod cache;
pub mod http;
pub mod inmem_store;
pub mod sqlite_store;

pub use self::cache::{CachingPluginCatalog, TtlCache};
pub use self::http::{BytesClient, HttpExecutionSink, HttpService, KatalogusClient, OctopoesClient};
pub use self::inmem_store::InMemoryStore;
pub use self::sqlite_store::SqliteStore;
