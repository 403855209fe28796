//! loom-core
//!
//! Multi-tenant scheduling core for security scan work.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, payload, task, schedule, status DAG, errors）
//! - **ports**: 抽象化レイヤー（Store, PluginCatalog, ObjectStore, ArtifactStore, ExecutionSink, Clock）
//! - **queue**: 組織 × 種類ごとの優先度キューとレジストリ
//! - **ranker**: 種類ごとの優先度計算（純粋関数）
//! - **app**: アプリケーションロジック（populate, scheduler, dispatcher, runtime, builder）
//! - **impls**: 実装（InMemoryStore / SqliteStore, HTTP クライアント, TTL キャッシュ）
//! - **server**: REST API（axum）
//! - **config**: 実行時設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod ranker;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;
