//! HTTP clients for the collaborators.
//!
//! すべて `HttpService` 経由（timeout + 上限付きバックオフ）。

mod bytes;
mod katalogus;
mod octopoes;
mod service;
mod sink;

pub use bytes::BytesClient;
pub use katalogus::KatalogusClient;
pub use octopoes::OctopoesClient;
pub use service::HttpService;
pub use sink::HttpExecutionSink;
