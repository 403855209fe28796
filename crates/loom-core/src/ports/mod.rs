//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（プラグインレジストリ、グラフストア、raw data ストア、
//! 実行系、永続ストア）へのインターフェースを提供し、実装の詳細を隠蔽します。

pub mod artifact_store;
pub mod clock;
pub mod execution_sink;
pub mod id_generator;
pub mod object_store;
pub mod plugin_catalog;
pub mod task_store;

pub use self::artifact_store::ArtifactStore;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::execution_sink::ExecutionSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::object_store::ObjectStore;
pub use self::plugin_catalog::PluginCatalog;
pub use self::task_store::{
    DEFAULT_LIMIT, MAX_LIMIT, Page, ScheduleFilter, ScheduleStore, Store, StoreError, TaskFilter,
    TaskStore,
};
