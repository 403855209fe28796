//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてスケジューラ本体を実装します。
//!
//! # 主要コンポーネント
//! - **RuntimeBuilder**: 構築とワイヤリング（不足があれば起動しない）
//! - **Runtime**: ワーカーの起動・停止・監督
//! - **Scheduler**: 種類ごとの投入ループ（Populator を組織ごとに呼ぶ）
//! - **Dispatcher**: キューから取り出して実行系へ渡すループ
//! - **Enqueuer**: Task の記録とキュー投入の整合性
//! - **StatusBoard**: スケジューラの状態・有効/無効・アラート

pub mod builder;
pub mod collaborators;
pub mod dispatcher;
pub mod enqueue;
pub mod populate;
pub mod runtime;
pub mod scheduler;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, RuntimeBuilder};
pub use self::collaborators::Collaborators;
pub use self::dispatcher::{DispatchOutcome, DispatchThreshold, Dispatcher};
pub use self::enqueue::{EnqueueOutcome, Enqueuer};
pub use self::populate::{
    NormalizationPopulator, PopulateReport, Populator, ReportPopulator, ScanPopulator,
};
pub use self::runtime::{ExitStatus, Runtime};
pub use self::scheduler::{Scheduler, SchedulerControl};
pub use self::status::{Alert, SchedulerState, SchedulerStatus, StatusBoard};
