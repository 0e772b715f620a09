mod io_utils;
pub mod export;
pub mod tracker;

// Re-export the session surface
pub use export::{
    ExportError, ExportOptions, ExportPlan, ExportSession, ExportSummary, FinalizationError,
    FinalizeAction, TransferredFile,
};
pub use tracker::{
    LogProgressSink, NoopProgressSink, ProgressSink, ProgressTracker, TransferEvent,
    TransferSnapshot,
};
