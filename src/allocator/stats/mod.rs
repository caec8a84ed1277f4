//! Usage counters and diagnostic reports.

pub mod metrics;

pub use metrics::{ArenaStatus, BlockInfo, BlockKind, HeapReport, UsageCounters};
