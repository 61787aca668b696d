pub mod metrics;
pub mod performance_analysis;

pub use performance_analysis::{PerformanceAnalysis, PerformanceView, TradeOutcome};
