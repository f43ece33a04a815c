//! Report aggregation and persistence

mod aggregator;
mod sink;

pub use aggregator::{
    BudgetRefreshFailure, BudgetStatus, Report, ReportAggregator, ReportInputs, ReportPeriod,
    ReportSummary,
};
pub use sink::{JsonFileSink, ReportSink};
