mod aggregate;
mod batch;
mod driver;

pub use aggregate::{rmse, summarize, Aggregator};
pub use batch::{batch_indices, BatchReport, BatchScheduler};
pub use driver::{FitOutcome, FitSummary, WavelengthFitter};
