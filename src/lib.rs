pub mod core;
pub mod error;
pub mod optimization;
pub mod optimizer;
pub mod plot;
pub mod simulation;
pub mod storage;

pub use crate::core::{FinalResult, FitConfig, ParameterVector, Subresult, TargetEntry};
pub use error::{FitError, Result};
pub use optimization::{OptimizerId, Strategy};
pub use optimizer::{Aggregator, BatchReport, BatchScheduler, FitOutcome, WavelengthFitter};
pub use plot::{CsvPlotter, NullPlotter, Plotter};
pub use simulation::{ExternalSimulator, SlabSimulator, Simulator};
pub use storage::{FsStore, ResultStore};
