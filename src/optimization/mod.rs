pub mod callback;
pub mod problem;
pub mod solvers;

pub use callback::{EarlyStop, FitProgress, HopCallback};
pub use problem::WavelengthObjective;
pub use solvers::{OptimizerId, Strategy};
pub use solvers::{Problem, Solver, SolverReport};
