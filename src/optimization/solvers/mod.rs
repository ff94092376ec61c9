mod anneal;
mod basin_hopping;
mod least_squares;
mod shgo;
mod sobol;
pub mod traits;

pub use anneal::AnnealSolver;
pub use basin_hopping::{BasinHoppingSolver, BoundedStepper, StepTaker};
pub use least_squares::LeastSquaresSolver;
pub use shgo::ShgoSolver;
pub use sobol::Sobol;
pub use traits::{OptimizationCallback, Problem, Solver, SolverReport};

use crate::core::FitConfig;
use crate::error::{FitError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a fitting strategy, as given on the command line and
/// recorded in every subresult
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerId {
    LeastSquares,
    Shgo,
    Anneal,
    #[default]
    BasinHopping,
}

impl OptimizerId {
    pub const ALL: [OptimizerId; 4] = [
        OptimizerId::LeastSquares,
        OptimizerId::Shgo,
        OptimizerId::Anneal,
        OptimizerId::BasinHopping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerId::LeastSquares => "least_squares",
            OptimizerId::Shgo => "shgo",
            OptimizerId::Anneal => "anneal",
            OptimizerId::BasinHopping => "basin_hopping",
        }
    }
}

impl fmt::Display for OptimizerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerId {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self> {
        OptimizerId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| FitError::UnknownOptimizer(s.to_string()))
    }
}

/// One configured strategy. Basin hopping owns a nested local strategy.
pub enum Strategy {
    LeastSquares(LeastSquaresSolver),
    Shgo(ShgoSolver),
    Anneal(AnnealSolver),
    BasinHopping(BasinHoppingSolver),
}

impl Strategy {
    pub fn from_id(id: OptimizerId, config: &FitConfig) -> Self {
        let least_squares = || LeastSquaresSolver::new(config.least_squares.clone());
        match id {
            OptimizerId::LeastSquares => Strategy::LeastSquares(least_squares()),
            OptimizerId::Shgo => Strategy::Shgo(ShgoSolver::new(config.shgo.clone())),
            OptimizerId::Anneal => Strategy::Anneal(AnnealSolver::new(
                config.anneal.clone(),
                config.least_squares.clone(),
            )),
            OptimizerId::BasinHopping => Strategy::BasinHopping(BasinHoppingSolver::new(
                config.basin_hopping.clone(),
                Strategy::LeastSquares(least_squares()),
            )),
        }
    }

    pub fn id(&self) -> OptimizerId {
        match self {
            Strategy::LeastSquares(_) => OptimizerId::LeastSquares,
            Strategy::Shgo(_) => OptimizerId::Shgo,
            Strategy::Anneal(_) => OptimizerId::Anneal,
            Strategy::BasinHopping(_) => OptimizerId::BasinHopping,
        }
    }

    fn solver_mut(&mut self) -> &mut dyn Solver {
        match self {
            Strategy::LeastSquares(s) => s,
            Strategy::Shgo(s) => s,
            Strategy::Anneal(s) => s,
            Strategy::BasinHopping(s) => s,
        }
    }
}

impl Solver for Strategy {
    fn name(&self) -> &str {
        self.id().as_str()
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverReport> {
        self.solver_mut().solve(problem, callback)
    }
}
