pub mod config;
pub mod guess;
pub mod types;

pub use config::*;
pub use guess::starting_guess;
pub use types::*;
