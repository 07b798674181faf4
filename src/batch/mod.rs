/// Sequential executor
pub mod executor;
/// Launching the external program
pub mod runner;
/// Jobs, events and reports
pub mod types;

pub use executor::*;
pub use runner::*;
pub use types::*;
