pub mod archive;
pub mod health;
mod manager;
mod prepare;
mod rollback;
mod rotate;
mod run;
#[cfg(test)]
pub(crate) mod testing;

pub use manager::{MissingFiles, NodeFailure, Orchestrator, RotationError};
pub use rollback::RollbackReport;
pub use rotate::Stage;
pub use run::{run_check, run_discover, run_rollback, run_rotation};
