//! External actions run after the artifacts are committed: certificate
//! issuance, container restarts and a status check.
//!
//! Commands go through the [`CommandRunner`] trait; [`SystemRunner`] spawns
//! real processes with a bounded wait and reports a tagged [`ActionOutcome`].

pub mod command;
pub mod compose;
mod error;
pub mod runner;

pub use command::{ActionOutcome, CommandRunner, CommandSpec, SystemRunner};
pub use compose::ComposeFlavor;
pub use error::ActionError;
pub use runner::{ActionReport, ActionRunner, Step, StepRecord, Timeouts};
