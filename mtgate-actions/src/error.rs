use thiserror::Error;

use crate::command::ActionOutcome;
use crate::runner::{ActionReport, Step};

/// An external step failed and the rest of the sequence was not run.
///
/// Artifacts committed before the actions phase are not touched.
#[derive(Debug, Error)]
#[error("{step} failed running `{command}`: {outcome}")]
pub struct ActionError {
    pub step: Step,
    pub command: String,
    pub outcome: ActionOutcome,
    /// Shell commands the operator can run to finish by hand.
    pub recovery: Vec<String>,
    /// Steps that ran before the failure.
    pub completed: ActionReport,
}
