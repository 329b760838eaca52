//! # mtgate-sync
//!
//! Persists a reconciled deployment. [`plan`] renders every artifact a
//! [`DesiredState`](mtgate_core::DesiredState) implies, [`diff`] previews
//! them for `--dry-run`, and [`pipeline::run`] commits them in order with
//! [`commit`], keeping a `.backup` of each file it replaces.

pub mod diff;
pub mod error;
pub mod pipeline;
pub mod plan;
pub mod writer;

pub use diff::{diff, ArtifactDiff};
pub use error::SyncError;
pub use plan::{plan, Artifact, ArtifactKind};
pub use writer::{backup_path, commit, WriteResult};
