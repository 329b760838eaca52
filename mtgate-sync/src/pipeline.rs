//! Commit pipeline: plan, then write every artifact in order.

use mtgate_codec::Renderer;
use mtgate_core::{DesiredState, Layout};

use crate::plan::{plan, Artifact};
use crate::writer::{commit, WriteResult};
use crate::SyncError;

/// Commits `artifacts` in order and stops at the first failure.
///
/// Earlier artifacts stay committed; there is no rollback.
pub fn commit_all(artifacts: &[Artifact], dry_run: bool) -> Result<Vec<WriteResult>, SyncError> {
    let mut writes = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        if artifact.create_only && artifact.path.exists() {
            tracing::debug!("keeping existing {}: {}", artifact.kind, artifact.path.display());
            writes.push(WriteResult::Unchanged {
                path: artifact.path.clone(),
            });
            continue;
        }
        match commit(&artifact.path, &artifact.content, dry_run) {
            Ok(result) => writes.push(result),
            Err(err) => {
                tracing::warn!(
                    kind = %artifact.kind,
                    committed = writes.iter().filter(|w| w.is_change()).count(),
                    "artifact commit failed, earlier artifacts were kept"
                );
                return Err(err);
            }
        }
    }
    Ok(writes)
}

/// Renders and commits everything `desired` implies.
pub fn run(
    desired: &DesiredState,
    layout: &Layout,
    renderer: &Renderer,
    dry_run: bool,
) -> Result<Vec<WriteResult>, SyncError> {
    let artifacts = plan(desired, layout, renderer)?;
    commit_all(&artifacts, dry_run)
}
