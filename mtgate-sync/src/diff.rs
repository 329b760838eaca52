//! Dry-run unified diff support for `mtgate --dry-run`.

use std::path::PathBuf;

use similar::TextDiff;

use crate::plan::{Artifact, ArtifactKind};
use crate::writer::{normalize_line_endings, read_current};
use crate::SyncError;

/// A single artifact diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDiff {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub unified_diff: String,
}

/// Compares each planned artifact with what is on disk. Artifacts that would
/// not change are left out. No files are written.
pub fn diff(artifacts: &[Artifact]) -> Result<Vec<ArtifactDiff>, SyncError> {
    let mut diffs = Vec::new();
    for artifact in artifacts {
        let existing = read_current(&artifact.path)?;
        if artifact.create_only && existing.is_some() {
            continue;
        }
        let existing = existing.unwrap_or_default();
        let rendered = normalize_line_endings(&artifact.content);
        if existing == rendered {
            continue;
        }

        let old_header = format!("a{}", absolute_display(&artifact.path));
        let new_header = format!("b{}", absolute_display(&artifact.path));
        let unified = TextDiff::from_lines(&existing, &rendered)
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string();

        diffs.push(ArtifactDiff {
            kind: artifact.kind,
            path: artifact.path.clone(),
            unified_diff: unified,
        });
    }
    Ok(diffs)
}

// `a/etc/...` for absolute paths, `a/<rel>` otherwise.
fn absolute_display(path: &std::path::Path) -> String {
    let shown = path.display().to_string();
    if shown.starts_with('/') {
        shown
    } else {
        format!("/{shown}")
    }
}
