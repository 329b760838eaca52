//! Rendering a desired state into the ordered list of artifacts to commit.

use std::fmt;
use std::path::PathBuf;

use mtgate_codec::Renderer;
use mtgate_core::{DesiredState, Layout};

use crate::SyncError;

/// Which artifact a rendered file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Routing,
    ServiceSite,
    Vhost,
    Settings,
    GatewayCompose,
    Dockerfile,
    Descriptor,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactKind::Routing => "routing",
            ArtifactKind::ServiceSite => "service site",
            ArtifactKind::Vhost => "vhost",
            ArtifactKind::Settings => "gateway settings",
            ArtifactKind::GatewayCompose => "gateway compose",
            ArtifactKind::Dockerfile => "gateway image",
            ArtifactKind::Descriptor => "connection link",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub content: String,
    /// Written only when nothing exists at `path` yet.
    pub create_only: bool,
}

impl Artifact {
    fn new(kind: ArtifactKind, path: PathBuf, content: String) -> Self {
        Self {
            kind,
            path,
            content,
            create_only: false,
        }
    }
}

/// Every artifact `desired` implies, in commit order: edge router files
/// first, then the gateway's.
pub fn plan(
    desired: &DesiredState,
    layout: &Layout,
    renderer: &Renderer,
) -> Result<Vec<Artifact>, SyncError> {
    let listen_port = desired.config.listen_port;
    let backend_port = desired.backend_port;

    let mut artifacts = vec![
        Artifact::new(
            ArtifactKind::Routing,
            layout.routing_artifact(),
            renderer.routing(&desired.routing)?,
        ),
        Artifact::new(
            ArtifactKind::ServiceSite,
            layout.service_artifact(&desired.domain),
            renderer.site(layout, &desired.domain, backend_port, listen_port)?,
        ),
        Artifact::new(
            ArtifactKind::Vhost,
            layout.vhost_artifact(),
            renderer.vhosts(&desired.vhosts)?,
        ),
        Artifact::new(
            ArtifactKind::Settings,
            layout.settings_artifact(),
            renderer.settings(&desired.config)?,
        ),
        Artifact::new(
            ArtifactKind::GatewayCompose,
            layout.gateway_compose(),
            renderer.gateway_compose(listen_port, backend_port)?,
        ),
    ];
    artifacts.push(Artifact {
        create_only: true,
        ..Artifact::new(
            ArtifactKind::Dockerfile,
            layout.gateway_dockerfile(),
            renderer.dockerfile(listen_port)?,
        )
    });
    artifacts.push(Artifact::new(
        ArtifactKind::Descriptor,
        layout.descriptor_file(),
        desired.descriptor().side_file(),
    ));

    tracing::debug!(count = artifacts.len(), domain = %desired.domain, "artifact plan built");
    Ok(artifacts)
}
