//! Deployment detection for `mtgate-detector`.
//!
//! [`detect`] reads the routing, vhost and settings artifacts plus a few
//! filesystem probes and returns a [`DeploymentSnapshot`]. It never fails:
//! an artifact that is missing or unreadable contributes nothing. When the
//! routing artifact no longer names the service but the gateway is still
//! installed, the domain is recovered from `proxy_link.txt` or the gateway
//! site so the deployment reads as broken rather than absent.
//! [`find_issues`] then says what keeps a detected deployment from being
//! complete.

use std::fs;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use mtgate_codec::{routing, settings, site, vhost};
use mtgate_core::layout::Layout;
use mtgate_core::secret::ConnectionDescriptor;
use mtgate_core::types::{
    ArtifactPresence, BackendTag, CompletenessIssue, DeploymentSnapshot, Domain,
};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("{what} not found at {path}")]
    MissingPrerequisite { what: &'static str, path: PathBuf },
}

/// Non-fatal findings from [`check_prerequisites`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostReport {
    /// `stream.conf` does not exist yet and will be created.
    pub routing_artifact_missing: bool,
    /// Gateway program files the container mounts but nobody has downloaded.
    pub missing_program_files: Vec<PathBuf>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Builds a fresh snapshot of the deployment described by `layout`.
pub fn detect(layout: &Layout) -> DeploymentSnapshot {
    let routing_path = layout.routing_artifact();
    let routing_text = read_optional(&routing_path);
    let routing = routing_text
        .as_deref()
        .map(routing::parse)
        .unwrap_or_default();

    let vhosts = read_optional(&layout.vhost_artifact())
        .as_deref()
        .map(vhost::parse)
        .unwrap_or_default();

    let config = read_optional(&layout.settings_artifact())
        .as_deref()
        .map(settings::parse)
        .unwrap_or_default();

    let routed = routing
        .first_domain_for(BackendTag::SERVICE)
        .and_then(|d| match Domain::parse(d) {
            Ok(domain) => Some(domain),
            Err(err) => {
                warn!(domain = d, error = %err, "service route has an unusable domain");
                None
            }
        });
    let (service_domain, backend_port) = match routed {
        Some(domain) => (Some(domain), routing::backend_port(&routing, BackendTag::SERVICE)),
        None if layout.settings_artifact().is_file() => {
            match recover_service(layout, config.listen_port) {
                Some((domain, port)) => {
                    warn!(
                        domain = %domain,
                        "no service route in the routing artifact; domain recovered from gateway artifacts"
                    );
                    (Some(domain), port)
                }
                None => (None, None),
            }
        }
        None => (None, None),
    };

    let artifacts = ArtifactPresence {
        routing: routing_text.is_some(),
        vhost: layout.vhost_artifact().is_file(),
        service: service_domain
            .as_ref()
            .is_some_and(|d| layout.service_artifact(d).is_file()),
        settings: layout.settings_artifact().is_file(),
        compose: layout.gateway_compose().is_file(),
    };
    let certificate_present = service_domain
        .as_ref()
        .is_some_and(|d| layout.certificate(d).is_file());

    debug!(
        service_domain = ?service_domain.as_ref().map(Domain::as_str),
        routes = routing.len(),
        vhosts = vhosts.len(),
        "deployment detected"
    );

    DeploymentSnapshot {
        service_domain,
        config,
        backend_port,
        certificate_present,
        artifacts,
        routing,
        vhosts,
    }
}

/// Issues in a detected deployment. Empty when nothing is deployed.
pub fn find_issues(snapshot: &DeploymentSnapshot) -> Vec<CompletenessIssue> {
    let mut issues = Vec::new();
    if snapshot.service_domain.is_none() {
        return issues;
    }
    let config = &snapshot.config;
    if config.listen_port.is_none() {
        issues.push(CompletenessIssue::MissingListenPort);
    }
    if config.secret.is_none() {
        issues.push(CompletenessIssue::MissingSecret);
    }
    if config.masquerade_domain.is_none() {
        issues.push(CompletenessIssue::MissingMasqueradeDomain);
    }
    if !snapshot.certificate_present {
        issues.push(CompletenessIssue::MissingCertificate);
    }
    if !snapshot.artifacts.service {
        issues.push(CompletenessIssue::MissingServiceArtifact);
    }
    let routed = snapshot
        .service_domain
        .as_ref()
        .and_then(|d| snapshot.routing.backend_for(d.as_str()))
        .is_some_and(|tag| tag.as_str() == BackendTag::SERVICE);
    if !snapshot.artifacts.routing || !routed || snapshot.backend_port.is_none() {
        issues.push(CompletenessIssue::MissingRoutingArtifact);
    }
    if !snapshot.artifacts.compose {
        issues.push(CompletenessIssue::MissingComposeArtifact);
    }
    issues
}

/// Edge router installation must exist before anything is written.
pub fn check_prerequisites(layout: &Layout) -> Result<HostReport, DetectError> {
    if !layout.edge_root.is_dir() {
        return Err(DetectError::MissingPrerequisite {
            what: "edge router directory",
            path: layout.edge_root.clone(),
        });
    }
    let compose = layout.edge_compose();
    if !compose.is_file() {
        return Err(DetectError::MissingPrerequisite {
            what: "edge router docker-compose.yml",
            path: compose,
        });
    }

    let missing_program_files = [layout.gateway_program(), layout.gateway_crypto_lib()]
        .into_iter()
        .filter(|p| !p.exists())
        .collect();

    Ok(HostReport {
        routing_artifact_missing: !layout.routing_artifact().exists(),
        missing_program_files,
    })
}

/// Whether `port` can be bound on loopback right now. Racy by nature; the
/// answer is only good for a warning.
pub fn port_available(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

/// Subset of `ports` that are already bound.
pub fn ports_in_use(ports: &[u16]) -> Vec<u16> {
    ports
        .iter()
        .copied()
        .filter(|p| {
            let free = port_available(*p);
            if !free {
                warn!(port = *p, "port is already in use");
            }
            !free
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Service domain and backend port from the gateway's own artifacts: the
/// descriptor side file first, then a gateway site proxying to `listen_port`.
fn recover_service(layout: &Layout, listen_port: Option<u16>) -> Option<(Domain, Option<u16>)> {
    let site_of = |path: &Path| read_optional(path).as_deref().and_then(site::parse);

    if let Some(domain) = read_optional(&layout.descriptor_file())
        .as_deref()
        .and_then(ConnectionDescriptor::recorded_domain)
    {
        let port = site_of(&layout.service_artifact(&domain)).and_then(|s| s.backend_port);
        return Some((domain, port));
    }

    let vhost = layout.vhost_artifact();
    let mut found: Vec<(Domain, Option<u16>)> = fs::read_dir(layout.sites_dir())
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| *path != vhost)
        .filter_map(|path| {
            let domain = Domain::parse(path.file_name()?.to_str()?).ok()?;
            let summary = site_of(&path)?;
            let names_itself = summary.server_name.as_deref() == Some(domain.as_str());
            let same_gateway = listen_port.map_or(true, |p| summary.listen_port == Some(p));
            (names_itself && same_gateway).then_some((domain, summary.backend_port))
        })
        .collect();
    found.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
    found.into_iter().next()
}

fn read_optional(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "artifact absent");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "artifact unreadable, treating as absent");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
