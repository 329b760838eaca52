//! Per-domain virtual host that terminates TLS for the gateway.

use serde::Serialize;

use mtgate_core::layout::Layout;
use mtgate_core::types::Domain;

use crate::engine::{Renderer, Template};
use crate::error::RenderError;
use crate::syntax;

const LOOPBACK_PROXY: &str = "http://127.0.0.1:";

/// What a gateway site says about the deployment it was rendered for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteSummary {
    pub server_name: Option<String>,
    /// Port of the first `listen ... ssl` directive.
    pub backend_port: Option<u16>,
    /// Gateway port behind `proxy_pass http://127.0.0.1:<port>`.
    pub listen_port: Option<u16>,
}

/// Reads a per-domain site back. `None` unless the text has a server block
/// proxying to a loopback port, which is what sets a gateway site apart from
/// the other sites sharing the directory.
pub fn parse(text: &str) -> Option<SiteSummary> {
    let nodes = syntax::parse(text);
    let server = syntax::find_block(&nodes, "server", &[])?;
    let mut summary = SiteSummary::default();
    syntax::walk(server.children(), &mut |node| match node.name.as_str() {
        "server_name" if summary.server_name.is_none() => {
            summary.server_name = node.args.first().cloned();
        }
        "listen" if summary.backend_port.is_none() && node.args.iter().any(|a| a == "ssl") => {
            summary.backend_port = node.args.first().and_then(|a| a.parse().ok());
        }
        "proxy_pass" if summary.listen_port.is_none() => {
            summary.listen_port = node
                .args
                .first()
                .and_then(|a| a.strip_prefix(LOOPBACK_PROXY))
                .and_then(|p| p.trim_end_matches('/').parse().ok());
        }
        _ => {}
    });
    summary.listen_port.is_some().then_some(summary)
}

#[derive(Serialize)]
struct SiteContext {
    domain: String,
    domain_pattern: String,
    backend_port: u16,
    listen_port: u16,
    certificate: String,
    private_key: String,
}

/// Domain as a literal inside an nginx regex.
fn regex_literal(domain: &Domain) -> String {
    domain.as_str().replace('.', "\\.")
}

pub(crate) fn render(
    renderer: &Renderer,
    layout: &Layout,
    domain: &Domain,
    backend_port: u16,
    listen_port: u16,
) -> Result<String, RenderError> {
    let ctx = SiteContext {
        domain: domain.to_string(),
        domain_pattern: regex_literal(domain),
        backend_port,
        listen_port,
        certificate: layout.certificate(domain).display().to_string(),
        private_key: layout.private_key(domain).display().to_string(),
    };
    renderer.render(Template::Site, &ctx)
}
