//! Plaintext-port virtual host (`80.conf`).

use serde::Serialize;
use tracing::debug;

use mtgate_core::types::VhostSet;

use crate::engine::{Renderer, Template};
use crate::error::RenderError;
use crate::syntax;

/// Hostnames from the first `server_name` directive. Missing or unreadable
/// input gives an empty set.
pub fn parse(text: &str) -> VhostSet {
    let nodes = syntax::parse(text);
    let mut hosts = None;
    syntax::walk(&nodes, &mut |node| {
        if hosts.is_none() && !node.is_block() && node.name == "server_name" {
            hosts = Some(node.args.clone());
        }
    });
    let Some(hosts) = hosts else {
        debug!("vhost artifact has no server_name directive");
        return VhostSet::new();
    };
    hosts
        .iter()
        .map(String::as_str)
        .filter(|h| *h != "_")
        .collect()
}

#[derive(Serialize)]
struct VhostContext<'a> {
    hosts: Vec<&'a str>,
}

pub(crate) fn render(renderer: &Renderer, hosts: &VhostSet) -> Result<String, RenderError> {
    let ctx = VhostContext {
        hosts: hosts.iter().collect(),
    };
    renderer.render(Template::Vhost, &ctx)
}
