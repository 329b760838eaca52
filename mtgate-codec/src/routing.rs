//! SNI dispatch map (`stream.conf`).

use serde::Serialize;
use tracing::{debug, warn};

use mtgate_core::types::{BackendTag, DomainRoute, RoutingTable, UpstreamTarget, EXTERNAL_PORT};

use crate::engine::{Renderer, Template};
use crate::error::RenderError;
use crate::syntax::{self, Node};

/// Variable the dispatch map is keyed on.
pub const MAP_SOURCE: &str = "$ssl_preread_server_name";

// `map` block parameters that look like entries.
const MAP_KEYWORDS: &[&str] = &["default", "hostnames", "volatile", "include"];

/// Recovers routes and pools from a routing artifact.
///
/// Anything unrecognised yields an empty table; this never fails.
pub fn parse(text: &str) -> RoutingTable {
    let nodes = syntax::parse(text);
    let Some(map) = syntax::find_block(&nodes, "map", &[MAP_SOURCE]) else {
        debug!("routing artifact has no SNI map block");
        return RoutingTable::default();
    };

    let routes: Vec<DomainRoute> = map.children().iter().filter_map(route_entry).collect();
    let mut pools = Vec::new();
    syntax::walk(&nodes, &mut |node| {
        if let Some(pool) = upstream_block(node) {
            pools.push(pool);
        }
    });

    let (table, dropped) = RoutingTable::assemble(routes, pools);
    for route in dropped {
        warn!(
            domain = %route.domain,
            backend = %route.backend,
            "dropping route whose upstream is not defined"
        );
    }
    table
}

/// Port of the pool serving `backend`, if the table has one.
pub fn backend_port(table: &RoutingTable, backend: &str) -> Option<u16> {
    table.upstream(backend).map(|target| target.port)
}

fn route_entry(node: &Node) -> Option<DomainRoute> {
    if node.is_block() || node.args.len() != 1 {
        return None;
    }
    let domain = node.name.to_ascii_lowercase();
    if MAP_KEYWORDS.contains(&domain.as_str()) || !is_host_pattern(&domain) {
        return None;
    }
    let backend = &node.args[0];
    if !is_identifier(backend) {
        return None;
    }
    Some(DomainRoute {
        domain,
        backend: BackendTag::from(backend.as_str()),
    })
}

fn upstream_block(node: &Node) -> Option<(BackendTag, UpstreamTarget)> {
    if !node.is_block() || node.name != "upstream" || node.args.len() != 1 {
        return None;
    }
    let target = node
        .children()
        .iter()
        .find(|child| child.name == "server")
        .and_then(|server| server.args.first())
        .and_then(|addr| UpstreamTarget::parse(addr))?;
    Some((BackendTag::from(node.args[0].as_str()), target))
}

// Hostnames plus the wildcard forms nginx accepts in a hostnames map.
fn is_host_pattern(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'*'))
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-'))
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RouteCtx {
    domain: String,
    backend: String,
}

#[derive(Serialize)]
struct PoolCtx {
    tag: String,
    target: String,
}

#[derive(Serialize)]
struct RoutingContext {
    routes: Vec<RouteCtx>,
    upstreams: Vec<PoolCtx>,
    default_backend: &'static str,
    external_port: u16,
}

pub(crate) fn render(renderer: &Renderer, table: &RoutingTable) -> Result<String, RenderError> {
    let ctx = RoutingContext {
        routes: table
            .routes()
            .map(|r| RouteCtx {
                domain: r.domain,
                backend: r.backend.0,
            })
            .collect(),
        upstreams: table
            .upstreams()
            .into_iter()
            .map(|(tag, target)| PoolCtx {
                tag: tag.to_string(),
                target: target.to_string(),
            })
            .collect(),
        default_backend: BackendTag::DEFAULT,
        external_port: EXTERNAL_PORT,
    };
    renderer.render(Template::Routing, &ctx)
}
