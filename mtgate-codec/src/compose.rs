//! Gateway container definition and image recipe.

use serde::Serialize;

use mtgate_core::types::EXTERNAL_PORT;

use crate::engine::{Renderer, Template};
use crate::error::RenderError;

/// Container name of the gateway.
pub const GATEWAY_CONTAINER: &str = "mtprotoproxy";
/// Container name of the edge router.
pub const EDGE_CONTAINER: &str = "remnawave-nginx";

#[derive(Serialize)]
struct ComposeContext {
    container: &'static str,
    external_port: u16,
    listen_port: u16,
    backend_port: u16,
}

pub(crate) fn render_compose(
    renderer: &Renderer,
    listen_port: u16,
    backend_port: u16,
) -> Result<String, RenderError> {
    let ctx = ComposeContext {
        container: GATEWAY_CONTAINER,
        external_port: EXTERNAL_PORT,
        listen_port,
        backend_port,
    };
    renderer.render(Template::GatewayCompose, &ctx)
}

#[derive(Serialize)]
struct DockerfileContext {
    listen_port: u16,
}

pub(crate) fn render_dockerfile(renderer: &Renderer, listen_port: u16) -> Result<String, RenderError> {
    renderer.render(Template::Dockerfile, &DockerfileContext { listen_port })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_uses_host_network_and_read_only_mounts() {
        let renderer = Renderer::new().expect("renderer");
        let rendered = renderer.gateway_compose(8888, 10443).expect("render");
        assert!(rendered.contains("network_mode: host"));
        assert!(rendered.contains("container_name: mtprotoproxy"));
        assert!(rendered.contains("- ./config.py:/app/config.py:ro"));
        assert!(rendered.contains("127.0.0.1:10443 -> 127.0.0.1:8888"));
    }

    #[test]
    fn dockerfile_exposes_listen_port() {
        let renderer = Renderer::new().expect("renderer");
        let rendered = renderer.dockerfile(9999).expect("render");
        assert!(rendered.starts_with("FROM python:3.11-slim"));
        assert!(rendered.contains("EXPOSE 9999"));
    }
}
