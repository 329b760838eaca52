//! Tera rendering engine: [`Template`] enum and [`Renderer`].
//!
//! | Template        | Artifact                                   |
//! |-----------------|--------------------------------------------|
//! | Routing         | `<edge>/stream.conf`                       |
//! | Vhost           | `<edge>/sites-available/80.conf`           |
//! | Site            | `<edge>/sites-available/<domain>`          |
//! | Settings        | `<service>/config.py`                      |
//! | GatewayCompose  | `<service>/docker-compose.yml`             |
//! | Dockerfile      | `<service>/Dockerfile`                     |

use serde::Serialize;
use tera::Tera;

use mtgate_core::layout::Layout;
use mtgate_core::types::{Domain, RoutingTable, ServiceConfig, VhostSet};

use crate::error::RenderError;
use crate::{compose, routing, settings, site, vhost};

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("stream.conf", include_str!("templates/stream.conf.tera")),
    ("80.conf", include_str!("templates/vhost.conf.tera")),
    ("site.conf", include_str!("templates/site.conf.tera")),
    ("config.py", include_str!("templates/config.py.tera")),
    ("docker-compose.yml", include_str!("templates/docker-compose.yml.tera")),
    ("Dockerfile", include_str!("templates/Dockerfile.tera")),
];

/// Every artifact this crate knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Template {
    Routing,
    Vhost,
    Site,
    Settings,
    GatewayCompose,
    Dockerfile,
}

impl Template {
    pub fn all() -> &'static [Template] {
        &[
            Template::Routing,
            Template::Vhost,
            Template::Site,
            Template::Settings,
            Template::GatewayCompose,
            Template::Dockerfile,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Template::Routing        => "stream.conf",
            Template::Vhost          => "80.conf",
            Template::Site           => "site.conf",
            Template::Settings       => "config.py",
            Template::GatewayCompose => "docker-compose.yml",
            Template::Dockerfile     => "Dockerfile",
        }
    }
}

/// Renders artifacts from embedded templates. Create once and reuse.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TPLS.iter().copied())?;
        Ok(Renderer { tera })
    }

    pub(crate) fn render<C: Serialize>(
        &self,
        template: Template,
        ctx: &C,
    ) -> Result<String, RenderError> {
        let ctx = tera::Context::from_serialize(ctx)?;
        Ok(self.tera.render(template.name(), &ctx)?)
    }

    pub fn routing(&self, table: &RoutingTable) -> Result<String, RenderError> {
        routing::render(self, table)
    }

    pub fn vhosts(&self, hosts: &VhostSet) -> Result<String, RenderError> {
        vhost::render(self, hosts)
    }

    pub fn site(
        &self,
        layout: &Layout,
        domain: &Domain,
        backend_port: u16,
        listen_port: u16,
    ) -> Result<String, RenderError> {
        site::render(self, layout, domain, backend_port, listen_port)
    }

    pub fn settings(&self, config: &ServiceConfig) -> Result<String, RenderError> {
        settings::render(self, config)
    }

    pub fn gateway_compose(&self, listen_port: u16, backend_port: u16) -> Result<String, RenderError> {
        compose::render_compose(self, listen_port, backend_port)
    }

    pub fn dockerfile(&self, listen_port: u16) -> Result<String, RenderError> {
        compose::render_dockerfile(self, listen_port)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_new_succeeds() {
        Renderer::new().expect("Renderer::new should succeed with embedded templates");
    }

    #[test]
    fn every_template_is_registered() {
        let renderer = Renderer::new().expect("renderer");
        let names: Vec<&str> = renderer.tera.get_template_names().collect();
        for template in Template::all() {
            assert!(
                names.contains(&template.name()),
                "template {:?} is not registered",
                template
            );
        }
        assert_eq!(names.len(), TPLS.len());
    }
}
