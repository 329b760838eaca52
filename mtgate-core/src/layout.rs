//! Host filesystem layout.
//!
//! All paths the tool reads or writes are derived from three roots so tests
//! can point the whole run at a temporary directory.

use std::path::{Path, PathBuf};

use crate::types::Domain;

pub const DEFAULT_EDGE_ROOT: &str = "/opt/remnanode";
pub const DEFAULT_SERVICE_ROOT: &str = "/opt/MTProto_Proxy";
pub const DEFAULT_CERT_ROOT: &str = "/etc/letsencrypt/live";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Edge router deployment (stream.conf, sites-available/, compose file).
    pub edge_root: PathBuf,
    /// Gateway deployment (config.py, compose file, program files).
    pub service_root: PathBuf,
    /// ACME client's live certificate directory.
    pub cert_root: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            edge_root: PathBuf::from(DEFAULT_EDGE_ROOT),
            service_root: PathBuf::from(DEFAULT_SERVICE_ROOT),
            cert_root: PathBuf::from(DEFAULT_CERT_ROOT),
        }
    }
}

impl Layout {
    /// Lays all three roots out under one directory. Used by tests.
    pub fn under(base: &Path) -> Self {
        Self {
            edge_root: base.join("edge"),
            service_root: base.join("service"),
            cert_root: base.join("certs"),
        }
    }

    pub fn routing_artifact(&self) -> PathBuf {
        self.edge_root.join("stream.conf")
    }

    pub fn sites_dir(&self) -> PathBuf {
        self.edge_root.join("sites-available")
    }

    pub fn vhost_artifact(&self) -> PathBuf {
        self.sites_dir().join("80.conf")
    }

    pub fn service_artifact(&self, domain: &Domain) -> PathBuf {
        self.sites_dir().join(domain.as_str())
    }

    pub fn edge_compose(&self) -> PathBuf {
        self.edge_root.join("docker-compose.yml")
    }

    pub fn settings_artifact(&self) -> PathBuf {
        self.service_root.join("config.py")
    }

    pub fn gateway_compose(&self) -> PathBuf {
        self.service_root.join("docker-compose.yml")
    }

    pub fn gateway_dockerfile(&self) -> PathBuf {
        self.service_root.join("Dockerfile")
    }

    pub fn gateway_program(&self) -> PathBuf {
        self.service_root.join("mtprotoproxy.py")
    }

    pub fn gateway_crypto_lib(&self) -> PathBuf {
        self.service_root.join("pyaes")
    }

    pub fn descriptor_file(&self) -> PathBuf {
        self.service_root.join("proxy_link.txt")
    }

    pub fn cert_dir(&self, domain: &Domain) -> PathBuf {
        self.cert_root.join(domain.as_str())
    }

    pub fn certificate(&self, domain: &Domain) -> PathBuf {
        self.cert_dir(domain).join("fullchain.pem")
    }

    pub fn private_key(&self, domain: &Domain) -> PathBuf {
        self.cert_dir(domain).join("privkey.pem")
    }
}
