//! Secret generation and the client connection descriptor.

use rand::RngCore;
use serde::Serialize;

use crate::types::{Domain, Secret, EXTERNAL_PORT};

/// 16 bytes from `rng`, hex encoded. Callers pass `OsRng` outside tests.
pub fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Secret {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    Secret::from_bytes(bytes)
}

/// Fake-TLS client secret: `ee`, the domain's bytes in hex, then the secret.
pub fn derive_client_secret(domain: &Domain, secret: &Secret) -> String {
    format!("ee{}{}", hex::encode(domain.as_str().as_bytes()), secret.as_str())
}

/// What a client needs to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionDescriptor {
    pub domain: Domain,
    pub port: u16,
    pub secret: Secret,
    pub client_secret: String,
}

impl ConnectionDescriptor {
    pub fn new(domain: &Domain, secret: &Secret) -> Self {
        Self {
            domain: domain.clone(),
            port: EXTERNAL_PORT,
            secret: secret.clone(),
            client_secret: derive_client_secret(domain, secret),
        }
    }

    pub fn uri(&self) -> String {
        format!(
            "https://t.me/proxy?server={}&port={}&secret={}",
            self.domain, self.port, self.client_secret
        )
    }

    /// Contents of the side file written next to the settings artifact.
    pub fn side_file(&self) -> String {
        format!(
            "MTProto Proxy Connection Link\n{rule}\n\nDomain: {}\nPort: {}\nSecret: {}\n\nConnection Link:\n{}\n",
            self.domain,
            self.port,
            self.secret,
            self.uri(),
            rule = "=".repeat(60),
        )
    }

    /// Domain line of a side file written by [`side_file`](Self::side_file).
    pub fn recorded_domain(side_file: &str) -> Option<Domain> {
        side_file
            .lines()
            .find_map(|line| line.strip_prefix("Domain:"))
            .and_then(|raw| Domain::parse(raw.trim()).ok())
    }
}
