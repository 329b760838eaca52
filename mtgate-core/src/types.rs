//! Domain types for a gateway deployment behind the SNI edge router.
//!
//! Everything here is plain data. Parsing of on-disk artifacts lives in
//! `mtgate-codec`; these types only enforce their own invariants.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::validate::{self, ValidationError};

/// Port every client connects to on the edge router.
pub const EXTERNAL_PORT: u16 = 443;
pub const DEFAULT_LISTEN_PORT: u16 = 8888;
pub const DEFAULT_BACKEND_PORT: u16 = 10443;
pub const DEFAULT_MASQUERADE_DOMAIN: &str = "www.google.com";

/// User name under which the secret is stored in the settings artifact.
pub const SETTINGS_USER: &str = "tg";

const LOOPBACK: &str = "127.0.0.1";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A hostname that passed [`validate::domain`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let normalized = raw.trim().to_ascii_lowercase();
        validate::domain(&normalized)?;
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Domain {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Name of an upstream pool in the routing artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct BackendTag(pub String);

impl BackendTag {
    /// Fallback pool; owned by the edge router itself.
    pub const DEFAULT: &'static str = "nginx_backend";
    /// Pool fronting the gateway's per-domain virtual host.
    pub const SERVICE: &'static str = "mtproto_backend";
    /// Companion REALITY pool that commonly shares the edge router.
    pub const COMPANION: &'static str = "xray_reality";

    pub fn default_pool() -> Self {
        Self::from(Self::DEFAULT)
    }

    pub fn service() -> Self {
        Self::from(Self::SERVICE)
    }

    pub fn companion() -> Self {
        Self::from(Self::COMPANION)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }

    /// Target used when the routing artifact references this tag without
    /// defining a pool for it.
    pub fn well_known_target(&self) -> Option<UpstreamTarget> {
        match self.0.as_str() {
            Self::DEFAULT => Some(UpstreamTarget::loopback(8443)),
            Self::COMPANION => Some(UpstreamTarget::loopback(9443)),
            _ => None,
        }
    }
}

impl fmt::Display for BackendTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for BackendTag {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for BackendTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The user secret: exactly 32 lowercase hex characters.
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let normalized = raw.trim().to_ascii_lowercase();
        validate::secret(&normalized)?;
        Ok(Self(normalized))
    }

    /// Wraps 16 raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keep secrets out of debug logs.
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({}…)", &self.0[..4])
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Advertising tag issued by the proxy bot. Opaque, but must survive being
/// written into a double-quoted string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AdTag(String);

impl AdTag {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        validate::ad_tag(trimmed)?;
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// `host:port` target of an upstream pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamTarget {
    pub host: String,
    pub port: u16,
}

impl UpstreamTarget {
    pub fn loopback(port: u16) -> Self {
        Self {
            host: LOOPBACK.to_owned(),
            port,
        }
    }

    /// Parses `host:port`. Returns `None` for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        let (host, port) = raw.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        let port = port.parse::<u16>().ok().filter(|p| *p != 0)?;
        Some(Self {
            host: host.to_owned(),
            port,
        })
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// One entry of the SNI dispatch map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainRoute {
    pub domain: String,
    pub backend: BackendTag,
}

/// SNI dispatch map plus the pools it references.
///
/// Routes are keyed by domain, so each domain appears once. The `default`
/// token is never stored as a route. Every tag a route references has a pool,
/// and pools nobody references are pruned, except the default pool which is
/// always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingTable {
    routes: BTreeMap<String, BackendTag>,
    upstreams: BTreeMap<BackendTag, UpstreamTarget>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        let mut upstreams = BTreeMap::new();
        upstreams.insert(BackendTag::default_pool(), UpstreamTarget::loopback(8443));
        Self {
            routes: BTreeMap::new(),
            upstreams,
        }
    }
}

impl RoutingTable {
    /// Builds a table from parsed pieces, repairing what can be repaired.
    ///
    /// Routes whose tag has neither a pool nor a well-known target cannot be
    /// rendered and are returned in the second element instead.
    pub fn assemble(
        routes: impl IntoIterator<Item = DomainRoute>,
        upstreams: impl IntoIterator<Item = (BackendTag, UpstreamTarget)>,
    ) -> (Self, Vec<DomainRoute>) {
        let mut table = Self::default();
        table.upstreams.extend(upstreams);

        let mut dropped = Vec::new();
        for route in routes {
            let domain = route.domain.to_ascii_lowercase();
            if domain == "default" {
                continue;
            }
            if !table.upstreams.contains_key(&route.backend) {
                match route.backend.well_known_target() {
                    Some(target) => {
                        table.upstreams.insert(route.backend.clone(), target);
                    }
                    None => {
                        dropped.push(route);
                        continue;
                    }
                }
            }
            table.routes.insert(domain, route.backend);
        }
        table.prune();
        (table, dropped)
    }

    /// Points `domain` at `backend` and sets the pool's target. Other routes
    /// are left alone, including ones that share the tag.
    pub fn upsert(&mut self, domain: &Domain, backend: BackendTag, target: UpstreamTarget) {
        self.upstreams.insert(backend.clone(), target);
        self.routes.insert(domain.as_str().to_owned(), backend);
        self.prune();
    }

    /// Like [`upsert`](Self::upsert) but keeps an existing pool target.
    pub fn upsert_keeping_target(&mut self, domain: &Domain, backend: BackendTag, fallback: UpstreamTarget) {
        let target = self.upstreams.get(&backend).cloned().unwrap_or(fallback);
        self.upsert(domain, backend, target);
    }

    pub fn remove(&mut self, domain: &str) -> Option<BackendTag> {
        let removed = self.routes.remove(domain);
        self.prune();
        removed
    }

    pub fn backend_for(&self, domain: &str) -> Option<&BackendTag> {
        self.routes.get(domain)
    }

    /// First domain (in lexicographic order) routed to `backend`.
    ///
    /// Routes are keyed by domain, so file order is not kept. A table with
    /// several domains on one backend only comes from hand edits; picking the
    /// smallest name makes the answer stable across re-renders, which sort
    /// routes the same way.
    pub fn first_domain_for(&self, backend: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|(_, tag)| tag.as_str() == backend)
            .map(|(domain, _)| domain.as_str())
    }

    pub fn upstream(&self, backend: &str) -> Option<&UpstreamTarget> {
        self.upstreams.get(backend)
    }

    /// Routes sorted by domain.
    pub fn routes(&self) -> impl Iterator<Item = DomainRoute> + '_ {
        self.routes.iter().map(|(domain, backend)| DomainRoute {
            domain: domain.clone(),
            backend: backend.clone(),
        })
    }

    /// Pools in render order: the default pool first, the rest sorted by tag.
    pub fn upstreams(&self) -> Vec<(&BackendTag, &UpstreamTarget)> {
        let mut pools: Vec<_> = self.upstreams.iter().collect();
        // Stable, so the rest stay in tag order.
        pools.sort_by_key(|(tag, _)| !tag.is_default());
        pools
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn prune(&mut self) {
        let referenced: BTreeSet<&BackendTag> = self.routes.values().collect();
        self.upstreams
            .retain(|tag, _| tag.is_default() || referenced.contains(tag));
        if !self.upstreams.contains_key(BackendTag::DEFAULT) {
            self.upstreams
                .insert(BackendTag::default_pool(), UpstreamTarget::loopback(8443));
        }
    }
}

impl std::borrow::Borrow<str> for BackendTag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Hostnames served on the plaintext port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VhostSet(BTreeSet<String>);

impl VhostSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host: &str) -> bool {
        let host = host.trim().to_ascii_lowercase();
        if host.is_empty() {
            return false;
        }
        self.0.insert(host)
    }

    pub fn contains(&self, host: &str) -> bool {
        self.0.contains(host)
    }

    pub fn union(&mut self, other: &VhostSet) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Sorted, duplicate-free.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> FromIterator<&'a str> for VhostSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = Self::new();
        for host in iter {
            set.insert(host);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// Gateway settings
// ---------------------------------------------------------------------------

/// Protocol modes the gateway accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeFlags {
    pub classic: bool,
    pub secure: bool,
    pub tls: bool,
}

impl Default for ModeFlags {
    fn default() -> Self {
        Self {
            classic: false,
            secure: false,
            tls: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PartialModeFlags {
    pub classic: Option<bool>,
    pub secure: Option<bool>,
    pub tls: Option<bool>,
}

impl PartialModeFlags {
    /// Fills absent flags from [`ModeFlags::default`].
    pub fn or_default(self) -> ModeFlags {
        let base = ModeFlags::default();
        ModeFlags {
            classic: self.classic.unwrap_or(base.classic),
            secure: self.secure.unwrap_or(base.secure),
            tls: self.tls.unwrap_or(base.tls),
        }
    }
}

impl From<ModeFlags> for PartialModeFlags {
    fn from(m: ModeFlags) -> Self {
        Self {
            classic: Some(m.classic),
            secure: Some(m.secure),
            tls: Some(m.tls),
        }
    }
}

/// Fully populated gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceConfig {
    pub listen_port: u16,
    pub secret: Secret,
    pub masquerade_domain: Domain,
    pub ad_tag: Option<AdTag>,
    pub modes: ModeFlags,
}

/// Gateway settings as recovered from disk: any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartialServiceConfig {
    pub listen_port: Option<u16>,
    pub secret: Option<Secret>,
    pub masquerade_domain: Option<Domain>,
    pub ad_tag: Option<AdTag>,
    pub modes: PartialModeFlags,
}

impl PartialServiceConfig {
    /// `Some` only when every required field is present.
    pub fn complete(&self) -> Option<ServiceConfig> {
        Some(ServiceConfig {
            listen_port: self.listen_port?,
            secret: self.secret.clone()?,
            masquerade_domain: self.masquerade_domain.clone()?,
            ad_tag: self.ad_tag.clone(),
            modes: self.modes.or_default(),
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl From<ServiceConfig> for PartialServiceConfig {
    fn from(c: ServiceConfig) -> Self {
        Self {
            listen_port: Some(c.listen_port),
            secret: Some(c.secret),
            masquerade_domain: Some(c.masquerade_domain),
            ad_tag: c.ad_tag,
            modes: c.modes.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Which generated artifacts exist on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactPresence {
    pub routing: bool,
    pub vhost: bool,
    pub service: bool,
    pub settings: bool,
    pub compose: bool,
}

/// Read-only view of the deployment, rebuilt from disk on every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentSnapshot {
    pub service_domain: Option<Domain>,
    pub config: PartialServiceConfig,
    pub backend_port: Option<u16>,
    pub certificate_present: bool,
    pub artifacts: ArtifactPresence,
    pub routing: RoutingTable,
    pub vhosts: VhostSet,
}

impl DeploymentSnapshot {
    pub fn companion_domain(&self) -> Option<&str> {
        self.routing.first_domain_for(BackendTag::COMPANION)
    }
}

/// Something that keeps an existing deployment from being complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompletenessIssue {
    MissingListenPort,
    MissingSecret,
    MissingMasqueradeDomain,
    MissingCertificate,
    MissingServiceArtifact,
    MissingRoutingArtifact,
    MissingComposeArtifact,
}

impl fmt::Display for CompletenessIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MissingListenPort => "listen port is not set in config.py",
            Self::MissingSecret => "secret is not set in config.py",
            Self::MissingMasqueradeDomain => "TLS masquerade domain is not set in config.py",
            Self::MissingCertificate => "no TLS certificate for the service domain",
            Self::MissingServiceArtifact => "per-domain nginx virtual host is missing",
            Self::MissingRoutingArtifact => "stream.conf has no route for the service domain",
            Self::MissingComposeArtifact => "gateway docker-compose.yml is missing",
        };
        f.write_str(text)
    }
}

/// How the reconciliation machine sees the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingState {
    None,
    Valid,
    Issues,
}

impl ExistingState {
    pub fn classify(snapshot: &DeploymentSnapshot, issues: &[CompletenessIssue]) -> Self {
        match (&snapshot.service_domain, issues.is_empty()) {
            (None, _) => Self::None,
            (Some(_), true) => Self::Valid,
            (Some(_), false) => Self::Issues,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
