//! Reconciliation: decides what a run does and builds the desired state.
//!
//! [`reconcile`] is a pure function of the snapshot, the operator's choice and
//! the answers gathered so far. When answers are missing and the caller did
//! not ask for defaults it returns [`Transition::NeedMoreInput`]; an
//! interactive shell fills the answers in and calls it again.

use std::fmt;

use rand::RngCore;
use serde::Serialize;
use thiserror::Error;

use crate::secret::{self, ConnectionDescriptor};
use crate::types::{
    AdTag, BackendTag, CompletenessIssue, DeploymentSnapshot, Domain, ExistingState, ModeFlags,
    RoutingTable, Secret, ServiceConfig, UpstreamTarget, VhostSet, DEFAULT_BACKEND_PORT,
    DEFAULT_LISTEN_PORT, DEFAULT_MASQUERADE_DOMAIN, EXTERNAL_PORT,
};
use crate::validate::{self, ValidationError};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// What the operator picked from the menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    /// No menu was shown (nothing deployed yet, or a JSON run).
    Install,
    Show,
    Reconfigure,
    Repair,
    Abort,
}

/// A value the controller may need from the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Domain,
    ListenPort,
    BackendPort,
    MasqueradeDomain,
    Secret,
    AdTag,
    CompanionDomain,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Domain => "service domain",
            Field::ListenPort => "gateway listen port",
            Field::BackendPort => "nginx backend port",
            Field::MasqueradeDomain => "TLS masquerade domain",
            Field::Secret => "secret",
            Field::AdTag => "ad tag",
            Field::CompanionDomain => "xray reality domain",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretAnswer {
    /// Reuse the configured secret; generates one if there is none.
    Keep,
    Generate,
    Provided(String),
}

/// Raw answers collected so far. `None` means "not answered yet".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answers {
    pub domain: Option<String>,
    pub listen_port: Option<i64>,
    pub backend_port: Option<i64>,
    pub masquerade_domain: Option<String>,
    pub secret: Option<SecretAnswer>,
    /// An empty string means "no ad tag".
    pub ad_tag: Option<String>,
    pub companion_domain: Option<String>,
    /// Resolve unanswered fields to their defaults instead of asking.
    pub fill_defaults: bool,
}

impl Answers {
    /// Forgets the answer for `field` so it is asked again.
    pub fn clear(&mut self, field: Field) {
        match field {
            Field::Domain => self.domain = None,
            Field::ListenPort => self.listen_port = None,
            Field::BackendPort => self.backend_port = None,
            Field::MasqueradeDomain => self.masquerade_domain = None,
            Field::Secret => self.secret = None,
            Field::AdTag => self.ad_tag = None,
            Field::CompanionDomain => self.companion_domain = None,
        }
    }
}

/// A question for the operator, with the value an empty answer stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub field: Field,
    pub default: Option<String>,
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    FreshInstall,
    FullReconfigure,
    PartialRepair,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::FreshInstall => "fresh install",
            Mode::FullReconfigure => "reconfiguration",
            Mode::PartialRepair => "repair",
        })
    }
}

/// Everything the writer needs to regenerate the artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub mode: Mode,
    pub domain: Domain,
    pub backend_port: u16,
    pub config: ServiceConfig,
    pub routing: RoutingTable,
    pub vhosts: VhostSet,
    /// Service domain this run moved away from.
    pub previous_domain: Option<Domain>,
    pub secret_generated: bool,
    /// Ports that differ from the deployed ones and should be probed.
    pub new_ports: Vec<u16>,
}

impl DesiredState {
    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::new(&self.domain, &self.config.secret)
    }
}

/// Existing values to show without touching anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayState {
    pub domain: Domain,
    pub secret: Secret,
    pub listen_port: Option<u16>,
    pub backend_port: Option<u16>,
    pub masquerade_domain: Option<Domain>,
    pub ad_tag: Option<AdTag>,
}

impl DisplayState {
    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::new(&self.domain, &self.secret)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Apply(Box<DesiredState>),
    Display(DisplayState),
    NeedMoreInput(Vec<Prompt>),
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("invalid {field}: {source}")]
    InvalidInput {
        field: Field,
        #[source]
        source: ValidationError,
    },

    #[error("{field} is required")]
    MissingField { field: Field },

    #[error("cannot show connection details for {domain}: no secret is configured")]
    IncompleteForDisplay { domain: Domain },

    #[error("{choice:?} is not available for a deployment in state {state:?}")]
    ChoiceUnavailable {
        choice: Choice,
        state: ExistingState,
    },

    #[error("xray reality domain {domain} is the service domain")]
    CompanionConflict { domain: Domain },
}

impl ReconcileError {
    /// Field to ask again after this error, if asking again can help.
    pub fn field(&self) -> Option<Field> {
        match self {
            Self::InvalidInput { field, .. } | Self::MissingField { field } => Some(*field),
            Self::CompanionConflict { .. } => Some(Field::CompanionDomain),
            Self::IncompleteForDisplay { .. } | Self::ChoiceUnavailable { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

pub fn reconcile<R: RngCore + ?Sized>(
    snapshot: &DeploymentSnapshot,
    issues: &[CompletenessIssue],
    choice: Choice,
    answers: &Answers,
    rng: &mut R,
) -> Result<Transition, ReconcileError> {
    let state = ExistingState::classify(snapshot, issues);
    let mode = match (state, choice) {
        (_, Choice::Abort) => return Ok(Transition::Exit),
        (ExistingState::None, Choice::Show) | (ExistingState::Valid, Choice::Repair) => {
            return Err(ReconcileError::ChoiceUnavailable { choice, state })
        }
        (ExistingState::None, _) => Mode::FreshInstall,
        (_, Choice::Show) => return display(snapshot, state).map(Transition::Display),
        (_, Choice::Install | Choice::Reconfigure) => Mode::FullReconfigure,
        (ExistingState::Issues, Choice::Repair) => Mode::PartialRepair,
    };
    desired(snapshot, mode, answers, rng)
}

fn display(snapshot: &DeploymentSnapshot, state: ExistingState) -> Result<DisplayState, ReconcileError> {
    let Some(domain) = snapshot.service_domain.clone() else {
        return Err(ReconcileError::ChoiceUnavailable {
            choice: Choice::Show,
            state,
        });
    };
    let Some(secret) = snapshot.config.secret.clone() else {
        return Err(ReconcileError::IncompleteForDisplay { domain });
    };
    Ok(DisplayState {
        domain,
        secret,
        listen_port: snapshot.config.listen_port,
        backend_port: snapshot.backend_port,
        masquerade_domain: snapshot.config.masquerade_domain.clone(),
        ad_tag: snapshot.config.ad_tag.clone(),
    })
}

/// Values a field falls back to, per mode.
struct Current {
    domain: Option<Domain>,
    listen_port: Option<u16>,
    backend_port: Option<u16>,
    masquerade_domain: Option<Domain>,
    secret: Option<Secret>,
    ad_tag: Option<AdTag>,
    modes: ModeFlags,
}

impl Current {
    fn from_snapshot(snapshot: &DeploymentSnapshot) -> Self {
        let is_service_port = |p: &u16| *p != EXTERNAL_PORT;
        let listen_port = snapshot.config.listen_port.filter(is_service_port);
        let backend_port = snapshot
            .backend_port
            .filter(is_service_port)
            .filter(|p| Some(*p) != listen_port);
        Self {
            domain: snapshot.service_domain.clone(),
            listen_port,
            backend_port,
            masquerade_domain: snapshot.config.masquerade_domain.clone(),
            secret: snapshot.config.secret.clone(),
            ad_tag: snapshot.config.ad_tag.clone(),
            modes: snapshot.config.modes.or_default(),
        }
    }

    fn empty() -> Self {
        Self {
            domain: None,
            listen_port: None,
            backend_port: None,
            masquerade_domain: None,
            secret: None,
            ad_tag: None,
            modes: ModeFlags::default(),
        }
    }
}

struct Collector<'a> {
    answers: &'a Answers,
    pending: Vec<Prompt>,
}

impl Collector<'_> {
    /// Resolves one field from its answer, else its default, else a prompt.
    /// Defaults go through the same validation as answers.
    fn collect<A: fmt::Display, T>(
        &mut self,
        field: Field,
        answer: Option<A>,
        default: Option<A>,
        parse: impl FnOnce(A) -> Result<T, ValidationError>,
    ) -> Result<Option<T>, ReconcileError> {
        let raw = match answer {
            Some(raw) => raw,
            None if self.answers.fill_defaults => {
                default.ok_or(ReconcileError::MissingField { field })?
            }
            None => {
                self.pending.push(Prompt {
                    field,
                    default: default.map(|d| d.to_string()),
                });
                return Ok(None);
            }
        };
        parse(raw)
            .map(Some)
            .map_err(|source| ReconcileError::InvalidInput { field, source })
    }

    /// In repair mode, present values are carried over and never asked for.
    fn carry_or_collect<A: fmt::Display, T>(
        &mut self,
        carried: Option<T>,
        field: Field,
        answer: Option<A>,
        default: Option<A>,
        parse: impl FnOnce(A) -> Result<T, ValidationError>,
    ) -> Result<Option<T>, ReconcileError> {
        match carried {
            Some(value) => Ok(Some(value)),
            None => self.collect(field, answer, default, parse),
        }
    }
}

fn carried<T: Clone>(repair: bool, value: &Option<T>) -> Option<T> {
    if repair {
        value.clone()
    } else {
        None
    }
}

fn parse_domain(raw: String) -> Result<Domain, ValidationError> {
    Domain::parse(&raw)
}

fn desired<R: RngCore + ?Sized>(
    snapshot: &DeploymentSnapshot,
    mode: Mode,
    answers: &Answers,
    rng: &mut R,
) -> Result<Transition, ReconcileError> {
    let current = match mode {
        Mode::FreshInstall => Current::empty(),
        Mode::FullReconfigure | Mode::PartialRepair => Current::from_snapshot(snapshot),
    };
    let repair = mode == Mode::PartialRepair;

    let mut c = Collector {
        answers,
        pending: Vec::new(),
    };

    let domain = c.carry_or_collect(
        carried(repair, &current.domain),
        Field::Domain,
        answers.domain.clone(),
        current.domain.as_ref().map(Domain::to_string),
        parse_domain,
    )?;
    let listen_port = c.carry_or_collect(
        carried(repair, &current.listen_port),
        Field::ListenPort,
        answers.listen_port,
        Some(i64::from(current.listen_port.unwrap_or(DEFAULT_LISTEN_PORT))),
        validate::service_port,
    )?;
    let backend_port = c.carry_or_collect(
        carried(repair, &current.backend_port),
        Field::BackendPort,
        answers.backend_port,
        Some(i64::from(current.backend_port.unwrap_or(DEFAULT_BACKEND_PORT))),
        validate::service_port,
    )?;
    let masquerade_domain = c.carry_or_collect(
        carried(repair, &current.masquerade_domain),
        Field::MasqueradeDomain,
        answers.masquerade_domain.clone(),
        Some(
            current
                .masquerade_domain
                .as_ref()
                .map_or_else(|| DEFAULT_MASQUERADE_DOMAIN.to_owned(), Domain::to_string),
        ),
        parse_domain,
    )?;

    let mut secret_generated = false;
    let mut generate = || {
        secret_generated = true;
        secret::generate(rng)
    };
    let secret = match &answers.secret {
        _ if repair && current.secret.is_some() => current.secret.clone(),
        Some(SecretAnswer::Provided(raw)) => Some(Secret::parse(raw).map_err(|source| {
            ReconcileError::InvalidInput {
                field: Field::Secret,
                source,
            }
        })?),
        Some(SecretAnswer::Keep) if current.secret.is_some() => current.secret.clone(),
        None if answers.fill_defaults && current.secret.is_some() => current.secret.clone(),
        Some(SecretAnswer::Keep | SecretAnswer::Generate) => Some(generate()),
        None if answers.fill_defaults => Some(generate()),
        None => {
            c.pending.push(Prompt {
                field: Field::Secret,
                default: current.secret.as_ref().map(Secret::to_string),
            });
            None
        }
    };

    let ad_tag = match &answers.ad_tag {
        _ if repair => Some(current.ad_tag.clone()),
        Some(raw) if raw.trim().is_empty() => Some(None),
        Some(raw) => Some(Some(AdTag::parse(raw).map_err(|source| {
            ReconcileError::InvalidInput {
                field: Field::AdTag,
                source,
            }
        })?)),
        None if answers.fill_defaults => Some(current.ad_tag.clone()),
        None => {
            c.pending.push(Prompt {
                field: Field::AdTag,
                default: current.ad_tag.as_ref().map(AdTag::to_string),
            });
            None
        }
    };

    let companion = answers
        .companion_domain
        .as_deref()
        .map(Domain::parse)
        .transpose()
        .map_err(|source| ReconcileError::InvalidInput {
            field: Field::CompanionDomain,
            source,
        })?;

    if !c.pending.is_empty() {
        return Ok(Transition::NeedMoreInput(c.pending));
    }

    let (
        Some(domain),
        Some(listen_port),
        Some(backend_port),
        Some(masquerade_domain),
        Some(secret),
        Some(ad_tag),
    ) = (domain, listen_port, backend_port, masquerade_domain, secret, ad_tag)
    else {
        // Every `None` above pushed a prompt.
        return Ok(Transition::NeedMoreInput(Vec::new()));
    };

    if listen_port == backend_port {
        return Err(ReconcileError::InvalidInput {
            field: Field::BackendPort,
            source: ValidationError::PortCollision { port: backend_port },
        });
    }
    if companion.as_ref() == Some(&domain) {
        return Err(ReconcileError::CompanionConflict { domain });
    }

    let mut routing = snapshot.routing.clone();
    let previous_domain = snapshot
        .service_domain
        .clone()
        .filter(|prev| *prev != domain);
    if let Some(prev) = &previous_domain {
        if routing.backend_for(prev.as_str()).map(BackendTag::as_str) == Some(BackendTag::SERVICE) {
            routing.remove(prev.as_str());
        }
    }
    routing.upsert(&domain, BackendTag::service(), UpstreamTarget::loopback(backend_port));
    if let Some(companion) = &companion {
        let fallback = BackendTag::companion()
            .well_known_target()
            .unwrap_or_else(|| UpstreamTarget::loopback(9443));
        routing.upsert_keeping_target(companion, BackendTag::companion(), fallback);
    }

    let mut vhosts = snapshot.vhosts.clone();
    vhosts.insert(domain.as_str());

    let mut new_ports = Vec::new();
    if snapshot.config.listen_port != Some(listen_port) {
        new_ports.push(listen_port);
    }
    if snapshot.backend_port != Some(backend_port) {
        new_ports.push(backend_port);
    }

    Ok(Transition::Apply(Box::new(DesiredState {
        mode,
        domain,
        backend_port,
        config: ServiceConfig {
            listen_port,
            secret,
            masquerade_domain,
            ad_tag,
            modes: current.modes,
        },
        routing,
        vhosts,
        previous_domain,
        secret_generated,
        new_ports,
    })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::rngs::mock::StepRng;
    use rstest::rstest;

    use super::*;
    use crate::types::PartialServiceConfig;

    const SECRET: &str = "aabbccddeeff00112233445566778899";

    fn rng() -> StepRng {
        StepRng::new(1, 1)
    }

    fn deployed() -> DeploymentSnapshot {
        let domain = Domain::parse("p.example.com").expect("domain");
        let mut routing = RoutingTable::default();
        routing.upsert(&domain, BackendTag::service(), UpstreamTarget::loopback(10443));
        DeploymentSnapshot {
            service_domain: Some(domain),
            config: PartialServiceConfig {
                listen_port: Some(8888),
                secret: Some(Secret::parse(SECRET).expect("secret")),
                masquerade_domain: Some(Domain::parse("www.google.com").expect("domain")),
                ..Default::default()
            },
            backend_port: Some(10443),
            certificate_present: true,
            routing,
            ..Default::default()
        }
    }

    fn json(domain: &str) -> Answers {
        Answers {
            domain: Some(domain.to_owned()),
            fill_defaults: true,
            ..Default::default()
        }
    }

    #[rstest]
    #[case(Choice::Abort, &[], true)]
    #[case(Choice::Abort, &[CompletenessIssue::MissingSecret], true)]
    #[case(Choice::Show, &[], false)]
    #[case(Choice::Reconfigure, &[], false)]
    fn only_abort_exits(
        #[case] choice: Choice,
        #[case] issues: &[CompletenessIssue],
        #[case] exits: bool,
    ) {
        let out = reconcile(&deployed(), issues, choice, &json("p.example.com"), &mut rng())
            .expect("transition");
        assert_eq!(out == Transition::Exit, exits);
    }

    #[test]
    fn repair_without_issues_is_unavailable() {
        let err = reconcile(&deployed(), &[], Choice::Repair, &Answers::default(), &mut rng())
            .unwrap_err();
        assert!(matches!(err, ReconcileError::ChoiceUnavailable { .. }));
    }

    #[test]
    fn show_without_deployment_is_unavailable() {
        let snapshot = DeploymentSnapshot::default();
        let err = reconcile(&snapshot, &[], Choice::Show, &Answers::default(), &mut rng())
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::ChoiceUnavailable { state: ExistingState::None, .. }
        ));
    }

    #[test]
    fn show_without_secret_is_incomplete() {
        let mut snapshot = deployed();
        snapshot.config.secret = None;
        let err = reconcile(
            &snapshot,
            &[CompletenessIssue::MissingSecret],
            Choice::Show,
            &Answers::default(),
            &mut rng(),
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::IncompleteForDisplay { .. }));
    }

    #[test]
    fn interactive_fresh_install_asks_every_field() {
        let out = reconcile(
            &DeploymentSnapshot::default(),
            &[],
            Choice::Install,
            &Answers::default(),
            &mut rng(),
        )
        .expect("transition");
        let Transition::NeedMoreInput(prompts) = out else {
            panic!("expected prompts, got {out:?}");
        };
        let fields: Vec<Field> = prompts.iter().map(|p| p.field).collect();
        assert_eq!(
            fields,
            vec![
                Field::Domain,
                Field::ListenPort,
                Field::BackendPort,
                Field::MasqueradeDomain,
                Field::Secret,
                Field::AdTag,
            ]
        );
        assert_eq!(prompts[1].default.as_deref(), Some("8888"));
        assert_eq!(prompts[3].default.as_deref(), Some("www.google.com"));
        assert_eq!(prompts[0].default, None);
    }

    #[test]
    fn repair_only_asks_for_missing_fields() {
        let mut snapshot = deployed();
        snapshot.config.listen_port = None;
        let out = reconcile(
            &snapshot,
            &[CompletenessIssue::MissingListenPort],
            Choice::Repair,
            &Answers::default(),
            &mut rng(),
        )
        .expect("transition");
        let Transition::NeedMoreInput(prompts) = out else {
            panic!("expected prompts, got {out:?}");
        };
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].field, Field::ListenPort);
    }

    #[test]
    fn repair_recollects_an_invalid_carried_port() {
        let mut snapshot = deployed();
        snapshot.config.listen_port = Some(443);
        let out = reconcile(
            &snapshot,
            &[CompletenessIssue::MissingCertificate],
            Choice::Repair,
            &Answers::default(),
            &mut rng(),
        )
        .expect("transition");
        assert!(matches!(out, Transition::NeedMoreInput(ref p) if p[0].field == Field::ListenPort));
    }

    #[test]
    fn reconfigure_keeps_secret_on_request() {
        let answers = Answers {
            domain: Some("p.example.com".into()),
            listen_port: Some(8888),
            backend_port: Some(10443),
            masquerade_domain: Some("www.google.com".into()),
            secret: Some(SecretAnswer::Keep),
            ad_tag: Some(String::new()),
            ..Default::default()
        };
        let out = reconcile(&deployed(), &[], Choice::Reconfigure, &answers, &mut rng())
            .expect("transition");
        let Transition::Apply(desired) = out else {
            panic!("expected apply, got {out:?}");
        };
        assert_eq!(desired.config.secret.as_str(), SECRET);
        assert!(!desired.secret_generated);
        assert!(desired.new_ports.is_empty());
    }

    #[test]
    fn reconfigure_can_regenerate_secret() {
        let answers = Answers {
            secret: Some(SecretAnswer::Generate),
            ..json("p.example.com")
        };
        let out = reconcile(&deployed(), &[], Choice::Reconfigure, &answers, &mut rng())
            .expect("transition");
        let Transition::Apply(desired) = out else {
            panic!("expected apply, got {out:?}");
        };
        assert_ne!(desired.config.secret.as_str(), SECRET);
        assert!(desired.secret_generated);
    }

    #[rstest]
    #[case(Some(443), None, Field::ListenPort)]
    #[case(None, Some(443), Field::BackendPort)]
    #[case(Some(70000), None, Field::ListenPort)]
    #[case(Some(9000), Some(9000), Field::BackendPort)]
    fn invalid_ports_name_the_field(
        #[case] listen: Option<i64>,
        #[case] backend: Option<i64>,
        #[case] field: Field,
    ) {
        let answers = Answers {
            listen_port: listen,
            backend_port: backend,
            ..json("p.example.com")
        };
        let err = reconcile(&DeploymentSnapshot::default(), &[], Choice::Install, &answers, &mut rng())
            .unwrap_err();
        assert_eq!(err.field(), Some(field), "got: {err}");
    }

    #[test]
    fn domain_change_drops_old_service_route() {
        let answers = json("q.example.com");
        let out = reconcile(&deployed(), &[], Choice::Reconfigure, &answers, &mut rng())
            .expect("transition");
        let Transition::Apply(desired) = out else {
            panic!("expected apply, got {out:?}");
        };
        assert_eq!(desired.previous_domain.as_ref().map(Domain::as_str), Some("p.example.com"));
        assert!(desired.routing.backend_for("p.example.com").is_none());
        assert_eq!(
            desired.routing.backend_for("q.example.com").map(BackendTag::as_str),
            Some(BackendTag::SERVICE)
        );
    }

    #[test]
    fn companion_cannot_take_service_domain() {
        let answers = Answers {
            companion_domain: Some("p.example.com".into()),
            ..json("p.example.com")
        };
        let err = reconcile(&DeploymentSnapshot::default(), &[], Choice::Install, &answers, &mut rng())
            .unwrap_err();
        assert!(matches!(err, ReconcileError::CompanionConflict { .. }));
    }
}
