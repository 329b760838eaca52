//! mtgate core library: domain types, validation, host layout and the
//! reconciliation controller.
//!
//! - [`types`]: newtypes, routing table, gateway settings, snapshot
//! - [`validate`]: hostname, port, secret and ad tag rules
//! - [`layout`]: where every artifact lives on the host
//! - [`secret`]: secret generation and the connection descriptor
//! - [`description`]: JSON description for unattended runs
//! - [`reconcile`]: the decision state machine

pub mod description;
pub mod layout;
pub mod reconcile;
pub mod secret;
pub mod types;
pub mod validate;

pub use description::{Description, DescriptionError};
pub use layout::Layout;
pub use reconcile::{
    reconcile, Answers, Choice, DesiredState, DisplayState, Field, Mode, Prompt, ReconcileError,
    SecretAnswer, Transition,
};
pub use secret::ConnectionDescriptor;
pub use types::{
    AdTag, ArtifactPresence, BackendTag, CompletenessIssue, DeploymentSnapshot, Domain,
    DomainRoute, ExistingState, ModeFlags, PartialModeFlags, PartialServiceConfig, RoutingTable,
    Secret, ServiceConfig, UpstreamTarget, VhostSet,
};
pub use validate::ValidationError;
