//! Which `docker compose` the host has.

use std::fmt;
use std::time::Duration;

use crate::command::{CommandRunner, CommandSpec};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComposeFlavor {
    /// `docker compose`, the CLI plugin.
    #[default]
    Plugin,
    /// The standalone `docker-compose` binary.
    Standalone,
}

impl ComposeFlavor {
    /// A compose invocation with `args` appended.
    pub fn command<I, S>(self, args: I, timeout: Duration) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self {
            ComposeFlavor::Plugin => CommandSpec::new("docker", timeout).args(["compose"]).args(args),
            ComposeFlavor::Standalone => CommandSpec::new("docker-compose", timeout).args(args),
        }
    }
}

impl fmt::Display for ComposeFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComposeFlavor::Plugin => f.write_str("docker compose"),
            ComposeFlavor::Standalone => f.write_str("docker-compose"),
        }
    }
}

/// Probes the plugin, then the standalone binary. Falls back to the plugin
/// when neither answers.
pub fn detect<R: CommandRunner + ?Sized>(runner: &mut R) -> ComposeFlavor {
    for flavor in [ComposeFlavor::Plugin, ComposeFlavor::Standalone] {
        let outcome = runner.run(&flavor.command(["version"], PROBE_TIMEOUT));
        if outcome.succeeded() {
            tracing::debug!("using {flavor}");
            return flavor;
        }
        tracing::debug!("{flavor} unavailable: {outcome}");
    }
    tracing::warn!("could not detect Docker Compose, assuming `docker compose`");
    ComposeFlavor::Plugin
}
