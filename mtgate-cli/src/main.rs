//! mtgate: provision an MTProto gateway behind a shared SNI edge router.
//!
//! # Usage
//!
//! ```text
//! mtgate [--interactive]                 guided setup (the default)
//! mtgate --config <path>                 unattended setup from a JSON description
//! mtgate --status [--json]               show the detected deployment and exit
//! mtgate ... --dry-run                   print the diffs, write nothing
//! mtgate ... --no-actions                write artifacts, skip certbot and restarts
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser};

use commands::setup::{RunOptions, Source};
use mtgate_core::Layout;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "mtgate",
    version,
    about = "Set up an MTProto proxy behind a shared nginx SNI router",
    long_about = None,
)]
struct Cli {
    /// Load a JSON description instead of asking questions.
    #[arg(long, value_name = "PATH", conflicts_with_all = ["interactive", "status"])]
    config: Option<PathBuf>,

    /// Guided prompts (also the default without `--config`).
    #[arg(long, short = 'i')]
    interactive: bool,

    /// Print the detected deployment and its issues, then exit.
    #[arg(long, conflicts_with = "interactive")]
    status: bool,

    /// With `--status`, emit machine-readable JSON.
    #[arg(long, requires = "status")]
    json: bool,

    /// Show a unified diff of every artifact that would change; write nothing.
    #[arg(long)]
    dry_run: bool,

    /// Write artifacts but skip certificate issuance and container restarts.
    #[arg(long)]
    no_actions: bool,

    /// Edge router deployment directory.
    #[arg(long, env = "MTGATE_EDGE_ROOT", value_name = "DIR")]
    edge_root: Option<PathBuf>,

    /// Gateway deployment directory.
    #[arg(long, env = "MTGATE_SERVICE_ROOT", value_name = "DIR")]
    service_root: Option<PathBuf>,

    /// ACME live certificate directory.
    #[arg(long, env = "MTGATE_CERT_ROOT", value_name = "DIR")]
    cert_root: Option<PathBuf>,

    /// More logging: -v info, -vv debug.
    #[arg(long, short = 'v', action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn layout(&self) -> Layout {
        let defaults = Layout::default();
        Layout {
            edge_root: self.edge_root.clone().unwrap_or(defaults.edge_root),
            service_root: self.service_root.clone().unwrap_or(defaults.service_root),
            cert_root: self.cert_root.clone().unwrap_or(defaults.cert_root),
        }
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let layout = cli.layout();

    if cli.status {
        return commands::status::run(&layout, cli.json);
    }

    let options = RunOptions {
        dry_run: cli.dry_run,
        no_actions: cli.no_actions,
    };
    let source = match cli.config {
        Some(path) => Source::Description(path),
        None => Source::Interactive,
    };
    commands::setup::run(&layout, source, options)
}
