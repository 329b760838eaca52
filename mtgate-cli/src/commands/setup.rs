//! The setup run: prerequisites, detection, reconciliation, commit, actions.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use colored::Colorize;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info};

use mtgate_actions::{compose, ActionRunner, ComposeFlavor, SystemRunner};
use mtgate_codec::Renderer;
use mtgate_core::{
    reconcile, Answers, Choice, CompletenessIssue, ConnectionDescriptor, DeploymentSnapshot,
    Description, DesiredState, Domain, Layout, Transition,
};
use mtgate_detector::{check_prerequisites, detect, find_issues, ports_in_use, HostReport};
use mtgate_sync::{commit, diff, pipeline, plan, WriteResult};

use super::prompt::{self, Prompter, TerminalPrompter};
use super::report;

const UPSTREAM_REPO: &str = "https://github.com/alexbers/mtprotoproxy";

/// Where the desired state comes from.
#[derive(Debug, Clone)]
pub enum Source {
    Description(PathBuf),
    Interactive,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub no_actions: bool,
}

pub fn run(layout: &Layout, source: Source, options: RunOptions) -> Result<()> {
    let host = check_prerequisites(layout).context("edge router installation not found")?;
    warn_host(layout, &host);

    let snapshot = detect(layout);
    let issues = find_issues(&snapshot);
    debug!(
        domain = ?snapshot.service_domain,
        issues = issues.len(),
        "detected deployment"
    );

    let transition = match source {
        Source::Description(path) => from_description(&path, &snapshot, &issues)?,
        Source::Interactive => {
            report::print_state(&snapshot, &issues);
            interactive(&mut TerminalPrompter, &snapshot, &issues, &mut OsRng)?
        }
    };

    match transition {
        Transition::Exit => {
            println!("Exiting without changes.");
            Ok(())
        }
        Transition::Display(display) => show(layout, &display.descriptor(), options.dry_run),
        Transition::Apply(desired) => apply(layout, &desired, options),
        Transition::NeedMoreInput(prompts) => {
            bail!("unanswered questions: {}", field_list(&prompts))
        }
    }
}

fn warn_host(layout: &Layout, host: &HostReport) {
    if host.routing_artifact_missing {
        eprintln!(
            "{} {} not found; it will be created",
            "⚠".yellow(),
            layout.routing_artifact().display()
        );
    }
    for missing in &host.missing_program_files {
        eprintln!(
            "{} {} not found; download it from {UPSTREAM_REPO}",
            "⚠".yellow(),
            missing.display()
        );
    }
}

fn field_list(prompts: &[mtgate_core::Prompt]) -> String {
    prompts
        .iter()
        .map(|p| p.field.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Deciding
// ---------------------------------------------------------------------------

fn from_description(
    path: &Path,
    snapshot: &DeploymentSnapshot,
    issues: &[CompletenessIssue],
) -> Result<Transition> {
    let description = Description::load(path)?;
    let choice = if description.skip_setup && snapshot.service_domain.is_some() {
        Choice::Show
    } else {
        Choice::Install
    };
    let transition = reconcile(snapshot, issues, choice, &description.answers(), &mut OsRng)
        .with_context(|| format!("cannot use description {}", path.display()))?;
    if let Transition::NeedMoreInput(prompts) = &transition {
        bail!(
            "description {} is missing: {}",
            path.display(),
            field_list(prompts)
        );
    }
    Ok(transition)
}

/// Menu (for an existing deployment), then questions until the controller
/// has what it needs. Invalid answers are asked again; a choice that cannot
/// be carried out goes back to the menu.
pub(crate) fn interactive<P, R>(
    prompter: &mut P,
    snapshot: &DeploymentSnapshot,
    issues: &[CompletenessIssue],
    rng: &mut R,
) -> Result<Transition>
where
    P: Prompter + ?Sized,
    R: RngCore + ?Sized,
{
    let deployed = snapshot.service_domain.is_some();
    'menu: loop {
        let choice = if deployed {
            prompt::choose(prompter, !issues.is_empty())?
        } else {
            Choice::Install
        };
        let mut answers = Answers::default();
        loop {
            match reconcile(snapshot, issues, choice, &answers, rng) {
                Ok(Transition::NeedMoreInput(prompts)) => {
                    if prompts.is_empty() {
                        bail!("setup stalled without a question to ask");
                    }
                    for p in &prompts {
                        prompt::answer(prompter, p, &mut answers)?;
                    }
                }
                Ok(transition) => return Ok(transition),
                Err(err) => {
                    eprintln!("{} {err}", "✗".red());
                    match err.field() {
                        Some(field) => answers.clear(field),
                        None if deployed => continue 'menu,
                        None => return Err(err.into()),
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Applying
// ---------------------------------------------------------------------------

fn apply(layout: &Layout, desired: &DesiredState, options: RunOptions) -> Result<()> {
    println!("\n{} for {}", desired.mode.to_string().bold(), desired.domain);
    if desired.secret_generated {
        println!("✓ generated a new secret");
    }
    for port in ports_in_use(&desired.new_ports) {
        eprintln!(
            "{} port {port} is already in use; the service may fail to start",
            "⚠".yellow()
        );
    }

    let renderer = Renderer::new().context("failed to load artifact templates")?;
    if options.dry_run {
        let artifacts = plan(desired, layout, &renderer)?;
        report::print_diffs(&diff(&artifacts)?);
        return Ok(());
    }

    info!(mode = %desired.mode, domain = %desired.domain, "committing artifacts");
    let writes = pipeline::run(desired, layout, &renderer, false)
        .context("failed to write artifacts; files written before the failure were kept")?;
    report::print_writes(&writes, false);

    if options.no_actions {
        report::print_manual_steps(&manual_steps(layout, &desired.domain));
    } else {
        let mut system = SystemRunner;
        let flavor = compose::detect(&mut system);
        info!(compose = %flavor, "running actions");
        match ActionRunner::new(system, layout, flavor).run_all(&desired.domain) {
            Ok(actions) => report::print_actions(&actions),
            Err(err) => report::print_action_failure(&err),
        }
    }

    report::print_connection(&desired.descriptor(), layout, true);
    Ok(())
}

/// Show the existing link. Only the side file is refreshed; every other
/// artifact is left as it is.
fn show(layout: &Layout, descriptor: &ConnectionDescriptor, dry_run: bool) -> Result<()> {
    let path = layout.descriptor_file();
    let write = commit(&path, &descriptor.side_file(), dry_run)
        .with_context(|| format!("failed to save the connection link to {}", path.display()))?;
    if let WriteResult::Written { .. } = write {
        info!(path = %path.display(), "connection link saved");
    }
    report::print_connection(descriptor, layout, !dry_run);
    Ok(())
}

/// What `--no-actions` leaves for the operator.
fn manual_steps(layout: &Layout, domain: &Domain) -> Vec<String> {
    let mut steps = Vec::new();
    if !layout.certificate(domain).is_file() {
        steps.push(format!("sudo certbot certonly --standalone -d {domain}"));
    }
    steps.extend(ActionRunner::new(SystemRunner, layout, ComposeFlavor::default()).restart_recovery());
    steps
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
