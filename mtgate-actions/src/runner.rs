//! Post-commit action sequence: certificate, restarts, status.
//!
//! Every step runs only after the previous one succeeded. A failed step
//! stops the sequence and returns the commands that finish the job by hand.
//! Stopping a service before a start is best effort; its failure is logged
//! and the sequence continues.

use std::fmt;
use std::thread;
use std::time::Duration;

use mtgate_core::{Domain, Layout};

use crate::command::{ActionOutcome, CommandRunner, CommandSpec};
use crate::compose::ComposeFlavor;
use crate::error::ActionError;

/// Container names listed in the final status check.
pub const CONTAINERS: [&str; 2] = ["mtprotoproxy", "remnawave-nginx"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub stop: Duration,
    pub certificate: Duration,
    pub start: Duration,
    pub build: Duration,
    pub status: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            stop: Duration::from_secs(60),
            certificate: Duration::from_secs(180),
            start: Duration::from_secs(120),
            build: Duration::from_secs(600),
            status: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Certificate,
    EdgeRestart,
    GatewayRestart,
    Status,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Certificate => "certificate issuance",
            Step::EdgeRestart => "edge router restart",
            Step::GatewayRestart => "gateway restart",
            Step::Status => "status check",
        };
        f.write_str(name)
    }
}

/// A command that ran and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: Step,
    pub command: String,
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionReport {
    /// A certificate for the domain already existed.
    pub certificate_skipped: bool,
    pub records: Vec<StepRecord>,
    /// `docker ps` table, when the status check worked.
    pub status: Option<String>,
}

pub struct ActionRunner<'a, R: CommandRunner> {
    runner: R,
    layout: &'a Layout,
    compose: ComposeFlavor,
    timeouts: Timeouts,
    settle: Duration,
}

impl<'a, R: CommandRunner> ActionRunner<'a, R> {
    pub fn new(runner: R, layout: &'a Layout, compose: ComposeFlavor) -> Self {
        Self {
            runner,
            layout,
            compose,
            timeouts: Timeouts::default(),
            settle: Duration::from_secs(5),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Pause between the restarts and the status check.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn into_runner(self) -> R {
        self.runner
    }

    /// Certificate (unless present), both restarts, then the status check.
    pub fn run_all(&mut self, domain: &Domain) -> Result<ActionReport, ActionError> {
        let mut report = ActionReport::default();
        if self.layout.certificate(domain).is_file() {
            tracing::info!(domain = %domain, "certificate already present");
            report.certificate_skipped = true;
        } else {
            self.issue_certificate(domain, &mut report)?;
        }
        self.restart(&mut report)?;
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
        report.status = self.status(&mut report);
        Ok(report)
    }

    fn issue_certificate(
        &mut self,
        domain: &Domain,
        report: &mut ActionReport,
    ) -> Result<(), ActionError> {
        // The standalone challenge needs port 80, which the edge router holds.
        self.stop(self.edge_dir(), Step::Certificate, report);
        self.stop(self.gateway_dir(), Step::Certificate, report);
        let certbot = CommandSpec::new("certbot", self.timeouts.certificate).args([
            "certonly",
            "--standalone",
            "--non-interactive",
            "--agree-tos",
            "--register-unsafely-without-email",
            "-d",
            domain.as_str(),
        ]);
        let mut recovery = vec![format!("sudo certbot certonly --standalone -d {domain}")];
        recovery.extend(self.restart_recovery());
        self.required(Step::Certificate, certbot, recovery, report)
    }

    fn restart(&mut self, report: &mut ActionReport) -> Result<(), ActionError> {
        self.stop(self.edge_dir(), Step::EdgeRestart, report);
        let up = self
            .compose
            .command(["up", "-d"], self.timeouts.start)
            .cwd(self.edge_dir());
        self.required(Step::EdgeRestart, up, self.restart_recovery(), report)?;

        self.stop(self.gateway_dir(), Step::GatewayRestart, report);
        let up = self
            .compose
            .command(["up", "-d", "--build"], self.timeouts.build)
            .cwd(self.gateway_dir());
        let recovery = self.restart_recovery().split_off(1);
        self.required(Step::GatewayRestart, up, recovery, report)
    }

    fn status(&mut self, report: &mut ActionReport) -> Option<String> {
        let mut ps = CommandSpec::new("docker", self.timeouts.status).args(["ps"]);
        for name in CONTAINERS {
            ps = ps.args(["--filter".to_string(), format!("name={name}")]);
        }
        ps = ps.args(["--format", "table {{.Names}}\t{{.Status}}\t{{.Ports}}"]);
        let outcome = self.record(Step::Status, &ps, report);
        match outcome {
            ActionOutcome::Succeeded { stdout } => Some(stdout),
            other => {
                tracing::warn!("container status unavailable: {other}");
                None
            }
        }
    }

    fn stop(&mut self, dir: std::path::PathBuf, step: Step, report: &mut ActionReport) {
        let down = self.compose.command(["down"], self.timeouts.stop).cwd(dir);
        let outcome = self.record(step, &down, report);
        if !outcome.succeeded() {
            tracing::warn!("ignoring failed stop `{down}`: {outcome}");
        }
    }

    fn required(
        &mut self,
        step: Step,
        spec: CommandSpec,
        recovery: Vec<String>,
        report: &mut ActionReport,
    ) -> Result<(), ActionError> {
        let outcome = self.record(step, &spec, report);
        if outcome.succeeded() {
            return Ok(());
        }
        Err(ActionError {
            step,
            command: spec.to_string(),
            outcome,
            recovery,
            completed: report.clone(),
        })
    }

    fn record(&mut self, step: Step, spec: &CommandSpec, report: &mut ActionReport) -> ActionOutcome {
        let outcome = self.runner.run(spec);
        tracing::debug!(step = %step, "`{spec}` {outcome}");
        report.records.push(StepRecord {
            step,
            command: spec.to_string(),
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Manual restart commands, edge router first.
    pub fn restart_recovery(&self) -> Vec<String> {
        let compose = self.compose;
        vec![
            format!(
                "cd {} && {compose} down && {compose} up -d",
                self.edge_dir().display()
            ),
            format!(
                "cd {} && {compose} down && {compose} up -d --build",
                self.gateway_dir().display()
            ),
        ]
    }

    fn edge_dir(&self) -> std::path::PathBuf {
        self.layout.edge_root.clone()
    }

    fn gateway_dir(&self) -> std::path::PathBuf {
        self.layout.service_root.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;
    use crate::compose;

    /// Succeeds everything except command lines containing `fail_on`.
    #[derive(Default)]
    struct ScriptedRunner {
        calls: Vec<String>,
        fail_on: Option<(&'static str, ActionOutcome)>,
    }

    impl ScriptedRunner {
        fn failing(pattern: &'static str, outcome: ActionOutcome) -> Self {
            Self {
                calls: Vec::new(),
                fail_on: Some((pattern, outcome)),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&mut self, spec: &CommandSpec) -> ActionOutcome {
            let line = spec.command_line();
            self.calls.push(line.clone());
            match &self.fail_on {
                Some((pattern, outcome)) if line.contains(pattern) => outcome.clone(),
                _ => ActionOutcome::Succeeded {
                    stdout: "NAMES\tSTATUS\n".to_string(),
                },
            }
        }
    }

    fn host(with_certificate: bool) -> (TempDir, Layout, Domain) {
        let dir = TempDir::new().expect("tempdir");
        let layout = Layout::under(dir.path());
        let domain = Domain::parse("p.example.com").expect("domain");
        if with_certificate {
            let cert = layout.certificate(&domain);
            fs::create_dir_all(cert.parent().expect("parent")).expect("mkdir");
            fs::write(&cert, "cert").expect("write");
        }
        (dir, layout, domain)
    }

    fn runner<'a>(layout: &'a Layout, fake: ScriptedRunner) -> ActionRunner<'a, ScriptedRunner> {
        ActionRunner::new(fake, layout, ComposeFlavor::Plugin).with_settle(Duration::ZERO)
    }

    #[test]
    fn existing_certificate_skips_certbot() {
        let (_dir, layout, domain) = host(true);
        let mut actions = runner(&layout, ScriptedRunner::default());
        let report = actions.run_all(&domain).expect("actions");

        assert!(report.certificate_skipped);
        assert_eq!(report.status.as_deref(), Some("NAMES\tSTATUS\n"));
        let calls = actions.into_runner().calls;
        assert_eq!(
            calls[..4],
            [
                "docker compose down",
                "docker compose up -d",
                "docker compose down",
                "docker compose up -d --build",
            ]
        );
        assert!(calls[4].starts_with("docker ps --filter name=mtprotoproxy --filter name=remnawave-nginx"));
        assert_eq!(calls.len(), 5);
    }

    #[test]
    fn missing_certificate_is_issued_before_restart() {
        let (_dir, layout, domain) = host(false);
        let mut actions = runner(&layout, ScriptedRunner::default());
        let report = actions.run_all(&domain).expect("actions");

        assert!(!report.certificate_skipped);
        let calls = actions.into_runner().calls;
        assert_eq!(calls[0], "docker compose down");
        assert_eq!(calls[1], "docker compose down");
        assert_eq!(
            calls[2],
            "certbot certonly --standalone --non-interactive --agree-tos \
             --register-unsafely-without-email -d p.example.com"
        );
        assert_eq!(calls[4], "docker compose up -d");
    }

    #[test]
    fn certbot_failure_halts_before_any_start() {
        let (_dir, layout, domain) = host(false);
        let fake = ScriptedRunner::failing("certbot", ActionOutcome::Failed("rate limited".into()));
        let mut actions = runner(&layout, fake);
        let err = actions.run_all(&domain).expect_err("must halt");

        assert_eq!(err.step, Step::Certificate);
        assert_eq!(err.outcome, ActionOutcome::Failed("rate limited".into()));
        assert_eq!(err.recovery[0], "sudo certbot certonly --standalone -d p.example.com");
        assert_eq!(err.recovery.len(), 3);
        assert!(!actions.into_runner().calls.iter().any(|c| c.contains(" up ")));
    }

    #[rstest]
    #[case::edge_fails("up -d", Step::EdgeRestart, 2)]
    #[case::build_times_out("--build", Step::GatewayRestart, 1)]
    fn restart_failure_reports_recovery(
        #[case] pattern: &'static str,
        #[case] step: Step,
        #[case] recovery_len: usize,
    ) {
        let (_dir, layout, domain) = host(true);
        let outcome = if step == Step::GatewayRestart {
            ActionOutcome::TimedOut
        } else {
            ActionOutcome::Failed("exit status: 1".into())
        };
        let mut actions = runner(&layout, ScriptedRunner::failing(pattern, outcome.clone()));
        let err = actions.run_all(&domain).expect_err("must halt");

        assert_eq!(err.step, step);
        assert_eq!(err.outcome, outcome);
        assert_eq!(err.recovery.len(), recovery_len);
        let gateway = format!(
            "cd {} && docker compose down && docker compose up -d --build",
            layout.service_root.display()
        );
        assert_eq!(err.recovery.last(), Some(&gateway));
        assert!(err.to_string().contains(&step.to_string()));
    }

    #[test]
    fn failed_stop_does_not_halt() {
        let (_dir, layout, domain) = host(true);
        let fake = ScriptedRunner::failing(" down", ActionOutcome::Failed("no such project".into()));
        let report = runner(&layout, fake).run_all(&domain).expect("actions");
        assert!(report.status.is_some());
    }

    #[test]
    fn status_failure_is_not_fatal() {
        let (_dir, layout, domain) = host(true);
        let fake = ScriptedRunner::failing("docker ps", ActionOutcome::TimedOut);
        let report = runner(&layout, fake).run_all(&domain).expect("actions");
        assert!(report.status.is_none());
        assert_eq!(report.records.last().map(|r| r.step), Some(Step::Status));
    }

    #[rstest]
    #[case::plugin(None, ComposeFlavor::Plugin)]
    #[case::standalone(Some("docker compose version"), ComposeFlavor::Standalone)]
    #[case::neither(Some("version"), ComposeFlavor::Plugin)]
    fn compose_flavor_detection(#[case] failing: Option<&'static str>, #[case] expected: ComposeFlavor) {
        let mut fake = match failing {
            Some(pattern) => ScriptedRunner::failing(pattern, ActionOutcome::Failed("missing".into())),
            None => ScriptedRunner::default(),
        };
        assert_eq!(compose::detect(&mut fake), expected);
    }
}
