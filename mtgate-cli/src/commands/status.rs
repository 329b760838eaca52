//! `mtgate --status`: detected deployment and issues, read-only.

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use mtgate_core::{CompletenessIssue, DeploymentSnapshot, ExistingState, Layout};
use mtgate_detector::{detect, find_issues};

use super::report;

#[derive(Serialize)]
struct StatusJson<'a> {
    state: ExistingState,
    issues: Vec<IssueJson>,
    companion_domain: Option<&'a str>,
    snapshot: &'a DeploymentSnapshot,
}

#[derive(Serialize)]
struct IssueJson {
    kind: CompletenessIssue,
    detail: String,
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "field")]
    field: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

pub fn run(layout: &Layout, json: bool) -> Result<()> {
    let snapshot = detect(layout);
    let issues = find_issues(&snapshot);
    if json {
        print_json(&snapshot, &issues)
    } else {
        print_table(&snapshot, &issues);
        Ok(())
    }
}

fn print_json(snapshot: &DeploymentSnapshot, issues: &[CompletenessIssue]) -> Result<()> {
    let payload = StatusJson {
        state: ExistingState::classify(snapshot, issues),
        issues: issues
            .iter()
            .map(|issue| IssueJson {
                kind: *issue,
                detail: issue.to_string(),
            })
            .collect(),
        companion_domain: snapshot.companion_domain(),
        snapshot,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn state_label(state: ExistingState) -> String {
    match state {
        ExistingState::None => "NOT CONFIGURED".bright_black().bold().to_string(),
        ExistingState::Valid => "COMPLETE".green().bold().to_string(),
        ExistingState::Issues => "INCOMPLETE".yellow().bold().to_string(),
    }
}

fn print_table(snapshot: &DeploymentSnapshot, issues: &[CompletenessIssue]) {
    let state = ExistingState::classify(snapshot, issues);
    println!("mtgate v{} | {}", env!("CARGO_PKG_VERSION"), state_label(state));

    let config = &snapshot.config;
    let text = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
    let yes_no = |b: bool| (if b { "yes" } else { "no" }).to_string();
    let rows = vec![
        FieldRow {
            field: "domain",
            value: text(snapshot.service_domain.as_ref().map(ToString::to_string)),
        },
        FieldRow {
            field: "listen port",
            value: text(config.listen_port.map(|p| p.to_string())),
        },
        FieldRow {
            field: "backend port",
            value: text(snapshot.backend_port.map(|p| p.to_string())),
        },
        FieldRow {
            field: "secret",
            value: text(config.secret.as_ref().map(ToString::to_string)),
        },
        FieldRow {
            field: "TLS domain",
            value: text(config.masquerade_domain.as_ref().map(ToString::to_string)),
        },
        FieldRow {
            field: "ad tag",
            value: text(config.ad_tag.as_ref().map(|t| t.as_str().to_string())),
        },
        FieldRow {
            field: "certificate",
            value: yes_no(snapshot.certificate_present),
        },
        FieldRow {
            field: "xray reality",
            value: text(snapshot.companion_domain().map(str::to_string)),
        },
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if let Some(routes) = report::routes_table(snapshot) {
        println!("{routes}");
    }

    for (i, issue) in issues.iter().enumerate() {
        println!("{} {}. {issue}", "!".yellow().bold(), i + 1);
    }
    if state == ExistingState::Issues {
        println!("Run 'mtgate' and pick repair to fix them.");
    }
}
