//! Human-readable output: current state, write summaries, connection details.

use std::path::PathBuf;

use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use mtgate_actions::runner::CONTAINERS;
use mtgate_actions::{ActionError, ActionReport};
use mtgate_core::{
    BackendTag, CompletenessIssue, ConnectionDescriptor, DeploymentSnapshot, Domain, Layout,
};
use mtgate_sync::{ArtifactDiff, WriteResult};

fn separator() -> String {
    "=".repeat(60)
}

fn heading(title: &str) {
    println!("\n{}", separator());
    println!("{}", title.bold());
    println!("{}\n", separator());
}

fn or_missing<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "not set".red().to_string(), |v| v.to_string())
}

fn presence(present: bool) -> String {
    if present {
        "present".green().to_string()
    } else {
        "missing".red().to_string()
    }
}

#[derive(Tabled)]
struct RouteRow {
    #[tabled(rename = "domain")]
    domain: String,
    #[tabled(rename = "backend")]
    backend: String,
    #[tabled(rename = "upstream")]
    upstream: String,
}

pub fn routes_table(snapshot: &DeploymentSnapshot) -> Option<String> {
    let rows: Vec<RouteRow> = snapshot
        .routing
        .routes()
        .map(|route| RouteRow {
            upstream: snapshot
                .routing
                .upstream(route.backend.as_str())
                .map(ToString::to_string)
                .unwrap_or_default(),
            domain: route.domain,
            backend: route.backend.to_string(),
        })
        .collect();
    if rows.is_empty() {
        return None;
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    Some(table.to_string())
}

/// What is deployed right now, before the operator picks an action.
pub fn print_state(snapshot: &DeploymentSnapshot, issues: &[CompletenessIssue]) {
    let Some(domain) = &snapshot.service_domain else {
        println!("No MTProto gateway is configured yet; starting a fresh install.");
        if let Some(table) = routes_table(snapshot) {
            println!("Existing routes are kept as they are:\n{table}");
        }
        return;
    };
    let config = &snapshot.config;
    heading("CURRENT MTPROTO SETUP");
    println!("  Domain:            {domain}");
    println!("  Listen port:       {}", or_missing(config.listen_port));
    println!("  Backend port:      {}", or_missing(snapshot.backend_port));
    println!("  Secret:            {}", or_missing(config.secret.as_ref()));
    println!("  TLS domain:        {}", or_missing(config.masquerade_domain.as_ref()));
    if let Some(tag) = &config.ad_tag {
        println!("  Ad tag:            {tag}");
    }
    let tls = config.modes.or_default().tls;
    println!("  TLS mode:          {}", if tls { "on" } else { "off" });
    println!("  Certificate:       {}", presence(snapshot.certificate_present));
    println!("  Site config:       {}", presence(snapshot.artifacts.service));
    println!("  Gateway compose:   {}", presence(snapshot.artifacts.compose));
    if let Some(companion) = snapshot.companion_domain() {
        println!("  Xray Reality:      {companion} (kept)");
    }
    let others = snapshot
        .routing
        .routes()
        .filter(|r| r.backend.as_str() != BackendTag::SERVICE)
        .count();
    if others > 0 {
        println!("  Other routes:      {others} (kept)");
    }

    println!();
    if issues.is_empty() {
        println!("{} The setup looks complete.", "✓".green());
    } else {
        println!("{}", "Problems found:".yellow().bold());
        for (i, issue) in issues.iter().enumerate() {
            println!("  {}. {issue}", i + 1);
        }
    }
    println!();
}

pub fn print_writes(writes: &[WriteResult], dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    let changed = writes.iter().filter(|w| w.is_change()).count();
    println!(
        "{prefix}✓ artifacts: {changed} written, {} unchanged",
        writes.len() - changed
    );
    for write in writes {
        match write {
            WriteResult::Written { path, backup } => {
                println!("  ✎  {}", path.display());
                if let Some(backup) = backup {
                    println!("       backup: {}", backup.display());
                }
            }
            WriteResult::WouldWrite { path } => println!("  ~  {}", path.display()),
            WriteResult::Unchanged { path } => println!("  ·  {}", path.display()),
        }
    }
}

pub fn print_diffs(diffs: &[ArtifactDiff]) {
    if diffs.is_empty() {
        println!("No differences; nothing would be written.");
        return;
    }
    for diff in diffs {
        print!("{}", diff.unified_diff);
        if !diff.unified_diff.ends_with('\n') {
            println!();
        }
    }
}

pub fn print_actions(report: &ActionReport) {
    if report.certificate_skipped {
        println!("✓ TLS certificate already present");
    }
    println!("✓ containers restarted");
    if let Some(status) = &report.status {
        println!("\nContainer status:\n{status}");
    }
}

pub fn print_action_failure(err: &ActionError) {
    eprintln!("{} {err}", "✗".red());
    eprintln!("\nArtifacts are written; finish by hand:");
    for line in &err.recovery {
        eprintln!("   {line}");
    }
}

/// Commands to run when actions were skipped.
pub fn print_manual_steps(steps: &[String]) {
    println!("\nActions skipped. To finish, run:");
    for step in steps {
        println!("   {step}");
    }
}

pub fn print_connection(descriptor: &ConnectionDescriptor, layout: &Layout, saved: bool) {
    heading("CONNECTION DETAILS");
    println!("  Server:  {}", descriptor.domain);
    println!("  Port:    {}", descriptor.port);
    println!("  Secret:  {}", descriptor.client_secret);
    println!("\n{}\n", descriptor.uri().bold());

    println!("{}", "Monitoring:".bold());
    for line in monitoring_hints() {
        println!("   {line}");
    }
    println!("\n{}", "Files:".bold());
    for (label, path) in managed_files(layout, &descriptor.domain) {
        println!("   {label:<18} {}", path.display());
    }
    println!();
    if saved {
        println!("Link saved to {}", layout.descriptor_file().display());
    }
}

fn monitoring_hints() -> [String; 3] {
    let [gateway, edge] = CONTAINERS;
    [
        format!("Gateway logs:  docker logs -f {gateway}"),
        format!("Edge logs:     docker logs -f {edge}"),
        format!("Status:        docker ps | grep -E '{gateway}|{edge}'"),
    ]
}

fn managed_files(layout: &Layout, domain: &Domain) -> Vec<(&'static str, PathBuf)> {
    vec![
        ("Gateway settings", layout.settings_artifact()),
        ("Gateway compose", layout.gateway_compose()),
        ("Edge compose", layout.edge_compose()),
        ("Gateway site", layout.service_artifact(domain)),
        ("Edge routing", layout.routing_artifact()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_name_both_containers() {
        let hints = monitoring_hints();
        assert_eq!(hints[0], "Gateway logs:  docker logs -f mtprotoproxy");
        assert_eq!(hints[1], "Edge logs:     docker logs -f remnawave-nginx");
        assert!(hints[2].contains("mtprotoproxy|remnawave-nginx"));
    }

    #[test]
    fn managed_files_follow_the_layout() {
        let layout = Layout::under(std::path::Path::new("/srv"));
        let domain = Domain::parse("p.example.com").expect("domain");
        let files = managed_files(&layout, &domain);
        assert_eq!(files.len(), 5);
        assert_eq!(files[0].1, PathBuf::from("/srv/service/config.py"));
        assert_eq!(
            files[3].1,
            PathBuf::from("/srv/edge/sites-available/p.example.com")
        );
    }
}
