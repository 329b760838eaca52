use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

const JSON: &str = r#"{
    "mtproto_domain": "p.example.com",
    "mtproto_proxy_port": 18888,
    "mtproto_backend_port": 20443,
    "mtproto_secret": "aabbccddeeff00112233445566778899"
}"#;

const SHARED_STREAM: &str = "\
map $ssl_preread_server_name $backend_name {
    other.example.com    other_backend;
    default                 nginx_backend;
}

upstream nginx_backend {
    server 127.0.0.1:8443;
}

upstream other_backend {
    server 127.0.0.1:7443;
}
";

struct Host {
    dir: TempDir,
}

impl Host {
    /// An edge router install with one unrelated route and nothing else.
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let host = Self { dir };
        fs::create_dir_all(host.edge()).expect("mkdir edge");
        fs::write(host.edge().join("docker-compose.yml"), "services: {}\n").expect("compose");
        fs::write(host.edge().join("stream.conf"), SHARED_STREAM).expect("stream.conf");
        host
    }

    fn edge(&self) -> PathBuf {
        self.dir.path().join("edge")
    }

    fn service(&self) -> PathBuf {
        self.dir.path().join("service")
    }

    fn description(&self, json: &str) -> PathBuf {
        let path = self.dir.path().join("mtproto.json");
        fs::write(&path, json).expect("write description");
        path
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("mtgate"));
        cmd.env("NO_COLOR", "1")
            .arg("--edge-root")
            .arg(self.edge())
            .arg("--service-root")
            .arg(self.service())
            .arg("--cert-root")
            .arg(self.dir.path().join("certs"));
        cmd
    }

    fn install(&self, json: &str) -> String {
        let config = self.description(json);
        let assert = self
            .cmd()
            .arg("--config")
            .arg(&config)
            .arg("--no-actions")
            .assert()
            .success();
        String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8")
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}

#[test]
fn json_install_writes_artifacts_and_prints_link() {
    let host = Host::new();
    let stdout = host.install(JSON);

    assert!(stdout.contains("https://t.me/proxy?server=p.example.com&port=443&secret=ee"));
    assert!(stdout.contains("Actions skipped"));

    let stream = read(&host.edge().join("stream.conf"));
    assert!(stream.contains("    other.example.com    other_backend;"));
    assert!(stream.contains("    p.example.com    mtproto_backend;"));
    assert!(stream.contains("server 127.0.0.1:20443;"));
    assert_eq!(read(&host.edge().join("stream.conf.backup")), SHARED_STREAM);

    let settings = read(&host.service().join("config.py"));
    assert!(settings.starts_with("PORT = 18888\n"));
    assert!(host.edge().join("sites-available").join("p.example.com").is_file());
    assert!(read(&host.service().join("proxy_link.txt")).contains("Connection Link:"));
}

#[test]
fn rerunning_the_same_description_changes_nothing() {
    let host = Host::new();
    host.install(JSON);
    let stream = read(&host.edge().join("stream.conf"));

    let stdout = host.install(JSON);
    assert!(stdout.contains("0 written, 7 unchanged"), "{stdout}");
    assert_eq!(read(&host.edge().join("stream.conf")), stream);
}

#[test]
fn dry_run_prints_diff_and_writes_nothing() {
    let host = Host::new();
    let config = host.description(JSON);
    host.cmd()
        .arg("--config")
        .arg(&config)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(contains("+    p.example.com    mtproto_backend;"));

    assert_eq!(read(&host.edge().join("stream.conf")), SHARED_STREAM);
    assert!(!host.service().join("config.py").exists());
}

#[test]
fn skip_setup_shows_existing_link_without_writing() {
    let host = Host::new();
    host.install(JSON);
    let stream_path = host.edge().join("stream.conf");
    fs::write(&stream_path, read(&stream_path)).expect("touch");
    let before = fs::metadata(&stream_path).expect("meta").modified().expect("mtime");

    let config = host.description(r#"{"mtproto_domain":"p.example.com","skip_setup":true}"#);
    host.cmd()
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("CONNECTION DETAILS"))
        .stdout(contains("server=p.example.com"));

    let after = fs::metadata(&stream_path).expect("meta").modified().expect("mtime");
    assert_eq!(before, after);
}

#[test]
fn invalid_domain_in_description_fails() {
    let host = Host::new();
    let config = host.description(r#"{"mtproto_domain":"exa_mple.com"}"#);
    host.cmd()
        .arg("--config")
        .arg(&config)
        .arg("--no-actions")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("exa_mple.com"));
    assert!(!host.service().join("config.py").exists());
}

#[test]
fn missing_edge_router_is_fatal() {
    let dir = TempDir::new().expect("tempdir");
    let config = dir.path().join("mtproto.json");
    fs::write(&config, JSON).expect("write");
    Command::new(assert_cmd::cargo::cargo_bin!("mtgate"))
        .env("NO_COLOR", "1")
        .arg("--edge-root")
        .arg(dir.path().join("missing"))
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .code(1)
        .stderr(contains("edge router"));
}

#[test]
fn status_json_reports_detected_state() {
    let host = Host::new();
    let assert = host.cmd().args(["--status", "--json"]).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("status JSON");
    assert_eq!(value["state"], "none");

    host.install(JSON);
    let assert = host.cmd().args(["--status", "--json"]).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("status JSON");
    // No certificate in the temp layout.
    assert_eq!(value["state"], "issues");
    assert_eq!(value["issues"][0]["kind"], "MissingCertificate");
    assert_eq!(value["snapshot"]["service_domain"], "p.example.com");
}

#[test]
fn config_and_interactive_conflict() {
    let host = Host::new();
    host.cmd()
        .args(["--config", "x.json", "--interactive"])
        .assert()
        .failure();
}

#[test]
fn show_restores_a_deleted_link_file_and_nothing_else() {
    let host = Host::new();
    host.install(JSON);
    let stream_path = host.edge().join("stream.conf");
    let stream = read(&stream_path);
    let link_path = host.service().join("proxy_link.txt");
    let link = read(&link_path);
    fs::remove_file(&link_path).expect("rm link");

    let config = host.description(r#"{"mtproto_domain":"p.example.com","skip_setup":true}"#);
    host.cmd()
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("Link saved to"))
        .stdout(contains("docker logs -f mtprotoproxy"));

    assert_eq!(read(&link_path), link);
    assert_eq!(read(&stream_path), stream);
    assert_eq!(read(&host.edge().join("stream.conf.backup")), SHARED_STREAM);
}

#[test]
fn garbled_routing_is_repaired_without_losing_the_secret() {
    let host = Host::new();
    host.install(JSON);
    let stream_path = host.edge().join("stream.conf");
    fs::write(&stream_path, "map $ssl_preread_server_name {{{ ;;; garbage").expect("garble");

    let assert = host.cmd().args(["--status", "--json"]).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("status JSON");
    assert_eq!(value["state"], "issues");
    assert_eq!(value["snapshot"]["service_domain"], "p.example.com");
    let kinds: Vec<&str> = value["issues"]
        .as_array()
        .expect("issues array")
        .iter()
        .filter_map(|i| i["kind"].as_str())
        .collect();
    assert!(kinds.contains(&"MissingRoutingArtifact"), "{kinds:?}");

    host.install(r#"{"mtproto_domain":"p.example.com"}"#);
    let settings = read(&host.service().join("config.py"));
    assert!(settings.contains("aabbccddeeff00112233445566778899"), "{settings}");
    assert!(settings.starts_with("PORT = 18888\n"));
    let stream = read(&stream_path);
    assert!(stream.contains("    p.example.com    mtproto_backend;"));
    assert!(stream.contains("server 127.0.0.1:20443;"));
}
