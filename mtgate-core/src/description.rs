//! JSON description for non-interactive runs.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::reconcile::{Answers, SecretAnswer};

#[derive(Debug, Error)]
pub enum DescriptionError {
    #[error("cannot read description {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid description {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Desired deployment as written by the operator.
///
/// Ports are signed so out-of-range values reach validation and get a proper
/// message instead of a serde type error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Description {
    pub mtproto_domain: String,
    #[serde(default)]
    pub mtproto_proxy_port: Option<i64>,
    #[serde(default)]
    pub mtproto_backend_port: Option<i64>,
    #[serde(default)]
    pub tls_domain: Option<String>,
    #[serde(default)]
    pub mtproto_secret: Option<String>,
    #[serde(default)]
    pub ad_tag: Option<String>,
    #[serde(default)]
    pub xray_reality_domain: Option<String>,
    #[serde(default)]
    pub skip_setup: bool,
}

impl Description {
    pub fn load(path: &Path) -> Result<Self, DescriptionError> {
        let raw = std::fs::read_to_string(path).map_err(|source| DescriptionError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| DescriptionError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Answers for the controller. Absent fields fall back to defaults
    /// instead of prompting.
    pub fn answers(&self) -> Answers {
        let blank_to_none = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };
        Answers {
            domain: Some(self.mtproto_domain.clone()),
            listen_port: self.mtproto_proxy_port,
            backend_port: self.mtproto_backend_port,
            masquerade_domain: blank_to_none(&self.tls_domain),
            secret: blank_to_none(&self.mtproto_secret).map(SecretAnswer::Provided),
            ad_tag: blank_to_none(&self.ad_tag),
            companion_domain: blank_to_none(&self.xray_reality_domain),
            fill_defaults: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_description() {
        let d = Description::parse(r#"{"mtproto_domain":"p.example.com"}"#).expect("parse");
        assert_eq!(d.mtproto_domain, "p.example.com");
        assert!(!d.skip_setup);
        let answers = d.answers();
        assert!(answers.fill_defaults);
        assert_eq!(answers.listen_port, None);
        assert!(answers.secret.is_none());
    }

    #[test]
    fn blank_strings_count_as_absent() {
        let d = Description::parse(
            r#"{"mtproto_domain":"p.example.com","ad_tag":"","mtproto_secret":"  "}"#,
        )
        .expect("parse");
        let answers = d.answers();
        assert!(answers.ad_tag.is_none());
        assert!(answers.secret.is_none());
    }

    #[test]
    fn missing_domain_is_rejected() {
        assert!(Description::parse(r#"{"mtproto_proxy_port":8888}"#).is_err());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let d = Description::parse(r#"{"mtproto_domain":"p.example.com","comment":"x"}"#)
            .expect("parse");
        assert_eq!(d.mtproto_domain, "p.example.com");
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{").expect("write");
        let err = Description::load(&path).unwrap_err();
        assert!(err.to_string().contains("broken.json"), "got: {err}");
    }
}
