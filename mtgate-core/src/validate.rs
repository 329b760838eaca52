//! Input validation shared by every entry path (prompts, JSON, artifacts).

use thiserror::Error;

use crate::types::EXTERNAL_PORT;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid domain {value:?}: {reason}")]
    InvalidDomain { value: String, reason: &'static str },

    #[error("port {value} is out of range 1-65535")]
    PortOutOfRange { value: i64 },

    #[error("port {port} is reserved for the edge router")]
    ReservedPort { port: u16 },

    #[error("listen port and backend port must differ (both {port})")]
    PortCollision { port: u16 },

    #[error("invalid secret: {reason}")]
    InvalidSecret { reason: &'static str },

    #[error("invalid ad tag: {reason}")]
    InvalidAdTag { reason: &'static str },
}

/// Label-based hostname grammar.
///
/// Labels are 1-63 ASCII alphanumerics or hyphens, never starting or ending
/// with a hyphen. At least two labels; the last one alphabetic.
pub fn domain(value: &str) -> Result<(), ValidationError> {
    let fail = |reason| {
        Err(ValidationError::InvalidDomain {
            value: value.to_owned(),
            reason,
        })
    };

    if value.is_empty() {
        return fail("empty");
    }
    if value.len() > 253 {
        return fail("longer than 253 characters");
    }

    let labels: Vec<&str> = value.split('.').collect();
    if labels.len() < 2 {
        return fail("needs at least two labels");
    }
    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return fail("each label must be 1-63 characters");
        }
        if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return fail("labels may contain only letters, digits and hyphens");
        }
        if label.starts_with('-') || label.ends_with('-') {
            return fail("labels may not start or end with a hyphen");
        }
    }

    let tld = labels[labels.len() - 1];
    if tld.len() < 2 || !tld.bytes().all(|b| b.is_ascii_alphabetic()) {
        return fail("top-level label must be at least two letters");
    }
    Ok(())
}

pub fn is_valid_domain(value: &str) -> bool {
    domain(value).is_ok()
}

/// Range check only.
pub fn port(value: i64) -> Result<u16, ValidationError> {
    u16::try_from(value)
        .ok()
        .filter(|p| *p != 0)
        .ok_or(ValidationError::PortOutOfRange { value })
}

/// Range check plus the edge router's own port.
pub fn service_port(value: i64) -> Result<u16, ValidationError> {
    let port = port(value)?;
    if port == EXTERNAL_PORT {
        return Err(ValidationError::ReservedPort { port });
    }
    Ok(port)
}

pub fn secret(value: &str) -> Result<(), ValidationError> {
    if value.len() != 32 {
        return Err(ValidationError::InvalidSecret {
            reason: "must be exactly 32 characters",
        });
    }
    if !value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(ValidationError::InvalidSecret {
            reason: "must be lowercase hexadecimal",
        });
    }
    Ok(())
}

pub fn ad_tag(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::InvalidAdTag { reason: "empty" });
    }
    if !value.bytes().all(|b| b.is_ascii_graphic() && b != b'"' && b != b'\\') {
        return Err(ValidationError::InvalidAdTag {
            reason: "must be printable ASCII without quotes or backslashes",
        });
    }
    Ok(())
}
