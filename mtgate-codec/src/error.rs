//! Error types for mtgate-codec.

use thiserror::Error;

/// Rendering is the only fallible direction; parsing is total.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),
}
