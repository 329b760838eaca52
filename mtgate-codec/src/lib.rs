//! # mtgate-codec
//!
//! Parsers and renderers for every artifact the gateway deployment owns.
//! Parsing is total: unreadable input comes back as absent values, never as
//! an error. Rendering goes through embedded tera templates and is
//! deterministic, so rendering the same value twice gives identical bytes.
//!
//! ```rust,no_run
//! use mtgate_codec::{routing, Renderer};
//!
//! fn refresh(existing: &str) -> Result<String, mtgate_codec::RenderError> {
//!     let table = routing::parse(existing);
//!     Renderer::new()?.routing(&table)
//! }
//! ```

pub mod compose;
pub mod engine;
pub mod error;
pub mod routing;
pub mod settings;
pub mod site;
pub mod syntax;
pub mod vhost;

pub use engine::{Renderer, Template};
pub use error::RenderError;
