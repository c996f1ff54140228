//! Stevedore Engine - Jinja2 templating for chart packages
//!
//! This crate renders unpacked charts into manifest sets:
//! - MiniJinja environment with Helm-flavored filters (toyaml, b64encode, ...)
//! - Strict undefined behavior so typos fail the pass instead of emitting
//!   half-formed manifests
//! - Deterministic template ordering and multi-document splitting

pub mod error;
pub mod filters;
pub mod renderer;

pub use error::RenderError;
pub use renderer::{ChartRenderer, RenderContext};
