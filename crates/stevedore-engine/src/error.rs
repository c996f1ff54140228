//! Render error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// A template failed to parse or evaluate
    #[error("template {name}: {message}")]
    Template { name: String, message: String },

    /// A template file is not valid UTF-8
    #[error("template {name} is not valid UTF-8")]
    InvalidTemplate { name: String },

    #[error(transparent)]
    Core(#[from] stevedore_core::CoreError),
}

impl RenderError {
    pub(crate) fn from_minijinja(name: &str, err: minijinja::Error) -> Self {
        RenderError::Template {
            name: name.to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
