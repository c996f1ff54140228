//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// The fetched bytes are not a valid gzip stream.
    ///
    /// The message carries the codec's literal error text so it can be
    /// surfaced verbatim in status conditions.
    #[error("gzip: {message}")]
    Decompress { message: String },

    /// The archive is readable but is not a well-formed chart package.
    #[error("lint error: {message}")]
    ChartLint { message: String },

    /// A rendered document is not a usable resource manifest.
    #[error("invalid manifest: {message}")]
    InvalidManifest { message: String },

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),
}

impl CoreError {
    /// Lint failure for a package that has no Chart.yaml where one is expected.
    ///
    /// The message text is part of the status-condition contract and must not
    /// be reworded.
    pub fn missing_chart_yaml() -> Self {
        CoreError::ChartLint {
            message: "unable to check Chart.yaml file in chart".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
