//! Stevedore Core - Core types for the chart bundle deployment engine
//!
//! This crate provides the foundational types used throughout Stevedore:
//! - `BundleTemplate` / `BundleSource`: what a deployment wants installed
//! - `ChartTree`: the unpacked chart package
//! - `ManifestSet` / `Release`: rendered output and applied state
//! - `Condition`: status conditions and their transition rules
//! - Values deep-merge and archive pack/unpack helpers

pub mod archive;
pub mod bundle;
pub mod chart;
pub mod conditions;
pub mod error;
pub mod release;
pub mod values;

pub use archive::{unpack_chart, write_chart_archive};
pub use bundle::{
    BundleDeploymentStatus, BundleSource, BundleSpec, BundleTemplate, HttpSource, SourceType,
    TemplateMetadata, PROVISIONER_ID,
};
pub use chart::{ChartMetadata, ChartTree, CHART_METADATA_FILE, TEMPLATES_DIR, VALUES_FILE};
pub use conditions::{
    find_condition, upsert_condition, Condition, ConditionStatus, ReconcileState,
    REASON_INSTALLATION_SUCCEEDED, REASON_INSTALL_FAILED, REASON_UNPACK_FAILED,
    REASON_UNPACK_SUCCESSFUL, TYPE_HAS_VALID_BUNDLE, TYPE_INSTALLED,
};
pub use error::CoreError;
pub use release::{release_name, Manifest, ManifestSet, Release, ResourceRef};
pub use values::{effective_values, merge_values};
