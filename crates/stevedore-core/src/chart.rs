//! Chart package model
//!
//! A chart package is a tar.gz archive containing exactly one top-level
//! directory with `Chart.yaml`, optional `values.yaml`, and a `templates/`
//! directory. [`ChartTree`] is the in-memory form produced by unpacking.

use std::collections::BTreeMap;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Path of the chart metadata file inside the package
pub const CHART_METADATA_FILE: &str = "Chart.yaml";

/// Path of the default values file inside the package
pub const VALUES_FILE: &str = "values.yaml";

/// Directory holding the template files inside the package
pub const TEMPLATES_DIR: &str = "templates";

/// Parsed Chart.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    #[serde(default)]
    pub api_version: Option<String>,

    /// Chart name (required, part of the derived release name)
    pub name: String,

    /// Chart version (required, SemVer)
    #[serde(with = "version_serde")]
    pub version: Version,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub app_version: Option<String>,
}

/// Unpacked chart package: metadata, default values, and the file tree
/// relative to the chart root (the single top-level archive directory).
#[derive(Debug, Clone)]
pub struct ChartTree {
    pub metadata: ChartMetadata,

    /// Parsed values.yaml, or an empty object when the chart has none
    pub default_values: serde_json::Value,

    files: BTreeMap<String, Vec<u8>>,
}

impl ChartTree {
    /// Build a chart tree from chart-root-relative files.
    ///
    /// Fails with a lint error when `Chart.yaml` is missing or unparsable.
    pub fn from_files(files: BTreeMap<String, Vec<u8>>) -> Result<Self> {
        let raw_metadata = files
            .get(CHART_METADATA_FILE)
            .ok_or_else(CoreError::missing_chart_yaml)?;

        let metadata: ChartMetadata =
            serde_yaml::from_slice(raw_metadata).map_err(|e| CoreError::ChartLint {
                message: format!("failed to parse Chart.yaml: {}", e),
            })?;

        let default_values = match files.get(VALUES_FILE) {
            Some(raw) => serde_yaml::from_slice(raw).map_err(|e| CoreError::ChartLint {
                message: format!("failed to parse values.yaml: {}", e),
            })?,
            None => serde_json::Value::Object(serde_json::Map::new()),
        };

        Ok(Self {
            metadata,
            default_values,
            files,
        })
    }

    /// Look up a file by chart-root-relative path
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Template files in sorted path order (BTreeMap iteration), paths
    /// relative to the chart root. Sorted order is what makes rendering
    /// deterministic.
    pub fn template_files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files
            .iter()
            .filter(|(path, _)| path.starts_with(&format!("{}/", TEMPLATES_DIR)))
            .map(|(path, content)| (path.as_str(), content.as_slice()))
    }
}

/// Serialize/deserialize semver versions as plain strings
mod version_serde {
    use semver::Version;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(version: &Version, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&version.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Version, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart_files() -> BTreeMap<String, Vec<u8>> {
        let mut files = BTreeMap::new();
        files.insert(
            "Chart.yaml".to_string(),
            b"apiVersion: v2\nname: hello-world\nversion: 0.1.0\n".to_vec(),
        );
        files.insert("values.yaml".to_string(), b"replicaCount: 2\n".to_vec());
        files.insert(
            "templates/deployment.yaml".to_string(),
            b"kind: Deployment\n".to_vec(),
        );
        files
    }

    #[test]
    fn test_from_files() {
        let tree = ChartTree::from_files(chart_files()).unwrap();
        assert_eq!(tree.metadata.name, "hello-world");
        assert_eq!(tree.metadata.version, Version::new(0, 1, 0));
        assert_eq!(tree.default_values["replicaCount"], 2);
    }

    #[test]
    fn test_missing_chart_yaml_is_lint_error() {
        let mut files = chart_files();
        files.remove("Chart.yaml");

        let err = ChartTree::from_files(files).unwrap_err();
        assert!(
            err.to_string()
                .contains("unable to check Chart.yaml file in chart"),
            "unexpected error: {}",
            err
        );
    }

    #[test]
    fn test_unparsable_chart_yaml_is_lint_error() {
        let mut files = chart_files();
        files.insert("Chart.yaml".to_string(), b"name: [unclosed\n".to_vec());

        let err = ChartTree::from_files(files).unwrap_err();
        assert!(matches!(err, CoreError::ChartLint { .. }));
    }

    #[test]
    fn test_template_files_sorted() {
        let mut files = chart_files();
        files.insert(
            "templates/a-service.yaml".to_string(),
            b"kind: Service\n".to_vec(),
        );

        let tree = ChartTree::from_files(files).unwrap();
        let paths: Vec<&str> = tree.template_files().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec!["templates/a-service.yaml", "templates/deployment.yaml"]
        );
    }
}
