//! Chart renderer
//!
//! Renders every template of an unpacked chart against the effective values
//! and parses the output into an ordered manifest set. Templates are visited
//! in sorted path order so identical inputs always produce identical sets.

use minijinja::{context, Environment, UndefinedBehavior};
use serde::Deserialize;
use stevedore_core::{effective_values, ChartTree, Manifest, ManifestSet};

use crate::error::{RenderError, Result};
use crate::filters;

/// Inputs for one render pass
#[derive(Debug, Clone)]
pub struct RenderContext {
    /// Release name, exposed to templates as `release.name`
    pub release_name: String,

    /// Target namespace, exposed as `release.namespace`
    pub namespace: String,

    /// Deployment-level value overrides, merged over the chart defaults
    pub overrides: Option<serde_json::Value>,
}

/// Renders chart templates into manifest sets
pub struct ChartRenderer;

impl ChartRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render all chart templates and parse the output documents.
    ///
    /// Helper templates (file name starting with `_`) are loaded for imports
    /// but never rendered on their own; only `.yaml`/`.yml` files produce
    /// output. Blank documents are dropped.
    pub fn render(&self, chart: &ChartTree, ctx: &RenderContext) -> Result<ManifestSet> {
        let mut env = self.environment();

        for (path, content) in chart.template_files() {
            let source =
                std::str::from_utf8(content).map_err(|_| RenderError::InvalidTemplate {
                    name: path.to_string(),
                })?;
            env.add_template_owned(path.to_string(), source.to_string())
                .map_err(|e| RenderError::from_minijinja(path, e))?;
        }

        let values = effective_values(&chart.default_values, ctx.overrides.as_ref());
        let render_ctx = context! {
            values => values,
            chart => context! {
                name => chart.metadata.name,
                version => chart.metadata.version.to_string(),
            },
            release => context! {
                name => ctx.release_name,
                namespace => ctx.namespace,
            },
        };

        let mut manifests = Vec::new();
        for (path, _) in chart.template_files() {
            if !renders_output(path) {
                continue;
            }

            let template = env
                .get_template(path)
                .map_err(|e| RenderError::from_minijinja(path, e))?;
            let rendered = template
                .render(&render_ctx)
                .map_err(|e| RenderError::from_minijinja(path, e))?;

            manifests.extend(parse_documents(path, &rendered)?);
        }

        Ok(ManifestSet::new(manifests))
    }

    fn environment(&self) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("indent", filters::indent);
        env.add_filter("sha256", filters::sha256sum);

        env
    }
}

impl Default for ChartRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a template file produces manifest output when rendered
fn renders_output(path: &str) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    if file_name.starts_with('_') {
        return false;
    }
    file_name.ends_with(".yaml") || file_name.ends_with(".yml")
}

/// Parse a rendered template into manifests, one per non-blank YAML document
fn parse_documents(template_name: &str, rendered: &str) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();

    for document in serde_yaml::Deserializer::from_str(rendered) {
        let value = serde_json::Value::deserialize(document).map_err(|e| {
            RenderError::Template {
                name: template_name.to_string(),
                message: format!("rendered invalid YAML: {}", e),
            }
        })?;

        if value.is_null() {
            continue;
        }

        manifests.push(Manifest::from_value(value)?);
    }

    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn chart(templates: &[(&str, &str)]) -> ChartTree {
        let mut files = BTreeMap::new();
        files.insert(
            "Chart.yaml".to_string(),
            b"apiVersion: v2\nname: hello-world\nversion: 0.1.0\n".to_vec(),
        );
        files.insert(
            "values.yaml".to_string(),
            b"replicaCount: 1\nmessage: hello\n".to_vec(),
        );
        for (path, content) in templates {
            files.insert(
                format!("templates/{}", path),
                content.as_bytes().to_vec(),
            );
        }
        ChartTree::from_files(files).unwrap()
    }

    fn ctx() -> RenderContext {
        RenderContext {
            release_name: "ahoy-hello-world".to_string(),
            namespace: "default".to_string(),
            overrides: None,
        }
    }

    #[test]
    fn test_render_single_template() {
        let chart = chart(&[(
            "configmap.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ release.name }}\ndata:\n  message: {{ values.message | quote }}\n",
        )]);

        let set = ChartRenderer::new().render(&chart, &ctx()).unwrap();
        assert_eq!(set.len(), 1);

        let manifest = set.iter().next().unwrap();
        assert_eq!(manifest.reference.name, "ahoy-hello-world");
        assert_eq!(manifest.content["data"]["message"], "hello");
    }

    #[test]
    fn test_overrides_win_over_defaults() {
        let chart = chart(&[(
            "configmap.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\ndata:\n  message: {{ values.message }}\n",
        )]);

        let mut ctx = ctx();
        ctx.overrides = Some(serde_json::json!({"message": "overridden"}));

        let set = ChartRenderer::new().render(&chart, &ctx).unwrap();
        let manifest = set.iter().next().unwrap();
        assert_eq!(manifest.content["data"]["message"], "overridden");
    }

    #[test]
    fn test_helper_templates_are_importable_not_rendered() {
        let chart = chart(&[
            (
                "_helpers.yaml",
                "{% macro fullname() %}{{ release.name }}-app{% endmacro %}",
            ),
            (
                "configmap.yaml",
                "{% from 'templates/_helpers.yaml' import fullname %}apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ fullname() }}\n",
            ),
        ]);

        let set = ChartRenderer::new().render(&chart, &ctx()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.iter().next().unwrap().reference.name,
            "ahoy-hello-world-app"
        );
    }

    #[test]
    fn test_multi_document_template() {
        let chart = chart(&[(
            "pair.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: one\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: two\n",
        )]);

        let set = ChartRenderer::new().render(&chart, &ctx()).unwrap();
        let names: Vec<&str> = set.refs().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[test]
    fn test_blank_documents_dropped() {
        let chart = chart(&[(
            "maybe.yaml",
            "{% if values.replicaCount > 5 %}apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: big\n{% endif %}\n",
        )]);

        let set = ChartRenderer::new().render(&chart, &ctx()).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_non_yaml_files_skipped() {
        let chart = chart(&[
            ("NOTES.txt", "thanks for installing {{ release.name }}"),
            (
                "configmap.yaml",
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n",
            ),
        ]);

        let set = ChartRenderer::new().render(&chart, &ctx()).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_undefined_variable_is_an_error() {
        let chart = chart(&[(
            "configmap.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ values.missing.key }}\n",
        )]);

        let err = ChartRenderer::new().render(&chart, &ctx()).unwrap_err();
        assert!(matches!(err, RenderError::Template { .. }));
    }

    #[test]
    fn test_deterministic_ordering() {
        let chart = chart(&[
            (
                "b-service.yaml",
                "apiVersion: v1\nkind: Service\nmetadata:\n  name: svc\n",
            ),
            (
                "a-configmap.yaml",
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n",
            ),
        ]);

        let set = ChartRenderer::new().render(&chart, &ctx()).unwrap();
        let kinds: Vec<&str> = set.refs().map(|r| r.kind.as_str()).collect();
        assert_eq!(kinds, vec!["ConfigMap", "Service"]);
    }
}
