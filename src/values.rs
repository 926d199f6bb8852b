//! Value mappings and the rules for combining them.
//!
//! Every stage works on its own copy of the pipeline's base values. The copy
//! is overlaid with the stage's value file and finally with the computed
//! `namespace` and `release` entries, so later sources always win.

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::path::Path;

use crate::template::TemplateEngine;

/// A flat key/value mapping passed to templates and hook environments.
pub type Values = BTreeMap<String, String>;

/// Overlay `next` onto `prev`; keys in `next` replace same-named keys.
pub fn merge_vals(prev: &mut Values, next: Values) {
    prev.extend(next);
}

/// Parse a YAML mapping of scalars into [`Values`].
///
/// Numbers and booleans are kept in their textual form and `null` becomes an
/// empty string. Nested sequences or mappings are rejected.
pub fn parse_vals(source: &str, data: &str) -> Result<Values> {
    if data.trim().is_empty() {
        return Ok(Values::new());
    }

    let raw: BTreeMap<String, serde_yaml::Value> =
        serde_yaml::from_str(data).with_context(|| format!("Invalid values in {}", source))?;
    from_mapping(source, raw)
}

/// Convert an already-parsed YAML mapping into [`Values`].
pub fn from_mapping(source: &str, raw: BTreeMap<String, serde_yaml::Value>) -> Result<Values> {
    let mut values = Values::new();
    for (key, value) in raw {
        let text = match value {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Null => String::new(),
            _ => bail!("Value '{}' in {} is not a scalar", key, source),
        };
        values.insert(key, text);
    }
    Ok(values)
}

/// Read and parse a values file.
pub fn load_vals(path: &Path) -> Result<Values> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read values from {}", path.display()))?;
    parse_vals(&path.display().to_string(), &data)
}

/// Build a stage's effective values.
///
/// Copies `base`, overlays the optional override file, then the computed
/// `namespace` and `release` entries.
pub fn resolve(
    base: &Values,
    overrides: Option<&Path>,
    namespace: &str,
    release: &str,
) -> Result<Values> {
    let mut values = base.clone();
    if let Some(path) = overrides {
        merge_vals(&mut values, load_vals(path)?);
    }
    values.insert("namespace".to_string(), namespace.to_string());
    values.insert("release".to_string(), release.to_string());
    Ok(values)
}

/// Render a values file as a template against `values`, then merge the result
/// on top of `values`.
///
/// With no path the input is returned unchanged.
pub async fn extrapolate(
    path: Option<&Path>,
    mut values: Values,
    engine: &TemplateEngine,
) -> Result<Values> {
    let Some(path) = path else {
        return Ok(values);
    };

    let rendered = engine.render_file(path, &values).await?;
    let text = String::from_utf8_lossy(&rendered);
    let overlay = parse_vals(&path.display().to_string(), &text)?;
    merge_vals(&mut values, overlay);
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::FunctionMap;
    use std::fs;
    use tempfile::tempdir;

    fn vals(pairs: &[(&str, &str)]) -> Values {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_vals_right_wins() {
        let mut left = vals(&[("a", "1"), ("b", "2")]);
        merge_vals(&mut left, vals(&[("b", "3"), ("c", "4")]));
        assert_eq!(left, vals(&[("a", "1"), ("b", "3"), ("c", "4")]));
    }

    #[test]
    fn test_parse_vals_scalars() {
        let values = parse_vals("inline", "name: api\nreplicas: 3\ndebug: true\nempty:\n").unwrap();
        assert_eq!(values["name"], "api");
        assert_eq!(values["replicas"], "3");
        assert_eq!(values["debug"], "true");
        assert_eq!(values["empty"], "");
    }

    #[test]
    fn test_parse_vals_empty_document() {
        assert!(parse_vals("inline", "  \n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_vals_rejects_nested() {
        let err = parse_vals("inline", "image:\n  tag: v1\n").unwrap_err();
        assert!(err.to_string().contains("not a scalar"));
    }

    #[test]
    fn test_load_vals_missing_file() {
        let dir = tempdir().unwrap();
        let err = load_vals(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read values"));
    }

    #[test]
    fn test_resolve_layers_in_order() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("stage.yaml");
        fs::write(&file, "tier: gold\nnamespace: ignored\n").unwrap();

        let base = vals(&[("tier", "bronze"), ("region", "eu")]);
        let values = resolve(&base, Some(&file), "prod", "api-prod").unwrap();

        assert_eq!(values["tier"], "gold");
        assert_eq!(values["region"], "eu");
        assert_eq!(values["namespace"], "prod");
        assert_eq!(values["release"], "api-prod");
        // The base mapping is never mutated.
        assert_eq!(base["tier"], "bronze");
    }

    #[tokio::test]
    async fn test_extrapolate_without_path_is_identity() {
        let engine = TemplateEngine::new(FunctionMap::new());
        let base = vals(&[("a", "1")]);
        let out = extrapolate(None, base.clone(), &engine).await.unwrap();
        assert_eq!(out, base);
    }

    #[tokio::test]
    async fn test_extrapolate_overrides_and_preserves() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("env.yaml");
        fs::write(&file, "b: \"{{ .a }}-override\"\nc: new\n").unwrap();

        let engine = TemplateEngine::new(FunctionMap::new());
        let base = vals(&[("a", "1"), ("b", "2")]);
        let out = extrapolate(Some(&file), base, &engine).await.unwrap();

        assert_eq!(out, vals(&[("a", "1"), ("b", "1-override"), ("c", "new")]));
    }
}
