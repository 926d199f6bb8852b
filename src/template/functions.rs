//! Functions callable from templates.
//!
//! Every function declares its arity up front; the engine checks it before
//! calling, so implementations can index their arguments directly.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cluster::ClusterLookup;
use crate::registry::ImageRegistry;

/// A named capability exposed to templates.
#[async_trait]
pub trait TemplateFunction: Send + Sync {
    /// Number of arguments the function takes, including a piped value.
    fn arity(&self) -> usize;

    async fn call(&self, args: &[String]) -> Result<String>;
}

/// Adapter for synchronous closures.
struct FnFunction<F> {
    arity: usize,
    f: F,
}

#[async_trait]
impl<F> TemplateFunction for FnFunction<F>
where
    F: Fn(&[String]) -> Result<String> + Send + Sync,
{
    fn arity(&self) -> usize {
        self.arity
    }

    async fn call(&self, args: &[String]) -> Result<String> {
        (self.f)(args)
    }
}

/// The set of functions a template may call, keyed by name.
#[derive(Clone, Default)]
pub struct FunctionMap {
    functions: HashMap<String, Arc<dyn TemplateFunction>>,
}

impl FunctionMap {
    /// An empty map; templates can only reference values.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard function set backed by the given collaborators.
    ///
    /// | Name            | Arguments                    |
    /// |-----------------|------------------------------|
    /// | `readEnv`       | variable                     |
    /// | `parseJSON`     | field path, json document    |
    /// | `fromConfigMap` | object, namespace, key       |
    /// | `fromSecret`    | object, namespace, key       |
    /// | `getDigest`     | image reference              |
    /// | `getAuth`       | registry server              |
    pub fn builtin(cluster: Arc<dyn ClusterLookup>, registry: Arc<dyn ImageRegistry>) -> Self {
        let mut map = Self::new();
        map.insert_fn("readEnv", 1, |args| {
            Ok(std::env::var(&args[0]).unwrap_or_default())
        });
        map.insert_fn("parseJSON", 2, |args| parse_json(&args[0], &args[1]));
        map.insert(
            "fromConfigMap",
            Arc::new(FromConfigMap {
                cluster: cluster.clone(),
            }),
        );
        map.insert("fromSecret", Arc::new(FromSecret { cluster }));
        map.insert(
            "getDigest",
            Arc::new(GetDigest {
                registry: registry.clone(),
            }),
        );
        map.insert("getAuth", Arc::new(GetAuth { registry }));
        map
    }

    /// Register a function, replacing any previous one with the same name.
    pub fn insert(&mut self, name: impl Into<String>, function: Arc<dyn TemplateFunction>) {
        self.functions.insert(name.into(), function);
    }

    /// Register a synchronous closure as a function.
    pub fn insert_fn<F>(&mut self, name: impl Into<String>, arity: usize, f: F)
    where
        F: Fn(&[String]) -> Result<String> + Send + Sync + 'static,
    {
        self.insert(name, Arc::new(FnFunction { arity, f }));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TemplateFunction>> {
        self.functions.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Extract a dotted field path from a JSON document.
///
/// Strings are returned without quotes; other values as compact JSON. An empty
/// path returns the whole document.
fn parse_json(path: &str, document: &str) -> Result<String> {
    let root: serde_json::Value =
        serde_json::from_str(document).context("Argument is not valid JSON")?;

    let mut current = &root;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            serde_json::Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i)),
            other => other.get(segment),
        }
        .ok_or_else(|| anyhow!("Field '{}' not found", path))?;
    }

    Ok(match current {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

struct FromConfigMap {
    cluster: Arc<dyn ClusterLookup>,
}

#[async_trait]
impl TemplateFunction for FromConfigMap {
    fn arity(&self) -> usize {
        3
    }

    async fn call(&self, args: &[String]) -> Result<String> {
        Ok(self.cluster.config_value(&args[0], &args[1], &args[2]).await?)
    }
}

struct FromSecret {
    cluster: Arc<dyn ClusterLookup>,
}

#[async_trait]
impl TemplateFunction for FromSecret {
    fn arity(&self) -> usize {
        3
    }

    async fn call(&self, args: &[String]) -> Result<String> {
        Ok(self.cluster.secret_value(&args[0], &args[1], &args[2]).await?)
    }
}

struct GetDigest {
    registry: Arc<dyn ImageRegistry>,
}

#[async_trait]
impl TemplateFunction for GetDigest {
    fn arity(&self) -> usize {
        1
    }

    async fn call(&self, args: &[String]) -> Result<String> {
        self.registry.image_digest(&args[0]).await
    }
}

struct GetAuth {
    registry: Arc<dyn ImageRegistry>,
}

#[async_trait]
impl TemplateFunction for GetAuth {
    fn arity(&self) -> usize {
        1
    }

    async fn call(&self, args: &[String]) -> Result<String> {
        self.registry.auth_token(&args[0]).await
    }
}
