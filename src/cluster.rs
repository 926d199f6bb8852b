//! Reads keyed values out of cluster-stored config maps and secrets.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::HashMap;

use crate::errors::LookupError;
use crate::util::{args, capture, describe};

/// Lookup of configuration values stored in the cluster.
#[async_trait]
pub trait ClusterLookup: Send + Sync {
    /// Read `key` from config map `object` in `namespace`.
    async fn config_value(&self, object: &str, namespace: &str, key: &str)
    -> Result<String, LookupError>;

    /// Read and decode `key` from secret `object` in `namespace`.
    async fn secret_value(&self, object: &str, namespace: &str, key: &str)
    -> Result<String, LookupError>;
}

#[derive(Debug, Deserialize)]
struct DataObject {
    #[serde(default)]
    data: HashMap<String, String>,
}

/// `ClusterLookup` backed by the `kubectl` command line tool.
#[derive(Debug, Clone)]
pub struct Kubectl {
    command: String,
}

impl Kubectl {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn fetch(
        &self,
        kind: &'static str,
        object: &str,
        namespace: &str,
    ) -> Result<DataObject, LookupError> {
        let argv = args(["get", kind, object, "--namespace", namespace, "--output", "json"]);
        tracing::debug!(command = %describe(&self.command, &argv), "cluster lookup");

        let output = capture(&self.command, &argv, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run {}: {}", self.command, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("NotFound") || stderr.contains("not found") {
                return Err(LookupError::ObjectNotFound {
                    kind,
                    object: object.to_string(),
                    namespace: namespace.to_string(),
                });
            }
            return Err(anyhow::anyhow!(
                "{} failed: {}",
                describe(&self.command, &argv),
                stderr.trim()
            )
            .into());
        }

        serde_json::from_slice(&output.stdout).map_err(|e| LookupError::Decode {
            kind,
            object: object.to_string(),
            message: e.to_string(),
        })
    }
}

fn take_key(
    mut found: DataObject,
    kind: &'static str,
    object: &str,
    key: &str,
) -> Result<String, LookupError> {
    found.data.remove(key).ok_or_else(|| LookupError::KeyNotFound {
        kind,
        object: object.to_string(),
        key: key.to_string(),
    })
}

fn decode_secret(object: &str, encoded: &str) -> Result<String, LookupError> {
    let bytes = STANDARD.decode(encoded).map_err(|e| LookupError::Decode {
        kind: "secret",
        object: object.to_string(),
        message: e.to_string(),
    })?;
    String::from_utf8(bytes).map_err(|e| LookupError::Decode {
        kind: "secret",
        object: object.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl ClusterLookup for Kubectl {
    async fn config_value(
        &self,
        object: &str,
        namespace: &str,
        key: &str,
    ) -> Result<String, LookupError> {
        let found = self.fetch("configmap", object, namespace).await?;
        take_key(found, "configmap", object, key)
    }

    async fn secret_value(
        &self,
        object: &str,
        namespace: &str,
        key: &str,
    ) -> Result<String, LookupError> {
        let found = self.fetch("secret", object, namespace).await?;
        let encoded = take_key(found, "secret", object, key)?;
        decode_secret(object, &encoded)
    }
}
