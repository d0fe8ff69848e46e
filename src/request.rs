//! Analysis requests and their cache fingerprints

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// A request handed to [`Orchestrator::run`](crate::Orchestrator::run).
///
/// `parameters` is a `BTreeMap` so field ordering is stable regardless of
/// insertion order, which keeps fingerprints deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// What is being analyzed (a ticker, a repository, a document id, ...)
    pub subject: String,

    /// Optional narrowing of the analysis (a section, a time range, ...)
    pub scope: Option<String>,

    /// Free-form request parameters forwarded to worker projections
    pub parameters: BTreeMap<String, Value>,
}

impl AnalysisRequest {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            scope: None,
            parameters: BTreeMap::new(),
        }
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Deterministic cache key: canonical JSON (sorted object keys,
    /// case/whitespace-normalized strings) hashed with SHA-256.
    pub fn fingerprint(&self) -> String {
        let mut canonical = Map::new();
        canonical.insert(
            "subject".to_string(),
            Value::String(normalize(&self.subject)),
        );
        canonical.insert(
            "scope".to_string(),
            match &self.scope {
                Some(s) => Value::String(normalize(s)),
                None => Value::Null,
            },
        );
        let params: Map<String, Value> = self
            .parameters
            .iter()
            .map(|(k, v)| (normalize(k), canonicalize(v)))
            .collect();
        canonical.insert("parameters".to_string(), Value::Object(params));

        let serialized = Value::Object(canonical).to_string();
        hex::encode(Sha256::digest(serialized.as_bytes()))
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Recursively normalize strings and rebuild objects; `serde_json::Map` is
/// key-ordered, so serialization of the result is canonical.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(normalize(s)),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (normalize(k), canonicalize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
