// src/model/resource.rs
//! Process-wide resource identity and instrumentation scope

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource identity (e.g. `service.name`), built once at pipeline start
///
/// Shared as `Arc<Resource>` by every batch and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resource {
    attributes: BTreeMap<String, String>,
}

impl Resource {
    pub fn new(attributes: BTreeMap<String, String>) -> Self {
        Self { attributes }
    }

    /// Look up one attribute
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Instrumentation scope written once per batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub version: String,
}

impl Scope {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new("logsink", env!("CARGO_PKG_VERSION"))
    }
}
