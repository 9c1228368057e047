// ABOUTME: Compose environment values with host-environment passthrough.
// ABOUTME: A bare `KEY` entry takes its value from the deploying host, if set.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Literal(String),
    /// Inherit from the host; dropped when the host has no such variable.
    FromHost,
}

impl EnvValue {
    pub fn resolve(&self, key: &str) -> Option<String> {
        match self {
            EnvValue::Literal(s) => Some(s.clone()),
            EnvValue::FromHost => std::env::var(key).ok(),
        }
    }
}

pub fn resolve_env_map(map: &BTreeMap<String, EnvValue>) -> BTreeMap<String, String> {
    map.iter()
        .filter_map(|(k, v)| v.resolve(k).map(|resolved| (k.clone(), resolved)))
        .collect()
}
