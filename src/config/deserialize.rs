// ABOUTME: Custom serde deserializers for compose fields with several spellings.
// ABOUTME: Handles string-or-list commands, map-or-list environments and depends_on forms.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::env_value::EnvValue;
use super::port::PortSpec;
use super::volume::BindMount;
use super::DependencyCondition;
use crate::types::ImageSource;

pub fn deserialize_image_source<'de, D>(deserializer: D) -> Result<Option<ImageSource>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    opt.map(|s| ImageSource::parse(&s).map_err(serde::de::Error::custom))
        .transpose()
}

pub fn deserialize_image_ref<'de, D>(deserializer: D) -> Result<crate::types::ImageRef, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    crate::types::ImageRef::parse(&s).map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    String(String),
    List(Vec<String>),
}

/// `command: echo hi` and `command: ["echo", "hi"]` are equivalent.
pub fn deserialize_command<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<StringOrList> = Option::deserialize(deserializer)?;
    Ok(opt.map(|value| match value {
        StringOrList::String(s) => s.split_whitespace().map(str::to_string).collect(),
        StringOrList::List(list) => list,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::String(s) => s,
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EnvironmentEntries {
    Map(BTreeMap<String, Option<Scalar>>),
    List(Vec<String>),
}

/// Map form (`KEY: value`) or list form (`KEY=value`, or bare `KEY` to inherit from the host).
pub fn deserialize_environment<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, EnvValue>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entries: Option<EnvironmentEntries> = Option::deserialize(deserializer)?;
    let map = match entries {
        None => BTreeMap::new(),
        Some(EnvironmentEntries::Map(map)) => map
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Some(v) => EnvValue::Literal(v.into_string()),
                    None => EnvValue::FromHost,
                };
                (key, value)
            })
            .collect(),
        Some(EnvironmentEntries::List(list)) => list
            .into_iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) => (key.to_string(), EnvValue::Literal(value.to_string())),
                None => (entry, EnvValue::FromHost),
            })
            .collect(),
    };
    Ok(map)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortEntry {
    Number(u16),
    Spec(String),
}

pub fn deserialize_ports<'de, D>(deserializer: D) -> Result<Vec<PortSpec>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entries: Option<Vec<PortEntry>> = Option::deserialize(deserializer)?;
    entries
        .unwrap_or_default()
        .into_iter()
        .map(|entry| match entry {
            PortEntry::Number(port) => Ok(PortSpec::container_only(port)),
            PortEntry::Spec(s) => PortSpec::parse(&s),
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(serde::de::Error::custom)
}

pub fn deserialize_volumes<'de, D>(deserializer: D) -> Result<Vec<BindMount>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entries: Option<Vec<String>> = Option::deserialize(deserializer)?;
    entries
        .unwrap_or_default()
        .iter()
        .map(|s| BindMount::parse(s))
        .collect::<Result<Vec<_>, _>>()
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize)]
struct DependsOnEntry {
    #[serde(default)]
    condition: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DependsOn {
    List(Vec<String>),
    Map(BTreeMap<String, DependsOnEntry>),
}

/// List form means "started"; map form carries an explicit condition.
pub fn deserialize_depends_on<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, DependencyCondition>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<DependsOn> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(BTreeMap::new()),
        Some(DependsOn::List(names)) => Ok(names
            .into_iter()
            .map(|name| (name, DependencyCondition::Started))
            .collect()),
        Some(DependsOn::Map(map)) => map
            .into_iter()
            .map(|(name, entry)| {
                let condition = match entry.condition.as_deref() {
                    None | Some("service_started") => DependencyCondition::Started,
                    Some("service_healthy") => DependencyCondition::Healthy,
                    Some(other) => {
                        return Err(serde::de::Error::custom(format!(
                            "unsupported depends_on condition for {name}: {other}"
                        )));
                    }
                };
                Ok((name, condition))
            })
            .collect(),
    }
}
