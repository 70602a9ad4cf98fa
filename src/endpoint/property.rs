//! Property maps are the common currency of the engine: endpoint
//! descriptions, service descriptors and filters all speak in terms of
//! string-keyed property values.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// A single property value. The untagged representation keeps registry
/// payloads plain JSON: strings stay strings, string arrays stay arrays.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Str(String),
    Seq(Vec<String>),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[String]> {
        match self {
            PropertyValue::Seq(s) => Some(s),
            _ => None,
        }
    }

    /// Text views of this value for filter evaluation. Sequences expose
    /// every element, bytes expose nothing.
    pub(crate) fn text_values(&self) -> Vec<&str> {
        match self {
            PropertyValue::Str(s) => vec![s.as_str()],
            PropertyValue::Seq(s) => s.iter().map(|v| v.as_str()).collect(),
            PropertyValue::Bytes(_) => Vec::new(),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(v: Vec<String>) -> Self {
        PropertyValue::Seq(v)
    }
}

impl From<Vec<&str>> for PropertyValue {
    fn from(v: Vec<&str>) -> Self {
        PropertyValue::Seq(v.into_iter().map(String::from).collect())
    }
}

pub type PropertyMap = HashMap<String, PropertyValue>;

/// Normalized identity of a property map. Entries are sorted by key so two
/// maps with identical contents collapse to the same key regardless of
/// insertion order. Sequence element order stays significant.
///
/// Both the export path (one export per distinct effective property set)
/// and the import path (one import per distinct endpoint) key their dedup
/// tables with this.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyKey(Vec<(String, PropertyValue)>);

impl PropertyKey {
    pub fn of(props: &PropertyMap) -> Self {
        let mut entries: Vec<(String, PropertyValue)> =
            props.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        PropertyKey(entries)
    }
}
