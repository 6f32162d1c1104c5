//! Core identifiers and records shared across the bridge.

use std::fmt;
use std::str::FromStr;

/// A Matter fabric node identifier, unique within the fabric this bridge administers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for NodeId {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(NodeId(s.parse()?))
    }
}

/// An endpoint number within a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct EndpointId(pub u16);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for EndpointId {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EndpointId(s.parse()?))
    }
}

/// A commissioned device, one row per (node, endpoint) pair.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Device {
    pub node_id: NodeId,
    pub endpoint: EndpointId,
    pub topic_id: String,
    pub device_type: u32,
    pub vendor_name: String,
    pub product_name: String,
    /// User-assigned display name, set via the rename endpoint. `None` until renamed.
    pub name: Option<String>,
}

/// A device's stable identity, shared across every endpoint it exposes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UniqueId {
    pub node_id: NodeId,
    pub unique_id: String,
    pub vendor_name: String,
    pub product_name: String,
}

/// A single cluster attribute's last observed value.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Attribute {
    pub node_id: NodeId,
    pub endpoint: EndpointId,
    pub cluster: String,
    pub attribute: String,
    pub value: Option<String>,
    pub r#type: String,
}

/// Computes the TopicID for a (node, endpoint) pair of a device identified by `unique_id`.
///
/// `{sha256(node || "-" || endpoint || "-" || unique_id)}`, matching the south-bound device
/// manager's scheme so topics remain stable across restarts as long as the unique ID survives.
pub fn topic_id(node_id: NodeId, endpoint: EndpointId, unique_id: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(format!("{node_id}-{endpoint}-{unique_id}"));
    format!("{:x}", hasher.finalize())
}

/// Strips spaces and dashes the way vendor/product names are cleaned before they become part of
/// a topic or Homie node ID.
pub fn clean_name_component(name: &str) -> String {
    name.chars().filter(|c| *c != ' ' && *c != '-').collect()
}

/// Normalizes a cluster name the way the south-bound command builder does: lower-case, with
/// spaces and `/` removed (`"On/Off"` -> `"onoff"`).
pub fn normalize_cluster_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != ' ' && *c != '/')
        .collect::<String>()
        .to_lowercase()
}

/// Converts an attribute or cluster name from its data-model `PascalCase` spelling to the
/// kebab-case token `chip-tool` expects on its command line (`OnOff` -> `on-off`).
pub fn to_kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i != 0 {
                out.push('-');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kebab_case_conversion() {
        assert_eq!(to_kebab_case("OnOff"), "on-off");
        assert_eq!(to_kebab_case("LevelControl"), "level-control");
        assert_eq!(to_kebab_case("onoff"), "onoff");
        assert_eq!(to_kebab_case("ColorControl"), "color-control");
    }

    #[test]
    fn cluster_name_normalization() {
        assert_eq!(normalize_cluster_name("On/Off"), "onoff");
        assert_eq!(normalize_cluster_name("Level Control"), "levelcontrol");
    }

    #[test]
    fn name_cleaning_strips_spaces_and_dashes() {
        assert_eq!(clean_name_component("Aqara Door-Sensor"), "AqaraDoorSensor");
    }

    #[test]
    fn topic_id_is_deterministic() {
        let a = topic_id(NodeId(1), EndpointId(1), "ABC123");
        let b = topic_id(NodeId(1), EndpointId(1), "ABC123");
        assert_eq!(a, b);
        let c = topic_id(NodeId(2), EndpointId(1), "ABC123");
        assert_ne!(a, c);
    }
}
