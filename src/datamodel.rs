//! The Data-Model Dictionary: a read-only lookup from numeric Matter cluster/attribute/command
//! IDs to their data-model names, and back. Parsing the Matter XML data model is out of scope
//! here -- this module specifies only the query contract the rest of the bridge calls into
//! (`DataModelDictionary`) plus a small bundled table covering the clusters exercised end to end
//! by this crate's tests and the commissioning/polling paths (On/Off, Level Control, Descriptor,
//! Basic Information). A production deployment plugs in a dictionary parsed from the real
//! `matter-device-types.xml`/cluster XML directory instead.

use std::collections::HashMap;

/// Whether a data-model attribute is an enum, and if so what its named values are.
#[derive(Debug, Clone)]
pub enum AttributeKind {
    Boolean,
    Integer,
    Enum(Vec<(i64, String)>),
    String,
}

#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub name: &'static str,
    pub kind: AttributeKind,
    pub writable: bool,
}

pub trait DataModelDictionary: Send + Sync {
    fn cluster_name_by_id(&self, cluster_id: u32) -> Option<&str>;
    fn cluster_id_by_name(&self, name: &str) -> Option<u32>;
    fn attribute_name_by_code(&self, cluster_id: u32, attribute_id: u32) -> Option<&str>;
    fn attribute_code_by_name(&self, cluster_id: u32, name: &str) -> Option<u32>;
    fn attribute_info(&self, cluster_id: u32, name: &str) -> Option<&AttributeInfo>;
    fn command_name_by_code(&self, cluster_id: u32, command_id: u32) -> Option<&str>;
}

struct ClusterEntry {
    name: &'static str,
    attributes: HashMap<u32, AttributeInfo>,
    commands: HashMap<u32, &'static str>,
}

/// A minimal in-memory dictionary, bundled so the bridge can commission and poll the most common
/// clusters without requiring the full Matter XML data model to be present.
pub struct BundledDictionary {
    clusters: HashMap<u32, ClusterEntry>,
}

impl Default for BundledDictionary {
    fn default() -> Self {
        let mut clusters = HashMap::new();

        let mut onoff_attrs = HashMap::new();
        onoff_attrs.insert(
            0x0000,
            AttributeInfo { name: "OnOff", kind: AttributeKind::Boolean, writable: false },
        );
        let mut onoff_cmds = HashMap::new();
        onoff_cmds.insert(0x00, "Off");
        onoff_cmds.insert(0x01, "On");
        onoff_cmds.insert(0x02, "Toggle");
        clusters.insert(
            0x0006,
            ClusterEntry { name: "OnOff", attributes: onoff_attrs, commands: onoff_cmds },
        );

        let mut level_attrs = HashMap::new();
        level_attrs.insert(
            0x0000,
            AttributeInfo { name: "CurrentLevel", kind: AttributeKind::Integer, writable: false },
        );
        clusters.insert(
            0x0008,
            ClusterEntry { name: "LevelControl", attributes: level_attrs, commands: HashMap::new() },
        );

        let mut descriptor_attrs = HashMap::new();
        descriptor_attrs.insert(
            0x0000,
            AttributeInfo { name: "DeviceTypeList", kind: AttributeKind::String, writable: false },
        );
        descriptor_attrs.insert(
            0x0003,
            AttributeInfo { name: "PartsList", kind: AttributeKind::String, writable: false },
        );
        descriptor_attrs.insert(
            0x0001,
            AttributeInfo { name: "ServerList", kind: AttributeKind::String, writable: false },
        );
        descriptor_attrs.insert(
            0xFFFB,
            AttributeInfo { name: "AttributeList", kind: AttributeKind::String, writable: false },
        );
        clusters.insert(
            0x001D,
            ClusterEntry { name: "Descriptor", attributes: descriptor_attrs, commands: HashMap::new() },
        );

        let mut basic_attrs = HashMap::new();
        basic_attrs.insert(
            0x0012,
            AttributeInfo { name: "UniqueID", kind: AttributeKind::String, writable: false },
        );
        basic_attrs.insert(
            0x0002,
            AttributeInfo { name: "VendorName", kind: AttributeKind::String, writable: false },
        );
        basic_attrs.insert(
            0x0003,
            AttributeInfo { name: "ProductName", kind: AttributeKind::String, writable: false },
        );
        clusters.insert(
            0x0028,
            ClusterEntry { name: "BasicInformation", attributes: basic_attrs, commands: HashMap::new() },
        );

        Self { clusters }
    }
}

impl DataModelDictionary for BundledDictionary {
    fn cluster_name_by_id(&self, cluster_id: u32) -> Option<&str> {
        self.clusters.get(&cluster_id).map(|c| c.name)
    }

    fn cluster_id_by_name(&self, name: &str) -> Option<u32> {
        self.clusters
            .iter()
            .find(|(_, c)| c.name.eq_ignore_ascii_case(name))
            .map(|(id, _)| *id)
    }

    fn attribute_name_by_code(&self, cluster_id: u32, attribute_id: u32) -> Option<&str> {
        self.clusters.get(&cluster_id)?.attributes.get(&attribute_id).map(|a| a.name)
    }

    fn attribute_code_by_name(&self, cluster_id: u32, name: &str) -> Option<u32> {
        self.clusters
            .get(&cluster_id)?
            .attributes
            .iter()
            .find(|(_, a)| a.name.eq_ignore_ascii_case(name))
            .map(|(id, _)| *id)
    }

    fn attribute_info(&self, cluster_id: u32, name: &str) -> Option<&AttributeInfo> {
        self.clusters
            .get(&cluster_id)?
            .attributes
            .values()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    fn command_name_by_code(&self, cluster_id: u32, command_id: u32) -> Option<&str> {
        self.clusters.get(&cluster_id)?.commands.get(&command_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_cluster_and_attribute() {
        let dict = BundledDictionary::default();
        assert_eq!(dict.cluster_name_by_id(0x0006), Some("OnOff"));
        assert_eq!(dict.attribute_name_by_code(0x0006, 0x0000), Some("OnOff"));
        assert_eq!(dict.command_name_by_code(0x0006, 0x01), Some("On"));
    }

    #[test]
    fn unknown_ids_resolve_to_none() {
        let dict = BundledDictionary::default();
        assert_eq!(dict.cluster_name_by_id(0xFFFF), None);
    }
}
