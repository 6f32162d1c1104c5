//! Commissioning Orchestrator (C8): drives commissioning by pairing code, then enumerates
//! endpoints, device types, clusters and attributes and materializes them in the Registry.
//!
//! Grounded in the south-bound device manager's `register_new_device` sequence: pair, read
//! identity, enumerate endpoints, enumerate clusters and attributes per endpoint. Every step
//! after a successful pairing either all lands or is rolled back (I5).

use crate::chip_tool::{ProcessExecutor, Status};
use crate::datamodel::DataModelDictionary;
use crate::registry::Registry;
use crate::shaper::ShapedRecord;
use crate::types::{clean_name_component, topic_id, Device, EndpointId, NodeId, UniqueId};
use std::sync::Arc;
use std::time::Duration;

const PAIRING_TIMEOUT: Duration = Duration::from_secs(120);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("commissioning failed: {0}")]
    CommissioningRejected(String),
    #[error("could not read `{0}` during enumeration")]
    ReadFailed(String),
    #[error(transparent)]
    Registry(#[from] crate::registry::Error),
}

pub struct CommissioningOrchestrator {
    executor: Arc<ProcessExecutor>,
    registry: Registry,
    dict: Arc<dyn DataModelDictionary>,
}

impl CommissioningOrchestrator {
    pub fn new(executor: Arc<ProcessExecutor>, registry: Registry, dict: Arc<dyn DataModelDictionary>) -> Self {
        Self { executor, registry, dict }
    }

    pub async fn commission(&self, pairing_code: &str) -> Result<Vec<Device>, Error> {
        let node_id = self.registry.new_node_id().await?;

        let pairing_response = self
            .executor
            .execute(
                &["pairing".to_string(), "code".to_string(), node_id.to_string(), pairing_code.to_string()],
                PAIRING_TIMEOUT,
                true,
            )
            .await;
        if pairing_response.status != Status::Success {
            return Err(Error::CommissioningRejected(
                pairing_response.error.unwrap_or_else(|| "pairing did not succeed".to_string()),
            ));
        }
        if !commissioning_complete(node_id, pairing_response.data.as_ref()) {
            return Err(Error::CommissioningRejected("General Commissioning Complete status not observed".into()));
        }

        match self.materialize(node_id).await {
            Ok(devices) => Ok(devices),
            Err(e) => {
                self.rollback(node_id).await;
                Err(e)
            }
        }
    }

    async fn materialize(&self, node_id: NodeId) -> Result<Vec<Device>, Error> {
        let unique_id = self.read_basic_info_attribute(node_id, "unique-id").await?;
        let vendor_name = clean_name_component(&self.read_basic_info_attribute(node_id, "vendor-name").await?);
        let product_name = clean_name_component(&self.read_basic_info_attribute(node_id, "product-name").await?);

        self.registry
            .insert_unique_id(UniqueId {
                node_id,
                unique_id: unique_id.clone(),
                vendor_name: vendor_name.clone(),
                product_name: product_name.clone(),
            })
            .await?;

        let endpoints = self.read_list(node_id, EndpointId(0), "descriptor", "parts-list").await?;
        let mut devices = Vec::new();
        for endpoint_value in &endpoints {
            let endpoint = EndpointId(endpoint_value.as_number().unwrap_or(0) as u16);
            let device_types = self.read_list(node_id, endpoint, "descriptor", "device-type-list").await?;
            let device_type = device_types
                .first()
                .and_then(|v| v.get("0x0"))
                .and_then(|v| v.as_number())
                .unwrap_or(0) as u32;
            let topic = format!(
                "{vendor_name}_{product_name}_{}",
                topic_id(node_id, endpoint, &unique_id)
            );
            let device = Device {
                node_id,
                endpoint,
                topic_id: topic,
                device_type,
                vendor_name: vendor_name.clone(),
                product_name: product_name.clone(),
                name: None,
            };
            self.registry.insert_device(device.clone()).await?;
            devices.push(device);
        }

        for device in &devices {
            let cluster_ids = self.read_list(node_id, device.endpoint, "descriptor", "server-list").await?;
            for cluster_value in cluster_ids {
                let Some(cluster_id) = cluster_value.as_number() else { continue };
                let cluster_name = self
                    .dict
                    .cluster_name_by_id(cluster_id as u32)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Cluster_{cluster_id}"));
                let attribute_ids = self
                    .read_list(node_id, device.endpoint, &cluster_name, "attribute-list")
                    .await
                    .unwrap_or_default();
                for attribute_value in attribute_ids {
                    let Some(attribute_id) = attribute_value.as_number() else { continue };
                    let attribute_name = self
                        .dict
                        .attribute_name_by_code(cluster_id as u32, attribute_id as u32)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Attribute_{attribute_id}"));
                    let attr_type = self
                        .dict
                        .attribute_info(cluster_id as u32, &attribute_name)
                        .map(|info| attribute_kind_name(&info.kind))
                        .unwrap_or_else(|| "string".to_string());
                    self.registry
                        .create_attribute_entry(
                            node_id,
                            device.endpoint,
                            cluster_name.clone(),
                            attribute_name,
                            attr_type,
                        )
                        .await?;
                }
            }
        }

        Ok(devices)
    }

    async fn rollback(&self, node_id: NodeId) {
        if let Ok(devices) = self.registry.get_all_devices().await {
            for device in devices.into_iter().filter(|d| d.node_id == node_id) {
                let _ = self.registry.delete_device(node_id, device.endpoint).await;
            }
        }
        let _ = self.registry.delete_unique_id(node_id).await;
    }

    async fn read_basic_info_attribute(&self, node_id: NodeId, attribute: &str) -> Result<String, Error> {
        let tokens = vec![
            "basicinformation".to_string(),
            "read".to_string(),
            attribute.to_string(),
            node_id.to_string(),
            "0".to_string(),
        ];
        let response = self.executor.execute(&tokens, READ_TIMEOUT, false).await;
        if response.status != Status::Success {
            return Err(Error::ReadFailed(attribute.to_string()));
        }
        let record: ShapedRecord = response
            .data
            .and_then(|d| serde_json::from_value(d).ok())
            .ok_or_else(|| Error::ReadFailed(attribute.to_string()))?;
        match record {
            ShapedRecord::Attribute { value, .. } => Ok(match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
            _ => Err(Error::ReadFailed(attribute.to_string())),
        }
    }

    async fn read_list(
        &self,
        node_id: NodeId,
        endpoint: EndpointId,
        cluster: &str,
        attribute: &str,
    ) -> Result<Vec<crate::grammar::Value>, Error> {
        let tokens = vec![
            crate::types::normalize_cluster_name(cluster),
            "read".to_string(),
            attribute.to_string(),
            node_id.to_string(),
            endpoint.to_string(),
        ];
        let response = self.executor.execute(&tokens, READ_TIMEOUT, false).await;
        if response.status != Status::Success {
            return Err(Error::ReadFailed(attribute.to_string()));
        }
        let Some(data) = response.data else {
            return Ok(Vec::new());
        };
        let Some(serde_json::Value::Array(items)) = data.get("value").cloned() else {
            return Ok(Vec::new());
        };
        Ok(items.into_iter().map(json_to_grammar_value).collect())
    }
}

fn attribute_kind_name(kind: &crate::datamodel::AttributeKind) -> String {
    use crate::datamodel::AttributeKind;
    match kind {
        AttributeKind::Boolean => "boolean".to_string(),
        AttributeKind::Integer => "integer".to_string(),
        AttributeKind::Enum(_) => "enum".to_string(),
        AttributeKind::String => "string".to_string(),
    }
}

fn json_to_grammar_value(value: serde_json::Value) -> crate::grammar::Value {
    use crate::grammar::Value as V;
    match value {
        serde_json::Value::Null => V::Null,
        serde_json::Value::Bool(b) => V::Number(b as i64),
        serde_json::Value::Number(n) => V::Number(n.as_i64().unwrap_or(0)),
        serde_json::Value::String(s) => V::Text(s),
        serde_json::Value::Array(items) => V::List(items.into_iter().map(json_to_grammar_value).collect()),
        serde_json::Value::Object(map) => {
            V::Map(map.into_iter().map(|(k, v)| (k, json_to_grammar_value(v))).collect())
        }
    }
}

/// The General Commissioning `CommissioningComplete` success status: at least one
/// `InvokeResponseMessage` item for `node_id` whose `command_fields["0x0"]` is the literal
/// *string* `"0"` -- not normalized to an integer, matching what the shaper actually produces.
fn commissioning_complete(node_id: NodeId, data: Option<&serde_json::Value>) -> bool {
    let Some(data) = data else { return false };
    let Some(items) = data.as_array() else { return false };
    items.iter().any(|item| {
        item.get("node").and_then(|v| v.as_u64()) == Some(node_id.0)
            && item
                .get("command_fields")
                .and_then(|f| f.get("0x0"))
                .and_then(|v| v.as_str())
                == Some("0")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commissioning_complete_recognizes_status_zero_string() {
        let data = serde_json::json!([
            {"node": 1, "command_fields": {"0x0": "0"}}
        ]);
        assert!(commissioning_complete(NodeId(1), Some(&data)));
    }

    #[test]
    fn commissioning_complete_rejects_integer_status() {
        let data = serde_json::json!([
            {"node": 1, "command_fields": {"0x0": 0}}
        ]);
        assert!(!commissioning_complete(NodeId(1), Some(&data)));
    }

    #[test]
    fn commissioning_complete_rejects_wrong_node() {
        let data = serde_json::json!([
            {"node": 2, "command_fields": {"0x0": "0"}}
        ]);
        assert!(!commissioning_complete(NodeId(1), Some(&data)));
    }
}
