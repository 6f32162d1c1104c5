//! Maps a parsed Interaction Model tree to normalized response records, resolving numeric
//! cluster/attribute/command IDs to names via the Data-Model Dictionary.

use crate::datamodel::DataModelDictionary;
use crate::grammar::Value;
use crate::types::{EndpointId, NodeId};

#[derive(Debug, Clone, serde::Serialize)]
#[serde(untagged)]
pub enum ShapedRecord {
    Attribute {
        node: NodeId,
        endpoint: EndpointId,
        cluster: String,
        attribute: String,
        value: serde_json::Value,
    },
    Command {
        node: NodeId,
        endpoint: EndpointId,
        cluster: String,
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        command_fields: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<serde_json::Value>,
    },
    Raw {
        raw_data: serde_json::Value,
    },
}

/// Shapes a single parsed `(name, tree)` statement into zero or more normalized records.
///
/// Every `AttributeReportIB`/`InvokeResponseIB` entry is shaped, not just the first -- a
/// single IM message commonly batches several attributes or command results together and
/// dropping all but the first would silently discard data.
pub fn shape(name: &str, tree: &Value, dict: &dyn DataModelDictionary) -> Vec<ShapedRecord> {
    match name {
        "ReportDataMessage" => shape_report_data(tree, dict),
        "InvokeResponseMessage" => shape_invoke_response(tree, dict),
        _ => vec![ShapedRecord::Raw { raw_data: value_to_json(tree) }],
    }
}

fn shape_report_data(tree: &Value, dict: &dyn DataModelDictionary) -> Vec<ShapedRecord> {
    let Some(reports) = tree.get("AttributeReportIBs").and_then(Value::as_list) else {
        return vec![ShapedRecord::Raw { raw_data: value_to_json(tree) }];
    };
    let mut out = Vec::new();
    for report in reports {
        let ib = report.get("AttributeReportIB").unwrap_or(report);
        let Some(data_ib) = ib.get("AttributeDataIB") else {
            out.push(ShapedRecord::Raw { raw_data: value_to_json(report) });
            continue;
        };
        let Some(path) = data_ib.get("AttributePathIB") else {
            out.push(ShapedRecord::Raw { raw_data: value_to_json(data_ib) });
            continue;
        };
        let Some(record) = shape_attribute_path(path, data_ib.get("Data"), dict) else {
            out.push(ShapedRecord::Raw { raw_data: value_to_json(data_ib) });
            continue;
        };
        out.push(record);
    }
    out
}

fn shape_attribute_path(
    path: &Value,
    data: Option<&Value>,
    dict: &dyn DataModelDictionary,
) -> Option<ShapedRecord> {
    let node = path.get("NodeID").and_then(Value::as_number)? as u64;
    let endpoint = path.get("Endpoint").or_else(|| path.get("EndpointId")).and_then(Value::as_number)? as u16;
    let cluster_id = path.get("Cluster").and_then(Value::as_number)? as u32;
    let attribute_id = path.get("Attribute").and_then(Value::as_number)? as u32;
    let cluster = dict
        .cluster_name_by_id(cluster_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Cluster_{cluster_id}"));
    let attribute = dict
        .attribute_name_by_code(cluster_id, attribute_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Attribute_{attribute_id}"));
    Some(ShapedRecord::Attribute {
        node: NodeId(node),
        endpoint: EndpointId(endpoint),
        cluster,
        attribute,
        value: data.map(value_to_json).unwrap_or(serde_json::Value::Null),
    })
}

fn shape_invoke_response(tree: &Value, dict: &dyn DataModelDictionary) -> Vec<ShapedRecord> {
    let Some(responses) = tree.get("InvokeResponseIBs").and_then(Value::as_list) else {
        return vec![ShapedRecord::Raw { raw_data: value_to_json(tree) }];
    };
    let mut out = Vec::new();
    for response in responses {
        let ib = response.get("InvokeResponseIB").unwrap_or(response);
        if let Some(data_ib) = ib.get("CommandDataIB") {
            if let Some(record) = shape_command_path(data_ib, dict, data_ib.get("CommandFields"), None) {
                out.push(record);
                continue;
            }
        }
        if let Some(status_ib) = ib.get("CommandStatusIB") {
            if let Some(record) = shape_command_path(status_ib, dict, None, status_ib.get("StatusIB")) {
                out.push(record);
                continue;
            }
        }
        out.push(ShapedRecord::Raw { raw_data: value_to_json(response) });
    }
    out
}

fn shape_command_path(
    ib: &Value,
    dict: &dyn DataModelDictionary,
    fields: Option<&Value>,
    status: Option<&Value>,
) -> Option<ShapedRecord> {
    let path = ib.get("CommandPathIB")?;
    let node = ib.get("NodeID").or_else(|| path.get("NodeID")).and_then(Value::as_number)? as u64;
    let endpoint = path.get("EndpointId").or_else(|| path.get("Endpoint")).and_then(Value::as_number)? as u16;
    let cluster_id = path.get("ClusterId").or_else(|| path.get("Cluster")).and_then(Value::as_number)? as u32;
    let command_id = path.get("CommandId").or_else(|| path.get("Command")).and_then(Value::as_number)? as u32;
    let cluster = dict
        .cluster_name_by_id(cluster_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Cluster_{cluster_id}"));
    let command = dict
        .command_name_by_code(cluster_id, command_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Command_{command_id}"));
    Some(ShapedRecord::Command {
        node: NodeId(node),
        endpoint: EndpointId(endpoint),
        cluster,
        command,
        command_fields: fields.map(value_to_json),
        status: status.map(value_to_json),
    })
}

fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Number(n) => serde_json::Value::Number((*n).into()),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in entries {
                obj.insert(k.clone(), value_to_json(v));
            }
            serde_json::Value::Object(obj)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::BundledDictionary;
    use crate::grammar::parse_statement;

    #[test]
    fn shapes_attribute_report() {
        let dict = BundledDictionary::default();
        let text = "ReportDataMessage = { AttributeReportIBs = [ AttributeReportIB = { AttributeDataIB = { AttributePathIB = { NodeID = 0x01 Endpoint = 0x01 Cluster = 0x06 Attribute = 0x0000 } Data = 1 } } ] }";
        let (name, tree) = parse_statement(text).unwrap();
        let records = shape(&name, &tree, &dict);
        assert_eq!(records.len(), 1);
        match &records[0] {
            ShapedRecord::Attribute { node, endpoint, cluster, attribute, value } => {
                assert_eq!(node.0, 1);
                assert_eq!(endpoint.0, 1);
                assert_eq!(cluster, "OnOff");
                assert_eq!(attribute, "OnOff");
                assert_eq!(value, &serde_json::json!(1));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn unresolvable_ids_fall_back_to_numeric_names() {
        let dict = BundledDictionary::default();
        let text = "ReportDataMessage = { AttributeReportIBs = [ AttributeReportIB = { AttributeDataIB = { AttributePathIB = { NodeID = 0x01 Endpoint = 0x01 Cluster = 0x9999 Attribute = 0x1 } Data = 2 } } ] }";
        let (name, tree) = parse_statement(text).unwrap();
        let records = shape(&name, &tree, &dict);
        match &records[0] {
            ShapedRecord::Attribute { cluster, attribute, .. } => {
                assert_eq!(cluster, "Cluster_39321");
                assert_eq!(attribute, "Attribute_1");
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn unknown_shape_falls_back_to_raw() {
        let dict = BundledDictionary::default();
        let (name, tree) = parse_statement("SomethingElse = { Foo = 1 }").unwrap();
        let records = shape(&name, &tree, &dict);
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], ShapedRecord::Raw { .. }));
    }
}
