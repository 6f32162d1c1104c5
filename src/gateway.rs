//! Command Gateway (C6): the single north-bound entry point for every external command, whether
//! it arrived over HTTP or MQTT. Bounds concurrency by delegating to the Process Executor's own
//! semaphore and serializes against the Polling Engine by pausing it for the duration of the call.

use crate::chip_tool::{ProcessExecutor, Response};
use crate::polling::PollingEngine;
use crate::types::{normalize_cluster_name, to_kebab_case, EndpointId, NodeId};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CommandRequest {
    pub cluster: String,
    pub command: String,
    pub node: NodeId,
    pub endpoint: EndpointId,
    /// A JSON object, not an array -- order matters (it becomes positional command-line
    /// arguments) and `serde_json`'s `preserve_order` feature keeps object keys in the order
    /// they appeared in the request body, matching "by insertion order of the request's map".
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

fn json_arg_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct CommandGateway {
    executor: Arc<ProcessExecutor>,
    polling: Arc<PollingEngine>,
}

impl CommandGateway {
    pub fn new(executor: Arc<ProcessExecutor>, polling: Arc<PollingEngine>) -> Self {
        Self { executor, polling }
    }

    /// South-bound attribute write, as issued by the MQTT inbound `/set` path: pauses polling,
    /// runs `<cluster> write <attribute-kebab> <value> <node> <endpoint>`, resumes polling.
    pub async fn write(&self, node: NodeId, endpoint: EndpointId, cluster: &str, attribute: &str, value: &str) -> Response {
        let tokens = write_command(cluster, attribute, value, node, endpoint);
        let _pause = self.polling.pause_for_command().await;
        self.executor.execute(&tokens, DEFAULT_COMMAND_TIMEOUT, false).await
    }

    pub async fn execute(&self, request: CommandRequest) -> Response {
        let cluster = normalize_cluster_name(&request.cluster);
        let mut tokens = vec![cluster.clone(), request.command.clone()];
        tokens.extend(request.args.values().map(json_arg_to_string));
        tokens.push(request.node.to_string());
        tokens.push(request.endpoint.to_string());

        let response = {
            // C9 must see zero reads between pause and resume (I4); the guard's drop is what
            // resumes it, so it fires even if `execute` below panics.
            let _pause = self.polling.pause_for_command().await;
            self.executor.execute(&tokens, DEFAULT_COMMAND_TIMEOUT, false).await
        };

        if cluster == "onoff" && matches!(request.command.as_str(), "on" | "off" | "toggle") {
            self.polling
                .poll_now(request.node, request.endpoint, "OnOff", "OnOff")
                .await;
        }

        response
    }
}

/// South-bound write command: `<cluster> write <attribute-kebab> <value> <node> <endpoint>`.
pub fn write_command(cluster: &str, attribute: &str, value: &str, node: NodeId, endpoint: EndpointId) -> Vec<String> {
    vec![
        normalize_cluster_name(cluster),
        "write".to_string(),
        to_kebab_case(attribute),
        value.to_string(),
        node.to_string(),
        endpoint.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_command_shape() {
        let tokens = write_command("On/Off", "OnOff", "true", NodeId(1), EndpointId(1));
        assert_eq!(tokens, vec!["onoff", "write", "on-off", "true", "1", "1"]);
    }
}
