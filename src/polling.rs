//! Polling Engine (C9): the heart of the bridge. One independent task per `(node,endpoint)`
//! reads every tracked attribute round-robin, detects value deltas against the Registry, and
//! emits change events -- grounded in the way the teacher's `SystemAirDevice` schedules
//! per-register periodic reads and only republishes on an observed change, generalized here to
//! one task per device (rather than one `futures::Stream` shared by a single device) so that the
//! per-device lock invariant (I3) and independent cancellation hold even with many devices.

use crate::chip_tool::ProcessExecutor;
use crate::registry::Registry;
use crate::shaper::ShapedRecord;
use crate::types::{normalize_cluster_name, to_kebab_case, EndpointId, NodeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, Semaphore};
use tracing::{debug, error, warn};

/// Cooperative pause flag shared between the Command Gateway (writer) and the Polling Engine
/// (reader). Only the gateway ever sets it, and only while holding `command_lock` -- I4.
pub struct PollingControl {
    paused: Arc<AtomicBool>,
    command_lock: Arc<Mutex<()>>,
}

impl Default for PollingControl {
    fn default() -> Self {
        Self { paused: Arc::new(AtomicBool::new(false)), command_lock: Arc::new(Mutex::new(())) }
    }
}

impl PollingControl {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pauses polling until the returned guard is dropped. Serialized against other callers via
    /// `command_lock` so only one external command at a time can hold the pause.
    pub async fn pause(&self) -> PauseGuard {
        let lock = Arc::clone(&self.command_lock).lock_owned().await;
        self.paused.store(true, Ordering::Release);
        PauseGuard { paused: Arc::clone(&self.paused), _lock: lock }
    }
}

pub struct PauseGuard {
    paused: Arc<AtomicBool>,
    _lock: OwnedMutexGuard<()>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.paused.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceRef {
    pub node: NodeId,
    pub endpoint: EndpointId,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ChangeData {
    pub cluster: String,
    pub attribute: String,
    pub r#type: String,
    pub value: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub device: DeviceRef,
    pub data: ChangeData,
}

#[derive(Debug, Clone, Copy)]
pub struct PollingConfig {
    pub polling_interval: Duration,
    pub max_concurrent_devices: usize,
    pub command_timeout: Duration,
    pub device_error_stop: bool,
    pub auto_discovery_interval: Duration,
}

#[derive(Default)]
struct DeviceState {
    enabled: bool,
    lock: Option<Arc<Mutex<()>>>,
}

pub struct PollingEngine {
    registry: Registry,
    executor: Arc<ProcessExecutor>,
    control: Arc<PollingControl>,
    config: PollingConfig,
    semaphore: Arc<Semaphore>,
    device_state: Mutex<HashMap<(NodeId, EndpointId), DeviceState>>,
    running: Arc<AtomicBool>,
    change_tx: broadcast::Sender<ChangeEvent>,
}

impl PollingEngine {
    pub fn new(
        registry: Registry,
        executor: Arc<ProcessExecutor>,
        control: Arc<PollingControl>,
        config: PollingConfig,
    ) -> Self {
        let (change_tx, _) = broadcast::channel(256);
        Self {
            registry,
            executor,
            control,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_devices.max(1))),
            config,
            device_state: Mutex::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(true)),
            change_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.change_tx.subscribe()
    }

    /// Hands out a clone of the change sender so the Notification Fan-Out can subscribe its own
    /// WebSocket clients independently of the MQTT forwarder's receiver.
    pub fn change_sender(&self) -> broadcast::Sender<ChangeEvent> {
        self.change_tx.clone()
    }

    /// Spawns a task for every `(node,endpoint)` that currently has at least one tracked
    /// attribute, and a periodic auto-discovery task that picks up new ones.
    pub async fn start(self: &Arc<Self>) -> Result<(), crate::registry::Error> {
        for device in self.registry.get_all_polled_endpoints().await? {
            self.add_device(device.0, device.1).await;
        }
        let engine = Arc::clone(self);
        tokio::task::spawn(async move { engine.auto_discovery_loop().await });
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Pauses the engine for the duration of an external command (I4); used by the Command
    /// Gateway, never by the engine's own loops.
    pub async fn pause_for_command(&self) -> PauseGuard {
        self.control.pause().await
    }

    /// Triggers an out-of-cycle single-attribute read, used by the gateway after an `On/Off`
    /// write so the cached value reflects the command that was just issued.
    pub async fn poll_now(&self, node: NodeId, endpoint: EndpointId, cluster: &str, attribute: &str) {
        let cached = self
            .registry
            .get_attribute_value(node, endpoint, cluster.to_string(), attribute.to_string())
            .await
            .ok()
            .flatten();
        match self.poll_single(node, endpoint, cluster, attribute, cached.as_deref()).await {
            Ok(Some(event)) => {
                let _ = self.change_tx.send(event);
            }
            Ok(None) => {}
            Err(e) => warn!(message = "post-command poll failed", %node, %endpoint, cluster, attribute, error = %e),
        }
    }

    /// Adds a device to the polling set if it is not already being polled. Never removes one --
    /// deletion is driven by explicit API only.
    pub async fn add_device(self: &Arc<Self>, node: NodeId, endpoint: EndpointId) {
        let mut states = self.device_state.lock().await;
        if states.contains_key(&(node, endpoint)) {
            return;
        }
        states.insert((node, endpoint), DeviceState { enabled: true, lock: Some(Arc::new(Mutex::new(()))) });
        drop(states);
        let engine = Arc::clone(self);
        tokio::task::spawn(async move { engine.device_loop(node, endpoint).await });
    }

    /// Stops the per-device loop for `(node,endpoint)`, if one is running. Deletion is the only
    /// caller -- auto-discovery never removes a loop on its own (spec.md §4.8). The loop observes
    /// its entry vanishing from the state map at the top of its next iteration and exits cleanly.
    pub async fn remove_device(&self, node: NodeId, endpoint: EndpointId) {
        let mut states = self.device_state.lock().await;
        states.remove(&(node, endpoint));
    }

    async fn auto_discovery_loop(self: Arc<Self>) {
        if self.config.auto_discovery_interval.is_zero() {
            return;
        }
        loop {
            tokio::time::sleep(self.config.auto_discovery_interval).await;
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            match self.registry.get_all_polled_endpoints().await {
                Ok(endpoints) => {
                    for (node, endpoint) in endpoints {
                        self.add_device(node, endpoint).await;
                    }
                }
                Err(e) => warn!(message = "auto-discovery rescan failed", error = %e),
            }
        }
    }

    async fn device_loop(self: Arc<Self>, node: NodeId, endpoint: EndpointId) {
        loop {
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            {
                let states = self.device_state.lock().await;
                match states.get(&(node, endpoint)) {
                    Some(state) if !state.enabled => return,
                    None => return,
                    _ => {}
                }
            }
            if self.control.is_paused() {
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }

            let Ok(_permit) = self.semaphore.acquire().await else { return };
            let device_lock = {
                let states = self.device_state.lock().await;
                states.get(&(node, endpoint)).and_then(|s| s.lock.clone())
            };
            let Some(device_lock) = device_lock else { return };
            let _guard = device_lock.lock().await;

            if let Err(stop) = self.sweep_device(node, endpoint).await {
                if stop {
                    let mut states = self.device_state.lock().await;
                    if let Some(state) = states.get_mut(&(node, endpoint)) {
                        state.enabled = false;
                    }
                    return;
                }
            }

            drop(_guard);
            drop(_permit);
            tokio::time::sleep(self.config.polling_interval).await;
        }
    }

    /// Returns `Err(true)` when the device should be disabled (`device_error_stop`), `Err(false)`
    /// when the error should just be logged and the sweep retried next interval.
    async fn sweep_device(&self, node: NodeId, endpoint: EndpointId) -> Result<(), bool> {
        let attrs = match self.registry.get_attributes_for_device(node, endpoint).await {
            Ok(attrs) => attrs,
            Err(e) => {
                error!(message = "could not load attributes for polling sweep", %node, %endpoint, error = %e);
                return Err(self.config.device_error_stop);
            }
        };
        for attr in attrs {
            if !self.running.load(Ordering::Acquire) || self.control.is_paused() {
                break;
            }
            match self.poll_single(node, endpoint, &attr.cluster, &attr.attribute, attr.value.as_deref()).await {
                Ok(Some(event)) => {
                    let _ = self.change_tx.send(event);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(message = "attribute poll failed", %node, %endpoint, cluster = %attr.cluster, attribute = %attr.attribute, error = %e);
                    if self.config.device_error_stop {
                        return Err(true);
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }

    /// Issues a read directly through the Process Executor, bypassing the gateway's own pause --
    /// that pause exists for *external* commands, not for the engine's own internal reads.
    async fn poll_single(
        &self,
        node: NodeId,
        endpoint: EndpointId,
        cluster: &str,
        attribute: &str,
        cached: Option<&str>,
    ) -> Result<Option<ChangeEvent>, String> {
        let tokens = vec![
            normalize_cluster_name(cluster),
            "read".to_string(),
            to_kebab_case(attribute),
            node.to_string(),
            endpoint.to_string(),
        ];
        let response = self.executor.execute(&tokens, self.config.command_timeout, false).await;
        if response.status != crate::chip_tool::Status::Success {
            return Err(response.error.unwrap_or_else(|| "poll did not succeed".to_string()));
        }
        let Some(data) = response.data else {
            return Err("poll returned no data".to_string());
        };
        let record: ShapedRecord = serde_json::from_value(data.clone()).map_err(|e| e.to_string())?;
        let (value, attr_type) = match record {
            ShapedRecord::Attribute { value, .. } => (value, json_type_name(&value)),
            _ => return Err(format!("unexpected shape for attribute read: {data}")),
        };
        let value_str = json_to_plain_string(&value);
        if cached == Some(value_str.as_str()) {
            return Ok(None);
        }
        self.registry
            .update_attribute_value(node, endpoint, cluster.to_string(), attribute.to_string(), value_str.clone())
            .await
            .map_err(|e| e.to_string())?;
        debug!(message = "attribute changed", %node, %endpoint, cluster, attribute, value = %value_str);
        Ok(Some(ChangeEvent {
            kind: "status_report",
            device: DeviceRef { node, endpoint },
            data: ChangeData { cluster: cluster.to_string(), attribute: attribute.to_string(), r#type: attr_type, value: value_str },
        }))
    }
}

fn json_type_name(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Bool(_) => "boolean".to_string(),
        serde_json::Value::Number(_) => "integer".to_string(),
        serde_json::Value::String(_) => "string".to_string(),
        _ => "string".to_string(),
    }
}

fn json_to_plain_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pause_guard_clears_flag_on_drop() {
        let control = PollingControl::default();
        assert!(!control.is_paused());
        {
            let _guard = control.pause().await;
            assert!(control.is_paused());
        }
        assert!(!control.is_paused());
    }

    #[test]
    fn json_type_names_follow_spec_categories() {
        assert_eq!(json_type_name(&serde_json::json!(true)), "boolean");
        assert_eq!(json_type_name(&serde_json::json!(1)), "integer");
        assert_eq!(json_type_name(&serde_json::json!("x")), "string");
    }
}
