//! MQTT Controller (C11): connects to the broker, publishes the Homie 3.0.1 device topology for
//! every commissioned device on boot, and subscribes `homie/+/+/+/set` to translate inbound
//! writes into south-bound commands through the Command Gateway.
//!
//! Grounded directly on `original_source/matterverse/mqtt.py`'s `publish_homie_device` /
//! `on_message` pair: a single long-lived client publishes the full device topology up front and
//! a single inbound handler pattern-matches the `<topic_id>/<cluster>/<attribute>/set` shape.
//! `homie5` targets the 5.0 convention and was dropped (see DESIGN.md) in favor of a direct,
//! hand-rolled 3.0.1 topic writer built on `rumqttc`, the MQTT client already in the teacher's
//! dependency table.

use crate::datamodel::DataModelDictionary;
use crate::gateway::CommandGateway;
use crate::registry::Registry;
use crate::types::{normalize_cluster_name, Device};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const HOMIE_VERSION: &str = "3.0.1";
const SET_SUBSCRIPTION: &str = "homie/+/+/+/set";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not subscribe to {0}")]
    Subscribe(#[source] rumqttc::ClientError, &'static str),
    #[error("could not publish to {0}")]
    Publish(#[source] rumqttc::ClientError, String),
    #[error(transparent)]
    Registry(#[from] crate::registry::Error),
}

pub struct MqttController {
    client: AsyncClient,
    registry: Registry,
    dict: Arc<dyn DataModelDictionary>,
    gateway: Arc<CommandGateway>,
}

impl MqttController {
    /// Connects to the broker, subscribes the inbound `/set` wildcard, and spawns the background
    /// task that drives the client's event loop for the lifetime of the process.
    pub async fn connect(
        broker_url: &str,
        broker_port: u16,
        registry: Registry,
        dict: Arc<dyn DataModelDictionary>,
        gateway: Arc<CommandGateway>,
    ) -> Result<Arc<Self>, Error> {
        let mut options = MqttOptions::new("matter-fabric-bridge", broker_url, broker_port);
        options.set_keep_alive(Duration::from_secs(30));

        // rumqttc allows exactly one last-will per connection; Homie 3.0.1 wants one per device.
        // We set it for the last device known at connect time, matching the one-LWT-wins
        // behavior the Python original exhibited by calling `will_set` once per device in a loop
        // (see DESIGN.md).
        if let Some(last) = registry.get_all_devices().await?.last() {
            options.set_last_will(LastWill::new(
                format!("homie/{}/$state", last.topic_id),
                "lost",
                QoS::AtLeastOnce,
                true,
            ));
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        client
            .subscribe(SET_SUBSCRIPTION, QoS::AtLeastOnce)
            .await
            .map_err(|e| Error::Subscribe(e, SET_SUBSCRIPTION))?;

        let controller = Arc::new(Self { client, registry, dict, gateway });

        let loop_controller = Arc::clone(&controller);
        tokio::task::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let topic = publish.topic.clone();
                        let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                        let controller = Arc::clone(&loop_controller);
                        tokio::task::spawn(async move {
                            controller.handle_inbound(&topic, &payload).await;
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(message = "mqtt event loop error", error = %e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(controller)
    }

    /// Publishes the Homie 3.0.1 topology for every device currently in the Registry. Called
    /// once at boot.
    pub async fn publish_all_devices(&self) -> Result<(), Error> {
        for device in self.registry.get_all_devices().await? {
            self.publish_device(&device).await?;
        }
        Ok(())
    }

    /// Publishes the full Homie description for a single device: `$homie`/`$name`/`$state=init`,
    /// `$nodes`, each cluster's `$name`/`$properties`, each attribute's `$name`/`$datatype`
    /// (`$format` for enums)/`$settable`, then `$state=ready`.
    pub async fn publish_device(&self, device: &Device) -> Result<(), Error> {
        let base = format!("homie/{}", device.topic_id);
        self.publish_retained(&format!("{base}/$homie"), HOMIE_VERSION).await?;
        self.publish_retained(&format!("{base}/$name"), &format!("{} {}", device.vendor_name, device.product_name))
            .await?;
        self.publish_retained(&format!("{base}/$state"), "init").await?;

        let attributes =
            self.registry.get_attributes_for_device(device.node_id, device.endpoint).await?;
        let mut clusters: Vec<String> = Vec::new();
        for attr in &attributes {
            let normalized = normalize_cluster_name(&attr.cluster);
            if !clusters.contains(&normalized) {
                clusters.push(normalized);
            }
        }
        self.publish_retained(&format!("{base}/$nodes"), &clusters.join(",")).await?;

        for cluster_normalized in &clusters {
            let cluster_attrs: Vec<_> = attributes
                .iter()
                .filter(|a| &normalize_cluster_name(&a.cluster) == cluster_normalized)
                .collect();
            let Some(cluster_display_name) = cluster_attrs.first().map(|a| a.cluster.clone()) else { continue };
            self.publish_retained(&format!("{base}/{cluster_normalized}/$name"), &cluster_display_name).await?;
            let property_names: Vec<&str> = cluster_attrs.iter().map(|a| a.attribute.as_str()).collect();
            self.publish_retained(&format!("{base}/{cluster_normalized}/$properties"), &property_names.join(","))
                .await?;

            for attr in &cluster_attrs {
                let prop_base = format!("{base}/{cluster_normalized}/{}", attr.attribute);
                self.publish_retained(&format!("{prop_base}/$name"), &attr.attribute).await?;
                self.publish_retained(&format!("{prop_base}/$datatype"), &homie_datatype(&attr.r#type)).await?;

                let cluster_id = self.dict.cluster_id_by_name(&attr.cluster);
                if attr.r#type.eq_ignore_ascii_case("enum") {
                    if let Some(format) = cluster_id
                        .and_then(|id| self.dict.attribute_info(id, &attr.attribute))
                        .and_then(|info| enum_format(&info.kind))
                    {
                        self.publish_retained(&format!("{prop_base}/$format"), &format).await?;
                    }
                }

                let writable = attr.attribute.eq_ignore_ascii_case("OnOff")
                    || cluster_id
                        .and_then(|id| self.dict.attribute_info(id, &attr.attribute))
                        .map(|info| info.writable)
                        .unwrap_or(false);
                self.publish_retained(&format!("{prop_base}/$settable"), if writable { "true" } else { "false" })
                    .await?;
            }
        }

        self.publish_retained(&format!("{base}/$state"), "ready").await?;
        info!(message = "published homie device", topic_id = %device.topic_id);
        Ok(())
    }

    /// Publishes a single attribute's current value to its Homie value topic. Called by the
    /// Notification Fan-Out whenever the Polling Engine detects a change.
    pub async fn publish_value(&self, device: &Device, cluster: &str, attribute: &str, value: &str) -> Result<(), Error> {
        let topic = format!("homie/{}/{}/{attribute}", device.topic_id, normalize_cluster_name(cluster));
        self.publish_retained(&topic, value).await
    }

    /// Publishes `$state=disconnected` for every device, then disconnects cleanly. Used on
    /// graceful shutdown, distinct from the will-triggered `lost` state on a crash.
    pub async fn shutdown(&self) -> Result<(), Error> {
        for device in self.registry.get_all_devices().await.unwrap_or_default() {
            let _ = self.publish_retained(&format!("homie/{}/$state", device.topic_id), "disconnected").await;
        }
        let _ = self.client.disconnect().await;
        Ok(())
    }

    async fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), Error> {
        self.client
            .publish(topic, QoS::AtLeastOnce, true, payload)
            .await
            .map_err(|e| Error::Publish(e, topic.to_string()))
    }

    /// Handles an inbound `homie/<topic_id>/<cluster>/<attribute>/set` message: looks up the
    /// device by topic ID and submits a south-bound write through the Command Gateway.
    async fn handle_inbound(&self, topic: &str, payload: &str) {
        let Some((topic_id, cluster, attribute)) = parse_set_topic(topic) else {
            trace!(message = "ignoring unrecognized mqtt topic", topic);
            return;
        };
        let device = match self.registry.get_device_by_topic_id(topic_id.to_string()).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                warn!(message = "mqtt write for unknown device", topic_id);
                return;
            }
            Err(e) => {
                warn!(message = "registry lookup failed for mqtt write", error = %e);
                return;
            }
        };
        debug!(message = "mqtt inbound write", topic_id, cluster, attribute, payload);

        if cluster.eq_ignore_ascii_case("onoff") {
            let command = if payload.eq_ignore_ascii_case("true") { "on" } else { "off" };
            self.gateway
                .execute(crate::gateway::CommandRequest {
                    cluster: "On/Off".to_string(),
                    command: command.to_string(),
                    node: device.node_id,
                    endpoint: device.endpoint,
                    args: serde_json::Map::new(),
                })
                .await;
        } else {
            self.gateway.write(device.node_id, device.endpoint, cluster, attribute, payload).await;
        }
    }
}

fn homie_datatype(attr_type: &str) -> String {
    match attr_type.to_ascii_lowercase().as_str() {
        "enum" => "enum",
        "integer" | "int" => "integer",
        "boolean" | "bool" => "boolean",
        _ => "string",
    }
    .to_string()
}

fn enum_format(kind: &crate::datamodel::AttributeKind) -> Option<String> {
    match kind {
        crate::datamodel::AttributeKind::Enum(items) => Some(
            items
                .iter()
                .map(|(value, name)| format!("{value}:{}", name.replace(',', ",,")))
                .collect::<Vec<_>>()
                .join(","),
        ),
        _ => None,
    }
}

/// Parses `homie/<topic_id>/<cluster>/<attribute>/set` into its three captures.
fn parse_set_topic(topic: &str) -> Option<(&str, &str, &str)> {
    let mut parts = topic.split('/');
    if parts.next() != Some("homie") {
        return None;
    }
    let topic_id = parts.next()?;
    let cluster = parts.next()?;
    let attribute = parts.next()?;
    if parts.next() != Some("set") || parts.next().is_some() {
        return None;
    }
    Some((topic_id, cluster, attribute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_topic() {
        let (topic_id, cluster, attribute) = parse_set_topic("homie/abc123/onoff/OnOff/set").unwrap();
        assert_eq!(topic_id, "abc123");
        assert_eq!(cluster, "onoff");
        assert_eq!(attribute, "OnOff");
    }

    #[test]
    fn rejects_topics_without_set_suffix() {
        assert!(parse_set_topic("homie/abc123/onoff/OnOff").is_none());
    }

    #[test]
    fn homie_datatype_mapping() {
        assert_eq!(homie_datatype("boolean"), "boolean");
        assert_eq!(homie_datatype("integer"), "integer");
        assert_eq!(homie_datatype("enum"), "enum");
        assert_eq!(homie_datatype("string"), "string");
    }
}
