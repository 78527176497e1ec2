mod node;
mod read_stream;
mod value;

use crate::connection::Connection;
use crate::definitions::DefinitionGroup;
use crate::homie::node::GroupNode;
use crate::homie::read_stream::{PollEvent, PollEventKind};
use futures::StreamExt as _;
use homie5::client::{LastWill, Publish, QoS};
use homie5::device_description::HomieDeviceDescription;
use homie5::{Homie5DeviceProtocol, HomieDeviceStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::task::AbortOnDropHandle;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("`{0}` is not a valid Homie ID")]
    InvalidId(String),
    #[error("could not publish to the MQTT broker")]
    Publish(#[source] rumqttc::v5::ClientError),
    #[error("could not serialize the Homie device description")]
    Description,
    #[error("polling MyUpway stopped unexpectedly")]
    PollingStopped,
}

/// A Homie device exposing the readings of one MyUpway system.
pub struct MyUpwayDevice {
    mqtt: rumqttc::v5::AsyncClient,
    protocol: Homie5DeviceProtocol,
    state: HomieDeviceStatus,
    description: HomieDeviceDescription,
    #[allow(unused)] // exists for its drop handler
    poll_task: AbortOnDropHandle<()>,
    nodes: Vec<GroupNode>,
    poll_events: Receiver<PollEvent>,
}

impl MyUpwayDevice {
    pub fn new(
        mqtt: rumqttc::v5::AsyncClient,
        protocol: Homie5DeviceProtocol,
        connection: Arc<Connection>,
        mut groups: Vec<&'static DefinitionGroup>,
        poll_interval: Duration,
    ) -> Result<Self, Error> {
        // Poll events are routed to the node of their group, so a group may only have one node.
        DefinitionGroup::dedup(&mut groups);
        let nodes = groups.iter().map(|&g| GroupNode::new(g)).collect::<Result<Vec<_>, _>>()?;
        let name = format!("MyUpway system {}", connection.system_id());
        let mut description =
            homie5::device_description::DeviceDescriptionBuilder::new().name(name.as_str());
        for node in &nodes {
            description = description.add_node(node.node_id().clone(), node.description());
        }
        let description = description.build();
        let (poll_sender, poll_events) = tokio::sync::broadcast::channel::<PollEvent>(64);
        let poll_stream = read_stream::poll_groups(connection, groups, poll_interval);
        let poll_task = AbortOnDropHandle::new(tokio::spawn(async move {
            let mut poll_stream = std::pin::pin!(poll_stream);
            while let Some(event) = poll_stream.next().await {
                tracing::trace!(group = event.group.name, "polled a definition group");
                let Ok(_) = poll_sender.send(event) else {
                    return;
                };
            }
        }));
        Ok(Self {
            mqtt,
            protocol,
            state: HomieDeviceStatus::Init,
            description,
            poll_task,
            nodes,
            poll_events,
        })
    }

    pub async fn publish_device(&mut self) -> Result<(), Error> {
        for step in homie5::homie_device_publish_steps() {
            match step {
                homie5::DevicePublishStep::DeviceStateInit => {
                    self.state = HomieDeviceStatus::Init;
                    let p = self.protocol.publish_state(self.state);
                    self.mqtt.homie_publish(p).await.map_err(Error::Publish)?;
                }
                homie5::DevicePublishStep::DeviceDescription => {
                    let p = self
                        .protocol
                        .publish_description(&self.description)
                        .map_err(|_| Error::Description)?;
                    self.mqtt.homie_publish(p).await.map_err(Error::Publish)?;
                }
                homie5::DevicePublishStep::PropertyValues => {
                    tracing::debug!("waiting for the first poll of every group…");
                    while !self.nodes.iter().all(GroupNode::polled) {
                        self.step().await?;
                    }
                    // rumqttc may send the value publishes *after* `$state = Ready` unless we
                    // yield here.
                    tokio::task::yield_now().await;
                }
                homie5::DevicePublishStep::SubscribeProperties => {
                    // None of the properties are settable.
                }
                homie5::DevicePublishStep::DeviceStateReady => {
                    tracing::debug!("device becomes ready...");
                    self.state = HomieDeviceStatus::Ready;
                    let p = self.protocol.publish_state(self.state);
                    self.mqtt.homie_publish(p).await.map_err(Error::Publish)?;
                }
            }
        }
        Ok(())
    }

    /// Publish the device and keep its properties up to date until an error occurs.
    pub async fn run(mut self) -> Result<(), Error> {
        self.publish_device().await?;
        loop {
            self.step().await?;
        }
    }

    async fn handle_poll_event(&mut self, event: PollEvent) -> Result<(), Error> {
        let Some(node) = self.nodes.iter_mut().find(|n| std::ptr::eq(n.group(), event.group)) else {
            tracing::warn!(group = event.group.name, "poll event for a group without a node");
            return Ok(());
        };
        let readings = match event.kind {
            PollEventKind::Readings(readings) => readings,
            PollEventKind::ReadError(e) => {
                node.record_read_error();
                tracing::error!(
                    group = event.group.name,
                    error = (&*e as &dyn std::error::Error),
                    "reading values has failed"
                );
                return Ok(());
            }
        };
        let node_id = node.node_id().clone();
        for (prop_id, payload) in node.record_readings(&readings) {
            let retained = self
                .description
                .get_property_by_id(&node_id, &prop_id)
                .map_or(true, |pd| pd.retained);
            let msg = self.protocol.publish_value(&node_id, &prop_id, payload, retained);
            self.mqtt.homie_publish(msg).await.map_err(Error::Publish)?;
        }
        Ok(())
    }

    pub async fn step(&mut self) -> Result<(), Error> {
        loop {
            let event = match self.poll_events.recv().await {
                Ok(event) => event,
                Err(RecvError::Closed) => return Err(Error::PollingStopped),
                Err(RecvError::Lagged(count)) => {
                    tracing::warn!(count, "poll event handler lagged");
                    continue;
                }
            };
            return self.handle_poll_event(event).await;
        }
    }
}

trait MqttClientExt {
    type PublishError;
    async fn homie_publish(&self, p: Publish) -> Result<(), Self::PublishError>;
}

impl MqttClientExt for rumqttc::v5::AsyncClient {
    type PublishError = rumqttc::v5::ClientError;
    async fn homie_publish(&self, p: Publish) -> Result<(), Self::PublishError> {
        self.publish(p.topic, convert_qos(p.qos), p.retain, p.payload).await
    }
}

pub fn convert_qos(homie: QoS) -> rumqttc::v5::mqttbytes::QoS {
    match homie {
        QoS::AtMostOnce => rumqttc::v5::mqttbytes::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::v5::mqttbytes::QoS::ExactlyOnce,
    }
}

/// The MQTT last will that marks the Homie device as lost.
pub fn convert_last_will(will: LastWill) -> rumqttc::v5::mqttbytes::v5::LastWill {
    rumqttc::v5::mqttbytes::v5::LastWill::new(
        will.topic,
        will.message,
        convert_qos(will.qos),
        will.retain,
        None,
    )
}
