//! MQTT transport speaking the Homie convention.
//!
//! Implements [`PublishPort`].  Topics handed in by the core are relative;
//! this adapter prefixes the device base topic (`homie/epsolar/...`).
//!
//! On connect it registers a last will of `$state = lost`, optionally
//! advertises the device attributes (`$homie`, `$name`, `$nodes`, on full
//! cycles) and announces `$state = ready`.  None of these count as core
//! publishes.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::mqtt::client::EspMqttClient`.
//! - **all other targets**: an in-memory recorder for host tests.

use core::fmt::Write;
use core::time::Duration;

use log::{debug, info, warn};

use crate::app::ports::{PublishPort, QoS};
use crate::catalog::Catalog;
use crate::config::NodeConfig;
use crate::error::PublishError;
use crate::homie::{self, Payload};

#[cfg(target_os = "espidf")]
use std::sync::Arc;

#[cfg(target_os = "espidf")]
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};

#[cfg(target_os = "espidf")]
use esp_idf_svc::mqtt::client::{
    EspMqttClient, EventPayload, LwtConfiguration, MqttClientConfiguration, QoS as MqttQoS,
};

/// Base topic + `/` + longest relative topic.
pub type FullTopic = heapless::String<{ 32 + 1 + homie::MAX_TOPIC_LEN }>;

/// A message as it left the adapter (simulation only).
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

pub struct MqttTransport {
    broker_uri: heapless::String<64>,
    client_id: heapless::String<32>,
    username: heapless::String<32>,
    password: heapless::String<64>,
    base_topic: heapless::String<32>,
    device_name: heapless::String<32>,
    nodes: Payload,
    keepalive: Duration,
    connect_timeout: Duration,
    advertise: bool,

    #[cfg(target_os = "espidf")]
    client: Option<EspMqttClient<'static>>,

    #[cfg(not(target_os = "espidf"))]
    connected: bool,
    #[cfg(not(target_os = "espidf"))]
    refuse_connect: bool,
    #[cfg(not(target_os = "espidf"))]
    sent: Vec<SentMessage>,
}

impl MqttTransport {
    pub fn new(
        config: &NodeConfig,
        password: heapless::String<64>,
        catalog: &Catalog<'_>,
    ) -> crate::error::Result<Self> {
        Ok(Self {
            broker_uri: config.broker_uri.clone(),
            client_id: config.client_id.clone(),
            username: config.username.clone(),
            password,
            base_topic: config.base_topic.clone(),
            device_name: config.device_name.clone(),
            nodes: homie::nodes_list(catalog)?,
            keepalive: Duration::from_secs(u64::from(config.keepalive_secs)),
            connect_timeout: config.network_timeout(),
            advertise: false,

            #[cfg(target_os = "espidf")]
            client: None,

            #[cfg(not(target_os = "espidf"))]
            connected: false,
            #[cfg(not(target_os = "espidf"))]
            refuse_connect: false,
            #[cfg(not(target_os = "espidf"))]
            sent: Vec::new(),
        })
    }

    /// Advertise device attributes on the next connect (full cycles).
    pub fn set_advertise(&mut self, advertise: bool) {
        self.advertise = advertise;
    }

    /// `{base_topic}/{topic}`
    pub fn full_topic(&self, topic: &str) -> Result<FullTopic, PublishError> {
        let mut t = FullTopic::new();
        write!(t, "{}/{}", self.base_topic, topic).map_err(|_| PublishError::Overflow)?;
        Ok(t)
    }

    /// Device-level announcement sent right after the session opens.
    fn announce(&mut self) -> Result<(), PublishError> {
        if self.advertise {
            let name = self.device_name.clone();
            let nodes = self.nodes.clone();
            self.send(homie::ATTR_HOMIE, homie::HOMIE_VERSION)?;
            self.send(homie::ATTR_NAME, &name)?;
            self.send(homie::ATTR_NODES, &nodes)?;
        }
        self.send(homie::ATTR_STATE, homie::STATE_READY)
    }

    fn send(&mut self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let full = self.full_topic(topic)?;
        self.platform_publish(&full, QoS::AtLeastOnce, true, payload)
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self) -> Result<(), PublishError> {
        let lwt_topic = self.full_topic(homie::ATTR_STATE)?;
        let conf = MqttClientConfiguration {
            client_id: Some(self.client_id.as_str()),
            username: (!self.username.is_empty()).then_some(self.username.as_str()),
            password: (!self.password.is_empty()).then_some(self.password.as_str()),
            keep_alive_interval: Some(self.keepalive),
            lwt: Some(LwtConfiguration {
                topic: &lwt_topic,
                payload: homie::STATE_LOST.as_bytes(),
                qos: MqttQoS::AtLeastOnce,
                retain: true,
            }),
            ..Default::default()
        };

        let session = Arc::new(Signal::<CriticalSectionRawMutex, bool>::new());
        let events = Arc::clone(&session);
        let client = EspMqttClient::new_cb(&self.broker_uri, &conf, move |event| match event.payload() {
            EventPayload::Connected(_) => events.signal(true),
            EventPayload::Disconnected => events.signal(false),
            EventPayload::Error(e) => warn!("MQTT: {:?}", e),
            _ => {}
        })
        .map_err(|e| {
            warn!("MQTT: client init failed: {}", e);
            PublishError::ConnectFailed
        })?;

        let up = futures_lite::future::block_on(crate::time::with_timeout(self.connect_timeout, session.wait()));
        if up != Some(true) {
            warn!("MQTT: no session within {:?}", self.connect_timeout);
            return Err(PublishError::ConnectFailed);
        }
        self.client = Some(client);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self) -> Result<(), PublishError> {
        debug!(
            "MQTT(sim): {} as '{}' (keepalive {:?}, timeout {:?})",
            self.broker_uri, self.client_id, self.keepalive, self.connect_timeout
        );
        if self.refuse_connect {
            return Err(PublishError::ConnectFailed);
        }
        self.connected = true;
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_publish(&mut self, topic: &str, qos: QoS, retain: bool, payload: &str) -> Result<(), PublishError> {
        let client = self.client.as_mut().ok_or(PublishError::NotConnected)?;
        let qos = match qos {
            QoS::AtMostOnce => MqttQoS::AtMostOnce,
            QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
            QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
        };
        client
            .publish(topic, qos, retain, payload.as_bytes())
            .map(|_msg_id| ())
            .map_err(|e| {
                warn!("MQTT: publish {} failed: {}", topic, e);
                PublishError::Rejected
            })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_publish(&mut self, topic: &str, qos: QoS, retain: bool, payload: &str) -> Result<(), PublishError> {
        if !self.connected {
            return Err(PublishError::NotConnected);
        }
        self.sent.push(SentMessage {
            topic: topic.to_owned(),
            payload: payload.to_owned(),
            qos,
            retain,
        });
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_disconnect(&mut self) {
        // Dropping the client stops its task and closes the socket.
        self.client = None;
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disconnect(&mut self) {
        self.connected = false;
    }
}

// ── Simulation hooks ──────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl MqttTransport {
    /// Make the next connects fail.
    pub fn set_refuse_connect(&mut self, refuse: bool) {
        self.refuse_connect = refuse;
    }

    pub fn sent(&self) -> &[SentMessage] {
        &self.sent
    }
}

// ── PublishPort ───────────────────────────────────────────────

impl PublishPort for MqttTransport {
    fn connect(&mut self) -> Result<(), PublishError> {
        self.platform_connect()?;
        info!("MQTT: connected to {}", self.broker_uri);
        if let Err(e) = self.announce() {
            warn!("MQTT: device announcement failed: {}", e);
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, qos: QoS, retain: bool, payload: &str) -> Result<(), PublishError> {
        let full = self.full_topic(topic)?;
        debug!("MQTT: {} = {}", full, payload);
        self.platform_publish(&full, qos, retain, payload)
    }

    fn disconnect(&mut self) {
        self.platform_disconnect();
        info!("MQTT: disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::epsolar;

    fn transport() -> MqttTransport {
        let catalog = Catalog::new(&epsolar::NODES).unwrap();
        MqttTransport::new(&NodeConfig::default(), heapless::String::new(), &catalog).unwrap()
    }

    #[test]
    fn prefixes_base_topic() {
        let mut t = transport();
        t.connect().unwrap();
        t.publish("battery/level", QoS::AtLeastOnce, true, "87").unwrap();
        let last = t.sent().last().unwrap();
        assert_eq!(last.topic, "homie/epsolar/battery/level");
        assert_eq!(last.payload, "87");
        assert!(last.retain);
    }

    #[test]
    fn connect_announces_ready() {
        let mut t = transport();
        t.connect().unwrap();
        let topics: Vec<_> = t.sent().iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(topics, ["homie/epsolar/$state"]);
        assert_eq!(t.sent()[0].payload, "ready");
    }

    #[test]
    fn advertise_sends_device_attributes() {
        let mut t = transport();
        t.set_advertise(true);
        t.connect().unwrap();
        let sent: Vec<_> = t.sent().iter().map(|m| (m.topic.as_str(), m.payload.as_str())).collect();
        assert_eq!(
            sent,
            [
                ("homie/epsolar/$homie", "3.0.1"),
                ("homie/epsolar/$name", "EPSolar Sensor"),
                ("homie/epsolar/$nodes", "array,battery,device,load"),
                ("homie/epsolar/$state", "ready"),
            ]
        );
    }

    #[test]
    fn publish_requires_session() {
        let mut t = transport();
        assert_eq!(
            t.publish("$state", QoS::AtLeastOnce, true, "sleeping"),
            Err(PublishError::NotConnected)
        );
        t.set_refuse_connect(true);
        assert_eq!(t.connect(), Err(PublishError::ConnectFailed));
        t.set_refuse_connect(false);
        t.connect().unwrap();
        t.disconnect();
        assert_eq!(
            t.publish("$state", QoS::AtLeastOnce, true, "sleeping"),
            Err(PublishError::NotConnected)
        );
    }
}
