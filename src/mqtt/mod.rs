pub mod ha_interface;

use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, ConnAck, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode};
use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::timeout;

use crate::config::MqttConfig;
use crate::mqtt::ha_interface::HaDiscover;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/* room for the discovery burst that is queued before the event loop runs */
const REQUEST_QUEUE_SIZE: usize = 32;
const TRANSMISSION_QUEUE_SIZE: usize = 100;

#[derive(Error, Debug)]
pub enum MqttError {
    #[error("Connect timeout")]
    ConnectTimeout,
    #[error("Subscribe timeout")]
    SubscribeTimeout,
    #[error("Subscription to {0} was rejected by the broker")]
    SubscribeRejected(String),
    #[error("Connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("Client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("Publish to {0} timed out")]
    PublishTimeout(String),
    #[error("Unable to encode discovery message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A message received on the inbound topic.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishData {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

pub enum Transmission {
    Publish(PublishData),
    Disconnect,
}

pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

/// Owns the rumqttc event loop: the startup handshake and, afterwards, inbound delivery.
pub struct MqttConnection {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
}

impl MqttConnection {
    pub fn new(config: &MqttConfig) -> Self {
        info!("MQTT connection to {}:{} starting up", config.host, config.port);

        let mut mqttoptions = MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        mqttoptions.set_clean_session(config.clean_session);
        if !config.user.is_empty() {
            mqttoptions.set_credentials(config.user.clone(), config.pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, REQUEST_QUEUE_SIZE);

        return MqttConnection {
            client,
            eventloop,
            topic: config.topic.clone(),
        }
    }

    pub fn client(&self) -> AsyncClient {
        return self.client.clone();
    }

    /// Waits for the broker to accept the connection.
    pub async fn connect(&mut self) -> Result<ConnAck, MqttError> {
        let eventloop = &mut self.eventloop;
        let ack = timeout(CONNECT_TIMEOUT, async {
            loop {
                match eventloop.poll().await? {
                    Event::Incoming(Packet::ConnAck(ack)) => return Ok::<_, MqttError>(ack),
                    event => debug!("mqtt event before connack: {event:?}"),
                }
            }
        })
        .await
        .map_err(|_| MqttError::ConnectTimeout)??;

        info!("Connected to broker, session present: {}", ack.session_present);
        Ok(ack)
    }

    /// Subscribes to the inbound topic and waits for the broker to acknowledge it.
    ///
    /// Everything queued on the client before this call (the discovery messages) is flushed
    /// on the way.
    pub async fn subscribe(&mut self, incoming: &Sender<IncomingMessage>) -> Result<(), MqttError> {
        self.client.subscribe(self.topic.clone(), QoS::AtMostOnce).await?;

        let eventloop = &mut self.eventloop;
        let topic = &self.topic;
        timeout(SUBSCRIBE_TIMEOUT, async {
            loop {
                match eventloop.poll().await? {
                    Event::Incoming(Packet::SubAck(ack)) => {
                        if ack.return_codes.iter().any(|c| matches!(c, SubscribeReasonCode::Failure)) {
                            return Err(MqttError::SubscribeRejected(topic.clone()));
                        }
                        return Ok::<(), MqttError>(());
                    }
                    Event::Incoming(Packet::Publish(p)) => {
                        let message = IncomingMessage { topic: p.topic, payload: p.payload.to_vec() };
                        if incoming.send(message).await.is_err() {
                            debug!("Receiver is gone, dropping message received before suback");
                        }
                    }
                    event => debug!("mqtt event before suback: {event:?}"),
                }
            }
        })
        .await
        .map_err(|_| MqttError::SubscribeTimeout)??;

        info!("Subscribed to {}", self.topic);
        Ok(())
    }

    /// Drives the event loop until the client disconnects or nobody listens anymore.
    pub async fn run(mut self, incoming: Sender<IncomingMessage>) {
        info!("MQTT Eventloop started");

        let mut last_error = String::new();
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    let message = IncomingMessage { topic: p.topic, payload: p.payload.to_vec() };
                    if incoming.send(message).await.is_err() {
                        debug!("Receiver is gone, stopping the event loop");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    last_error.clear();
                    if ack.session_present {
                        info!("Reconnected, broker kept our session");
                        continue;
                    }

                    info!("Reconnected, resubscribing to {}", self.topic);
                    let client = self.client.clone();
                    let topic = self.topic.clone();
                    tokio::spawn(async move {
                        if let Err(e) = client.subscribe(topic, QoS::AtMostOnce).await {
                            error!("Resubscribe failed: {e}");
                        }
                    });
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("Disconnected from broker");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    /* The event loop reconnects on the next poll, only report changes */
                    if e.to_string() != last_error {
                        error!("Error in MQTT {:?}, reconnecting", e);
                        last_error = e.to_string();
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// Outgoing side: publishes whatever the pipeline hands over, one at a time.
pub struct MqttManager {
    rx: Receiver<Transmission>,
    exit_thread: bool,
    client: AsyncClient,
}

impl MqttManager {
    pub fn new(client: AsyncClient) -> (Self, Sender<Transmission>) {
        let (mtx, mrx) = mpsc::channel(TRANSMISSION_QUEUE_SIZE);

        return (MqttManager {
            client,
            rx: mrx,
            exit_thread: false,
        }, mtx);
    }

    pub async fn publish(&self, data: PublishData) -> Result<(), MqttError> {
        let topic = data.topic.clone();
        let request = self.client.publish(data.topic, qos_from_level(data.qos), data.retain, data.payload);

        match timeout(PUBLISH_TIMEOUT, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(MqttError::PublishTimeout(topic)),
        }
    }

    pub async fn publish_discovery(&self, disc: &HaDiscover) -> Result<(), MqttError> {
        let payload = disc.to_json()?;
        debug!("Publishing discovery for {}", disc.discover_topic);

        self.publish(PublishData {
            topic: disc.discover_topic.clone(),
            payload,
            qos: 0,
            retain: true,
        }).await
    }

    pub async fn start_thread(&mut self) {
        while !self.exit_thread {
            let Some(transmission) = self.rx.recv().await else {
                debug!("Reading returned none, we exit now");
                self.exit_thread = true;
                continue;
            };

            match transmission {
                Transmission::Publish(data) => {
                    let topic = data.topic.clone();
                    match self.publish(data).await {
                        Err(e) => { error!("Failed to publish to {topic}: {e}"); },
                        Ok(_) => { debug!("Published successfully"); }
                    }
                },
                Transmission::Disconnect => {
                    info!("Disconnecting from broker");
                    match timeout(DISCONNECT_TIMEOUT, self.client.disconnect()).await {
                        Ok(Ok(_)) => {},
                        Ok(Err(e)) => { warn!("Disconnect failed: {e}"); },
                        Err(_) => { warn!("Disconnect timed out"); },
                    }
                    self.exit_thread = true;
                },
            }
        }

        info!("MQTT thread exit");
    }
}
