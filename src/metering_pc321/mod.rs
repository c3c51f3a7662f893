use log::{debug, error, info};
use thiserror::Error;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::mqtt::ha_interface::HaDiscover;
use crate::mqtt::{IncomingMessage, PublishData, Transmission};

pub mod decoder;
pub mod metrics;
pub mod registers;

use decoder::DecodeError;
use metrics::EncodeError;
use registers::PC321_REGISTERS;

/// Where the scaled metrics are published.
pub const STATE_TOPIC: &str = "smacker/pc321";

#[derive(Error, Debug)]
pub enum Pc321Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Decodes one register payload and returns the JSON document to publish.
pub fn process_payload(payload: &[u8]) -> Result<String, Pc321Error> {
    let reading = decoder::decode(payload)?;
    let metrics = metrics::rescale(&reading);
    Ok(metrics.to_json()?)
}

/// Turns an inbound message into the outgoing publish, logging and dropping what can not be decoded.
pub fn handle_message(message: &IncomingMessage) -> Option<PublishData> {
    match process_payload(&message.payload) {
        Ok(payload) => {
            info!("Publishing message to {STATE_TOPIC}: {payload}");
            Some(PublishData {
                topic: STATE_TOPIC.to_string(),
                payload,
                qos: 0,
                retain: false,
            })
        }
        Err(Pc321Error::Decode(e)) => {
            error!("Failed to decode message on {}: {e}, payload: {}",
                message.topic, String::from_utf8_lossy(&message.payload));
            None
        }
        Err(e) => {
            error!("Failed to encode metrics for message on {}: {e}", message.topic);
            None
        }
    }
}

/// Discovery messages for every register group Home Assistant should know about,
/// grouped by device class with the total first.
pub fn discovery_messages() -> Vec<HaDiscover> {
    let mut messages: Vec<HaDiscover> = PC321_REGISTERS.iter()
        .filter_map(|reg| HaDiscover::new_sensor(reg, STATE_TOPIC))
        .collect();
    messages.sort_by(|a, b| (&a.device_class, &a.object_id).cmp(&(&b.device_class, &b.object_id)));
    messages
}

pub struct Pc321Manager {
    sender: Sender<Transmission>,
    receiver: Receiver<IncomingMessage>,
}

impl Pc321Manager {
    pub fn new(sender: Sender<Transmission>, receiver: Receiver<IncomingMessage>) -> Self {
        Self { sender, receiver }
    }

    pub async fn start_thread(&mut self) {
        info!("Starting PC321 thread");

        while let Some(message) = self.receiver.recv().await {
            debug!("Received message on {}: {}", message.topic, String::from_utf8_lossy(&message.payload));

            let Some(publish) = handle_message(&message) else {
                continue;
            };

            if self.sender.send(Transmission::Publish(publish)).await.is_err() {
                error!("MQTT thread is gone, stopping PC321 thread");
                return;
            }
        }

        info!("PC321 thread exit, no more messages");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn message(payload: &str) -> IncomingMessage {
        IncomingMessage {
            topic: "zigbee2mqtt/pc321".to_string(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_process_payload() {
        let out = process_payload(br#"{"101": 2300, "102": 1500, "103": -500, "104": 95, "106": 123456}"#).unwrap();
        assert_eq!(out, r#"{"current_l1":1.500,"energy_l1":123.456,"power_factor_l1":0.950,"power_l1":-500.000,"voltage_l1":230.000}"#);
    }

    #[test]
    fn test_process_payload_is_deterministic() {
        let payload = br#"{"131": 987654, "133": 1234, "121": 2288, "linkquality": 120}"#;
        let first = process_payload(payload).unwrap();
        let second = process_payload(payload).unwrap();
        assert_eq!(first, second);
        assert!(!first.contains("linkquality"));
    }

    #[test]
    fn test_handle_message() {
        let publish = handle_message(&message(r#"{"135": 50}"#)).unwrap();
        assert_eq!(publish.topic, "smacker/pc321");
        assert_eq!(publish.payload, r#"{"frequency":50.000}"#);
        assert_eq!(publish.qos, 0);
        assert!(!publish.retain);

        assert_eq!(handle_message(&message("{}")).unwrap().payload, "{}");
        assert!(handle_message(&message("{\"101\":")).is_none());
        assert!(handle_message(&message(r#"{"101": -3}"#)).is_none());
    }

    #[test]
    fn test_discovery_messages() {
        let topics: Vec<String> = discovery_messages().into_iter().map(|d| d.discover_topic).collect();
        assert_eq!(topics, vec![
            "homeassistant/sensor/pc321/energy/config",
            "homeassistant/sensor/pc321/energy_l1/config",
            "homeassistant/sensor/pc321/energy_l2/config",
            "homeassistant/sensor/pc321/energy_l3/config",
            "homeassistant/sensor/pc321/power/config",
            "homeassistant/sensor/pc321/power_l1/config",
            "homeassistant/sensor/pc321/power_l2/config",
            "homeassistant/sensor/pc321/power_l3/config",
        ]);
    }

    #[tokio::test]
    async fn test_malformed_messages_are_not_published() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let mut manager = Pc321Manager::new(out_tx, in_rx);

        in_tx.send(message("this is not json")).await.unwrap();
        in_tx.send(message(r#"{"101": 2300}"#)).await.unwrap();
        in_tx.send(message("[]")).await.unwrap();
        in_tx.send(message(r#"{"111": 2310}"#)).await.unwrap();
        drop(in_tx);

        manager.start_thread().await;

        let mut published = Vec::new();
        while let Ok(t) = out_rx.try_recv() {
            match t {
                Transmission::Publish(data) => published.push(data.payload),
                Transmission::Disconnect => panic!("pipeline must not disconnect"),
            }
        }
        assert_eq!(published, vec![r#"{"voltage_l1":230.000}"#, r#"{"voltage_l2":231.000}"#]);
    }

    #[tokio::test]
    async fn test_thread_stops_when_mqtt_is_gone() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, out_rx) = mpsc::channel(8);
        drop(out_rx);
        let mut manager = Pc321Manager::new(out_tx, in_rx);

        in_tx.send(message(r#"{"101": 2300}"#)).await.unwrap();
        let stopped = tokio::time::timeout(Duration::from_secs(1), manager.start_thread()).await;
        assert!(stopped.is_ok(), "thread kept waiting although nobody publishes");
        drop(in_tx);
    }
}
