use serde::Serialize;

use crate::metering_pc321::registers::Pc321Register;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HaDevice {
    identifiers: Vec<String>,
    manufacturer: String,
    model: String,
    name: String,
}

impl HaDevice {
    pub fn pc321() -> Self {
        return HaDevice {
            identifiers: vec!["smacker_pc321".to_string()],
            manufacturer: "Owon".to_string(),
            model: "3-Phase clamp power meter".to_string(),
            name: "Energy Meter".to_string(),
        }
    }
}

/// A Home Assistant MQTT sensor discovery message.
#[derive(Serialize, Debug, Clone)]
pub struct HaDiscover {
    pub device: HaDevice,
    pub device_class: String,
    pub enabled_by_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<String>,
    pub object_id: String,
    pub state_class: String,
    pub state_topic: String,
    pub unique_id: String,
    pub unit_of_measurement: String,
    pub value_template: String,
    #[serde(skip_serializing)]
    pub discover_topic: String,
}

impl HaDiscover {
    /// Builds the discovery message for a register, `None` if its group is not announced.
    pub fn new_sensor(reg: &Pc321Register, state_topic: &str) -> Option<Self> {
        let metric = reg.metric?;
        let class = reg.group.sensor_class()?;

        return Some(HaDiscover {
            discover_topic: format!("homeassistant/sensor/pc321/{metric}/config"),
            device: HaDevice::pc321(),
            device_class: class.device_class.to_string(),
            enabled_by_default: true,
            entity_category: class.entity_category.map(str::to_string),
            object_id: format!("pc321_{metric}"),
            state_class: class.state_class.to_string(),
            state_topic: state_topic.to_string(),
            unique_id: format!("pc321_{metric}"),
            unit_of_measurement: reg.group.unit_of_measurement().to_string(),
            value_template: format!("{{{{ value_json.{metric} }}}}"),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering_pc321::registers::get_register;
    use serde_json::{json, Value};

    #[test]
    fn test_energy_sensor() {
        let disc = HaDiscover::new_sensor(get_register(131).unwrap(), "smacker/pc321").unwrap();
        assert_eq!(disc.discover_topic, "homeassistant/sensor/pc321/energy/config");

        let doc: Value = serde_json::from_str(&disc.to_json().unwrap()).unwrap();
        assert_eq!(doc, json!({
            "device": {
                "identifiers": ["smacker_pc321"],
                "manufacturer": "Owon",
                "model": "3-Phase clamp power meter",
                "name": "Energy Meter"
            },
            "device_class": "energy",
            "enabled_by_default": true,
            "object_id": "pc321_energy",
            "state_class": "total_increasing",
            "state_topic": "smacker/pc321",
            "unique_id": "pc321_energy",
            "unit_of_measurement": "kWh",
            "value_template": "{{ value_json.energy }}"
        }));
    }

    #[test]
    fn test_power_sensor_is_diagnostic() {
        let disc = HaDiscover::new_sensor(get_register(113).unwrap(), "smacker/pc321").unwrap();
        assert_eq!(disc.discover_topic, "homeassistant/sensor/pc321/power_l2/config");

        let doc: Value = serde_json::from_str(&disc.to_json().unwrap()).unwrap();
        assert_eq!(doc["entity_category"], "diagnostic");
        assert_eq!(doc["device_class"], "power");
        assert_eq!(doc["state_class"], "measurement");
        assert_eq!(doc["unit_of_measurement"], "W");
        assert_eq!(doc["value_template"], "{{ value_json.power_l2 }}");
        assert!(doc.get("discover_topic").is_none());
    }

    #[test]
    fn test_unannounced_registers() {
        assert!(HaDiscover::new_sensor(get_register(101).unwrap(), "smacker/pc321").is_none());
        assert!(HaDiscover::new_sensor(get_register(137).unwrap(), "smacker/pc321").is_none());
    }
}
