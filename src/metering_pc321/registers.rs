use std::fmt;

/// Width and signedness of a PC321 register as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterFormat {
    UInt8,
    UInt32,
    Int32,
}

impl RegisterFormat {
    /// Returns the raw value if `value` is an integer that fits this register.
    pub fn accept(&self, value: &serde_json::Value) -> Option<i64> {
        match self {
            RegisterFormat::UInt8 => value.as_u64().and_then(|v| u8::try_from(v).ok()).map(i64::from),
            RegisterFormat::UInt32 => value.as_u64().and_then(|v| u32::try_from(v).ok()).map(i64::from),
            RegisterFormat::Int32 => value.as_i64().and_then(|v| i32::try_from(v).ok()).map(i64::from),
        }
    }
}

impl fmt::Display for RegisterFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterFormat::UInt8 => write!(f, "u8"),
            RegisterFormat::UInt32 => write!(f, "u32"),
            RegisterFormat::Int32 => write!(f, "i32"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterGroup {
    Voltage,
    Current,
    ActivePower,
    PowerFactor,
    Energy,
    Frequency,
    Temperature,
    Status,
}

/// Home Assistant classification of a register group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorClass {
    pub device_class: &'static str,
    pub state_class: &'static str,
    pub entity_category: Option<&'static str>,
}

impl RegisterGroup {
    pub fn scaler(&self) -> f64 {
        match self {
            RegisterGroup::Voltage => 0.1,     // 0.1 V
            RegisterGroup::Current => 0.001,   // mA
            RegisterGroup::ActivePower => 1.0, // W
            RegisterGroup::PowerFactor => 0.01,
            // The vendor documents 0.01 kWh per unit, the meter counts in Wh.
            RegisterGroup::Energy => 0.001,
            RegisterGroup::Frequency => 1.0,
            RegisterGroup::Temperature => 0.1, // 0.1 °C
            RegisterGroup::Status => 1.0,
        }
    }

    pub fn unit_of_measurement(&self) -> &'static str {
        match self {
            RegisterGroup::Voltage => "V",
            RegisterGroup::Current => "A",
            RegisterGroup::ActivePower => "W",
            RegisterGroup::PowerFactor => "",
            RegisterGroup::Energy => "kWh",
            RegisterGroup::Frequency => "Hz",
            RegisterGroup::Temperature => "°C",
            RegisterGroup::Status => "",
        }
    }

    /// Groups that are announced through Home Assistant discovery.
    pub fn sensor_class(&self) -> Option<SensorClass> {
        match self {
            RegisterGroup::Energy => Some(SensorClass {
                device_class: "energy",
                state_class: "total_increasing",
                entity_category: None,
            }),
            RegisterGroup::ActivePower => Some(SensorClass {
                device_class: "power",
                state_class: "measurement",
                entity_category: Some("diagnostic"),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pc321Register {
    pub register: u16,
    /// Name of the published metric, `None` for registers that are decoded but not exported.
    pub metric: Option<&'static str>,
    pub format: RegisterFormat,
    pub group: RegisterGroup,
}

impl Pc321Register {
    const fn new(register: u16, metric: &'static str, format: RegisterFormat, group: RegisterGroup) -> Self {
        Pc321Register { register, metric: Some(metric), format, group }
    }

    const fn reserved(register: u16) -> Self {
        Pc321Register { register, metric: None, format: RegisterFormat::UInt8, group: RegisterGroup::Status }
    }

    pub fn key(&self) -> String {
        self.register.to_string()
    }

    pub fn scale(&self, raw: i64) -> f64 {
        raw as f64 * self.group.scaler()
    }
}

pub const DEVICE_STATUS: u16 = 137;
pub const PHASE_SEQUENCE_DETECTION: u16 = 138;

use RegisterFormat::{Int32, UInt32};
use RegisterGroup::*;

pub static PC321_REGISTERS: [Pc321Register; 22] = [
    Pc321Register::new(101, "voltage_l1", UInt32, Voltage),
    Pc321Register::new(102, "current_l1", UInt32, Current),
    Pc321Register::new(103, "power_l1", Int32, ActivePower),
    Pc321Register::new(104, "power_factor_l1", UInt32, PowerFactor),
    Pc321Register::new(106, "energy_l1", UInt32, Energy),

    Pc321Register::new(111, "voltage_l2", UInt32, Voltage),
    Pc321Register::new(112, "current_l2", UInt32, Current),
    Pc321Register::new(113, "power_l2", Int32, ActivePower),
    Pc321Register::new(114, "power_factor_l2", UInt32, PowerFactor),
    Pc321Register::new(116, "energy_l2", UInt32, Energy),

    Pc321Register::new(121, "voltage_l3", UInt32, Voltage),
    Pc321Register::new(122, "current_l3", UInt32, Current),
    Pc321Register::new(123, "power_l3", Int32, ActivePower),
    Pc321Register::new(124, "power_factor_l3", UInt32, PowerFactor),
    Pc321Register::new(126, "energy_l3", UInt32, Energy),

    Pc321Register::new(131, "energy", UInt32, Energy),
    Pc321Register::new(132, "current", UInt32, Current),
    Pc321Register::new(133, "power", Int32, ActivePower),
    Pc321Register::new(135, "frequency", UInt32, Frequency),
    Pc321Register::new(136, "temperature", UInt32, Temperature),
    // TODO: map device status and phase sequence detection once their encoding is known
    Pc321Register::reserved(DEVICE_STATUS),
    Pc321Register::reserved(PHASE_SEQUENCE_DETECTION),
];

pub fn get_register(register: u16) -> Option<&'static Pc321Register> {
    PC321_REGISTERS.iter().find(|r| r.register == register)
}
