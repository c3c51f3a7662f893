use std::collections::BTreeMap;

use log::debug;
use serde_json::{Map, Value};
use thiserror::Error;

use super::registers::{RegisterFormat, DEVICE_STATUS, PC321_REGISTERS, PHASE_SEQUENCE_DETECTION};

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed register payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Register {register} holds {value}, which is not a valid {format}")]
    InvalidValue {
        register: u16,
        value: Value,
        format: RegisterFormat,
    },
}

/// The registers reported by one message. Registers the meter did not send are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterReading {
    values: BTreeMap<u16, i64>,
}

impl RegisterReading {
    pub fn get(&self, register: u16) -> Option<i64> {
        self.values.get(&register).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, i64)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    pub fn device_status(&self) -> Option<u8> {
        self.get(DEVICE_STATUS).and_then(|v| u8::try_from(v).ok())
    }

    pub fn phase_sequence_detection(&self) -> Option<u8> {
        self.get(PHASE_SEQUENCE_DETECTION).and_then(|v| u8::try_from(v).ok())
    }
}

/// Parses a JSON object keyed by register id into a [`RegisterReading`].
///
/// Unknown keys are ignored, `null` counts as not reported. A value that does not fit the
/// register's width fails the whole message instead of being truncated.
pub fn decode(payload: &[u8]) -> Result<RegisterReading, DecodeError> {
    let doc: Map<String, Value> = serde_json::from_slice(payload)?;
    let mut reading = RegisterReading::default();

    for reg in PC321_REGISTERS.iter() {
        let value = match doc.get(&reg.key()) {
            None | Some(Value::Null) => continue,
            Some(v) => v,
        };

        let raw = reg.format.accept(value).ok_or_else(|| DecodeError::InvalidValue {
            register: reg.register,
            value: value.clone(),
            format: reg.format,
        })?;

        reading.values.insert(reg.register, raw);
    }

    debug!("Decoded {} of {} keys", reading.len(), doc.len());
    Ok(reading)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_sparse_payload() {
        let reading = decode(br#"{"101": 2300, "103": -500, "131": 123456}"#).unwrap();
        assert_eq!(reading.len(), 3);
        assert_eq!(reading.get(101), Some(2300));
        assert_eq!(reading.get(103), Some(-500));
        assert_eq!(reading.get(131), Some(123456));
        assert_eq!(reading.get(111), None);
    }

    #[test]
    fn test_decode_empty_object() {
        let reading = decode(b"{}").unwrap();
        assert!(reading.is_empty());
    }

    #[test]
    fn test_null_is_absent_not_zero() {
        let reading = decode(br#"{"102": null, "112": 0}"#).unwrap();
        assert_eq!(reading.get(102), None);
        assert_eq!(reading.get(112), Some(0));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let reading = decode(br#"{"105": 7, "999": -1, "linkquality": "high", "121": 2291}"#).unwrap();
        assert_eq!(reading.len(), 1);
        assert_eq!(reading.get(121), Some(2291));
        assert_eq!(reading.get(105), None);
    }

    #[test]
    fn test_malformed_json_fails() {
        assert!(matches!(decode(b"{\"101\": "), Err(DecodeError::Json(_))));
        assert!(matches!(decode(b"not json"), Err(DecodeError::Json(_))));
        assert!(matches!(decode(b"[1, 2, 3]"), Err(DecodeError::Json(_))));
        assert!(matches!(decode(b""), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_out_of_range_fails() {
        match decode(br#"{"101": -1}"#) {
            Err(DecodeError::InvalidValue { register, format, .. }) => {
                assert_eq!(register, 101);
                assert_eq!(format, RegisterFormat::UInt32);
            }
            _ => panic!("negative voltage must not decode"),
        }
        assert!(decode(br#"{"133": 2147483648}"#).is_err());
        assert!(decode(br#"{"137": 300}"#).is_err());
        assert!(decode(br#"{"106": 12.5}"#).is_err());
        assert!(decode(br#"{"106": "12"}"#).is_err());
    }

    #[test]
    fn test_status_registers_are_decoded() {
        let reading = decode(br#"{"137": 1, "138": 0}"#).unwrap();
        assert_eq!(reading.device_status(), Some(1));
        assert_eq!(reading.phase_sequence_detection(), Some(0));
        assert_eq!(decode(b"{}").unwrap().device_status(), None);
    }

    #[test]
    fn test_decode_is_repeatable() {
        let payload = br#"{"101": 2300, "102": 1500, "137": 2}"#;
        assert_eq!(decode(payload).unwrap(), decode(payload).unwrap());
    }
}
