//! Codec set: pure conversions between wire text and typed values.
//!
//! Every decoder receives one reply fragment (or, for multi-query templates,
//! the fragments of one request joined with `;`). A fragment may echo the
//! command mnemonic (`:SENS1:PRES 34.567`); decoders strip it before looking
//! at the payload.

use crate::error::{PaceError, PaceResult};
use crate::value::{AttrValue, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Strip an echoed command mnemonic from a reply fragment.
///
/// A fragment whose first token starts with `:` or `*` carries the mnemonic;
/// anything else is already a bare payload.
pub fn strip_mnemonic(fragment: &str) -> &str {
    let fragment = fragment.trim();
    if fragment.starts_with(':') || fragment.starts_with('*') {
        match fragment.split_once(' ') {
            Some((_, payload)) => payload.trim(),
            None => "",
        }
    } else {
        fragment
    }
}

pub fn text(fragment: &str) -> PaceResult<String> {
    Ok(strip_mnemonic(fragment).to_string())
}

pub fn encode_text(value: &String) -> String {
    value.clone()
}

/// Decode a double-quoted string, removing a single pair of quotes.
pub fn quoted(fragment: &str) -> PaceResult<String> {
    let payload = strip_mnemonic(fragment);
    let inner = payload
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(payload);
    Ok(inner.to_string())
}

pub fn encode_quoted(value: &String) -> String {
    format!("\"{}\"", value)
}

pub fn float(fragment: &str) -> PaceResult<f64> {
    let payload = strip_mnemonic(fragment);
    payload
        .parse::<f64>()
        .map_err(|_| PaceError::decode("float", payload))
}

pub fn encode_float(value: &f64) -> String {
    value.to_string()
}

pub fn int(fragment: &str) -> PaceResult<i64> {
    let payload = strip_mnemonic(fragment);
    payload
        .parse::<i64>()
        .map_err(|_| PaceError::decode("integer", payload))
}

pub fn encode_int(value: &i64) -> String {
    value.to_string()
}

/// Any non-zero integer token decodes as `true`.
pub fn boolean(fragment: &str) -> PaceResult<bool> {
    let payload = strip_mnemonic(fragment);
    payload
        .parse::<i64>()
        .map(|v| v != 0)
        .map_err(|_| PaceError::decode("boolean", payload))
}

pub fn encode_bool(value: &bool) -> String {
    let token = if *value { "1" } else { "0" };
    token.to_string()
}

/// Entry of the device error queue (`:SYST:ERR?`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemError {
    pub code: i64,
    pub message: String,
}

impl SystemError {
    pub fn is_error(&self) -> bool {
        self.code != 0
    }
}

impl fmt::Display for SystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_error() {
            write!(f, "{}: {}", self.code, self.message)
        } else {
            Ok(())
        }
    }
}

/// Split `<code>,<message>` into its integer code and free text.
pub fn system_error(fragment: &str) -> PaceResult<SystemError> {
    let payload = strip_mnemonic(fragment);
    let (code, message) = payload
        .split_once(',')
        .ok_or_else(|| PaceError::decode("error code and message", payload))?;
    let code = code
        .trim()
        .parse::<i64>()
        .map_err(|_| PaceError::decode("error code", payload))?;
    Ok(SystemError {
        code,
        message: message.trim().to_string(),
    })
}

/// Acknowledgement of a write: succeeds on error code 0, otherwise surfaces
/// the device-reported error.
pub fn acknowledge(fragment: &str) -> PaceResult<()> {
    let error = system_error(fragment)?;
    if error.is_error() {
        Err(PaceError::Device {
            code: error.code,
            message: error.message,
        })
    } else {
        Ok(())
    }
}

/// Pressure reading paired with the in-limits flag (`<p>,<0|1>`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureInLimits {
    pub pressure: f64,
    pub in_limits: bool,
}

pub fn pressure_in_limits(fragment: &str) -> PaceResult<PressureInLimits> {
    let payload = strip_mnemonic(fragment);
    let (pressure, flag) = payload
        .split_once(',')
        .ok_or_else(|| PaceError::decode("pressure and in-limits flag", payload))?;
    Ok(PressureInLimits {
        pressure: float(pressure)?,
        in_limits: boolean(flag)?,
    })
}

/// Pressure slew behaviour of a control module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateMode {
    Maximum,
    Linear,
}

impl RateMode {
    pub fn token(&self) -> &'static str {
        match self {
            RateMode::Maximum => "MAX",
            RateMode::Linear => "LIN",
        }
    }

    pub fn from_token(token: &str) -> PaceResult<Self> {
        match token.trim().to_uppercase().as_str() {
            "MAX" | "MAXIMUM" => Ok(RateMode::Maximum),
            "LIN" | "LINEAR" => Ok(RateMode::Linear),
            _ => Err(PaceError::decode("rate mode", token)),
        }
    }
}

pub fn rate_mode(fragment: &str) -> PaceResult<RateMode> {
    RateMode::from_token(strip_mnemonic(fragment))
}

pub fn encode_rate_mode(value: &RateMode) -> String {
    value.token().to_string()
}

/// Operating mode of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    Measurement,
    Control,
}

impl ControlMode {
    pub fn token(&self) -> &'static str {
        match self {
            ControlMode::Measurement => "MEAS",
            ControlMode::Control => "CONT",
        }
    }

    pub fn from_token(token: &str) -> PaceResult<Self> {
        match token.trim().to_uppercase().as_str() {
            "MEAS" | "MEASUREMENT" => Ok(ControlMode::Measurement),
            "CONT" | "CONTROL" => Ok(ControlMode::Control),
            _ => Err(PaceError::decode("control mode", token)),
        }
    }
}

/// Mode entered at power-up together with its setpoint (`MEAS,12.3`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StartupMode {
    pub mode: ControlMode,
    pub setpoint: f64,
}

pub fn startup_mode(fragment: &str) -> PaceResult<StartupMode> {
    let payload = strip_mnemonic(fragment);
    let (mode, setpoint) = payload
        .split_once(',')
        .ok_or_else(|| PaceError::decode("mode and setpoint", payload))?;
    Ok(StartupMode {
        mode: ControlMode::from_token(mode)?,
        setpoint: float(setpoint)?,
    })
}

pub fn encode_startup_mode(value: &StartupMode) -> String {
    format!("{},{}", value.mode.token(), value.setpoint)
}

/// Serial numbers of the controller's sub-assemblies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialNumbers {
    pub ui: i64,
    pub ctrl1: i64,
    pub ctrl2: i64,
    pub ao1: i64,
    pub ao2: i64,
    pub vfc1: i64,
    pub vfc2: i64,
}

impl SerialNumbers {
    pub const FIELDS: [&'static str; 7] = ["ui", "ctrl1", "ctrl2", "ao1", "ao2", "vfc1", "vfc2"];

    fn values(&self) -> [i64; 7] {
        [
            self.ui, self.ctrl1, self.ctrl2, self.ao1, self.ao2, self.vfc1, self.vfc2,
        ]
    }
}

/// Decode the seven `;`-separated `:INST:SN<n>` replies.
pub fn serial_numbers(fragment: &str) -> PaceResult<SerialNumbers> {
    let numbers = fragment
        .split(';')
        .map(int)
        .collect::<PaceResult<Vec<_>>>()?;
    match numbers.as_slice() {
        [ui, ctrl1, ctrl2, ao1, ao2, vfc1, vfc2] => Ok(SerialNumbers {
            ui: *ui,
            ctrl1: *ctrl1,
            ctrl2: *ctrl2,
            ao1: *ao1,
            ao2: *ao2,
            vfc1: *vfc1,
            vfc2: *vfc2,
        }),
        _ => Err(PaceError::decode("seven serial numbers", fragment)),
    }
}

// Value conversions for the composite payloads

fn field<'a>(value: &'a Value, name: &str, expected: &'static str) -> PaceResult<&'a Value> {
    value.field(name).ok_or_else(|| value.mismatch(expected))
}

impl AttrValue for SystemError {
    const TYPE_NAME: &'static str = "system error";

    fn into_value(self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("code".to_string(), Value::Int(self.code));
        map.insert("message".to_string(), Value::Text(self.message));
        Value::Map(map)
    }

    fn from_value(value: &Value) -> PaceResult<Self> {
        Ok(SystemError {
            code: i64::from_value(field(value, "code", Self::TYPE_NAME)?)?,
            message: String::from_value(field(value, "message", Self::TYPE_NAME)?)?,
        })
    }
}

impl AttrValue for PressureInLimits {
    const TYPE_NAME: &'static str = "pressure in limits";

    fn into_value(self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("pressure".to_string(), Value::Float(self.pressure));
        map.insert("in_limits".to_string(), Value::Bool(self.in_limits));
        Value::Map(map)
    }

    fn from_value(value: &Value) -> PaceResult<Self> {
        Ok(PressureInLimits {
            pressure: f64::from_value(field(value, "pressure", Self::TYPE_NAME)?)?,
            in_limits: bool::from_value(field(value, "in_limits", Self::TYPE_NAME)?)?,
        })
    }
}

impl AttrValue for RateMode {
    const TYPE_NAME: &'static str = "rate mode";

    fn into_value(self) -> Value {
        Value::Text(self.token().to_string())
    }

    fn from_value(value: &Value) -> PaceResult<Self> {
        let token = value.as_str().ok_or_else(|| value.mismatch(Self::TYPE_NAME))?;
        RateMode::from_token(token)
    }
}

impl AttrValue for StartupMode {
    const TYPE_NAME: &'static str = "startup mode";

    fn into_value(self) -> Value {
        let mut map = BTreeMap::new();
        map.insert(
            "mode".to_string(),
            Value::Text(self.mode.token().to_string()),
        );
        map.insert("setpoint".to_string(), Value::Float(self.setpoint));
        Value::Map(map)
    }

    fn from_value(value: &Value) -> PaceResult<Self> {
        match value {
            // Front ends hand the mode over as a [mode, setpoint] pair
            Value::List(items) if items.len() == 2 => {
                let mode = items[0].as_str().ok_or_else(|| value.mismatch(Self::TYPE_NAME))?;
                let setpoint = match &items[1] {
                    Value::Text(text) => float(text)?,
                    other => f64::from_value(other)?,
                };
                Ok(StartupMode {
                    mode: ControlMode::from_token(mode)?,
                    setpoint,
                })
            }
            _ => {
                let mode = field(value, "mode", Self::TYPE_NAME)?;
                let mode = mode.as_str().ok_or_else(|| value.mismatch(Self::TYPE_NAME))?;
                Ok(StartupMode {
                    mode: ControlMode::from_token(mode)?,
                    setpoint: f64::from_value(field(value, "setpoint", Self::TYPE_NAME)?)?,
                })
            }
        }
    }
}

impl AttrValue for SerialNumbers {
    const TYPE_NAME: &'static str = "serial numbers";

    fn into_value(self) -> Value {
        let map = Self::FIELDS
            .iter()
            .zip(self.values())
            .map(|(name, number)| (name.to_string(), Value::Int(number)))
            .collect();
        Value::Map(map)
    }

    fn from_value(value: &Value) -> PaceResult<Self> {
        let get = |name| -> PaceResult<i64> {
            i64::from_value(field(value, name, Self::TYPE_NAME)?)
        };
        Ok(SerialNumbers {
            ui: get("ui")?,
            ctrl1: get("ctrl1")?,
            ctrl2: get("ctrl2")?,
            ao1: get("ao1")?,
            ao2: get("ao2")?,
            vfc1: get("vfc1")?,
            vfc2: get("vfc2")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_mnemonic() {
        assert_eq!(strip_mnemonic(":SENS1:PRES 34.567"), "34.567");
        assert_eq!(strip_mnemonic("*IDN GE Druck,PACE5000"), "GE Druck,PACE5000");
        assert_eq!(strip_mnemonic("  10.0 "), "10.0");
        assert_eq!(strip_mnemonic("0, No error"), "0, No error");
        assert_eq!(strip_mnemonic(":OUTP1:STAT"), "");
    }

    #[test]
    fn test_float_and_int() {
        assert_eq!(float(":SENS1:PRES 34.567").unwrap(), 34.567);
        assert_eq!(int(":SENS1:PRES:RES 5").unwrap(), 5);
        assert!(matches!(
            float(":SENS1:PRES abc"),
            Err(PaceError::Decode { expected: "float", .. })
        ));
    }

    #[test]
    fn test_boolean_accepts_any_non_zero() {
        assert!(boolean("1").unwrap());
        assert!(boolean(":OUTP1:STAT 2").unwrap());
        assert!(!boolean("0").unwrap());
        assert_eq!(encode_bool(&true), "1");
        assert_eq!(encode_bool(&false), "0");
        assert!(boolean("yes").is_err());
    }

    #[test]
    fn test_quoted() {
        assert_eq!(quoted(r#":INST:MAC "00:11:22""#).unwrap(), "00:11:22");
        assert_eq!(encode_quoted(&"20bar".to_string()), "\"20bar\"");
        // only one pair is removed
        assert_eq!(quoted(r#"""x"""#).unwrap(), "\"x\"");
    }

    #[test]
    fn test_reversible_codecs() {
        for v in [0.0, -1.5, 34.567, 1e-9, 1013.25] {
            assert_eq!(float(&encode_float(&v)).unwrap(), v);
        }
        for v in [i64::MIN, -3, 0, 42] {
            assert_eq!(int(&encode_int(&v)).unwrap(), v);
        }
        for v in [RateMode::Maximum, RateMode::Linear] {
            assert_eq!(rate_mode(&encode_rate_mode(&v)).unwrap(), v);
        }
        let mode = StartupMode {
            mode: ControlMode::Control,
            setpoint: 12.5,
        };
        assert_eq!(startup_mode(&encode_startup_mode(&mode)).unwrap(), mode);
    }

    #[test]
    fn test_system_error_and_acknowledge() {
        let err = system_error(":SYST:ERR -113, Undefined header").unwrap();
        assert_eq!(err.code, -113);
        assert_eq!(err.message, "Undefined header");
        assert_eq!(err.to_string(), "-113: Undefined header");

        assert!(acknowledge("0, No error").is_ok());
        assert!(matches!(
            acknowledge("-113, Undefined header"),
            Err(PaceError::Device { code: -113, .. })
        ));
        assert!(system_error("garbage").is_err());
    }

    #[test]
    fn test_composites() {
        let inl = pressure_in_limits(":SENS1:PRES:INL 1000.5,1").unwrap();
        assert_eq!(inl.pressure, 1000.5);
        assert!(inl.in_limits);

        let sn = serial_numbers(":INST:SN1 1;:INST:SN2 2;3;4;5;6;:INST:SN7 7").unwrap();
        assert_eq!(sn.ui, 1);
        assert_eq!(sn.vfc2, 7);
        assert!(serial_numbers("1;2;3").is_err());
    }

    #[test]
    fn test_composite_values() {
        let sn = serial_numbers("1;2;3;4;5;6;7").unwrap();
        assert_eq!(SerialNumbers::from_value(&sn.clone().into_value()).unwrap(), sn);

        let pair = Value::List(vec![Value::Text("meas".into()), Value::Text("2.5".into())]);
        let mode = StartupMode::from_value(&pair).unwrap();
        assert_eq!(mode.mode, ControlMode::Measurement);
        assert_eq!(mode.setpoint, 2.5);
    }
}
