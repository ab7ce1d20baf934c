//! Attribute server front end.
//!
//! Exposes a fixed set of named attributes of a future-based device the way
//! a control-system device server would: every read request reads all asked
//! names in one batch, keeps the last values and tracks a coarse device
//! state.

use crate::attribute::DynAttribute;
use crate::codec::{StartupMode, SystemError};
use crate::config::PaceConfig;
use crate::device::{attributes, Dispatch, Pace};
use crate::engine::FutureEngine;
use crate::error::{PaceError, PaceResult};
use crate::value::{AttrValue, Value};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Front-end name, module and descriptor of every served attribute.
pub static BINDINGS: &[(&str, Option<u8>, &dyn DynAttribute)] = &[
    ("idn", None, &attributes::IDN),
    ("mode", None, &attributes::STARTUP_MODE),
    ("error", None, &attributes::ERROR),
    ("pressure1", Some(1), &attributes::PRESSURE),
    ("src_pressure1", Some(1), &attributes::SRC_PRESSURE),
    ("pressure1_setpoint", Some(1), &attributes::SRC_PRESSURE_SETPOINT),
    ("pressure1_overshoot", Some(1), &attributes::SRC_PRESSURE_RATE_OVERSHOOT),
    ("pressure1_rate_mode", Some(1), &attributes::SRC_PRESSURE_RATE_MODE),
    ("pressure1_rate", Some(1), &attributes::SRC_PRESSURE_RATE),
    ("pressure1_control", Some(1), &attributes::PRESSURE_CONTROL),
];

fn binding(name: &str) -> PaceResult<(Option<u8>, &'static dyn DynAttribute)> {
    let name = name.to_lowercase();
    BINDINGS
        .iter()
        .find(|(bound, _, _)| *bound == name)
        .map(|(_, module, attribute)| (*module, *attribute))
        .ok_or(PaceError::UnknownAttribute(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    /// Nothing read yet
    #[default]
    Unknown,
    On,
    Fault,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DeviceState::Unknown => "UNKNOWN",
            DeviceState::On => "ON",
            DeviceState::Fault => "FAULT",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Default)]
struct Status {
    state: DeviceState,
    status: String,
    last_values: BTreeMap<String, Value>,
}

pub struct AttributeServer {
    pace: Pace<FutureEngine>,
    // one batch at a time
    lock: tokio::sync::Mutex<()>,
    status: Mutex<Status>,
}

impl AttributeServer {
    pub fn new(pace: Pace<FutureEngine>) -> Self {
        Self {
            pace,
            lock: tokio::sync::Mutex::new(()),
            status: Mutex::new(Status::default()),
        }
    }

    /// Connect to the configured controller.
    pub async fn connect(config: &PaceConfig) -> PaceResult<Self> {
        let connection = &config.connection;
        let pace = Pace::connect(
            &connection.address()?,
            connection.connect_timeout(),
            connection.timeout(),
        )
        .await?;
        Ok(Self::new(config.device.apply(pace)))
    }

    pub fn device(&self) -> &Pace<FutureEngine> {
        &self.pace
    }

    pub fn attribute_names() -> impl Iterator<Item = &'static str> {
        BINDINGS.iter().map(|(name, _, _)| *name)
    }

    pub fn state(&self) -> DeviceState {
        self.status.lock().state
    }

    pub fn status(&self) -> String {
        self.status.lock().status.clone()
    }

    /// Last value read for `name`, in front-end form.
    pub fn last_value(&self, name: &str) -> Option<Value> {
        self.status.lock().last_values.get(&name.to_lowercase()).cloned()
    }

    /// Read `names` in one batch and remember the values.
    ///
    /// Transport failures put the server in [`DeviceState::Fault`] and are
    /// returned. Per-attribute failures (NACK, decode) are returned in the
    /// map without affecting the state.
    pub async fn read_attributes<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> PaceResult<BTreeMap<String, PaceResult<Value>>> {
        let bound = names
            .iter()
            .map(|name| {
                let name = name.as_ref().to_lowercase();
                binding(&name).map(|(module, attribute)| (name, module, attribute))
            })
            .collect::<PaceResult<Vec<_>>>()?;

        let _guard = self.lock.lock().await;
        let pending = {
            let scope = self.pace.batch()?;
            for (name, module, attribute) in &bound {
                scope.push_labeled(name.clone(), attribute.query_value(*module)?);
            }
            scope.finish()
        };

        let replies = match pending.await {
            Ok(replies) => replies,
            Err(error) => {
                self.record_failure(&error);
                return Err(error);
            }
        };

        let mut results = BTreeMap::new();
        let mut status = self.status.lock();
        for (name, result) in replies.iter() {
            let result = result.clone().and_then(|value| present(name, value));
            if let Ok(value) = &result {
                status.last_values.insert(name.to_string(), value.clone());
            }
            results.insert(name.to_string(), result);
        }
        status.state = DeviceState::On;
        status.status = "OK".to_string();
        debug!(attributes = results.len(), "attributes read");
        Ok(results)
    }

    /// Write one attribute through its normal set path.
    pub async fn write_attribute(&self, name: &str, value: Value) -> PaceResult<Value> {
        let (module, attribute) = binding(name)?;
        let value = accept(name, value)?;
        let _guard = self.lock.lock().await;
        let result = self
            .pace
            .dispatch(attribute.command_value(module, &value))
            .await;
        if let Err(error) = &result {
            self.record_failure(error);
        }
        result
    }

    /// Send a raw line; no reply is read for sets.
    pub async fn write(&self, line: &str) -> PaceResult<()> {
        let _guard = self.lock.lock().await;
        self.pace.raw(line).await.map(|_| ())
    }

    /// Send a raw query line and return its reply.
    pub async fn write_readline(&self, line: &str) -> PaceResult<String> {
        let _guard = self.lock.lock().await;
        self.pace.raw(line).await
    }

    fn record_failure(&self, error: &PaceError) {
        if error.is_transport() {
            warn!(%error, "communication error");
            let mut status = self.status.lock();
            status.state = DeviceState::Fault;
            status.status = format!("Communication error: {}", error);
        }
    }
}

/// Device value as shown by the front end.
fn present(name: &str, value: Value) -> PaceResult<Value> {
    match name {
        "error" => Ok(Value::Text(SystemError::from_value(&value)?.to_string())),
        "mode" => {
            let mode = StartupMode::from_value(&value)?;
            Ok(Value::List(vec![
                Value::Text(mode.mode.token().to_string()),
                Value::Text(mode.setpoint.to_string()),
            ]))
        }
        _ => Ok(value),
    }
}

/// Front-end value as accepted by the device.
fn accept(name: &str, value: Value) -> PaceResult<Value> {
    match (name, value) {
        ("pressure1_rate_mode", Value::Text(text)) => Ok(Value::Text(text.to_uppercase())),
        (_, value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::PaceSimulator;
    use crate::transport::MockTransport;

    #[tokio::test]
    async fn test_read_attributes_uses_one_batch() {
        let mock = MockTransport::new()
            .with_replies([":SENS1:PRES 34.5;:SYST:ERR 0, No error;:OUTP1:STAT 1"]);
        let server = AttributeServer::new(Pace::asynchronous(mock.clone()));

        let values = server
            .read_attributes(&["pressure1", "error", "pressure1_control"])
            .await
            .unwrap();

        assert_eq!(mock.get_call_log(), vec![":SENS1:PRES?;:SYST:ERR?;:OUTP1:STAT?"]);
        assert_eq!(values["pressure1"].as_ref().unwrap(), &Value::Float(34.5));
        assert_eq!(server.last_value("error"), Some(Value::Text(String::new())));
        assert_eq!(server.last_value("pressure1_control"), Some(Value::Bool(true)));
        assert_eq!(server.state(), DeviceState::On);
        assert_eq!(server.status(), "OK");
    }

    #[tokio::test]
    async fn test_error_and_mode_rendering() {
        let mock = MockTransport::new().with_replies([":SYST:ERR -113, Undefined header;:SYST:SET CONT,12.5"]);
        let server = AttributeServer::new(Pace::asynchronous(mock));

        server.read_attributes(&["error", "mode"]).await.unwrap();
        assert_eq!(
            server.last_value("error"),
            Some(Value::Text("-113: Undefined header".to_string()))
        );
        assert_eq!(
            server.last_value("mode"),
            Some(Value::List(vec![
                Value::Text("CONT".to_string()),
                Value::Text("12.5".to_string())
            ]))
        );
    }

    #[tokio::test]
    async fn test_transport_failure_sets_fault() {
        let mock = MockTransport::new();
        mock.trigger_failure();
        let server = AttributeServer::new(Pace::asynchronous(mock));

        let err = server.read_attributes(&["idn"]).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(server.state(), DeviceState::Fault);
        assert!(server.status().starts_with("Communication error:"));
        assert!(server.last_value("idn").is_none());
    }

    #[tokio::test]
    async fn test_unknown_name_is_rejected_before_io() {
        let mock = MockTransport::new();
        let server = AttributeServer::new(Pace::asynchronous(mock.clone()));
        assert!(matches!(
            server.read_attributes(&["pressure9"]).await,
            Err(PaceError::UnknownAttribute(_))
        ));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_write_then_read_against_simulator() {
        let server = AttributeServer::new(Pace::asynchronous(PaceSimulator::default()));

        let written = server
            .write_attribute("pressure1_setpoint", Value::Float(1500.0))
            .await
            .unwrap();
        assert_eq!(written, Value::Float(1500.0));

        server
            .write_attribute("pressure1_rate_mode", Value::Text("max".to_string()))
            .await
            .unwrap();
        server
            .write_attribute(
                "mode",
                Value::List(vec![Value::Text("meas".to_string()), Value::Text("5".to_string())]),
            )
            .await
            .unwrap();

        let values = server
            .read_attributes(&["pressure1_setpoint", "pressure1_rate_mode", "mode", "idn"])
            .await
            .unwrap();
        assert!(values.values().all(|result| result.is_ok()));
        assert_eq!(server.last_value("pressure1_setpoint"), Some(Value::Float(1500.0)));
        assert_eq!(server.last_value("pressure1_rate_mode"), Some(Value::Text("MAX".to_string())));
        assert_eq!(
            server.last_value("mode"),
            Some(Value::List(vec![
                Value::Text("MEAS".to_string()),
                Value::Text("5".to_string())
            ]))
        );
        assert_eq!(
            server.last_value("idn"),
            Some(Value::Text("GE Druck,PACE5000,10388796,DK0367  v02.02.14".to_string()))
        );
    }

    #[tokio::test]
    async fn test_raw_commands() {
        let server = AttributeServer::new(Pace::asynchronous(PaceSimulator::default()));
        server.write(":SENS1:PRES 2.5").await.unwrap();
        assert_eq!(server.write_readline(":SENS1:PRES?").await.unwrap(), ":SENS1:PRES 2.5");
    }
}
