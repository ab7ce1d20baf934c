//! Device integration tests against the in-process simulator
//!
//! # Test Coverage
//!
//! - Blocking and future-based devices driving the same simulator
//! - Batches spanning device and module attributes, split across lines
//! - NACK isolation inside a batch
//! - Multi-fragment attributes (serial numbers) aligned with their neighbours
//! - End-to-end over TCP with the simulator served on a local port

use pace_scpi::attribute::Attribute;
use pace_scpi::codec::{self, ControlMode, RateMode, StartupMode};
use pace_scpi::device::{attributes, Controller, Pace};
use pace_scpi::simulator::{PaceSimulator, SimulatorConfig};
use pace_scpi::transport::Address;
use pace_scpi::value::Value;
use pace_scpi::PaceError;
use std::time::Duration;
use tokio::net::TcpListener;

// =============================================================================
// Blocking device
// =============================================================================

#[test]
fn test_blocking_module_round_trips() {
    let simulator = PaceSimulator::default();
    let pace = Pace::blocking(simulator.clone());
    let module = pace.module(2).unwrap();

    assert_eq!(module.set_src_pressure_setpoint(1234.5).unwrap(), 1234.5);
    assert_eq!(simulator.value(":SOUR2:PRES:LEV:IMM:AMPL").unwrap(), "1234.5");

    assert_eq!(module.set_src_pressure_rate_mode(RateMode::Maximum).unwrap(), RateMode::Maximum);
    assert!(module.set_relay2(true).unwrap());
    assert!(!module.relay1().unwrap());
    assert_eq!(module.pressure_range().unwrap(), "20.00bar");
    assert_eq!(module.unit().unwrap(), "MBAR");

    assert!(module.start().unwrap());
    assert!(module.pressure_control().unwrap());
    assert!(!module.stop().unwrap());
}

#[test]
fn test_blocking_device_attributes() {
    let pace = Pace::blocking(PaceSimulator::default());

    assert_eq!(pace.idn().unwrap(), "GE Druck,PACE5000,10388796,DK0367  v02.02.14");
    assert_eq!(pace.mac().unwrap(), "00:0B:3C:00:12:34");
    assert_eq!(pace.version().unwrap(), "02.02.14");
    assert!(pace.hw_test().unwrap());
    assert!(!pace.error().unwrap().is_error());

    let mode = StartupMode {
        mode: ControlMode::Control,
        setpoint: 12.5,
    };
    assert_eq!(pace.set_startup_mode(mode).unwrap(), mode);

    let serials = pace.serial_numbers().unwrap();
    assert_eq!(serials.ui, 1_038_871);
    assert_eq!(serials.vfc2, 1_038_877);
}

#[test]
fn test_unknown_header_is_nack() {
    let config = SimulatorConfig::default();
    let mut values = config.values.clone();
    values.remove(":UNIT1:PRES");
    let simulator = PaceSimulator::new(SimulatorConfig { values, ..config });
    let pace = Pace::blocking(simulator);

    let err = pace.module(1).unwrap().unit().unwrap_err();
    assert!(matches!(err, PaceError::Nack { .. }));
}

// =============================================================================
// Batches
// =============================================================================

#[test]
fn test_batch_across_modules_and_lines() {
    let pace = Pace::blocking(PaceSimulator::default()).with_max_line(64);

    let scope = pace.batch().unwrap();
    let idn = scope.idn().unwrap();
    let p1 = scope.module(1).unwrap().pressure().unwrap();
    let p2 = scope.module(2).unwrap().pressure().unwrap();
    let setpoint = scope.module(1).unwrap().set_src_pressure_setpoint(900.0).unwrap();
    let control = scope.module(2).unwrap().pressure_control().unwrap();
    assert!(scope.lines().len() > 1);
    assert!(scope.lines().iter().all(|line| line.len() <= 64));
    let replies = scope.finish().unwrap();

    assert_eq!(replies.len(), 5);
    assert_eq!(replies.get(idn).unwrap(), "GE Druck,PACE5000,10388796,DK0367  v02.02.14");
    assert_eq!(replies.get(p1).unwrap(), 1013.25);
    assert_eq!(replies.get(p2).unwrap(), 1013.25);
    assert_eq!(replies.get(setpoint).unwrap(), 900.0);
    assert!(!replies.get(control).unwrap());
}

#[test]
fn test_nack_fails_only_its_own_slot() {
    let simulator = PaceSimulator::default();
    let pace = Pace::blocking(simulator);

    let scope = pace.batch().unwrap();
    let before = scope.module(1).unwrap().pressure().unwrap();
    // the simulator knows no third module
    let bogus = scope.push(attributes::PRESSURE.query(Some(3)).unwrap());
    let after = scope.module(2).unwrap().barometric_pressure().unwrap();
    let replies = scope.finish().unwrap();

    assert_eq!(replies.get(before).unwrap(), 1013.25);
    assert!(matches!(replies.get(bogus), Err(PaceError::Nack { .. })));
    assert_eq!(replies.get(after).unwrap(), 1013.25);
}

#[test]
fn test_rejected_set_fails_only_its_own_slot() {
    static ZERO: Attribute<bool> =
        Attribute::write_only("zero", "CAL{module}:ZERO", codec::encode_bool);
    let pace = Pace::blocking(PaceSimulator::default());

    let scope = pace.batch().unwrap();
    let p1 = scope.module(1).unwrap().pressure().unwrap();
    // the simulator has no zero calibration and rejects the set
    let zero = scope.push(ZERO.command(Some(1), true).unwrap());
    let p2 = scope.module(2).unwrap().pressure().unwrap();
    assert_eq!(
        scope.lines(),
        vec![":SENS1:PRES?;:CAL1:ZERO 1;:SYST:ERR?;:SENS2:PRES?"]
    );
    let replies = scope.finish().unwrap();

    assert_eq!(replies.get(p1).unwrap(), 1013.25);
    assert!(matches!(replies.get(zero), Err(PaceError::Nack { .. })));
    assert_eq!(replies.get(p2).unwrap(), 1013.25);
}

#[test]
fn test_serial_numbers_keep_neighbours_aligned() {
    let pace = Pace::blocking(PaceSimulator::default());

    let scope = pace.batch().unwrap();
    let serials = scope.serial_numbers().unwrap();
    let pressure = scope.module(1).unwrap().pressure().unwrap();
    let replies = scope.finish().unwrap();

    assert_eq!(replies.get(serials).unwrap().ctrl1, 1_038_872);
    assert_eq!(replies.get(pressure).unwrap(), 1013.25);
}

#[test]
fn test_dump_labels_every_readable_attribute() {
    let pace = Pace::blocking(PaceSimulator::default());

    let replies = pace.dump(Some(1)).unwrap();
    assert_eq!(replies.len(), attributes::MODULE_ATTRIBUTES.len());
    let labels: Vec<_> = replies.iter().map(|(label, _)| label.to_string()).collect();
    assert!(labels.contains(&"src_pressure_rate_mode".to_string()));
    assert!(replies.iter().all(|(_, result)| result.is_ok()));

    let device = pace.dump(None).unwrap();
    let (_, idn) = device.iter().next().unwrap();
    assert_eq!(
        idn.as_ref().unwrap(),
        &Value::Text("GE Druck,PACE5000,10388796,DK0367  v02.02.14".to_string())
    );
}

// =============================================================================
// Future-based device
// =============================================================================

#[tokio::test]
async fn test_future_device_against_simulator() {
    let pace = Pace::asynchronous(PaceSimulator::default());
    let module = pace.module(1).unwrap();

    let setpoint = module.set_src_pressure_setpoint(250.0);
    let overshoot = module.set_src_pressure_rate_overshoot(true);
    assert_eq!(setpoint.await.unwrap(), 250.0);
    assert!(overshoot.await.unwrap());

    let scope = pace.batch().unwrap();
    let rate = scope.module(1).unwrap().src_pressure_rate().unwrap();
    let error = scope.error().unwrap();
    let replies = scope.finish().await.unwrap();
    assert_eq!(replies.get(rate).unwrap(), 10.0);
    assert_eq!(replies.get(error).unwrap().to_string(), "");

    assert_eq!(
        pace.write_named("pressure_resolution", Some(1), &Value::Int(3)).await.unwrap(),
        Value::Int(3)
    );
}

// =============================================================================
// TCP end to end
// =============================================================================

async fn serve_simulator() -> (Address, PaceSimulator) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let simulator = PaceSimulator::default();
    tokio::spawn(simulator.clone().serve(listener));
    (Address::new("127.0.0.1", port), simulator)
}

#[tokio::test]
async fn test_tcp_end_to_end() {
    let (address, simulator) = serve_simulator().await;
    let pace = Pace::connect(&address, Duration::from_secs(1), Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(pace.idn().await.unwrap(), "GE Druck,PACE5000,10388796,DK0367  v02.02.14");

    let module = pace.module(1).unwrap();
    assert_eq!(module.set_src_pressure_rate(5.5).await.unwrap(), 5.5);
    assert_eq!(simulator.value(":SOUR1:PRES:SLEW").unwrap(), "5.5");

    // a bare set reads no reply; the next query still lines up
    pace.raw(":SENS1:PRES 42.0").await.unwrap();
    assert_eq!(module.pressure().await.unwrap(), 42.0);

    pace.close().await.unwrap();
}

#[tokio::test]
async fn test_tcp_connect_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = Pace::connect(
        &Address::new("127.0.0.1", port),
        Duration::from_millis(200),
        Duration::from_millis(200),
    )
    .await
    .unwrap_err();
    assert!(err.is_transport());
}
