//! Static attribute tables of the PACE 5000/6000 controllers.
//!
//! Module-scoped templates carry the `{module}` placeholder and are rendered
//! with the id of the module they are invoked on.

use crate::attribute::{Attribute, DynAttribute};
use crate::codec::{self, PressureInLimits, RateMode, SerialNumbers, StartupMode, SystemError};

// Module scope

pub static PRESSURE: Attribute<f64> = Attribute::read_only("pressure", "SENS{module}:PRES", codec::float);
pub static PRESSURE_RANGE: Attribute<String> = Attribute::read_write(
    "pressure_range",
    "SENS{module}:PRES:RANG",
    codec::quoted,
    codec::encode_quoted,
);
pub static PRESSURE_IN_LIMITS: Attribute<PressureInLimits> = Attribute::read_only(
    "pressure_in_limits",
    "SENS{module}:PRES:INL",
    codec::pressure_in_limits,
);
pub static BAROMETRIC_PRESSURE: Attribute<f64> =
    Attribute::read_only("barometric_pressure", "SENS{module}:PRES:BAR", codec::float);
pub static PRESSURE_RESOLUTION: Attribute<i64> = Attribute::read_write(
    "pressure_resolution",
    "SENS{module}:PRES:RES",
    codec::int,
    codec::encode_int,
);

/// Positive-side source pressure; also reachable as `src_pressure_pos_ve`.
pub static SRC_PRESSURE: Attribute<f64> =
    Attribute::read_only("src_pressure", "SOUR{module}:PRES:COMP1", codec::float);
pub static SRC_PRESSURE_NEG_VE: Attribute<f64> =
    Attribute::read_only("src_pressure_neg_ve", "SOUR{module}:PRES:COMP2", codec::float);
/// Control effort in %.
pub static SRC_PRESSURE_EFFORT: Attribute<f64> = Attribute::read_write(
    "src_pressure_effort",
    "SOUR{module}:PRES:EFF",
    codec::float,
    codec::encode_float,
);
pub static SRC_PRESSURE_SETPOINT: Attribute<f64> = Attribute::read_write(
    "src_pressure_setpoint",
    "SOUR{module}:PRES:LEV:IMM:AMPL",
    codec::float,
    codec::encode_float,
);
pub static SRC_PRESSURE_RATE: Attribute<f64> = Attribute::read_write(
    "src_pressure_rate",
    "SOUR{module}:PRES:SLEW",
    codec::float,
    codec::encode_float,
);
pub static SRC_PRESSURE_RATE_MODE: Attribute<RateMode> = Attribute::read_write(
    "src_pressure_rate_mode",
    "SOUR{module}:PRES:SLEW:MODE",
    codec::rate_mode,
    codec::encode_rate_mode,
);
pub static SRC_PRESSURE_RATE_OVERSHOOT: Attribute<bool> = Attribute::read_write(
    "src_pressure_rate_overshoot",
    "SOUR{module}:PRES:SLEW:OVER",
    codec::boolean,
    codec::encode_bool,
);

pub static PRESSURE_CONTROL: Attribute<bool> = Attribute::read_write(
    "pressure_control",
    "OUTP{module}:STAT",
    codec::boolean,
    codec::encode_bool,
);
pub static RELAY1: Attribute<bool> =
    Attribute::read_write("relay1", "OUTP{module}:LOG1", codec::boolean, codec::encode_bool);
pub static RELAY2: Attribute<bool> =
    Attribute::read_write("relay2", "OUTP{module}:LOG2", codec::boolean, codec::encode_bool);
pub static RELAY3: Attribute<bool> =
    Attribute::read_write("relay3", "OUTP{module}:LOG3", codec::boolean, codec::encode_bool);

pub static UNIT: Attribute<String> =
    Attribute::read_write("unit", "UNIT{module}:PRES", codec::text, codec::encode_text);

// Device scope

pub static IDN: Attribute<String> = Attribute::read_only("idn", "*IDN", codec::text).cached();
pub static HW_TEST: Attribute<bool> = Attribute::read_only("hw_test", "*TST", codec::boolean);
pub static MAC: Attribute<String> = Attribute::read_only("mac", "INST:MAC", codec::quoted).cached();
pub static TASK: Attribute<String> = Attribute::read_only("task", "INST:TASK", codec::text);
pub static ERROR: Attribute<SystemError> = Attribute::read_only("error", "SYST:ERR", codec::system_error);
pub static VERSION: Attribute<String> =
    Attribute::read_only("version", "SYST:VERS", codec::quoted).cached();
pub static WORLD_AREA: Attribute<String> =
    Attribute::read_only("world_area", "SYST:AREA", codec::text).cached();
pub static STARTUP_MODE: Attribute<StartupMode> = Attribute::read_write(
    "startup_mode",
    "SYST:SET",
    codec::startup_mode,
    codec::encode_startup_mode,
);
/// Seven sub-queries in one template; contributes seven reply fragments.
pub static SERIAL_NUMBERS: Attribute<SerialNumbers> = Attribute::read_only(
    "serial_numbers",
    ":INST:SN1?;:INST:SN2?;:INST:SN3?;:INST:SN4?;:INST:SN5?;:INST:SN6?;:INST:SN7?",
    codec::serial_numbers,
)
.cached();

/// Every module-scoped attribute, in declaration order.
pub static MODULE_ATTRIBUTES: &[&dyn DynAttribute] = &[
    &PRESSURE,
    &PRESSURE_RANGE,
    &PRESSURE_IN_LIMITS,
    &BAROMETRIC_PRESSURE,
    &PRESSURE_RESOLUTION,
    &SRC_PRESSURE,
    &SRC_PRESSURE_NEG_VE,
    &SRC_PRESSURE_EFFORT,
    &SRC_PRESSURE_SETPOINT,
    &SRC_PRESSURE_RATE,
    &SRC_PRESSURE_RATE_MODE,
    &SRC_PRESSURE_RATE_OVERSHOOT,
    &PRESSURE_CONTROL,
    &RELAY1,
    &RELAY2,
    &RELAY3,
    &UNIT,
];

/// Every device-scoped attribute, in declaration order.
pub static DEVICE_ATTRIBUTES: &[&dyn DynAttribute] = &[
    &IDN,
    &HW_TEST,
    &MAC,
    &TASK,
    &ERROR,
    &VERSION,
    &WORLD_AREA,
    &STARTUP_MODE,
    &SERIAL_NUMBERS,
];

/// Alternative names, resolved before lookup.
pub static ALIASES: &[(&str, &str)] = &[("src_pressure_pos_ve", "src_pressure")];

/// Find an attribute by name (or alias) in both tables.
pub fn find(name: &str) -> Option<&'static dyn DynAttribute> {
    let name = ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map_or(name, |(_, target)| *target);
    MODULE_ATTRIBUTES
        .iter()
        .chain(DEVICE_ATTRIBUTES.iter())
        .find(|attribute| attribute.name() == name)
        .copied()
}

/// `(name, template, rendered read request)` for every attribute of a table.
fn describe(table: &[&dyn DynAttribute], module: Option<u8>) -> Vec<(&'static str, &'static str, String)> {
    table
        .iter()
        .filter_map(|attribute| {
            let rendered = attribute.query_value(module).ok()?;
            Some((attribute.name(), attribute.template(), rendered.text().to_string()))
        })
        .collect()
}

pub fn module_commands(module: u8) -> Vec<(&'static str, &'static str, String)> {
    describe(MODULE_ATTRIBUTES, Some(module))
}

pub fn device_commands() -> Vec<(&'static str, &'static str, String)> {
    describe(DEVICE_ATTRIBUTES, None)
}
