use super::{attributes, Dispatch};
use crate::attribute::Attribute;
use crate::codec::{PressureInLimits, RateMode};
use crate::value::AttrValue;

/// One pressure module of a controller.
///
/// Renders module-scoped templates with its id and forwards everything to
/// the owning device (or batch scope).
pub struct Module<'a, D> {
    device: &'a D,
    id: u8,
}

impl<'a, D> Clone for Module<'a, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, D> Copy for Module<'a, D> {}

impl<'a, D: Dispatch> Module<'a, D> {
    pub(crate) fn new(device: &'a D, id: u8) -> Self {
        Self { device, id }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn read<T: AttrValue>(&self, attribute: &Attribute<T>) -> D::Reply<T> {
        self.device.dispatch(attribute.query(Some(self.id)))
    }

    pub fn write<T: AttrValue>(&self, attribute: &Attribute<T>, value: T) -> D::Reply<T> {
        self.device.dispatch(attribute.command(Some(self.id), value))
    }

    /// `(name, template, rendered request)` of every module attribute.
    pub fn commands(&self) -> Vec<(&'static str, &'static str, String)> {
        attributes::module_commands(self.id)
    }

    pub fn pressure(&self) -> D::Reply<f64> {
        self.read(&attributes::PRESSURE)
    }

    pub fn pressure_range(&self) -> D::Reply<String> {
        self.read(&attributes::PRESSURE_RANGE)
    }

    pub fn set_pressure_range(&self, range: impl Into<String>) -> D::Reply<String> {
        self.write(&attributes::PRESSURE_RANGE, range.into())
    }

    pub fn pressure_in_limits(&self) -> D::Reply<PressureInLimits> {
        self.read(&attributes::PRESSURE_IN_LIMITS)
    }

    pub fn barometric_pressure(&self) -> D::Reply<f64> {
        self.read(&attributes::BAROMETRIC_PRESSURE)
    }

    pub fn pressure_resolution(&self) -> D::Reply<i64> {
        self.read(&attributes::PRESSURE_RESOLUTION)
    }

    pub fn set_pressure_resolution(&self, digits: i64) -> D::Reply<i64> {
        self.write(&attributes::PRESSURE_RESOLUTION, digits)
    }

    pub fn src_pressure(&self) -> D::Reply<f64> {
        self.read(&attributes::SRC_PRESSURE)
    }

    pub fn src_pressure_pos_ve(&self) -> D::Reply<f64> {
        self.src_pressure()
    }

    pub fn src_pressure_neg_ve(&self) -> D::Reply<f64> {
        self.read(&attributes::SRC_PRESSURE_NEG_VE)
    }

    pub fn src_pressure_effort(&self) -> D::Reply<f64> {
        self.read(&attributes::SRC_PRESSURE_EFFORT)
    }

    pub fn set_src_pressure_effort(&self, percent: f64) -> D::Reply<f64> {
        self.write(&attributes::SRC_PRESSURE_EFFORT, percent)
    }

    pub fn src_pressure_setpoint(&self) -> D::Reply<f64> {
        self.read(&attributes::SRC_PRESSURE_SETPOINT)
    }

    pub fn set_src_pressure_setpoint(&self, setpoint: f64) -> D::Reply<f64> {
        self.write(&attributes::SRC_PRESSURE_SETPOINT, setpoint)
    }

    pub fn src_pressure_rate(&self) -> D::Reply<f64> {
        self.read(&attributes::SRC_PRESSURE_RATE)
    }

    pub fn set_src_pressure_rate(&self, rate: f64) -> D::Reply<f64> {
        self.write(&attributes::SRC_PRESSURE_RATE, rate)
    }

    pub fn src_pressure_rate_mode(&self) -> D::Reply<RateMode> {
        self.read(&attributes::SRC_PRESSURE_RATE_MODE)
    }

    pub fn set_src_pressure_rate_mode(&self, mode: RateMode) -> D::Reply<RateMode> {
        self.write(&attributes::SRC_PRESSURE_RATE_MODE, mode)
    }

    pub fn src_pressure_rate_overshoot(&self) -> D::Reply<bool> {
        self.read(&attributes::SRC_PRESSURE_RATE_OVERSHOOT)
    }

    pub fn set_src_pressure_rate_overshoot(&self, enabled: bool) -> D::Reply<bool> {
        self.write(&attributes::SRC_PRESSURE_RATE_OVERSHOOT, enabled)
    }

    pub fn pressure_control(&self) -> D::Reply<bool> {
        self.read(&attributes::PRESSURE_CONTROL)
    }

    pub fn set_pressure_control(&self, enabled: bool) -> D::Reply<bool> {
        self.write(&attributes::PRESSURE_CONTROL, enabled)
    }

    pub fn relay1(&self) -> D::Reply<bool> {
        self.read(&attributes::RELAY1)
    }

    pub fn set_relay1(&self, on: bool) -> D::Reply<bool> {
        self.write(&attributes::RELAY1, on)
    }

    pub fn relay2(&self) -> D::Reply<bool> {
        self.read(&attributes::RELAY2)
    }

    pub fn set_relay2(&self, on: bool) -> D::Reply<bool> {
        self.write(&attributes::RELAY2, on)
    }

    pub fn relay3(&self) -> D::Reply<bool> {
        self.read(&attributes::RELAY3)
    }

    pub fn set_relay3(&self, on: bool) -> D::Reply<bool> {
        self.write(&attributes::RELAY3, on)
    }

    pub fn unit(&self) -> D::Reply<String> {
        self.read(&attributes::UNIT)
    }

    pub fn set_unit(&self, unit: impl Into<String>) -> D::Reply<String> {
        self.write(&attributes::UNIT, unit.into())
    }

    /// Enable pressure control.
    pub fn start(&self) -> D::Reply<bool> {
        self.set_pressure_control(true)
    }

    /// Disable pressure control.
    pub fn stop(&self) -> D::Reply<bool> {
        self.set_pressure_control(false)
    }
}

#[cfg(test)]
mod tests {
    use crate::device::{Controller, Pace};
    use crate::transport::MockTransport;

    #[test]
    fn test_pressure_scenario() {
        let mock = MockTransport::new().with_replies([":SENS1:PRES 34.567"]);
        let pace = Pace::blocking(mock.clone());
        assert_eq!(pace.module(1).unwrap().pressure().unwrap(), 34.567);
        assert_eq!(mock.get_call_log(), vec![":SENS1:PRES?"]);
    }

    #[test]
    fn test_start_sets_and_confirms_control() {
        let mock = MockTransport::new().with_replies(["1"]);
        let pace = Pace::blocking(mock.clone());
        assert!(pace.module(1).unwrap().start().unwrap());
        assert_eq!(mock.get_call_log(), vec![":OUTP1:STAT 1;:OUTP1:STAT?"]);
    }

    #[test]
    fn test_pressure_range_is_quoted_on_the_wire() {
        let mock = MockTransport::new().with_replies([r#":SENS2:PRES:RANG "20.00bar""#]);
        let pace = Pace::blocking(mock.clone());
        let range = pace.module(2).unwrap().set_pressure_range("20.00bar").unwrap();
        assert_eq!(range, "20.00bar");
        assert_eq!(
            mock.get_call_log(),
            vec![r#":SENS2:PRES:RANG "20.00bar";:SENS2:PRES:RANG?"#]
        );
    }
}
