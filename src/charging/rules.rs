//! Safety predicates for driving the charger. All pure.

use crate::charging::state::{ChargerMode, ChargingState};
use crate::error::ValidationError;

pub const MIN_VOLTAGE: f64 = 0.0;
pub const MAX_VOLTAGE: f64 = 1000.0;
pub const MIN_CURRENT: f64 = 0.0;
pub const MAX_CURRENT: f64 = 262.0;

/// °C above which an overtemperature warning is raised and charging may not start.
pub const WARNING_TEMPERATURE: f64 = 85.0;
/// °C above which charging must stop.
pub const CRITICAL_TEMPERATURE: f64 = 95.0;

pub fn is_valid_voltage(voltage: f64) -> bool {
    (MIN_VOLTAGE..=MAX_VOLTAGE).contains(&voltage)
}

pub fn is_valid_current(current: f64) -> bool {
    (MIN_CURRENT..=MAX_CURRENT).contains(&current)
}

/// Check a setpoint independent of charger state.
///
/// Requesting any voltage or current requires the power stage to be enabled.
pub fn validate_command(
    voltage: f64,
    current: f64,
    power_stage1: bool,
) -> Result<(), ValidationError> {
    if !is_valid_voltage(voltage) {
        return Err(ValidationError::VoltageOutOfRange {
            value: voltage,
            min: MIN_VOLTAGE,
            max: MAX_VOLTAGE,
        });
    }
    if !is_valid_current(current) {
        return Err(ValidationError::CurrentOutOfRange {
            value: current,
            min: MIN_CURRENT,
            max: MAX_CURRENT,
        });
    }
    if (voltage > 0.0 || current > 0.0) && !power_stage1 {
        return Err(ValidationError::PowerStageRequired);
    }
    Ok(())
}

/// Either sensor above the warning threshold.
pub fn is_overtemperature(state: &ChargingState) -> bool {
    state.temperature_primary > WARNING_TEMPERATURE
        || state.temperature_secondary > WARNING_TEMPERATURE
}

/// Either sensor above the critical threshold.
pub fn is_critical_temperature(state: &ChargingState) -> bool {
    state.temperature_primary > CRITICAL_TEMPERATURE
        || state.temperature_secondary > CRITICAL_TEMPERATURE
}

pub fn can_start_charging(state: &ChargingState) -> bool {
    !(state.has_fault || state.mode == ChargerMode::Fault || is_overtemperature(state))
}

pub fn must_stop_charging(state: &ChargingState) -> bool {
    state.has_fault || is_critical_temperature(state)
}
