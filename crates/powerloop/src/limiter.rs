//! Output ramping with brownout protection.
//!
//! [`AccelerationLimiter`] bounds how fast a motor command may change and
//! backs motors off when the battery bus sags. Increases are slow, decreases
//! toward zero are fast (gearboxes prefer it), and any increase is vetoed when
//! a simple battery model predicts it would pull the bus under the hard-stop
//! voltage.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use serde::Deserialize;

use crate::clock::{system_clock, Clock};
use crate::error::ControlError;
use crate::modifier::SpeedModifier;
use crate::telemetry::PowerDistribution;

/// Empirical scale applied to the nominal stall amperage of every motor class.
pub const STALL_AMPERAGE_RESCALE: f64 = 5.0;

/// Motor families with known current draw per unit of output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorClass {
    Cim,
    Pro775,
    Bag,
}

impl MotorClass {
    /// Amps drawn per unit of output, rescaled.
    pub fn amps_per_percent(self) -> f64 {
        let nominal = match self {
            MotorClass::Cim => 12.83,
            MotorClass::Pro775 => 13.33,
            MotorClass::Bag => 5.12,
        };
        nominal * STALL_AMPERAGE_RESCALE
    }
}

/// Configuration for an [`AccelerationLimiter`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Largest output change per second when speeding up.
    pub max_increase_per_second: f64,
    /// Largest output change per second when slowing down.
    pub max_decrease_per_second: f64,
    /// Bus voltage under which outputs are backed off.
    pub hard_stop_voltage: f64,
    /// Output removed per cycle while under the hard-stop voltage.
    pub anti_brownout_backoff: f64,
    /// Current drawn per unit of output by the driven motor.
    pub amps_per_percent: f64,
    /// Hold the output instead of ramping when current telemetry is missing.
    pub hold_without_telemetry: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        LimiterConfig {
            max_increase_per_second: 2.4,
            max_decrease_per_second: 4.8,
            hard_stop_voltage: 9.0,
            anti_brownout_backoff: 0.05,
            amps_per_percent: MotorClass::Pro775.amps_per_percent(),
            hold_without_telemetry: true,
        }
    }
}

impl LimiterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics if the rate is not finite and positive
    pub fn with_max_increase_per_second(mut self, rate: f64) -> Self {
        if !rate.is_finite() || rate <= 0.0 {
            panic!("Increase rate must be finite and positive, got: {}", rate);
        }
        self.max_increase_per_second = rate;
        self
    }

    /// # Panics
    ///
    /// Panics if the rate is not finite and positive
    pub fn with_max_decrease_per_second(mut self, rate: f64) -> Self {
        if !rate.is_finite() || rate <= 0.0 {
            panic!("Decrease rate must be finite and positive, got: {}", rate);
        }
        self.max_decrease_per_second = rate;
        self
    }

    /// # Panics
    ///
    /// Panics if the voltage is NaN or infinity
    pub fn with_hard_stop_voltage(mut self, voltage: f64) -> Self {
        if !voltage.is_finite() {
            panic!("Hard stop voltage must be a finite number, got: {}", voltage);
        }
        self.hard_stop_voltage = voltage;
        self
    }

    /// # Panics
    ///
    /// Panics if the backoff is not finite and positive
    pub fn with_anti_brownout_backoff(mut self, backoff: f64) -> Self {
        if !backoff.is_finite() || backoff <= 0.0 {
            panic!("Backoff must be finite and positive, got: {}", backoff);
        }
        self.anti_brownout_backoff = backoff;
        self
    }

    pub fn with_motor_class(mut self, class: MotorClass) -> Self {
        self.amps_per_percent = class.amps_per_percent();
        self
    }

    /// # Panics
    ///
    /// Panics if the value is not finite or negative
    pub fn with_amps_per_percent(mut self, amps: f64) -> Self {
        if !amps.is_finite() || amps < 0.0 {
            panic!("Amps per percent must be finite and non-negative, got: {}", amps);
        }
        self.amps_per_percent = amps;
        self
    }

    pub fn with_hold_without_telemetry(mut self, hold: bool) -> Self {
        self.hold_without_telemetry = hold;
        self
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        if !self.max_increase_per_second.is_finite() || self.max_increase_per_second <= 0.0 {
            return Err(ControlError::InvalidParameter(
                "max_increase_per_second must be finite and positive",
            ));
        }
        if !self.max_decrease_per_second.is_finite() || self.max_decrease_per_second <= 0.0 {
            return Err(ControlError::InvalidParameter(
                "max_decrease_per_second must be finite and positive",
            ));
        }
        if !self.hard_stop_voltage.is_finite() {
            return Err(ControlError::InvalidParameter(
                "hard_stop_voltage must be a finite number",
            ));
        }
        if !self.anti_brownout_backoff.is_finite() || self.anti_brownout_backoff <= 0.0 {
            return Err(ControlError::InvalidParameter(
                "anti_brownout_backoff must be finite and positive",
            ));
        }
        if !self.amps_per_percent.is_finite() || self.amps_per_percent < 0.0 {
            return Err(ControlError::InvalidParameter(
                "amps_per_percent must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

// Sign with sign(0) == 0, so zero never matches a moving output.
fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

// Move toward target by at most `step`, landing on it when within reach.
fn ramp(current: f64, target: f64, step: f64) -> f64 {
    if (target - current).abs() <= step {
        target
    } else if target > current {
        current + step
    } else {
        current - step
    }
}

/// Rate limiter with brownout protection for one actuator.
///
/// The limiter reads bus voltage, total current and battery resistance from a
/// shared [`PowerDistribution`]. Several limiters on the same power bus
/// should share one (cloned) handle.
pub struct AccelerationLimiter {
    config: LimiterConfig,
    power: PowerDistribution,
    clock: Arc<dyn Clock>,
    output: f64,
    last_update: Duration,
}

impl AccelerationLimiter {
    pub fn new(config: LimiterConfig, power: PowerDistribution) -> Self {
        Self::with_clock(config, power, system_clock())
    }

    pub fn with_clock(config: LimiterConfig, power: PowerDistribution, clock: Arc<dyn Clock>) -> Self {
        let last_update = clock.now();
        AccelerationLimiter {
            config,
            power,
            clock,
            output: 0.0,
            last_update,
        }
    }

    /// Turn a desired output into the output that is safe to command now.
    ///
    /// Requests outside `[-1, 1]`, such as a rate-mode sum, are clamped first.
    pub fn modify(&mut self, desired: f64) -> f64 {
        let desired = desired.clamp(-1.0, 1.0);
        let current = self.output;
        let now = self.clock.now();
        let dt = now.saturating_sub(self.last_update).as_secs_f64();
        self.last_update = now;

        let output = if desired.abs() < current.abs() && sign(desired) == sign(current) {
            ramp(current, desired, self.config.max_decrease_per_second * dt)
        } else {
            match self.brownout_guard(current, dt) {
                Some(guarded) => guarded,
                None => ramp(current, desired, self.config.max_increase_per_second * dt),
            }
        };

        if output != desired {
            trace!("limited {:.4} to {:.4} (dt {:.4}s)", desired, output, dt);
        }
        self.output = output;
        output
    }

    // The protected output, or None if the bus can take a normal ramp step.
    fn brownout_guard(&self, current: f64, dt: f64) -> Option<f64> {
        let backoff = self.config.anti_brownout_backoff;
        let voltage = self.power.voltage_or_fallback();

        if voltage < self.config.hard_stop_voltage {
            let mut backed_off = current - backoff * sign(current);
            if backed_off.abs() <= backoff {
                backed_off = 0.0;
            }
            debug!(
                "bus at {:.2} V under hard stop {:.2} V, backing off to {:.4}",
                voltage, self.config.hard_stop_voltage, backed_off
            );
            return Some(backed_off);
        }

        match self.power.total_current() {
            Ok(amps) => {
                let resistance = self.power.battery_resistance_or_default();
                // Open-circuit voltage, then the sag after one more ramp step
                let base_voltage = amps * resistance + voltage;
                let next_amps =
                    amps + self.config.max_increase_per_second * dt * self.config.amps_per_percent;
                let predicted = base_voltage - next_amps * resistance;
                trace!(
                    "{:.2} A now, {:.2} A next, predicted bus {:.2} V",
                    amps,
                    next_amps,
                    predicted
                );
                if predicted < self.config.hard_stop_voltage {
                    debug!("holding {:.4}, predicted bus {:.2} V", current, predicted);
                    Some(current)
                } else {
                    None
                }
            }
            Err(e) if self.config.hold_without_telemetry => {
                warn!("holding output {:.4} without current telemetry: {}", current, e);
                Some(current)
            }
            Err(e) => {
                warn!("ramping without current telemetry: {}", e);
                None
            }
        }
    }

    /// Output returned by the last call to [`modify`](Self::modify).
    pub fn output(&self) -> f64 {
        self.output
    }

    /// Zero the output and restart timing.
    pub fn reset(&mut self) {
        self.output = 0.0;
        self.last_update = self.clock.now();
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn power(&self) -> &PowerDistribution {
        &self.power
    }
}

impl SpeedModifier for AccelerationLimiter {
    fn modify(&mut self, speed: f64) -> f64 {
        AccelerationLimiter::modify(self, speed)
    }
}
