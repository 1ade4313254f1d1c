//! Heading hold: turn requests become a moving target yaw that a wrapping
//! control loop chases.

use std::sync::Arc;
use std::time::Duration;

use log::{trace, warn};

use crate::clock::{system_clock, Clock};
use crate::error::ControlError;
use crate::pid::{PidConfig, PidControlLoop};
use crate::sensor::Sensor;

/// Bring a yaw back into `[-180, 180]`.
pub fn wrap_degrees(degrees: f64) -> f64 {
    if (-180.0..=180.0).contains(&degrees) {
        degrees
    } else {
        (degrees + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Keeps a chassis on a heading while the driver steers.
///
/// The driver's turn input no longer commands the turn speed directly. It
/// moves a target yaw at up to `max_degrees_per_second`, and a control loop
/// on the gyro turns the chassis toward that target. With no turn input the
/// chassis holds its heading against bumps and wheel slip.
///
/// The loop always treats the gyro as continuous over `[-180, 180]` and
/// clamps its output to `[-1, 1]`, whatever the gains configuration says.
pub struct HeadingHold<S> {
    pid: PidControlLoop<S>,
    clock: Arc<dyn Clock>,
    max_degrees_per_second: f64,
    target: f64,
    last_update: Duration,
}

impl<S: Sensor> HeadingHold<S> {
    /// Hold the gyro's current yaw, timed by the system monotonic clock.
    pub fn new(gains: PidConfig, max_degrees_per_second: f64, gyro: S) -> Result<Self, ControlError> {
        Self::with_clock(gains, max_degrees_per_second, gyro, system_clock())
    }

    /// Hold the gyro's current yaw, timed by the given clock.
    ///
    /// # Errors
    ///
    /// Fails if the turn rate is not a finite non-negative number, the gains
    /// are invalid, or the gyro cannot be read.
    pub fn with_clock(
        gains: PidConfig,
        max_degrees_per_second: f64,
        gyro: S,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ControlError> {
        if !max_degrees_per_second.is_finite() || max_degrees_per_second < 0.0 {
            return Err(ControlError::InvalidParameter(
                "max_degrees_per_second must be finite and non-negative",
            ));
        }
        gains.validate()?;

        let config = gains
            .with_continuous_input(-180.0, 180.0)
            .with_output_limits(-1.0, 1.0);
        let mut pid = PidControlLoop::with_clock(config, gyro, Arc::clone(&clock));

        let target = wrap_degrees(pid.sensor_mut().read()?);
        pid.set_setpoint(target)?;
        pid.enable();

        let last_update = clock.now();
        Ok(HeadingHold {
            pid,
            clock,
            max_degrees_per_second,
            target,
            last_update,
        })
    }

    /// Advance the target by the turn input and return the turn command.
    ///
    /// `turn` is the driver's turn request, normally in `[-1, 1]`. The target
    /// moves by `turn * max_degrees_per_second` for every second since the
    /// previous call.
    pub fn turn_speed(&mut self, turn: f64) -> f64 {
        let now = self.clock.now();
        let dt = now.saturating_sub(self.last_update).as_secs_f64();
        self.last_update = now;

        if turn.is_finite() {
            self.target = wrap_degrees(self.target + turn * self.max_degrees_per_second * dt);
        } else {
            warn!("ignoring non-finite turn request {}", turn);
        }
        // The target is finite and in range, so this cannot fail
        let _ = self.pid.set_setpoint(self.target);

        let output = self.pid.get();
        trace!("turn {:.3} target {:.2} output {:.4}", turn, self.target, output);
        output
    }

    /// Forget accumulated error and hold the gyro's current yaw.
    pub fn reset(&mut self) -> Result<(), ControlError> {
        let yaw = self.pid.sensor_mut().read()?;
        self.set_target(yaw)?;
        self.pid.reset();
        self.pid.enable();
        self.last_update = self.clock.now();
        Ok(())
    }

    /// Jump the target to `yaw`, wrapped into range.
    pub fn set_target(&mut self, yaw: f64) -> Result<(), ControlError> {
        if !yaw.is_finite() {
            return Err(ControlError::InvalidParameter("target yaw must be a finite number"));
        }
        self.target = wrap_degrees(yaw);
        self.pid.set_setpoint(self.target)
    }

    /// Yaw the chassis is being turned toward.
    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn max_degrees_per_second(&self) -> f64 {
        self.max_degrees_per_second
    }

    pub fn pid(&self) -> &PidControlLoop<S> {
        &self.pid
    }

    pub fn pid_mut(&mut self) -> &mut PidControlLoop<S> {
        &mut self.pid
    }
}
