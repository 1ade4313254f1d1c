//! Sensor-backed motor: a control loop, a speed modifier and an actuator
//! wired together.

use log::debug;

use crate::error::ControlError;
use crate::modifier::SpeedModifier;
use crate::pid::PidControlLoop;
use crate::sensor::Sensor;

/// Something that accepts a motor command, typically in `[-1, 1]`.
pub trait Actuator {
    fn write(&mut self, output: f64);
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn write(&mut self, output: f64) {
        (**self).write(output)
    }
}

impl<A: Actuator + ?Sized> Actuator for &mut A {
    fn write(&mut self, output: f64) {
        (**self).write(output)
    }
}

/// Ganged motors all receive the same command.
impl<A: Actuator> Actuator for Vec<A> {
    fn write(&mut self, output: f64) {
        for actuator in self.iter_mut() {
            actuator.write(output);
        }
    }
}

/// A motor driven through a control loop.
///
/// With the loop disabled, [`set`](SensorMotor::set) passes the requested
/// speed straight through. With it enabled, the loop output replaces the
/// speed (position mode) or is added to it as a correction (rate mode).
/// Either way the command goes through the speed modifier and the inversion
/// before it reaches the actuator.
pub struct SensorMotor<S, M, A> {
    pid: PidControlLoop<S>,
    modifier: M,
    actuator: A,
    rate_mode: bool,
    inverted: bool,
    position: f64,
    last_output: f64,
}

impl<S, M, A> SensorMotor<S, M, A>
where
    S: Sensor,
    M: SpeedModifier,
    A: Actuator,
{
    pub fn new(pid: PidControlLoop<S>, modifier: M, actuator: A) -> Self {
        SensorMotor {
            pid,
            modifier,
            actuator,
            rate_mode: false,
            inverted: false,
            position: 0.0,
            last_output: 0.0,
        }
    }

    /// Add the loop output to the requested speed instead of replacing it.
    pub fn with_rate_mode(mut self, rate_mode: bool) -> Self {
        self.rate_mode = rate_mode;
        self
    }

    /// Negate every command before it is written.
    pub fn with_inverted(mut self, inverted: bool) -> Self {
        self.inverted = inverted;
        self
    }

    /// Command the motor. Returns the value written to the actuator.
    pub fn set(&mut self, speed: f64) -> f64 {
        let requested = if !self.pid.is_enabled() {
            speed
        } else if self.rate_mode {
            self.pid.get() + speed
        } else {
            self.pid.get()
        };
        self.write(requested)
    }

    /// Drive to a position with the control loop.
    pub fn set_position(&mut self, position: f64) -> Result<f64, ControlError> {
        self.pid.set_setpoint(position)?;
        self.pid.enable();
        let output = self.pid.get();
        Ok(self.write(output))
    }

    fn write(&mut self, speed: f64) -> f64 {
        let mut output = self.modifier.modify(speed);
        if self.inverted {
            output = -output;
        }
        self.actuator.write(output);
        self.last_output = output;
        output
    }

    /// Clear the loop's accumulated error and record the current position.
    pub fn reset(&mut self) -> Result<(), ControlError> {
        self.pid.reset();
        self.position = self.pid.sensor_mut().read()?;
        debug!("motor reset at position {:.4}", self.position);
        Ok(())
    }

    pub fn enable_pid(&mut self) {
        self.pid.enable();
    }

    pub fn disable_pid(&mut self) {
        self.pid.disable();
    }

    pub fn is_pid_enabled(&self) -> bool {
        self.pid.is_enabled()
    }

    pub fn set_pid(&mut self, kp: f64, ki: f64, kd: f64) -> Result<(), ControlError> {
        self.pid.set_pid(kp, ki, kd)
    }

    pub fn set_pidf(&mut self, kp: f64, ki: f64, kd: f64, kf: f64) -> Result<(), ControlError> {
        self.pid.set_pidf(kp, ki, kd, kf)?;
        debug!("gains set to P {} I {} D {} F {}", kp, ki, kd, kf);
        Ok(())
    }

    /// Position recorded by the last [`reset`](Self::reset).
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Value most recently written to the actuator.
    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    pub fn is_rate_mode(&self) -> bool {
        self.rate_mode
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub fn pid(&self) -> &PidControlLoop<S> {
        &self.pid
    }

    pub fn pid_mut(&mut self) -> &mut PidControlLoop<S> {
        &mut self.pid
    }

    pub fn modifier(&self) -> &M {
        &self.modifier
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }
}
