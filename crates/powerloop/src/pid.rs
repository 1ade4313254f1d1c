//! PID/feed-forward control loop over a single scalar sensor.

use std::sync::Arc;
use std::time::Duration;

use log::{trace, warn};
use serde::Deserialize;

use crate::clock::{system_clock, Clock};
use crate::error::ControlError;
use crate::sensor::{ReadingKind, Sensor};

#[cfg(feature = "debugging")]
use crate::debug::{DebugConfig, LoopDebugger, LoopSample};

/// A closed interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Range { min, max }
    }

    /// Width of the interval.
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Re-express `error` along the shorter path around a wrapping input.
    ///
    /// When the error is more than half the range it is faster to go the
    /// other way around the boundary. Which way is chosen depends only on the
    /// sign of the raw error. Errors of more than a full turn, as from an
    /// accumulating encoder, are wrapped as many times as needed.
    pub fn shortest_error(&self, error: f64) -> f64 {
        let span = self.span();
        let half = span / 2.0;
        if error.abs() > half {
            if error > 0.0 {
                error - span * ((error + half) / span).floor()
            } else {
                error + span * ((half - error) / span).floor()
            }
        } else {
            error
        }
    }

    /// Clamp `value` into the interval.
    pub fn clamp(&self, value: f64) -> f64 {
        value.min(self.max).max(self.min)
    }

    fn validate(&self, what: &'static str) -> Result<(), ControlError> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min >= self.max {
            return Err(ControlError::InvalidParameter(what));
        }
        Ok(())
    }
}

/// Configuration for a [`PidControlLoop`].
///
/// Uses a builder pattern to configure the loop parameters. Every field has a
/// default, so a configuration file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    kp: f64,                    // Proportional gain
    ki: f64,                    // Integral gain (per millisecond of error)
    kd: f64,                    // Derivative gain
    kf: f64,                    // Feed-forward gain, applied to the setpoint
    setpoint: f64,              // Target value
    continuous: Option<Range>,  // Wrapping input domain, if any
    output_range: Option<Range>, // Output clamp, if any
}

impl Default for PidConfig {
    fn default() -> Self {
        PidConfig {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            kf: 0.0,
            setpoint: 0.0,
            continuous: None,
            output_range: None,
        }
    }
}

impl PidConfig {
    /// Create a new configuration with all gains at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the proportional gain (P).
    ///
    /// # Panics
    ///
    /// Panics if the value is NaN or infinity
    pub fn with_kp(mut self, kp: f64) -> Self {
        if !kp.is_finite() {
            panic!("P must be a finite number, got: {}", kp);
        }
        self.kp = kp;
        self
    }

    /// Set the integral gain (I).
    ///
    /// The integral accumulates `error * elapsed_milliseconds`, so the gain
    /// does not depend on how often the loop is polled.
    ///
    /// # Panics
    ///
    /// Panics if the value is NaN or infinity
    pub fn with_ki(mut self, ki: f64) -> Self {
        if !ki.is_finite() {
            panic!("I must be a finite number, got: {}", ki);
        }
        self.ki = ki;
        self
    }

    /// Set the derivative gain (D).
    ///
    /// # Panics
    ///
    /// Panics if the value is NaN or infinity
    pub fn with_kd(mut self, kd: f64) -> Self {
        if !kd.is_finite() {
            panic!("D must be a finite number, got: {}", kd);
        }
        self.kd = kd;
        self
    }

    /// Set the feed-forward gain (F).
    ///
    /// `F * setpoint` is added to every output, and is the whole output while
    /// the loop is disabled.
    ///
    /// # Panics
    ///
    /// Panics if the value is NaN or infinity
    pub fn with_kf(mut self, kf: f64) -> Self {
        if !kf.is_finite() {
            panic!("F must be a finite number, got: {}", kf);
        }
        self.kf = kf;
        self
    }

    /// Set the initial setpoint.
    ///
    /// # Panics
    ///
    /// Panics if the setpoint is NaN or infinity
    pub fn with_setpoint(mut self, setpoint: f64) -> Self {
        if !setpoint.is_finite() {
            panic!("Setpoint must be a finite number, got: {}", setpoint);
        }
        self.setpoint = setpoint;
        self
    }

    /// Treat the input as continuous over `[min, max]` (e.g. a heading).
    ///
    /// # Panics
    ///
    /// Panics if the bounds are not finite or `min >= max`
    pub fn with_continuous_input(mut self, min: f64, max: f64) -> Self {
        let range = Range::new(min, max);
        if range.validate("continuous range").is_err() {
            panic!("Invalid continuous range: [{}, {}]", min, max);
        }
        self.continuous = Some(range);
        self
    }

    /// Clamp the output into `[min, max]`.
    ///
    /// # Panics
    ///
    /// Panics if the bounds are not finite or `min >= max`
    pub fn with_output_limits(mut self, min: f64, max: f64) -> Self {
        let range = Range::new(min, max);
        if range.validate("output range").is_err() {
            panic!("Invalid output range: [{}, {}]", min, max);
        }
        self.output_range = Some(range);
        self
    }

    /// Check a configuration that did not go through the builder (e.g. one
    /// deserialized from a file).
    pub fn validate(&self) -> Result<(), ControlError> {
        for (value, what) in [
            (self.kp, "P must be a finite number"),
            (self.ki, "I must be a finite number"),
            (self.kd, "D must be a finite number"),
            (self.kf, "F must be a finite number"),
            (self.setpoint, "setpoint must be a finite number"),
        ] {
            if !value.is_finite() {
                return Err(ControlError::InvalidParameter(what));
            }
        }
        if let Some(range) = &self.continuous {
            range.validate("continuous range must be finite with min < max")?;
        }
        if let Some(range) = &self.output_range {
            range.validate("output range must be finite with min < max")?;
        }
        Ok(())
    }
}

/// A PID/feed-forward controller reading its input from a [`Sensor`].
///
/// The output is computed as:
/// `u = P*e + I*∫e dt + D*de/dt + F*setpoint`
///
/// Where:
/// - `e` is the error (setpoint - input), optionally wrapped for continuous inputs
/// - the integral and derivative use milliseconds as the time unit
/// - the derivative comes straight from the sensor when it can measure its own rate
///
/// The loop starts disabled. While disabled it only produces the
/// feed-forward term and does not touch the sensor.
///
/// A loop is an owned value mutated through `&mut self`; share it between
/// tasks by giving one task ownership, not by locking it.
pub struct PidControlLoop<S> {
    config: PidConfig,
    sensor: S,
    clock: Arc<dyn Clock>,
    enabled: bool,
    total_error: f64, // Time-weighted accumulated error
    last_error: f64,  // Error from the previous computation
    last_update: Duration,

    #[cfg(feature = "debugging")]
    debugger: Option<LoopDebugger>,
}

impl<S: Sensor> PidControlLoop<S> {
    /// Create a loop timed by the system monotonic clock.
    pub fn new(config: PidConfig, sensor: S) -> Self {
        Self::with_clock(config, sensor, system_clock())
    }

    /// Create a loop timed by the given clock.
    pub fn with_clock(config: PidConfig, sensor: S, clock: Arc<dyn Clock>) -> Self {
        let last_update = clock.now();
        PidControlLoop {
            config,
            sensor,
            clock,
            enabled: false,
            total_error: 0.0,
            last_error: 0.0,
            last_update,
            #[cfg(feature = "debugging")]
            debugger: None,
        }
    }

    /// Compute the control output from a fresh sensor reading.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::SensorUnavailable`] if the sensor cannot be
    /// read. Loop state is left untouched in that case.
    pub fn compute_output(&mut self) -> Result<f64, ControlError> {
        // If the loop is not enabled, use feed-forward only
        if !self.enabled {
            return Ok(self.config.kf * self.config.setpoint);
        }

        let input = self.sensor.read()?;
        let mut error = self.config.setpoint - input;
        if let Some(range) = &self.config.continuous {
            error = range.shortest_error(error);
        }

        let now = self.clock.now();
        let elapsed_ms = now.saturating_sub(self.last_update).as_secs_f64() * 1000.0;

        let derivative = self.derivative(error, elapsed_ms)?;
        self.last_update = now;

        self.total_error += error * elapsed_ms;

        let p_term = self.config.kp * error;
        let i_term = self.config.ki * self.total_error;
        let d_term = self.config.kd * derivative;
        let f_term = self.config.kf * self.config.setpoint;

        let mut output = p_term + i_term + d_term + f_term;
        if let Some(range) = &self.config.output_range {
            output = range.clamp(output);
        }

        self.last_error = error;
        trace!(
            "input {:.4} setpoint {:.4} error {:.4} output {:.4}",
            input,
            self.config.setpoint,
            error,
            output
        );

        #[cfg(feature = "debugging")]
        if let Some(ref mut debugger) = self.debugger {
            debugger.record(LoopSample {
                setpoint: self.config.setpoint,
                input,
                error,
                p_term,
                i_term,
                d_term,
                f_term,
                output,
            });
        }

        Ok(output)
    }

    /// Compute the control output, substituting 0.0 on failure.
    ///
    /// For callers that cannot propagate errors, such as a fixed-rate
    /// actuator write. Zero means "no correction".
    pub fn get(&mut self) -> f64 {
        match self.compute_output() {
            Ok(output) => output,
            Err(e) => {
                warn!("control loop output replaced with 0: {}", e);
                0.0
            }
        }
    }

    // Native rate when the sensor has it, otherwise a finite difference.
    fn derivative(&mut self, error: f64, elapsed_ms: f64) -> Result<f64, ControlError> {
        if self.sensor.supports_native_rate()
            && self.sensor.reading_kind() == ReadingKind::Displacement
        {
            self.sensor.set_reading_kind(ReadingKind::Rate);
            let rate = self.sensor.read();
            self.sensor.set_reading_kind(ReadingKind::Displacement);
            return Ok(rate?);
        }

        if elapsed_ms > 0.0 {
            Ok((error - self.last_error) / elapsed_ms)
        } else {
            Ok(0.0)
        }
    }

    /// Enable the full PID computation.
    ///
    /// Timing restarts on the transition so the first enabled cycle does not
    /// integrate over the time spent disabled.
    pub fn enable(&mut self) {
        if !self.enabled {
            self.last_update = self.clock.now();
        }
        self.enabled = true;
    }

    /// Fall back to feed-forward only.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Zero the accumulated and previous error. Gains and setpoint are kept.
    pub fn reset(&mut self) {
        self.total_error = 0.0;
        self.last_error = 0.0;
    }

    /// Set the P, I and D gains, keeping F.
    pub fn set_pid(&mut self, kp: f64, ki: f64, kd: f64) -> Result<(), ControlError> {
        self.set_pidf(kp, ki, kd, self.config.kf)
    }

    /// Set all four gains.
    ///
    /// # Returns
    ///
    /// Result indicating success or validation error. Nothing changes on error.
    ///
    /// # Notes
    ///
    /// While typically positive, negative values are allowed for specialized applications.
    pub fn set_pidf(&mut self, kp: f64, ki: f64, kd: f64, kf: f64) -> Result<(), ControlError> {
        if ![kp, ki, kd, kf].iter().all(|gain| gain.is_finite()) {
            return Err(ControlError::InvalidParameter("gains must be finite numbers"));
        }
        self.config.kp = kp;
        self.config.ki = ki;
        self.config.kd = kd;
        self.config.kf = kf;
        Ok(())
    }

    /// Set the setpoint (target value).
    pub fn set_setpoint(&mut self, setpoint: f64) -> Result<(), ControlError> {
        if !setpoint.is_finite() {
            return Err(ControlError::InvalidParameter(
                "setpoint must be a finite number",
            ));
        }
        self.config.setpoint = setpoint;
        Ok(())
    }

    /// Treat the input as wrapping over `[min, max]`.
    pub fn set_continuous(&mut self, min: f64, max: f64) -> Result<(), ControlError> {
        let range = Range::new(min, max);
        range.validate("continuous range must be finite with min < max")?;
        self.config.continuous = Some(range);
        Ok(())
    }

    /// Stop treating the input as wrapping.
    pub fn clear_continuous(&mut self) {
        self.config.continuous = None;
    }

    /// Clamp outputs into `[min, max]`.
    pub fn set_output_range(&mut self, min: f64, max: f64) -> Result<(), ControlError> {
        let range = Range::new(min, max);
        range.validate("output range must be finite with min < max")?;
        self.config.output_range = Some(range);
        Ok(())
    }

    /// Remove the output clamp.
    pub fn clear_output_range(&mut self) {
        self.config.output_range = None;
    }

    pub fn setpoint(&self) -> f64 {
        self.config.setpoint
    }

    pub fn p(&self) -> f64 {
        self.config.kp
    }

    pub fn i(&self) -> f64 {
        self.config.ki
    }

    pub fn d(&self) -> f64 {
        self.config.kd
    }

    pub fn f(&self) -> f64 {
        self.config.kf
    }

    /// Error used by the most recent computation.
    pub fn last_error(&self) -> f64 {
        self.last_error
    }

    /// Accumulated time-weighted error (error × milliseconds).
    pub fn total_error(&self) -> f64 {
        self.total_error
    }

    pub fn config(&self) -> &PidConfig {
        &self.config
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    /// Stream per-cycle term breakdowns to the debugging backend.
    #[cfg(feature = "debugging")]
    pub fn with_debugging(mut self, debug_config: DebugConfig) -> Self {
        self.debugger = Some(LoopDebugger::new(debug_config));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::SensorError;

    /// Sensor whose value, rate and health are set directly by the test.
    struct TestSensor {
        value: f64,
        rate: f64,
        kind: ReadingKind,
        native_rate: bool,
        failing: bool,
        reads: usize,
    }

    impl TestSensor {
        fn new(value: f64) -> Self {
            TestSensor {
                value,
                rate: 0.0,
                kind: ReadingKind::Displacement,
                native_rate: false,
                failing: false,
                reads: 0,
            }
        }

        fn with_native_rate(mut self, rate: f64) -> Self {
            self.native_rate = true;
            self.rate = rate;
            self
        }
    }

    impl Sensor for TestSensor {
        fn read(&mut self) -> Result<f64, SensorError> {
            self.reads += 1;
            if self.failing {
                return Err(SensorError::new("sensor disconnected"));
            }
            Ok(match self.kind {
                ReadingKind::Displacement => self.value,
                ReadingKind::Rate => self.rate,
            })
        }

        fn reading_kind(&self) -> ReadingKind {
            self.kind
        }

        fn set_reading_kind(&mut self, kind: ReadingKind) {
            self.kind = kind;
        }

        fn supports_native_rate(&self) -> bool {
            self.native_rate
        }
    }

    fn enabled_loop(config: PidConfig, sensor: TestSensor) -> (PidControlLoop<TestSensor>, ManualClock) {
        let clock = ManualClock::new();
        let mut pid = PidControlLoop::with_clock(config, sensor, Arc::new(clock.clone()));
        pid.enable();
        (pid, clock)
    }

    #[test]
    fn test_heading_wraps_to_shorter_path() {
        let config = PidConfig::new()
            .with_kp(1.0)
            .with_continuous_input(-180.0, 180.0)
            .with_setpoint(170.0);

        // Raw error 170 - (-170) = 340, the short way round is 20 degrees
        let (mut pid, clock) = enabled_loop(config, TestSensor::new(-170.0));
        clock.advance(Duration::from_millis(20));
        let output = pid.compute_output().unwrap();
        assert_eq!(pid.last_error(), -20.0);
        // With kp = 1 the output is the 20 degree error, signed toward the short way
        assert_eq!(output, -20.0);

        // Mirrored: raw error -340 wraps to +20
        pid.set_setpoint(-170.0).unwrap();
        pid.sensor_mut().value = 170.0;
        clock.advance(Duration::from_millis(20));
        let output = pid.compute_output().unwrap();
        assert_eq!(pid.last_error(), 20.0);
        assert_eq!(output, 20.0);
    }

    #[test]
    fn test_wrapped_error_is_shortest_path() {
        let range = Range::new(-180.0, 180.0);

        // Sweep well past a full turn in both directions
        let mut raw = -1000.0;
        while raw <= 1000.0 {
            let wrapped = range.shortest_error(raw);
            if raw.abs() > 180.0 {
                assert!(
                    wrapped.abs() <= 180.0,
                    "raw {} wrapped to {}",
                    raw,
                    wrapped
                );
                let turns = (wrapped - raw) / 360.0;
                assert_eq!(turns, turns.round(), "raw {} wrapped to {}", raw, wrapped);
                assert_eq!(turns.signum(), -raw.signum());
                if raw.abs() < 360.0 {
                    assert_eq!(wrapped.signum(), -raw.signum(), "raw {} wrapped to {}", raw, wrapped);
                }
            } else {
                assert_eq!(wrapped, raw);
            }
            raw += 0.5;
        }

        assert_eq!(range.shortest_error(570.0), -150.0);
        assert_eq!(range.shortest_error(-570.0), 150.0);
        assert_eq!(range.shortest_error(725.0), 5.0);
        assert_eq!(range.shortest_error(-1070.0), 10.0);

        // Exactly half the range is not wrapped
        assert_eq!(range.shortest_error(180.0), 180.0);
        assert_eq!(range.shortest_error(-180.0), -180.0);
    }

    #[test]
    fn test_disabled_outputs_feed_forward_only() {
        let config = PidConfig::new()
            .with_kp(5.0)
            .with_ki(1.0)
            .with_kd(1.0)
            .with_kf(0.5)
            .with_setpoint(4.0);

        let clock = ManualClock::new();
        let mut sensor = TestSensor::new(100.0);
        sensor.failing = true;
        let mut pid = PidControlLoop::with_clock(config, sensor, Arc::new(clock.clone()));

        for value in [-50.0, 0.0, 3.0, 1e6] {
            pid.sensor_mut().value = value;
            clock.advance(Duration::from_millis(10));
            assert_eq!(pid.compute_output(), Ok(2.0));
        }

        // The sensor is never consulted while disabled, even a broken one
        assert_eq!(pid.sensor().reads, 0);
        assert_eq!(pid.total_error(), 0.0);
    }

    #[test]
    fn test_reset_keeps_gains_and_setpoint() {
        let config = PidConfig::new()
            .with_kp(1.0)
            .with_ki(0.1)
            .with_kd(0.2)
            .with_kf(0.3)
            .with_setpoint(10.0);
        let (mut pid, clock) = enabled_loop(config, TestSensor::new(2.0));

        for _ in 0..5 {
            clock.advance(Duration::from_millis(20));
            pid.compute_output().unwrap();
        }
        assert!(pid.total_error() > 0.0);
        assert!(pid.last_error() > 0.0);

        pid.reset();

        assert_eq!(pid.total_error(), 0.0);
        assert_eq!(pid.last_error(), 0.0);
        assert_eq!((pid.p(), pid.i(), pid.d(), pid.f()), (1.0, 0.1, 0.2, 0.3));
        assert_eq!(pid.setpoint(), 10.0);
        assert!(pid.is_enabled());
    }

    #[test]
    fn test_integral_is_time_weighted() {
        let config = PidConfig::new().with_ki(0.01).with_setpoint(2.0);

        // Same total time, different poll rates, same integral
        let (mut fast, fast_clock) = enabled_loop(config.clone(), TestSensor::new(0.0));
        let (mut slow, slow_clock) = enabled_loop(config, TestSensor::new(0.0));

        let mut fast_output = 0.0;
        for _ in 0..10 {
            fast_clock.advance(Duration::from_millis(10));
            fast_output = fast.compute_output().unwrap();
        }
        let mut slow_output = 0.0;
        for _ in 0..2 {
            slow_clock.advance(Duration::from_millis(50));
            slow_output = slow.compute_output().unwrap();
        }

        // error 2.0 for 100 ms
        assert_eq!(fast.total_error(), 200.0);
        assert_eq!(slow.total_error(), 200.0);
        assert!((fast_output - 2.0).abs() < 1e-12);
        assert!((slow_output - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_numeric_derivative_per_millisecond() {
        let config = PidConfig::new().with_kd(1.0).with_setpoint(10.0);
        let (mut pid, clock) = enabled_loop(config, TestSensor::new(10.0));

        clock.advance(Duration::from_millis(10));
        assert_eq!(pid.compute_output(), Ok(0.0));

        // Error jumps from 0 to 4 over 20 ms
        pid.sensor_mut().value = 6.0;
        clock.advance(Duration::from_millis(20));
        assert_eq!(pid.compute_output(), Ok(0.2));

        // No time elapsed: no derivative rather than a division by zero
        pid.sensor_mut().value = 0.0;
        assert_eq!(pid.compute_output(), Ok(0.0));
    }

    #[test]
    fn test_native_rate_used_for_derivative() {
        let config = PidConfig::new().with_kd(2.0).with_setpoint(0.0);
        let (mut pid, clock) = enabled_loop(config, TestSensor::new(5.0).with_native_rate(1.5));

        clock.advance(Duration::from_millis(10));
        let output = pid.compute_output().unwrap();

        assert_eq!(output, 3.0);
        assert_eq!(pid.sensor().reads, 2);
        assert_eq!(pid.sensor().reading_kind(), ReadingKind::Displacement);
    }

    #[test]
    fn test_native_rate_skipped_when_sensor_already_in_rate_mode() {
        let config = PidConfig::new().with_kd(1.0).with_setpoint(0.0);
        let mut sensor = TestSensor::new(5.0).with_native_rate(1.5);
        sensor.kind = ReadingKind::Rate;
        let (mut pid, clock) = enabled_loop(config, sensor);

        clock.advance(Duration::from_millis(10));
        pid.compute_output().unwrap();

        assert_eq!(pid.sensor().reads, 1);
        assert_eq!(pid.sensor().reading_kind(), ReadingKind::Rate);
    }

    #[test]
    fn test_sensor_failure() {
        let config = PidConfig::new().with_kp(1.0).with_ki(1.0).with_setpoint(3.0);
        let (mut pid, clock) = enabled_loop(config, TestSensor::new(0.0));
        pid.sensor_mut().failing = true;
        clock.advance(Duration::from_millis(10));

        assert!(matches!(
            pid.compute_output(),
            Err(ControlError::SensorUnavailable(_))
        ));
        assert_eq!(pid.get(), 0.0);
        assert_eq!(pid.total_error(), 0.0);

        // Recovery picks up normally
        pid.sensor_mut().failing = false;
        assert!(pid.get() > 0.0);
    }

    #[test]
    fn test_output_range_clamps() {
        let config = PidConfig::new()
            .with_kp(10.0)
            .with_output_limits(-1.0, 1.0)
            .with_setpoint(5.0);
        let (mut pid, clock) = enabled_loop(config, TestSensor::new(0.0));

        clock.advance(Duration::from_millis(10));
        assert_eq!(pid.compute_output(), Ok(1.0));

        pid.sensor_mut().value = 10.0;
        clock.advance(Duration::from_millis(10));
        assert_eq!(pid.compute_output(), Ok(-1.0));

        pid.clear_output_range();
        clock.advance(Duration::from_millis(10));
        assert_eq!(pid.compute_output(), Ok(-50.0));
    }

    #[test]
    fn test_enable_restarts_timing() {
        let config = PidConfig::new().with_ki(1.0).with_setpoint(1.0);
        let clock = ManualClock::new();
        let mut pid = PidControlLoop::with_clock(config, TestSensor::new(0.0), Arc::new(clock.clone()));

        // Ten seconds spent disabled must not land in the integral
        clock.advance(Duration::from_secs(10));
        pid.enable();
        clock.advance(Duration::from_millis(5));
        pid.compute_output().unwrap();

        assert_eq!(pid.total_error(), 5.0);
    }

    #[test]
    fn test_parameter_validation() {
        let (mut pid, _clock) = enabled_loop(PidConfig::default(), TestSensor::new(0.0));

        assert!(pid.set_setpoint(100.0).is_ok());
        assert!(pid.set_setpoint(f64::NAN).is_err());
        assert!(pid.set_setpoint(f64::INFINITY).is_err());

        assert!(pid.set_pid(1.0, 0.5, 0.1).is_ok());
        assert!(pid.set_pid(-1.0, -0.5, -0.1).is_ok()); // Negative values allowed
        assert!(pid.set_pidf(1.0, f64::NAN, 0.0, 0.0).is_err());
        assert_eq!((pid.p(), pid.i(), pid.d()), (-1.0, -0.5, -0.1));

        assert!(pid.set_continuous(-180.0, 180.0).is_ok());
        assert!(pid.set_continuous(10.0, 10.0).is_err());
        assert!(pid.set_output_range(1.0, -1.0).is_err());
        assert!(pid.set_output_range(-1.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_set_pid_keeps_feed_forward() {
        let config = PidConfig::new().with_kf(0.25);
        let (mut pid, _clock) = enabled_loop(config, TestSensor::new(0.0));

        pid.set_pid(1.0, 2.0, 3.0).unwrap();
        assert_eq!(pid.f(), 0.25);

        pid.set_pidf(1.0, 2.0, 3.0, 4.0).unwrap();
        assert_eq!(pid.f(), 4.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(PidConfig::new().with_kp(1.0).validate().is_ok());

        let config: PidConfig = toml::from_str(
            r#"
            kp = 1.0
            continuous = { min = 10.0, max = -10.0 }
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    #[should_panic]
    fn test_builder_rejects_nan_gain() {
        let _ = PidConfig::new().with_kd(f64::NAN);
    }

    #[test]
    fn test_position_control_converges() {
        let config = PidConfig::new()
            .with_kp(0.02)
            .with_kd(0.5)
            .with_output_limits(-1.0, 1.0)
            .with_setpoint(100.0);
        let (mut pid, clock) = enabled_loop(config, TestSensor::new(0.0));

        // Simple plant: position moves proportionally to the output
        let dt = Duration::from_millis(20);
        for _ in 0..1000 {
            clock.advance(dt);
            let output = pid.compute_output().unwrap();
            pid.sensor_mut().value += output * 5.0;
        }

        assert!((pid.sensor().value - 100.0).abs() < 0.5);
    }
}
