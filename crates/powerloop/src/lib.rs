// Powerloop: power-aware motor control loops written in Rust
// Copyright (c) 2025 The Powerloop Authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Control core for battery-powered actuators.
//!
//! Three pieces cooperate once per control cycle:
//!
//! - [`PowerDistribution`] decodes the power-distribution unit's status
//!   frames into bus voltage, battery resistance and currents, and refuses to
//!   serve values older than 100 ms.
//! - [`PidControlLoop`] turns a sensor reading into a corrective output with
//!   P, I, D and feed-forward terms, optionally wrapping continuous inputs
//!   such as headings.
//! - [`AccelerationLimiter`] ramps the commanded output and backs it off
//!   when the battery bus is about to brown out.
//!
//! [`SensorMotor`] chains the three in front of an [`Actuator`], and
//! [`HeadingHold`] steers a chassis by moving a target yaw for the loop.
//!
//! ```
//! use std::sync::Arc;
//! use powerloop::{
//!     AccelerationLimiter, Actuator, FnSensor, LimiterConfig, MemoryTransport, NominalVoltage,
//!     PidConfig, PidControlLoop, PowerDistribution, PowerDistributionConfig, SensorMotor,
//! };
//!
//! struct Drive;
//!
//! impl Actuator for Drive {
//!     fn write(&mut self, output: f64) {
//!         println!("drive <- {output:.3}");
//!     }
//! }
//!
//! let power = PowerDistribution::new(
//!     PowerDistributionConfig::default(),
//!     MemoryTransport::new(),
//!     NominalVoltage(12.0),
//! );
//! let limiter = AccelerationLimiter::new(LimiterConfig::default(), power);
//!
//! let heading = FnSensor::new(|| Ok(42.0));
//! let pid = PidControlLoop::new(
//!     PidConfig::new()
//!         .with_kp(0.02)
//!         .with_continuous_input(-180.0, 180.0)
//!         .with_output_limits(-1.0, 1.0),
//!     heading,
//! );
//!
//! let mut motor = SensorMotor::new(pid, limiter, Drive);
//! motor.set_position(90.0).unwrap();
//! ```

mod clock;
mod config;
mod error;
mod heading;
mod limiter;
mod modifier;
mod motor;
mod pid;
mod sensor;
mod telemetry;

#[cfg(feature = "debugging")]
mod debug;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, CoreConfig};
pub use error::{ControlError, SensorError};
pub use heading::{wrap_degrees, HeadingHold};
pub use limiter::{AccelerationLimiter, LimiterConfig, MotorClass, STALL_AMPERAGE_RESCALE};
pub use modifier::{IdentityModifier, SpeedModifier};
pub use motor::{Actuator, SensorMotor};
pub use pid::{PidConfig, PidControlLoop, Range};
pub use sensor::{FnSensor, ReadingKind, Sensor};
pub use telemetry::{
    Frame, FrameData, FrameKind, FrameTransport, MemoryTransport, NominalVoltage,
    PowerDistribution, PowerDistributionConfig, TelemetryCache, VoltageFallback,
    CHANNEL_COUNT, CURRENT_RESOLUTION, FALLBACK_RESISTANCE, MAX_AGE,
};

#[cfg(feature = "debugging")]
pub use debug::{DebugConfig, LoopDebugRecord, LoopDebugger, LoopSample};
