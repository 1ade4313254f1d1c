//! The sensor-read contract consumed by control loops.

use serde::Deserialize;

use crate::error::SensorError;

/// How a sensor's reading should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    /// Position-like value (distance, angle).
    #[default]
    Displacement,
    /// Rate of change of the displacement.
    Rate,
}

/// A readable sensor.
///
/// Sensors that can report their own rate of change (for example an encoder
/// with hardware velocity measurement) advertise it through
/// [`supports_native_rate`](Sensor::supports_native_rate). A control loop then
/// flips the sensor into [`ReadingKind::Rate`] for its derivative term instead
/// of differentiating noisy samples.
pub trait Sensor {
    /// Read the current value in the current [`ReadingKind`].
    fn read(&mut self) -> Result<f64, SensorError>;

    /// The kind of value [`read`](Sensor::read) currently returns.
    fn reading_kind(&self) -> ReadingKind;

    /// Switch what [`read`](Sensor::read) returns.
    fn set_reading_kind(&mut self, kind: ReadingKind);

    /// Whether the sensor can measure its own rate natively.
    fn supports_native_rate(&self) -> bool {
        false
    }
}

impl<S: Sensor + ?Sized> Sensor for Box<S> {
    fn read(&mut self) -> Result<f64, SensorError> {
        (**self).read()
    }

    fn reading_kind(&self) -> ReadingKind {
        (**self).reading_kind()
    }

    fn set_reading_kind(&mut self, kind: ReadingKind) {
        (**self).set_reading_kind(kind)
    }

    fn supports_native_rate(&self) -> bool {
        (**self).supports_native_rate()
    }
}

impl<S: Sensor + ?Sized> Sensor for &mut S {
    fn read(&mut self) -> Result<f64, SensorError> {
        (**self).read()
    }

    fn reading_kind(&self) -> ReadingKind {
        (**self).reading_kind()
    }

    fn set_reading_kind(&mut self, kind: ReadingKind) {
        (**self).set_reading_kind(kind)
    }

    fn supports_native_rate(&self) -> bool {
        (**self).supports_native_rate()
    }
}

/// A displacement-only sensor backed by a closure.
///
/// Handy for wiring a value that is produced elsewhere (a simulation, a
/// shared cell) into a control loop.
pub struct FnSensor<F> {
    read_fn: F,
    kind: ReadingKind,
}

impl<F> FnSensor<F>
where
    F: FnMut() -> Result<f64, SensorError>,
{
    pub fn new(read_fn: F) -> Self {
        FnSensor {
            read_fn,
            kind: ReadingKind::Displacement,
        }
    }
}

impl<F> Sensor for FnSensor<F>
where
    F: FnMut() -> Result<f64, SensorError>,
{
    fn read(&mut self) -> Result<f64, SensorError> {
        (self.read_fn)()
    }

    fn reading_kind(&self) -> ReadingKind {
        self.kind
    }

    // The closure has a single meaning, the kind is only recorded.
    fn set_reading_kind(&mut self, kind: ReadingKind) {
        self.kind = kind;
    }
}
