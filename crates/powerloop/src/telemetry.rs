//! Power-distribution telemetry.
//!
//! The power-distribution unit broadcasts four 8-byte status frames. This
//! module unpacks them into per-channel currents, bus voltage, internal
//! battery resistance and total current, and serves the results from a cache
//! that is only trusted for [`MAX_AGE`] after the last decoded frame.
//!
//! # Frame layout
//!
//! Channel currents are 10-bit values at 0.125 A per count, packed six to a
//! frame. Masks follow the device protocol; shifts bring each field down to
//! its place in the 10-bit value:
//!
//! ```text
//! slot 0: (b0 & 0xFF) << 2 | (b1 & 0xC0) >> 6
//! slot 1: (b1 & 0x3F) << 4 | (b2 & 0xF0) >> 4
//! slot 2: (b2 & 0x0F) << 6 | (b3 & 0x3F)
//! slot 3: (b3 & 0xC0) << 2 | (b4 & 0xFF)
//! slot 4: (b5 & 0xFF) << 2 | (b6 & 0xC0) >> 6
//! slot 5: (b6 & 0x3F) << 4 | (b7 & 0xF0) >> 4
//! ```
//!
//! Status 3 only carries slots 0-3 (channels 12-15) and reuses byte 5 for the
//! battery resistance (milliohms) and byte 6 for the bus voltage
//! (`0.05 V * b6 + 4.0 V`). The energy frame carries a 12-bit total current
//! in `b1` and the high nibble of `b2`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;

use crate::clock::{system_clock, Clock};
use crate::error::ControlError;

/// How long a decoded frame keeps the cache valid.
pub const MAX_AGE: Duration = Duration::from_millis(100);

/// Number of current-monitored output channels.
pub const CHANNEL_COUNT: usize = 16;

/// Amps per count of a raw current field.
pub const CURRENT_RESOLUTION: f64 = 0.125;

/// Resistance assumed when telemetry is stale. Deliberately high.
pub const FALLBACK_RESISTANCE: f64 = 80.0;

/// Raw payload of one status frame.
pub type Frame = [u8; 8];

/// The four status frames broadcast by the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Channels 0-5.
    Status1,
    /// Channels 6-11.
    Status2,
    /// Channels 12-15, battery resistance, bus voltage.
    Status3,
    /// Total current.
    StatusEnergy,
}

impl FrameKind {
    pub const ALL: [FrameKind; 4] = [
        FrameKind::Status1,
        FrameKind::Status2,
        FrameKind::Status3,
        FrameKind::StatusEnergy,
    ];

    /// Arbitration id of the frame for device 0.
    pub const fn base_id(self) -> u32 {
        match self {
            FrameKind::Status1 => 0x0804_1400,
            FrameKind::Status2 => 0x0804_1440,
            FrameKind::Status3 => 0x0804_1480,
            FrameKind::StatusEnergy => 0x0804_1740,
        }
    }

    /// Arbitration id of the frame for the given device.
    pub const fn frame_id(self, device_id: u8) -> u32 {
        self.base_id() | device_id as u32
    }

    /// Frame that carries the given output channel, if it exists.
    pub const fn for_channel(channel: usize) -> Option<FrameKind> {
        match channel {
            0..=5 => Some(FrameKind::Status1),
            6..=11 => Some(FrameKind::Status2),
            12..=15 => Some(FrameKind::Status3),
            _ => None,
        }
    }
}

fn unpack_currents(frame: &Frame) -> [f64; 6] {
    let b: [u16; 8] = frame.map(u16::from);
    let raw = [
        ((b[0] & 0xFF) << 2) | ((b[1] & 0xC0) >> 6),
        ((b[1] & 0x3F) << 4) | ((b[2] & 0xF0) >> 4),
        ((b[2] & 0x0F) << 6) | (b[3] & 0x3F),
        ((b[3] & 0xC0) << 2) | (b[4] & 0xFF),
        ((b[5] & 0xFF) << 2) | ((b[6] & 0xC0) >> 6),
        ((b[6] & 0x3F) << 4) | ((b[7] & 0xF0) >> 4),
    ];
    raw.map(|count| f64::from(count) * CURRENT_RESOLUTION)
}

fn pack_currents(currents: &[f64]) -> Frame {
    let mut raw = [0u16; 6];
    for (slot, amps) in raw.iter_mut().zip(currents) {
        *slot = to_counts(*amps / CURRENT_RESOLUTION, 0x3FF);
    }
    let mut frame = [0u8; 8];
    frame[0] = (raw[0] >> 2) as u8;
    frame[1] = (((raw[0] & 0x03) << 6) | ((raw[1] >> 4) & 0x3F)) as u8;
    frame[2] = (((raw[1] & 0x0F) << 4) | ((raw[2] >> 6) & 0x0F)) as u8;
    frame[3] = ((raw[2] & 0x3F) | (((raw[3] >> 8) & 0x03) << 6)) as u8;
    frame[4] = (raw[3] & 0xFF) as u8;
    frame[5] = (raw[4] >> 2) as u8;
    frame[6] = (((raw[4] & 0x03) << 6) | ((raw[5] >> 4) & 0x3F)) as u8;
    frame[7] = ((raw[5] & 0x0F) << 4) as u8;
    frame
}

fn to_counts(value: f64, max: u16) -> u16 {
    value.round().clamp(0.0, f64::from(max)) as u16
}

/// Physical quantities carried by one status frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameData {
    Status1 {
        currents: [f64; 6],
    },
    Status2 {
        currents: [f64; 6],
    },
    Status3 {
        currents: [f64; 4],
        resistance: f64,
        voltage: f64,
    },
    Energy {
        total_current: f64,
    },
}

impl FrameData {
    /// Unpack a raw frame.
    pub fn decode(kind: FrameKind, frame: &Frame) -> Self {
        match kind {
            FrameKind::Status1 => FrameData::Status1 {
                currents: unpack_currents(frame),
            },
            FrameKind::Status2 => FrameData::Status2 {
                currents: unpack_currents(frame),
            },
            FrameKind::Status3 => {
                let block = unpack_currents(frame);
                FrameData::Status3 {
                    currents: [block[0], block[1], block[2], block[3]],
                    resistance: f64::from(frame[5]) / 1000.0,
                    voltage: f64::from(frame[6]) * 0.05 + 4.0,
                }
            }
            FrameKind::StatusEnergy => {
                let raw = (u16::from(frame[1]) << 4) | ((u16::from(frame[2]) & 0xF0) >> 4);
                FrameData::Energy {
                    total_current: f64::from(raw) * CURRENT_RESOLUTION,
                }
            }
        }
    }

    /// Pack into a raw frame, quantizing to the wire resolution.
    ///
    /// Used to simulate a power-distribution unit.
    pub fn encode(&self) -> Frame {
        match self {
            FrameData::Status1 { currents } | FrameData::Status2 { currents } => {
                pack_currents(currents)
            }
            FrameData::Status3 {
                currents,
                resistance,
                voltage,
            } => {
                let mut frame = pack_currents(currents);
                frame[5] = to_counts(resistance * 1000.0, 0xFF) as u8;
                frame[6] = to_counts((voltage - 4.0) / 0.05, 0xFF) as u8;
                frame
            }
            FrameData::Energy { total_current } => {
                let raw = to_counts(total_current / CURRENT_RESOLUTION, 0xFFF);
                let mut frame = [0u8; 8];
                frame[1] = (raw >> 4) as u8;
                frame[2] = ((raw & 0x0F) << 4) as u8;
                frame
            }
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            FrameData::Status1 { .. } => FrameKind::Status1,
            FrameData::Status2 { .. } => FrameKind::Status2,
            FrameData::Status3 { .. } => FrameKind::Status3,
            FrameData::Energy { .. } => FrameKind::StatusEnergy,
        }
    }

    fn apply_to(&self, cache: &mut TelemetryCache) {
        match self {
            FrameData::Status1 { currents } => cache.channel_currents[0..6].copy_from_slice(currents),
            FrameData::Status2 { currents } => cache.channel_currents[6..12].copy_from_slice(currents),
            FrameData::Status3 {
                currents,
                resistance,
                voltage,
            } => {
                cache.channel_currents[12..16].copy_from_slice(currents);
                cache.bus_resistance = *resistance;
                cache.bus_voltage = *voltage;
            }
            FrameData::Energy { total_current } => cache.total_current = *total_current,
        }
    }
}

/// Last decoded values of one power-distribution unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryCache {
    pub channel_currents: [f64; CHANNEL_COUNT],
    pub bus_voltage: f64,
    pub bus_resistance: f64,
    pub total_current: f64,
    /// When the last frame was decoded, `None` before the first one.
    pub last_read: Option<Duration>,
}

impl Default for TelemetryCache {
    fn default() -> Self {
        TelemetryCache {
            channel_currents: [0.0; CHANNEL_COUNT],
            bus_voltage: 0.0,
            bus_resistance: 0.0,
            total_current: 0.0,
            last_read: None,
        }
    }
}

/// Source of raw status frames.
pub trait FrameTransport: Send {
    /// Return the newest frame with the given arbitration id, or `None` if
    /// nothing arrived since the last poll. Must not block.
    fn poll_frame(&mut self, frame_id: u32) -> Option<Frame>;
}

/// Battery voltage estimate used when telemetry is stale.
pub trait VoltageFallback: Send + Sync {
    fn estimate_voltage(&self) -> f64;
}

impl<F> VoltageFallback for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn estimate_voltage(&self) -> f64 {
        self()
    }
}

/// A fixed voltage estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NominalVoltage(pub f64);

impl VoltageFallback for NominalVoltage {
    fn estimate_voltage(&self) -> f64 {
        self.0
    }
}

/// In-memory frame transport.
///
/// Keeps the latest frame pushed for each id, like a receive mailbox: a
/// newer frame replaces one nobody polled yet, and a poll takes it. Clones
/// share the same mailboxes, so one copy can feed frames while another is
/// owned by a [`PowerDistribution`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    latest: HashMap<u32, Frame>,
    polls: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw frame under an arbitration id, replacing any unpolled one.
    pub fn push(&self, frame_id: u32, frame: Frame) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.latest.insert(frame_id, frame);
    }

    /// Encode and store a frame for the given device.
    pub fn push_data(&self, device_id: u8, data: FrameData) {
        self.push(data.kind().frame_id(device_id), data.encode());
    }

    /// Number of polls served so far, with or without data.
    pub fn poll_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).polls
    }
}

impl FrameTransport for MemoryTransport {
    fn poll_frame(&mut self, frame_id: u32) -> Option<Frame> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.polls += 1;
        state.latest.remove(&frame_id)
    }
}

/// Configuration for a [`PowerDistribution`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PowerDistributionConfig {
    /// Device id OR-ed into every frame id.
    pub device_id: u8,
    /// Maximum cache age in milliseconds.
    pub max_age_ms: u64,
    /// Resistance substituted by [`PowerDistribution::battery_resistance_or_default`].
    pub fallback_resistance: f64,
}

impl Default for PowerDistributionConfig {
    fn default() -> Self {
        PowerDistributionConfig {
            device_id: 0,
            max_age_ms: MAX_AGE.as_millis() as u64,
            fallback_resistance: FALLBACK_RESISTANCE,
        }
    }
}

impl PowerDistributionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_id(mut self, device_id: u8) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age_ms = max_age.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        if !self.fallback_resistance.is_finite() || self.fallback_resistance < 0.0 {
            return Err(ControlError::InvalidParameter(
                "fallback resistance must be a finite, non-negative number",
            ));
        }
        Ok(())
    }
}

struct Shared {
    config: PowerDistributionConfig,
    max_age: Duration,
    transport: Mutex<Box<dyn FrameTransport>>,
    fallback: Box<dyn VoltageFallback>,
    cache: RwLock<TelemetryCache>,
    clock: Arc<dyn Clock>,
}

/// Decoder and cache for one power-distribution unit.
///
/// Cloning is cheap and every clone shares the same cache, so all the
/// limiters on one power bus see the same readings. Decoding writes the
/// cache under a short write lock, readers never observe a half-applied
/// frame.
#[derive(Clone)]
pub struct PowerDistribution {
    inner: Arc<Shared>,
}

impl PowerDistribution {
    /// Create a decoder timed by the system monotonic clock.
    pub fn new(
        config: PowerDistributionConfig,
        transport: impl FrameTransport + 'static,
        fallback: impl VoltageFallback + 'static,
    ) -> Self {
        Self::with_clock(config, transport, fallback, system_clock())
    }

    /// Create a decoder timed by the given clock.
    pub fn with_clock(
        config: PowerDistributionConfig,
        transport: impl FrameTransport + 'static,
        fallback: impl VoltageFallback + 'static,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let max_age = Duration::from_millis(config.max_age_ms);
        PowerDistribution {
            inner: Arc::new(Shared {
                config,
                max_age,
                transport: Mutex::new(Box::new(transport)),
                fallback: Box::new(fallback),
                cache: RwLock::new(TelemetryCache::default()),
                clock,
            }),
        }
    }

    pub fn device_id(&self) -> u8 {
        self.inner.config.device_id
    }

    /// Decode a frame into the cache.
    ///
    /// `None` means no new data arrived and leaves the cache untouched.
    pub fn decode_frame(&self, kind: FrameKind, frame: Option<Frame>) -> Result<(), ControlError> {
        let Some(frame) = frame else {
            return Ok(());
        };

        let data = FrameData::decode(kind, &frame);
        let now = self.inner.clock.now();

        let mut cache = self
            .inner
            .cache
            .write()
            .map_err(|_| ControlError::LockPoisoned)?;
        data.apply_to(&mut cache);
        cache.last_read = Some(now);
        Ok(())
    }

    // Non-blocking poll of one frame, decoded if present.
    fn poll(&self, kind: FrameKind) -> Result<(), ControlError> {
        let frame = {
            let mut transport = self
                .inner
                .transport
                .lock()
                .map_err(|_| ControlError::LockPoisoned)?;
            transport.poll_frame(kind.frame_id(self.inner.config.device_id))
        };
        self.decode_frame(kind, frame)
    }

    // Read from the cache if it is young enough.
    fn fresh<T>(&self, read: impl FnOnce(&TelemetryCache) -> T) -> Result<T, ControlError> {
        let cache = self
            .inner
            .cache
            .read()
            .map_err(|_| ControlError::LockPoisoned)?;
        let now = self.inner.clock.now();
        match cache.last_read {
            Some(at) if now.saturating_sub(at) <= self.inner.max_age => Ok(read(&cache)),
            last_read => Err(ControlError::StaleTelemetry {
                age: last_read.map(|at| now.saturating_sub(at)),
            }),
        }
    }

    /// Bus voltage in volts.
    ///
    /// # Errors
    ///
    /// [`ControlError::StaleTelemetry`] if no frame was decoded within the
    /// maximum age.
    pub fn voltage(&self) -> Result<f64, ControlError> {
        self.poll(FrameKind::Status3)?;
        self.fresh(|cache| cache.bus_voltage)
    }

    /// Internal battery resistance in ohms.
    pub fn battery_resistance(&self) -> Result<f64, ControlError> {
        self.poll(FrameKind::Status3)?;
        self.fresh(|cache| cache.bus_resistance)
    }

    /// Total current drawn through the unit, in amps.
    pub fn total_current(&self) -> Result<f64, ControlError> {
        self.poll(FrameKind::StatusEnergy)?;
        self.fresh(|cache| cache.total_current)
    }

    /// Current through one output channel, in amps.
    ///
    /// Channels past the last one read as 0.0 without touching the bus.
    pub fn channel_current(&self, channel: usize) -> Result<f64, ControlError> {
        let Some(kind) = FrameKind::for_channel(channel) else {
            return Ok(0.0);
        };
        self.poll(kind)?;
        self.fresh(|cache| cache.channel_currents[channel])
    }

    /// Bus voltage, or the fallback estimate when telemetry is unavailable.
    pub fn voltage_or_fallback(&self) -> f64 {
        match self.voltage() {
            Ok(voltage) => voltage,
            Err(e) => {
                let estimate = self.inner.fallback.estimate_voltage();
                warn!("using estimated battery voltage {:.2} V: {}", estimate, e);
                estimate
            }
        }
    }

    /// Battery resistance, or a conservative high estimate when telemetry is
    /// unavailable.
    pub fn battery_resistance_or_default(&self) -> f64 {
        match self.battery_resistance() {
            Ok(resistance) => resistance,
            Err(e) => {
                warn!(
                    "using fallback battery resistance {}: {}",
                    self.inner.config.fallback_resistance, e
                );
                self.inner.config.fallback_resistance
            }
        }
    }

    /// Poll every status frame once.
    pub fn refresh(&self) -> Result<(), ControlError> {
        for kind in FrameKind::ALL {
            self.poll(kind)?;
        }
        debug!("power distribution {} refreshed", self.inner.config.device_id);
        Ok(())
    }

    /// Copy of the cache, whatever its age.
    pub fn snapshot(&self) -> Result<TelemetryCache, ControlError> {
        self.inner
            .cache
            .read()
            .map(|cache| *cache)
            .map_err(|_| ControlError::LockPoisoned)
    }

    /// Whether the cache is currently within its maximum age. Does not poll.
    pub fn is_fresh(&self) -> bool {
        self.fresh(|_| ()).is_ok()
    }
}
