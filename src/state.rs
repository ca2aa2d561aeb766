use core::fmt;

use crate::{DeviceId, DeviceMode, DutyCycle, RunState};

/// Firmware version reported by the sensor, as a build date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Firmware {
    /// Years since 2000.
    pub year: u8,
    /// Month, 1-12.
    pub month: u8,
    /// Day of the month.
    pub day: u8,
}

impl fmt::Display for Firmware {
    /// Formats the version as `20YY.MM.DD`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "20{:02}.{:02}.{:02}", self.year, self.month, self.day)
    }
}

/// Whether a getter may answer from the cached [`SensorState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Always ask the sensor.
    #[default]
    Fresh,
    /// Answer from the cache when the value is known, otherwise ask the sensor.
    ///
    /// Only sound while this session is the sole writer of the sensor's
    /// configuration.
    Cached,
}

/// Last values observed from the sensor during this session.
///
/// `None` marks a value that has not been observed yet. The ID starts out as
/// [`DeviceId::ANY`], which doubles as "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorState {
    /// ID carried by the last accepted reply.
    pub id: DeviceId,
    /// Reporting mode.
    pub mode: Option<DeviceMode>,
    /// Sleep or wake.
    pub run_state: Option<RunState>,
    /// Duty cycle.
    pub duty_cycle: Option<DutyCycle>,
    /// Firmware version.
    pub firmware: Option<Firmware>,
}

impl SensorState {
    /// Cached ID, if one has been observed.
    pub fn known_id(&self) -> Option<DeviceId> {
        (!self.id.is_any()).then_some(self.id)
    }
}
