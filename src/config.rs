use core::fmt;

use crate::{Error, MAX_DUTY_CYCLE};

/// Represents the reporting mode of the SDS011 sensor.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum DeviceMode {
    /// In Active mode, the sensor reports a measurement every duty cycle.
    Active,
    /// In Query mode, the sensor only reports data when queried.
    Query,
}

impl DeviceMode {
    /// Wire encoding of the mode.
    pub fn to_byte(self) -> u8 {
        match self {
            DeviceMode::Active => 0x00,
            DeviceMode::Query => 0x01,
        }
    }
}

impl TryFrom<u8> for DeviceMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(DeviceMode::Active),
            0x01 => Ok(DeviceMode::Query),
            other => Err(other),
        }
    }
}

/// Represents the run state of the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Fan and laser are off, only wake commands are handled.
    Sleep,
    /// Sensor is operational.
    Wake,
}

impl RunState {
    /// Wire encoding of the run state.
    pub fn to_byte(self) -> u8 {
        match self {
            RunState::Sleep => 0x00,
            RunState::Wake => 0x01,
        }
    }
}

impl TryFrom<u8> for RunState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(RunState::Sleep),
            0x01 => Ok(RunState::Wake),
            other => Err(other),
        }
    }
}

/// Interval between two measurements in Active mode, in minutes.
///
/// `0` means continuous reporting (roughly one frame per second). Values from
/// `1` to `30` make the sensor spin up for 30 seconds then sleep for the rest
/// of the period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DutyCycle(u8);

impl DutyCycle {
    /// Continuous reporting.
    pub const CONTINUOUS: DutyCycle = DutyCycle(0);

    /// Creates a duty cycle, rejecting anything above 30 minutes.
    pub fn new(minutes: u8) -> Result<Self, Error> {
        if minutes > MAX_DUTY_CYCLE {
            log::error!("Duty cycle {} out of range (0-{})", minutes, MAX_DUTY_CYCLE);
            return Err(Error::InvalidDutyCycle(minutes));
        }
        Ok(DutyCycle(minutes))
    }

    // Accepts a value reported by the sensor without logging.
    pub(crate) fn from_wire(minutes: u8) -> Option<Self> {
        (minutes <= MAX_DUTY_CYCLE).then_some(DutyCycle(minutes))
    }

    /// Duty cycle length in minutes.
    pub fn minutes(self) -> u8 {
        self.0
    }
}

impl fmt::Display for DutyCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents the two-byte identifier of the SDS011 sensor.
///
/// On the wire the ID travels little-endian. `0xFFFF` addresses any sensor.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub struct DeviceId(pub u16);

impl DeviceId {
    /// Matches any sensor on the line.
    pub const ANY: DeviceId = DeviceId(0xFFFF);

    /// Builds an ID from its two wire bytes.
    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        DeviceId(u16::from_le_bytes(bytes))
    }

    /// The two wire bytes, low byte first.
    pub fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    /// Whether this ID addresses any sensor.
    pub fn is_any(self) -> bool {
        self == DeviceId::ANY
    }
}

impl Default for DeviceId {
    /// Returns the default device id.
    fn default() -> DeviceId {
        DeviceId::ANY
    }
}

impl From<u16> for DeviceId {
    fn from(id: u16) -> Self {
        DeviceId(id)
    }
}

impl TryFrom<u32> for DeviceId {
    type Error = Error;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        u16::try_from(id)
            .map(DeviceId)
            .map_err(|_| Error::InvalidDeviceId(id))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// A configurable setting of the sensor, as understood by the raw
/// [`get`](crate::Sds011::get) and [`set`](crate::Sds011::set) calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    /// Reporting mode, see [`DeviceMode`].
    Mode,
    /// Sleep or wake, see [`RunState`].
    RunState,
    /// Duty cycle in minutes, see [`DutyCycle`].
    DutyCycle,
}

impl Setting {
    /// Command byte used to read or write the setting.
    pub fn command(self) -> u8 {
        match self {
            Setting::Mode => crate::CMD_MODE,
            Setting::RunState => crate::CMD_RUN_STATE,
            Setting::DutyCycle => crate::CMD_DUTY_CYCLE,
        }
    }

    // Checks a raw value before it goes on the wire.
    pub(crate) fn validate(self, value: u8) -> Result<(), Error> {
        let known = match self {
            Setting::DutyCycle => return DutyCycle::new(value).map(|_| ()),
            Setting::Mode => DeviceMode::try_from(value).is_ok(),
            Setting::RunState => RunState::try_from(value).is_ok(),
        };
        if known {
            Ok(())
        } else {
            log::error!("Refusing value {} for command 0x{:02X}", value, self.command());
            Err(Error::InvalidValue {
                command: self.command(),
                value,
            })
        }
    }
}

/// Configuration settings for the SDS011 session.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Config {
    /// Device addressed by outgoing frames.
    pub target: DeviceId,
    /// Reporting mode applied by `init`, if any.
    pub mode: Option<DeviceMode>,
    /// Duty cycle applied by `init`, if any.
    pub duty_cycle: Option<DutyCycle>,
}

impl Config {
    /// Creates a new `Config` instance.
    ///
    /// # Arguments
    ///
    /// * `target` - The `DeviceId` outgoing frames are addressed to.
    /// * `mode` - The `DeviceMode` applied when the session is initialized.
    ///
    /// # Returns
    ///
    /// A new `Config` instance with the specified target and mode.
    pub fn new(target: DeviceId, mode: DeviceMode) -> Config {
        Config {
            target,
            mode: Some(mode),
            duty_cycle: None,
        }
    }
    /// Sets the device addressed by outgoing frames.
    pub fn target(mut self, target: DeviceId) -> Self {
        self.target = target;
        self
    }
    /// Sets the reporting mode applied by `init`.
    pub fn mode(mut self, mode: DeviceMode) -> Self {
        self.mode = Some(mode);
        self
    }
    /// Sets the duty cycle applied by `init`.
    pub fn duty_cycle(mut self, duty_cycle: DutyCycle) -> Self {
        self.duty_cycle = Some(duty_cycle);
        self
    }
}

/// Provides default configuration values for the SDS011 session.
impl Default for Config {
    /// Returns the default configuration.
    ///
    /// The default configuration addresses any device and leaves the sensor's
    /// mode and duty cycle untouched.
    fn default() -> Config {
        Config {
            target: DeviceId::ANY,
            mode: None,
            duty_cycle: None,
        }
    }
}
