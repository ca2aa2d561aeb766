#![cfg_attr(not(any(test, feature = "std")), no_std)]

use core::fmt;
use core::future::Future;

use embedded_io_async::{Read, Write};
use log::{debug, warn};

mod constants;
pub use constants::*;

mod error;
pub use error::*;

mod config;
pub use config::*;

mod state;
pub use state::*;

pub mod frame;
use frame::{encode_command, Decoder, ResponseFrame, ResponseKind, COMMAND_ARGS_LEN};

#[cfg(feature = "std")]
mod stream;
#[cfg(feature = "std")]
pub use stream::*;

#[cfg(test)]
mod mock;

/// Session with an SDS011 air quality sensor.
///
/// The session owns the serial line and runs one request/response exchange at
/// a time. Every accepted reply refreshes the cached [`SensorState`].
///
/// Exchanges never give up: failed writes are retried and malformed or
/// unrelated frames are skipped until the expected one arrives. The only
/// transport condition reported to the caller is end of stream.
///
/// # Type Parameters
///
/// * `Serial`: The serial interface used to communicate with the sensor, set to
///   9600 baud 8N1. It must implement `embedded_io_async::Read` and
///   `embedded_io_async::Write`.
pub struct Sds011<Serial> {
    serial: Serial,
    config: Config,
    state: SensorState,
    decoder: Decoder,
}

/// A single measurement reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// ID of the reporting sensor.
    pub id: DeviceId,
    /// PM2.5 concentration in µg/m³.
    pub pm2_5: f32,
    /// PM10 concentration in µg/m³.
    pub pm10: f32,
}

impl Measurement {
    fn from_frame(frame: &ResponseFrame) -> Self {
        let p = &frame.payload;
        Measurement {
            id: frame.device_id(),
            pm2_5: f32::from(u16::from_le_bytes([p[0], p[1]])) / 10.0,
            pm10: f32::from(u16::from_le_bytes([p[2], p[3]])) / 10.0,
        }
    }
}

impl fmt::Display for Measurement {
    /// Formats the measurement as `ID,PM2.5,PM10`, e.g. `1234,2.5,10.0`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{:.1},{:.1}", self.id, self.pm2_5, self.pm10)
    }
}

// Argument bytes for a get/set request, selector left for the session target.
fn setting_args(action: u8, value: u8) -> [u8; COMMAND_ARGS_LEN] {
    let mut args = [0u8; COMMAND_ARGS_LEN];
    args[0] = action;
    args[1] = value;
    args
}

// The reply an exchange is waiting for.
#[derive(Debug, Clone, Copy)]
enum Expect {
    Measurement,
    Ack(u8),
}

impl Expect {
    fn matches(self, frame: &ResponseFrame) -> bool {
        match self {
            Expect::Measurement => frame.kind == ResponseKind::Measurement,
            Expect::Ack(command) => frame.kind == ResponseKind::Ack && frame.command() == command,
        }
    }
}

impl<S> Sds011<S>
where
    S: Read + Write,
{
    /// Creates a new session.
    ///
    /// No I/O happens until the first operation. All cached values start out
    /// unknown.
    pub fn new(serial: S, config: Config) -> Self {
        Self {
            serial,
            config,
            state: SensorState::default(),
            decoder: Decoder::new(),
        }
    }

    /// Last values observed from the sensor.
    pub fn state(&self) -> &SensorState {
        &self.state
    }

    /// Session configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ends the session and returns the serial interface.
    pub fn release(self) -> S {
        self.serial
    }

    /// Prepares the sensor according to the session configuration.
    ///
    /// This involves:
    /// - Waking the sensor up.
    /// - Setting the reporting mode, if one is configured.
    /// - Setting the duty cycle, if one is configured.
    pub async fn init(&mut self) -> Result<(), Error> {
        self.wake().await.map_err(|e| {
            log::error!("Failed to wake sensor during init: {:?}", e);
            e
        })?;

        if let Some(mode) = self.config.mode {
            self.set_mode(mode).await.map_err(|e| {
                log::error!("Failed to set mode to {:?} during init: {:?}", mode, e);
                e
            })?;
        }

        if let Some(duty_cycle) = self.config.duty_cycle {
            self.set_duty_cycle(duty_cycle).await.map_err(|e| {
                log::error!(
                    "Failed to set duty cycle to {} during init: {:?}",
                    duty_cycle,
                    e
                );
                e
            })?;
        }

        debug!("SDS011 init sequence complete.");
        Ok(())
    }

    /// Waits for the next measurement frame without sending anything.
    ///
    /// Meant for Active mode, where the sensor reports on its own every duty
    /// cycle. There is no timeout.
    pub async fn poll(&mut self) -> Result<Measurement, Error> {
        let frame = self.receive(Expect::Measurement).await?;
        let measurement = Measurement::from_frame(&frame);
        debug!(
            "Measurement from {}: PM2.5 {}, PM10 {}",
            measurement.id, measurement.pm2_5, measurement.pm10
        );
        Ok(measurement)
    }

    /// Asks the sensor to measure now and waits for the result.
    pub async fn query(&mut self) -> Result<Measurement, Error> {
        debug!("Querying sensor data (CMD 0x04)");
        self.send(CMD_QUERY, &[0; COMMAND_ARGS_LEN]).await;
        self.poll().await
    }

    /// Reads one measurement the way the reporting mode calls for.
    ///
    /// The sensor is woken up first. In Active mode this then waits for the
    /// next report. In Query mode it awaits `spinup` so the fan can clear the
    /// chamber, queries a measurement and puts the sensor back to sleep.
    pub async fn read_sample<F>(&mut self, spinup: F) -> Result<Measurement, Error>
    where
        F: Future<Output = ()>,
    {
        self.wake().await?;
        match self.get_mode(Freshness::Cached).await? {
            DeviceMode::Active => self.poll().await,
            DeviceMode::Query => {
                debug!("Waiting for sensor to spin up...");
                spinup.await;
                let measurement = self.query().await?;
                self.sleep().await?;
                Ok(measurement)
            }
        }
    }

    /// Reads the raw value of a setting from the sensor.
    pub async fn get(&mut self, setting: Setting) -> Result<u8, Error> {
        debug!("Querying {:?} (CMD 0x{:02X}, Query)", setting, setting.command());
        let frame = self.exchange(setting.command(), &setting_args(ACTION_GET, 0)).await?;
        let value = frame.value();
        self.record(setting, value);
        Ok(value)
    }

    /// Writes the raw value of a setting and returns the acknowledged value.
    ///
    /// Putting the sensor to sleep does not wait for an acknowledgment: a
    /// sleeping sensor may never send one. The cached run state is updated
    /// right away instead.
    pub async fn set(&mut self, setting: Setting, value: u8) -> Result<u8, Error> {
        setting.validate(value)?;
        debug!("Setting {:?} to 0x{:02X}", setting, value);
        let args = setting_args(ACTION_SET, value);

        if setting == Setting::RunState && value == RunState::Sleep.to_byte() {
            self.send(setting.command(), &args).await;
            self.state.run_state = Some(RunState::Sleep);
            debug!("Sleep requested, not waiting for acknowledgment");
            return Ok(value);
        }

        let frame = self.exchange(setting.command(), &args).await?;
        let acked = frame.value();
        self.record(setting, acked);
        Ok(acked)
    }

    /// Returns the reporting mode.
    pub async fn get_mode(&mut self, freshness: Freshness) -> Result<DeviceMode, Error> {
        if let (Freshness::Cached, Some(mode)) = (freshness, self.state.mode) {
            debug!("Using cached mode {:?}", mode);
            return Ok(mode);
        }
        let value = self.get(Setting::Mode).await?;
        DeviceMode::try_from(value).map_err(|value| Error::UnexpectedValue {
            command: CMD_MODE,
            value,
        })
    }

    /// Sets the reporting mode.
    pub async fn set_mode(&mut self, mode: DeviceMode) -> Result<DeviceMode, Error> {
        let value = self.set(Setting::Mode, mode.to_byte()).await?;
        DeviceMode::try_from(value).map_err(|value| Error::UnexpectedValue {
            command: CMD_MODE,
            value,
        })
    }

    /// Switches to Active mode, reporting every duty cycle.
    pub async fn set_active(&mut self) -> Result<DeviceMode, Error> {
        self.set_mode(DeviceMode::Active).await
    }

    /// Switches to Query mode, reporting only on request.
    pub async fn set_query(&mut self) -> Result<DeviceMode, Error> {
        self.set_mode(DeviceMode::Query).await
    }

    /// Returns the run state.
    pub async fn get_run_state(&mut self, freshness: Freshness) -> Result<RunState, Error> {
        if let (Freshness::Cached, Some(run_state)) = (freshness, self.state.run_state) {
            debug!("Using cached run state {:?}", run_state);
            return Ok(run_state);
        }
        let value = self.get(Setting::RunState).await?;
        RunState::try_from(value).map_err(|value| Error::UnexpectedValue {
            command: CMD_RUN_STATE,
            value,
        })
    }

    /// Sets the run state. See [`Sds011::set`] for how sleep is handled.
    pub async fn set_run_state(&mut self, run_state: RunState) -> Result<RunState, Error> {
        let value = self.set(Setting::RunState, run_state.to_byte()).await?;
        RunState::try_from(value).map_err(|value| Error::UnexpectedValue {
            command: CMD_RUN_STATE,
            value,
        })
    }

    /// Turns fan and laser off.
    pub async fn sleep(&mut self) -> Result<(), Error> {
        self.set_run_state(RunState::Sleep).await.map(|_| ())
    }

    /// Turns fan and laser on.
    pub async fn wake(&mut self) -> Result<(), Error> {
        self.set_run_state(RunState::Wake).await.map(|_| ())
    }

    /// Returns the duty cycle.
    pub async fn get_duty_cycle(&mut self, freshness: Freshness) -> Result<DutyCycle, Error> {
        if let (Freshness::Cached, Some(duty_cycle)) = (freshness, self.state.duty_cycle) {
            debug!("Using cached duty cycle {}", duty_cycle);
            return Ok(duty_cycle);
        }
        let value = self.get(Setting::DutyCycle).await?;
        DutyCycle::from_wire(value).ok_or(Error::UnexpectedValue {
            command: CMD_DUTY_CYCLE,
            value,
        })
    }

    /// Sets the duty cycle.
    pub async fn set_duty_cycle(&mut self, duty_cycle: DutyCycle) -> Result<DutyCycle, Error> {
        let value = self.set(Setting::DutyCycle, duty_cycle.minutes()).await?;
        DutyCycle::from_wire(value).ok_or(Error::UnexpectedValue {
            command: CMD_DUTY_CYCLE,
            value,
        })
    }

    /// Returns the sensor's ID.
    ///
    /// The protocol has no command for this; the firmware reply carries the
    /// ID, so a firmware query is issued instead.
    pub async fn get_id(&mut self, freshness: Freshness) -> Result<DeviceId, Error> {
        if let (Freshness::Cached, Some(id)) = (freshness, self.state.known_id()) {
            debug!("Using cached device ID {}", id);
            return Ok(id);
        }
        self.get_firmware(Freshness::Fresh).await?;
        Ok(self.state.id)
    }

    /// Changes the sensor's ID and returns the ID it acknowledged with.
    ///
    /// If the session addresses a specific sensor, it follows the sensor to its
    /// new ID.
    pub async fn set_id(&mut self, new_id: DeviceId) -> Result<DeviceId, Error> {
        debug!("Setting device ID to: {}", new_id);
        let mut args = [0u8; COMMAND_ARGS_LEN];
        args[10..12].copy_from_slice(&new_id.to_le_bytes());
        let frame = self.exchange(CMD_DEVICE_ID, &args).await?;

        let acked = frame.device_id();
        if !self.config.target.is_any() {
            self.config.target = acked;
        }
        debug!("Device ID updated to {}", acked);
        Ok(acked)
    }

    /// Returns the firmware version.
    pub async fn get_firmware(&mut self, freshness: Freshness) -> Result<Firmware, Error> {
        if let (Freshness::Cached, Some(firmware)) = (freshness, self.state.firmware) {
            debug!("Using cached firmware version {}", firmware);
            return Ok(firmware);
        }
        debug!("Getting firmware version (CMD 0x07)");
        let frame = self.exchange(CMD_FIRMWARE, &[0; COMMAND_ARGS_LEN]).await?;
        let firmware = Firmware {
            year: frame.payload[1],
            month: frame.payload[2],
            day: frame.payload[3],
        };
        self.state.firmware = Some(firmware);
        debug!("Firmware version: {}", firmware);
        Ok(firmware)
    }

    // Caches an acknowledged setting value.
    fn record(&mut self, setting: Setting, value: u8) {
        match setting {
            Setting::Mode => self.state.mode = DeviceMode::try_from(value).ok(),
            Setting::RunState => self.state.run_state = RunState::try_from(value).ok(),
            Setting::DutyCycle => self.state.duty_cycle = DutyCycle::from_wire(value),
        }
    }

    async fn exchange(
        &mut self,
        command: u8,
        args: &[u8; COMMAND_ARGS_LEN],
    ) -> Result<ResponseFrame, Error> {
        self.send(command, args).await;
        self.receive(Expect::Ack(command)).await
    }

    // Writes a command frame, retrying until the transport accepts it.
    async fn send(&mut self, command: u8, args: &[u8; COMMAND_ARGS_LEN]) {
        let frame = encode_command(command, args, self.config.target);
        debug!("Executing command: {:02X?}", frame);

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.write_frame(&frame).await {
                Ok(()) => break,
                Err(e) => warn!(
                    "Serial write failed (attempt {}), retrying: {:?}",
                    attempts, e
                ),
            }
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), S::Error> {
        self.serial.write_all(frame).await?;
        self.serial.flush().await
    }

    // Reads frames until one matches `expect`, skipping everything else.
    async fn receive(&mut self, expect: Expect) -> Result<ResponseFrame, Error> {
        loop {
            let raw = self.decoder.next_frame(&mut self.serial).await?;
            match ResponseFrame::parse(&raw) {
                Some(frame) if expect.matches(&frame) => {
                    self.state.id = frame.device_id();
                    return Ok(frame);
                }
                Some(_) => {
                    debug!("Skipping unrelated frame while waiting for {:?}", expect);
                }
                None => {
                    debug!("Malformed frame {:02X?}, resynchronizing", raw);
                    self.decoder.reject(&raw);
                }
            }
        }
    }
}
