use thiserror::Error;

/// Errors surfaced by the SDS011 session.
///
/// Write failures and malformed frames never show up here: writes are retried
/// and bad frames are skipped as line noise.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Duty cycle outside of 0-30 minutes.
    #[error("duty cycle of {0} minutes is out of range (0-30)")]
    InvalidDutyCycle(u8),

    /// Device ID that does not fit in two bytes.
    #[error("device id {0:#X} is out of range (0x0000-0xFFFF)")]
    InvalidDeviceId(u32),

    /// Value that has no meaning for the setting it is written to.
    #[error("invalid value 0x{value:02X} for command 0x{command:02X}")]
    InvalidValue {
        /// Command byte the value was meant for.
        command: u8,
        /// Rejected raw value.
        value: u8,
    },

    /// The sensor acknowledged a value this crate cannot represent.
    #[error("unexpected value 0x{value:02X} in reply to command 0x{command:02X}")]
    UnexpectedValue {
        /// Command byte that was acknowledged.
        command: u8,
        /// Raw value carried by the acknowledgment.
        value: u8,
    },

    /// The transport reported end of stream.
    #[error("serial transport reached end of stream")]
    Disconnected,
}
