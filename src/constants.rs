// HEAD is the byte that marks the beginning of any frame (command or data).
pub const HEAD: u8 = 0xAA;

// TAIL is the byte that marks the end of any frame (command or data).
pub const TAIL: u8 = 0xAB;

// COMMAND_ID is the byte that identifies a command frame sent to the sensor.
pub const COMMAND_ID: u8 = 0xB4;

// DATA_REPORT_ID is the byte that identifies a measurement frame received from the sensor,
// either emitted on its own in active mode or as the reply to a query.
pub const DATA_REPORT_ID: u8 = 0xC0;

// REPLY_ID is the byte that identifies an acknowledgment frame received from the sensor
// in response to a command.
pub const REPLY_ID: u8 = 0xC5;

// Frame sizes on the wire.
pub const COMMAND_FRAME_LEN: usize = 19;
pub const RESPONSE_FRAME_LEN: usize = 10;

// Command bytes, the third byte of every command frame.
pub const CMD_MODE: u8 = 0x02;
pub const CMD_QUERY: u8 = 0x04;
pub const CMD_DEVICE_ID: u8 = 0x05;
pub const CMD_RUN_STATE: u8 = 0x06;
pub const CMD_FIRMWARE: u8 = 0x07;
pub const CMD_DUTY_CYCLE: u8 = 0x08;

// Sub-opcode carried in the first argument byte.
pub const ACTION_GET: u8 = 0x00;
pub const ACTION_SET: u8 = 0x01;

// Longest duty cycle the sensor accepts, in minutes.
pub const MAX_DUTY_CYCLE: u8 = 30;

// Serial settings expected by the sensor (8N1).
pub const BAUD_RATE: u32 = 9600;
