//! Modbus / register-map protocol definitions.
//!
//! Constants shared by the transport and map-acquisition modules:
//! - holding-register request limits and link defaults
//! - the self-describing register map window (address, width, reset text)
//! - legend sentinels and cache naming
//! - exception code names

use tokio_modbus::ExceptionCode;

/// Holding-register count limits of a single request.
pub const MAX_READ_WORDS: u16 = 125;
pub const MAX_WRITE_WORDS: u16 = 123;

/// Register address of the streamed register map window.
pub const MAP_ADDRESS: u16 = 130;
/// Width of the register map window in words.
pub const MAP_WINDOW_WORDS: u16 = 120;
/// Text written to the map window to rewind the device's map cursor.
pub const MAP_RESET_TEXT: &str = "-1";

/// A device reporting this UUID has no identity; treat as absent.
pub const NULL_UUID: &str = "00000000-0000-0000-0000-000000000000";

pub const DEFAULT_CACHE_DIR: &str = "ModbusRegistermaps";
/// Cache file used when the device did not report a UUID.
pub const FALLBACK_CACHE_FILE: &str = "registermap.csv";
pub const CACHE_FILE_EXT: &str = "csv";

pub const DEFAULT_TCP_PORT: u16 = 502;
pub const DEFAULT_UNIT_ID: u8 = 1;
pub const DEFAULT_BAUD_RATE: u32 = 19_200;

/// Short static name of an exception reply.
#[must_use]
pub fn exception_name(code: ExceptionCode) -> &'static str {
    match code {
        ExceptionCode::IllegalFunction => "ILLEGAL FUNCTION",
        ExceptionCode::IllegalDataAddress => "ILLEGAL DATA ADDRESS",
        ExceptionCode::IllegalDataValue => "ILLEGAL DATA VALUE",
        ExceptionCode::ServerDeviceFailure => "SERVER DEVICE FAILURE",
        ExceptionCode::Acknowledge => "ACKNOWLEDGE",
        ExceptionCode::ServerDeviceBusy => "SERVER DEVICE BUSY",
        ExceptionCode::MemoryParityError => "MEMORY PARITY ERROR",
        ExceptionCode::GatewayPathUnavailable => "GATEWAY PATH UNAVAILABLE",
        ExceptionCode::GatewayTargetDevice => "GATEWAY TARGET DEVICE FAILED TO RESPOND",
        #[allow(unreachable_patterns)]
        _ => "UNKNOWN EXCEPTION",
    }
}
