use crate::mb_define::{DEFAULT_TCP_PORT, DEFAULT_UNIT_ID};

/// Physical link to a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Link {
    /// Modbus/TCP, address as "host:port".
    Tcp { addr: String },
    /// Modbus RTU on a serial port (8N1).
    Rtu { port: String, baud_rate: u32 },
}

/// Represents a connection target (TCP endpoint or serial port) including the unit id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub link: Link,
    /// Modbus unit (slave) id addressed behind the link
    pub unit_id: u8,
}

const DEFAULT_IP: &str = "127.0.0.1";

impl ConnectionTarget {
    #[must_use]
    pub fn new() -> Self {
        Self::direct(DEFAULT_IP, DEFAULT_TCP_PORT, DEFAULT_UNIT_ID)
    }
    #[must_use]
    pub const fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }
    /// Target a device directly by host, port and unit id.
    #[must_use]
    pub fn direct(ip: impl AsRef<str>, port: u16, unit_id: u8) -> Self {
        Self {
            link: Link::Tcp {
                addr: format!("{}:{port}", ip.as_ref()),
            },
            unit_id,
        }
    }
    /// Target a device on a serial line, e.g. `/dev/ttyUSB0` or `COM31`.
    #[must_use]
    pub fn serial(port: impl Into<String>, baud_rate: u32, unit_id: u8) -> Self {
        Self {
            link: Link::Rtu {
                port: port.into(),
                baud_rate,
            },
            unit_id,
        }
    }
    /// Human readable link name for log lines.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.link {
            Link::Tcp { addr } => format!("tcp://{addr}#{}", self.unit_id),
            Link::Rtu { port, baud_rate } => format!("rtu://{port}@{baud_rate}#{}", self.unit_id),
        }
    }
}
impl Default for ConnectionTarget {
    fn default() -> Self {
        Self::new()
    }
}
