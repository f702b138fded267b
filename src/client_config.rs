use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::config::config as global_config;
use crate::endpoint::ConnectionTarget;
use crate::error::RegMapError;
use crate::mb_define::{
    DEFAULT_BAUD_RATE, DEFAULT_TCP_PORT, DEFAULT_UNIT_ID, MAP_ADDRESS, MAP_WINDOW_WORDS,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How a client acquires its map and polls.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOptions {
    /// Map file under the cache directory, tried before the device.
    pub map_path: Option<PathBuf>,
    /// Reuse a cached map once the device announces its UUID.
    pub use_cached_map: bool,
    pub cache_dir: PathBuf,
    pub map_address: u16,
    pub map_window_words: u16,
    pub poll_interval: Duration,
    /// Registers polled initially; all of them when `None`.
    pub query_filter: Option<Vec<String>>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            map_path: None,
            use_cached_map: true,
            cache_dir: global_config().cache_dir.clone(),
            map_address: MAP_ADDRESS,
            map_window_words: MAP_WINDOW_WORDS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            query_filter: None,
        }
    }
}

impl ClientOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    #[must_use]
    pub fn with_map_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.map_path = Some(path.into());
        self
    }
    #[must_use]
    pub const fn with_cached_map(mut self, use_cached_map: bool) -> Self {
        self.use_cached_map = use_cached_map;
        self
    }
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }
    #[must_use]
    pub const fn with_map_window(mut self, address: u16, words: u16) -> Self {
        self.map_address = address;
        self.map_window_words = words;
        self
    }
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
    #[must_use]
    pub fn with_query_filter<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.query_filter = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionSection {
    pub ip: String,
    pub port: u16,
    /// Serial device; when set the client talks Modbus RTU and ignores `ip`/`port`.
    pub serial_port: Option<String>,
    pub baud_rate: u32,
    pub unit_id: u8,
    /// 0 waits forever.
    pub timeout_ms: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".into(),
            port: DEFAULT_TCP_PORT,
            serial_port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            unit_id: DEFAULT_UNIT_ID,
            timeout_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MapSection {
    pub path: Option<PathBuf>,
    pub use_cached_map: bool,
    pub cache_dir: Option<PathBuf>,
}

impl Default for MapSection {
    fn default() -> Self {
        Self {
            path: None,
            use_cached_map: true,
            cache_dir: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PollSection {
    pub interval_ms: u64,
    pub query: Option<Vec<String>>,
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            query: None,
        }
    }
}

/// Client settings file.
///
/// ```toml
/// [connection]
/// ip = "192.168.0.20"
/// port = 502
/// unit_id = 1
/// timeout_ms = 1000
/// # or, for an RTU device:
/// # serial_port = "/dev/ttyUSB0"
/// # baud_rate = 19200
///
/// [map]
/// use_cached_map = true
///
/// [poll]
/// interval_ms = 500
/// query = ["TEMP", "STATUS"]
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub connection: ConnectionSection,
    pub map: MapSection,
    pub poll: PollSection,
}

/// 1-based line and column of a byte offset.
fn line_col(text: &str, offset: usize) -> (usize, usize) {
    let before = &text[..offset.min(text.len())];
    let line = before.matches('\n').count() + 1;
    let col = before.rfind('\n').map_or(before.len(), |p| before.len() - p - 1) + 1;
    (line, col)
}

impl FromStr for ClientConfig {
    type Err = RegMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(|e| {
            let msg = e.message().to_string();
            match e.span() {
                Some(span) => {
                    let (line, col) = line_col(s, span.start);
                    RegMapError::Config(format!("client config parse error at {line}:{col}: {msg}"))
                }
                None => RegMapError::Config(format!("client config parse error: {msg}")),
            }
        })
    }
}

impl ClientConfig {
    /// # Errors
    ///
    /// `RegMapError::Config` when the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegMapError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RegMapError::Config(format!("read {}: {e}", path.display())))?;
        text.parse()
    }

    #[must_use]
    pub fn target(&self) -> ConnectionTarget {
        let c = &self.connection;
        match &c.serial_port {
            Some(port) => ConnectionTarget::serial(port.clone(), c.baud_rate, c.unit_id),
            None => ConnectionTarget::direct(&c.ip, c.port, c.unit_id),
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        match self.connection.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    #[must_use]
    pub fn options(&self) -> ClientOptions {
        let mut options = ClientOptions::new()
            .with_cached_map(self.map.use_cached_map)
            .with_poll_interval(Duration::from_millis(self.poll.interval_ms));
        if let Some(path) = &self.map.path {
            options = options.with_map_path(path);
        }
        if let Some(dir) = &self.map.cache_dir {
            options = options.with_cache_dir(dir);
        }
        if let Some(names) = &self.poll.query {
            options = options.with_query_filter(names.iter().cloned());
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Link;

    #[test]
    fn full_file() {
        let cfg: ClientConfig = r#"
[connection]
ip = "10.1.2.3"
port = 1502
unit_id = 7
timeout_ms = 0

[map]
path = "dev.csv"
use_cached_map = false
cache_dir = "/tmp/maps"

[poll]
interval_ms = 250
query = ["TEMP"]
"#
        .parse()
        .unwrap();
        let t = cfg.target();
        assert_eq!(
            t.link,
            Link::Tcp {
                addr: "10.1.2.3:1502".into()
            }
        );
        assert_eq!(t.unit_id, 7);
        assert_eq!(cfg.timeout(), None);
        let o = cfg.options();
        assert_eq!(o.map_path, Some(PathBuf::from("dev.csv")));
        assert!(!o.use_cached_map);
        assert_eq!(o.cache_dir, PathBuf::from("/tmp/maps"));
        assert_eq!(o.poll_interval, Duration::from_millis(250));
        assert_eq!(o.query_filter, Some(vec!["TEMP".to_string()]));
    }

    #[test]
    fn empty_file_uses_defaults() {
        let cfg: ClientConfig = "".parse().unwrap();
        assert_eq!(cfg, ClientConfig::default());
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(1)));
        assert!(cfg.options().use_cached_map);
        assert_eq!(cfg.target(), ConnectionTarget::direct("127.0.0.1", 502, 1));
    }

    #[test]
    fn serial_port_selects_rtu() {
        let cfg: ClientConfig = "[connection]\nserial_port = \"COM31\"\nunit_id = 2\n"
            .parse()
            .unwrap();
        assert_eq!(
            cfg.target(),
            ConnectionTarget::serial("COM31", DEFAULT_BAUD_RATE, 2)
        );
        let cfg: ClientConfig = "[connection]\nserial_port = \"/dev/ttyS1\"\nbaud_rate = 9600\n"
            .parse()
            .unwrap();
        assert_eq!(
            cfg.target().link,
            Link::Rtu {
                port: "/dev/ttyS1".into(),
                baud_rate: 9600
            }
        );
    }

    #[test]
    fn parse_error_reports_position() {
        let err = "[connection]\nport = \"x\"\n"
            .parse::<ClientConfig>()
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("at 2:"), "{msg}");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!("[poll]\nintervall_ms = 5\n".parse::<ClientConfig>().is_err());
    }
}
