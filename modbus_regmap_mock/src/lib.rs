//! A simulated self-describing Modbus device.
//!
//! [`SimDevice`] holds a register map and a holding-register table. It streams
//! the map through the map window the way a real device does, answers plain
//! register reads and writes, records every transaction and can be told to
//! fail on chosen addresses. Use it in-process as a
//! [`modbus_regmap::RegisterTransport`] or over the network through
//! [`server::MockServer`].

pub mod server;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use modbus_regmap::error::RegMapError;
use modbus_regmap::mb_define::{
    exception_name, MAP_ADDRESS, MAP_RESET_TEXT, MAP_WINDOW_WORDS, MAX_READ_WORDS,
    MAX_WRITE_WORDS,
};
use modbus_regmap::transport::{words_to_latin1, RegisterTransport};
use tokio_modbus::ExceptionCode;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transaction {
    Read { address: u16, count: u16 },
    Write { address: u16, values: Vec<u16> },
}

#[derive(Debug)]
struct DeviceState {
    map_address: u16,
    window_words: u16,
    windows: Vec<Vec<u16>>,
    cursor: usize,
    map_reads: usize,
    registers: HashMap<u16, u16>,
    faults: HashSet<u16>,
    log: Vec<Transaction>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            map_address: MAP_ADDRESS,
            window_words: MAP_WINDOW_WORDS,
            windows: Vec::new(),
            cursor: 0,
            map_reads: 0,
            registers: HashMap::new(),
            faults: HashSet::new(),
            log: Vec::new(),
        }
    }
}

/// Pack NUL-terminated lines into fixed windows; a line never spans two windows.
fn pack_windows(lines: &[String], window_words: u16) -> Vec<Vec<u16>> {
    let capacity = usize::from(window_words) * 2;
    let mut windows = Vec::new();
    let mut current: Vec<u8> = Vec::with_capacity(capacity);
    for line in lines {
        let mut bytes: Vec<u8> = line
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect();
        if bytes.is_empty() {
            continue;
        }
        if bytes.len() + 1 > capacity {
            tracing::warn!("map line truncated to the window size: {line:?}");
            bytes.truncate(capacity - 1);
        }
        if current.len() + bytes.len() + 1 > capacity {
            windows.push(std::mem::take(&mut current));
        }
        current.extend_from_slice(&bytes);
        current.push(0);
    }
    if !current.is_empty() {
        windows.push(current);
    }
    windows
        .into_iter()
        .map(|mut w| {
            w.resize(capacity, 0);
            w.chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect()
        })
        .collect()
}

/// Shared handle to one simulated device; clones see the same state.
#[derive(Clone, Debug, Default)]
pub struct SimDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SimDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Device with the given map lines.
    #[must_use]
    pub fn with_map<S: AsRef<str>>(self, lines: &[S]) -> Self {
        self.set_map(lines);
        self
    }

    /// Replace the served map and rewind the map cursor.
    pub fn set_map<S: AsRef<str>>(&self, lines: &[S]) {
        let lines: Vec<String> = lines.iter().map(|l| l.as_ref().to_string()).collect();
        let mut st = self.state();
        st.windows = pack_windows(&lines, st.window_words);
        st.cursor = 0;
    }

    /// Number of map windows a full download reads, the empty one included.
    #[must_use]
    pub fn map_window_count(&self) -> usize {
        self.state().windows.len() + 1
    }

    /// Map window reads since the last reset.
    #[must_use]
    pub fn map_reads(&self) -> usize {
        self.state().map_reads
    }

    pub fn set_words(&self, address: u16, values: &[u16]) {
        let mut st = self.state();
        for (a, v) in (address..).zip(values) {
            st.registers.insert(a, *v);
        }
    }

    #[must_use]
    pub fn words(&self, address: u16, count: u16) -> Vec<u16> {
        let st = self.state();
        (address..address.saturating_add(count))
            .map(|a| st.registers.get(&a).copied().unwrap_or(0))
            .collect()
    }

    /// Make every transaction touching `address` fail.
    pub fn inject_fault(&self, address: u16) {
        self.state().faults.insert(address);
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// Plain register transactions, map window traffic excluded.
    #[must_use]
    pub fn transactions(&self) -> Vec<Transaction> {
        self.state().log.clone()
    }

    pub fn clear_transactions(&self) {
        self.state().log.clear();
    }

    /// Serve a read; `Err` carries the Modbus exception reply.
    pub fn read_holding(&self, address: u16, count: u16) -> Result<Vec<u16>, ExceptionCode> {
        if count == 0 || count > MAX_READ_WORDS {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let mut st = self.state();
        if address == st.map_address && count == st.window_words {
            let window = st
                .windows
                .get(st.cursor)
                .cloned()
                .unwrap_or_else(|| vec![0; usize::from(count)]);
            st.cursor += 1;
            st.map_reads += 1;
            return Ok(window);
        }
        if (address..address.saturating_add(count)).any(|a| st.faults.contains(&a)) {
            tracing::debug!("injected read fault at {address}");
            return Err(ExceptionCode::ServerDeviceFailure);
        }
        st.log.push(Transaction::Read { address, count });
        Ok((address..address.saturating_add(count))
            .map(|a| st.registers.get(&a).copied().unwrap_or(0))
            .collect())
    }

    /// Serve a write; `Err` carries the Modbus exception reply.
    pub fn write_holding(&self, address: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        let count = u16::try_from(values.len()).unwrap_or(u16::MAX);
        if count == 0 || count > MAX_WRITE_WORDS {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let mut st = self.state();
        if address == st.map_address && words_to_latin1(values).trim_end() == MAP_RESET_TEXT {
            tracing::debug!("map cursor reset");
            st.cursor = 0;
            st.map_reads = 0;
            return Ok(());
        }
        if (address..address.saturating_add(count)).any(|a| st.faults.contains(&a)) {
            tracing::debug!("injected write fault at {address}");
            return Err(ExceptionCode::ServerDeviceFailure);
        }
        st.log.push(Transaction::Write {
            address,
            values: values.to_vec(),
        });
        for (a, v) in (address..).zip(values) {
            st.registers.insert(a, *v);
        }
        Ok(())
    }
}

fn exception(code: ExceptionCode, address: u16) -> RegMapError {
    RegMapError::Protocol(format!(
        "device exception {} at {address}",
        exception_name(code)
    ))
}

impl RegisterTransport for SimDevice {
    fn read_words(&mut self, address: u16, count: u16) -> Result<Vec<u16>, RegMapError> {
        self.read_holding(address, count)
            .map_err(|c| exception(c, address))
    }

    fn write_words(&mut self, address: u16, values: &[u16]) -> Result<(), RegMapError> {
        self.write_holding(address, values)
            .map_err(|c| exception(c, address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_never_span_windows() {
        let long = "x".repeat(200);
        let windows = pack_windows(&[long.clone(), long], 120);
        assert_eq!(windows.len(), 2);
        assert!(windows.iter().all(|w| w.len() == 120));
    }

    #[test]
    fn map_stream_rewinds_on_reset() {
        let mut dev = SimDevice::new().with_map(&["# title: modbus register map for Sim", "1,1,1,0,\"A\",\">H\",\"\",\"\",\"\""]);
        let first = dev.read_string(MAP_ADDRESS, MAP_WINDOW_WORDS).unwrap();
        assert!(first.starts_with("# title"));
        let end = dev.read_string(MAP_ADDRESS, MAP_WINDOW_WORDS).unwrap();
        assert!(end.starts_with('\0'));
        dev.write_string(MAP_ADDRESS, MAP_RESET_TEXT, MAP_WINDOW_WORDS)
            .unwrap();
        assert_eq!(dev.read_string(MAP_ADDRESS, MAP_WINDOW_WORDS).unwrap(), first);
        assert!(dev.transactions().is_empty());
    }

    #[test]
    fn faults_and_log() {
        let mut dev = SimDevice::new();
        dev.write_words(10, &[1, 2]).unwrap();
        assert_eq!(dev.read_words(10, 2).unwrap(), vec![1, 2]);
        dev.inject_fault(11);
        let err = dev.read_words(10, 2).unwrap_err();
        assert!(err.is_communication());
        assert!(err.to_string().contains("SERVER DEVICE FAILURE"), "{err}");
        assert!(dev.read_words(12, 1).is_ok());
        assert_eq!(
            dev.transactions(),
            vec![
                Transaction::Write {
                    address: 10,
                    values: vec![1, 2]
                },
                Transaction::Read {
                    address: 10,
                    count: 2
                },
                Transaction::Read {
                    address: 12,
                    count: 1
                },
            ]
        );
    }
}
