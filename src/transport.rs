use std::future::Future;
use std::time::{Duration, Instant};

use tokio::net::lookup_host;
use tokio::time::timeout as tokio_timeout;
use tokio_modbus::client::{rtu, tcp, Context, Reader as _, Writer as _};
use tokio_modbus::slave::Slave;
use tokio_modbus::ExceptionCode;
use tokio_serial::SerialPortBuilderExt;

use crate::config::config as global_config;
use crate::endpoint::{ConnectionTarget, Link};
use crate::error::RegMapError;
use crate::mb_define::{exception_name, MAX_READ_WORDS, MAX_WRITE_WORDS};

/// Blocking register-level transaction primitives.
///
/// Implementations are half-duplex: one outstanding transaction at a time,
/// which `&mut self` enforces. Failures are reported as communication errors
/// (`RegMapError::is_communication`).
pub trait RegisterTransport: Send {
    /// Read `count` consecutive 16-bit holding registers.
    fn read_words(&mut self, address: u16, count: u16) -> Result<Vec<u16>, RegMapError>;

    /// Write `values` to consecutive holding registers.
    fn write_words(&mut self, address: u16, values: &[u16]) -> Result<(), RegMapError>;

    /// Read `words` registers and interpret them as Latin-1 text (high byte first).
    /// Embedded NULs are preserved.
    fn read_string(&mut self, address: u16, words: u16) -> Result<String, RegMapError> {
        let raw = self.read_words(address, words)?;
        Ok(words_to_latin1(&raw))
    }

    /// Write `text` as Latin-1, space padded to exactly `words` registers.
    fn write_string(&mut self, address: u16, text: &str, words: u16) -> Result<(), RegMapError> {
        let raw = latin1_to_words(text, words)?;
        self.write_words(address, &raw)
    }
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    fn read_words(&mut self, address: u16, count: u16) -> Result<Vec<u16>, RegMapError> {
        (**self).read_words(address, count)
    }
    fn write_words(&mut self, address: u16, values: &[u16]) -> Result<(), RegMapError> {
        (**self).write_words(address, values)
    }
    fn read_string(&mut self, address: u16, words: u16) -> Result<String, RegMapError> {
        (**self).read_string(address, words)
    }
    fn write_string(&mut self, address: u16, text: &str, words: u16) -> Result<(), RegMapError> {
        (**self).write_string(address, text, words)
    }
}

/// Words to text, two Latin-1 characters per word, high byte first.
#[must_use]
pub fn words_to_latin1(words: &[u16]) -> String {
    words
        .iter()
        .flat_map(|w| w.to_be_bytes())
        .map(char::from)
        .collect()
}

/// Text to exactly `words` registers, space padded.
///
/// # Errors
///
/// Fails when the text has characters outside Latin-1 or does not fit.
pub fn latin1_to_words(text: &str, words: u16) -> Result<Vec<u16>, RegMapError> {
    let capacity = usize::from(words) * 2;
    let mut bytes = Vec::with_capacity(capacity);
    for ch in text.chars() {
        let b = u8::try_from(u32::from(ch)).map_err(|_| {
            RegMapError::Protocol(format!("character {ch:?} is not representable in Latin-1"))
        })?;
        bytes.push(b);
    }
    if bytes.len() > capacity {
        return Err(RegMapError::Protocol(format!(
            "text of {} bytes does not fit into {words} registers",
            bytes.len()
        )));
    }
    bytes.resize(capacity, b' ');
    Ok(bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

/// Reject request sizes a holding-register transaction cannot carry.
fn check_count(count: usize, max: u16, what: &str) -> Result<(), RegMapError> {
    if count == 0 || count > usize::from(max) {
        return Err(RegMapError::Protocol(format!(
            "{what} of {count} registers is outside 1..={max}"
        )));
    }
    Ok(())
}

async fn bounded<F: Future>(timeout: Option<Duration>, fut: F) -> Result<F::Output, RegMapError> {
    match timeout {
        Some(dur) => tokio_timeout(dur, fut).await.map_err(|_| RegMapError::Timeout),
        None => Ok(fut.await),
    }
}

async fn open(target: &ConnectionTarget, timeout: Option<Duration>) -> Result<Context, RegMapError> {
    let slave = Slave(target.unit_id);
    match &target.link {
        Link::Tcp { addr } => {
            let addrs = lookup_host(addr.as_str())
                .await
                .map_err(|e| RegMapError::Communication(format!("bad address {addr}: {e}")))?;
            let connect_timeout = timeout.unwrap_or(Duration::from_secs(3));
            let mut last_err: Option<RegMapError> = None;
            for remote in addrs {
                match bounded(Some(connect_timeout), tcp::connect_slave(remote, slave)).await {
                    Ok(Ok(ctx)) => return Ok(ctx),
                    Ok(Err(e)) => {
                        last_err = Some(RegMapError::Communication(format!(
                            "connect error {remote}: {e}"
                        )));
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            Err(last_err.unwrap_or_else(|| {
                RegMapError::Communication(format!("no address resolved for {addr}"))
            }))
        }
        Link::Rtu { port, baud_rate } => {
            let stream = tokio_serial::new(port.as_str(), *baud_rate)
                .open_native_async()
                .map_err(|e| {
                    RegMapError::Communication(format!("failed to open serial port {port}: {e}"))
                })?;
            Ok(rtu::attach_slave(stream, slave))
        }
    }
}

/// One Modbus session (TCP socket or serial port) to one target.
///
/// The link is opened lazily, reused between transactions while it stays
/// younger than the configured idle limit, and dropped after any transport
/// failure or timeout. Exception replies keep the link.
pub struct ModbusSession {
    target: ConnectionTarget,
    cached: Option<(Context, Instant)>,
}

impl ModbusSession {
    #[must_use]
    pub const fn new(target: ConnectionTarget) -> Self {
        Self {
            target,
            cached: None,
        }
    }

    #[must_use]
    pub const fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    async fn context(&mut self, timeout: Option<Duration>) -> Result<&mut Context, RegMapError> {
        let idle = Duration::from_secs(global_config().conn_idle_secs);
        let ctx = match self.cached.take() {
            Some((ctx, last_used)) if last_used.elapsed() <= idle => ctx,
            _ => {
                log::debug!("opening {}", self.target.describe());
                open(&self.target, timeout).await?
            }
        };
        Ok(&mut self.cached.insert((ctx, Instant::now())).0)
    }

    fn settle<T>(
        &mut self,
        outcome: Result<Result<Result<T, ExceptionCode>, tokio_modbus::Error>, RegMapError>,
        address: u16,
    ) -> Result<T, RegMapError> {
        match outcome {
            Ok(Ok(Ok(v))) => Ok(v),
            Ok(Ok(Err(code))) => Err(RegMapError::Protocol(format!(
                "device exception {} at {address}",
                exception_name(code)
            ))),
            Ok(Err(e)) => {
                self.invalidate();
                Err(RegMapError::Communication(e.to_string()))
            }
            Err(e) => {
                self.invalidate();
                Err(e)
            }
        }
    }

    /// Read holding registers.
    ///
    /// # Errors
    ///
    /// Communication errors, timeouts, and `RegMapError::Protocol` for
    /// exception replies or short answers.
    pub async fn read_holding(
        &mut self,
        address: u16,
        count: u16,
        timeout: Option<Duration>,
    ) -> Result<Vec<u16>, RegMapError> {
        check_count(usize::from(count), MAX_READ_WORDS, "read")?;
        let ctx = self.context(timeout).await?;
        let outcome = bounded(timeout, ctx.read_holding_registers(address, count)).await;
        let words = self.settle(outcome, address)?;
        if words.len() != usize::from(count) {
            return Err(RegMapError::Protocol(format!(
                "expected {count} registers at {address}, got {}",
                words.len()
            )));
        }
        if global_config().log_payloads {
            log::debug!("[MB read] {count}@{address} -> {words:04X?}");
        }
        Ok(words)
    }

    /// Write holding registers (function 0x10).
    ///
    /// # Errors
    ///
    /// As [`ModbusSession::read_holding`].
    pub async fn write_multiple(
        &mut self,
        address: u16,
        values: &[u16],
        timeout: Option<Duration>,
    ) -> Result<(), RegMapError> {
        check_count(values.len(), MAX_WRITE_WORDS, "write")?;
        if global_config().log_payloads {
            log::debug!("[MB write] {}@{address} <- {values:04X?}", values.len());
        }
        let ctx = self.context(timeout).await?;
        let outcome = bounded(timeout, ctx.write_multiple_registers(address, values)).await;
        self.settle(outcome, address)
    }
}
