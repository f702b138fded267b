use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::time::sleep;

use crate::config::config as global_config;
use crate::endpoint::ConnectionTarget;
use crate::error::RegMapError;
use crate::transport::{ModbusSession, RegisterTransport};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Blocking Modbus holding-register client (TCP or RTU).
///
/// `MbClient` keeps the connection target and a private single-threaded tokio
/// runtime; every transaction blocks the calling thread until the response
/// arrives or the timeout expires. Do not call it from inside another tokio
/// runtime: the poll scheduler runs on a plain thread for that reason.
pub struct MbClient {
    pub timeout: Option<Duration>,
    session: ModbusSession,
    runtime: Runtime,
}

impl MbClient {
    /// # Errors
    ///
    /// Fails when the internal runtime cannot be created.
    pub fn new(target: ConnectionTarget) -> Result<Self, RegMapError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            session: ModbusSession::new(target),
            timeout: Some(DEFAULT_TIMEOUT),
            runtime,
        })
    }

    /// `None` waits forever.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn target(&self) -> &ConnectionTarget {
        self.session.target()
    }

    /// Run `op` with automatic retries and exponential backoff.
    ///
    /// Exception replies come from a live device and are returned at once.
    fn with_retry<T>(
        &mut self,
        label: &str,
        mut op: impl FnMut(&Runtime, &mut ModbusSession, Option<Duration>) -> Result<T, RegMapError>,
    ) -> Result<T, RegMapError> {
        let attempts: usize = global_config().tcp_retry_attempts.max(1);
        let base_backoff_ms: u64 = global_config().tcp_retry_backoff_ms;

        let mut attempt = 1;
        loop {
            match op(&self.runtime, &mut self.session, self.timeout) {
                Ok(v) => return Ok(v),
                Err(e @ RegMapError::Protocol(_)) => return Err(e),
                Err(e) => {
                    log::warn!(
                        "[MB RETRY] {label} attempt {attempt}/{attempts} failed for {}: {e}",
                        self.session.target().describe()
                    );
                    if attempt >= attempts {
                        return Err(e);
                    }
                    // cap the exponent to avoid unbounded shifts
                    let exp = u32::try_from(attempt.saturating_sub(1).min(16)).unwrap_or(16);
                    let backoff = base_backoff_ms.saturating_mul(2u64.pow(exp));
                    self.runtime.block_on(sleep(Duration::from_millis(backoff)));
                    attempt += 1;
                }
            }
        }
    }
}

impl RegisterTransport for MbClient {
    fn read_words(&mut self, address: u16, count: u16) -> Result<Vec<u16>, RegMapError> {
        self.with_retry("read_holding", |rt, session, timeout| {
            rt.block_on(session.read_holding(address, count, timeout))
        })
    }

    fn write_words(&mut self, address: u16, values: &[u16]) -> Result<(), RegMapError> {
        self.with_retry("write_multiple", |rt, session, timeout| {
            rt.block_on(session.write_multiple(address, values, timeout))
        })
    }
}
