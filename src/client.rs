use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::CacheManager;
use crate::client_config::{ClientConfig, ClientOptions};
use crate::codec::Value;
use crate::display::portray;
use crate::endpoint::ConnectionTarget;
use crate::error::RegMapError;
use crate::map_parser::{parse_map, DeviceLegend};
use crate::map_source::{AcquiredMap, DeviceMapSource, FileMapSource, MapOrigin, MapSource};
use crate::mb_client::MbClient;
use crate::poller::{
    sweep, PollScheduler, PollState, SharedStore, SharedTransport, SweepCallback, SweepReport,
};
use crate::register::Register;
use crate::store::{lock, RegisterKey, RegisterStore, SortOrder};
use crate::transport::RegisterTransport;

/// A register-map driven device client.
///
/// Cloning is cheap and every clone addresses the same registers, transport
/// and poll thread, so a clone can be moved into the sweep callback.
#[derive(Clone)]
pub struct RegMapClient {
    store: SharedStore,
    transport: SharedTransport,
    scheduler: PollScheduler,
    legend: Arc<DeviceLegend>,
    map_file: Option<Arc<PathBuf>>,
    poll_interval: Duration,
}

impl RegMapClient {
    /// Acquire and parse the register map through `transport`.
    ///
    /// # Errors
    ///
    /// Transport failures while streaming the map, or `RegMapError::EmptyMap`
    /// when no register could be parsed.
    pub fn connect<T>(transport: T, options: &ClientOptions) -> Result<Self, RegMapError>
    where
        T: RegisterTransport + 'static,
    {
        let mut transport: Box<dyn RegisterTransport> = Box::new(transport);
        let (mut store, legend, map_file) = acquire(&mut transport, options)?;
        if let Some(names) = &options.query_filter {
            store.apply_query_filter(names);
        }
        Ok(Self {
            store: Arc::new(Mutex::new(store)),
            transport: Arc::new(Mutex::new(transport)),
            scheduler: PollScheduler::new(),
            legend: Arc::new(legend),
            map_file: map_file.map(Arc::new),
            poll_interval: options.poll_interval,
        })
    }

    /// Connect over Modbus/TCP or RTU, as `target` says.
    ///
    /// # Errors
    ///
    /// As [`RegMapClient::connect`].
    pub fn open(
        target: ConnectionTarget,
        timeout: Option<Duration>,
        options: &ClientOptions,
    ) -> Result<Self, RegMapError> {
        log::info!("connecting to {}", target.describe());
        let link = MbClient::new(target)?.with_timeout(timeout);
        Self::connect(link, options)
    }

    /// Connect to a Modbus RTU device on a serial port.
    ///
    /// # Errors
    ///
    /// As [`RegMapClient::connect`].
    pub fn connect_serial(
        port: &str,
        baud_rate: u32,
        unit_id: u8,
        timeout: Option<Duration>,
        options: &ClientOptions,
    ) -> Result<Self, RegMapError> {
        Self::open(
            ConnectionTarget::serial(port, baud_rate, unit_id),
            timeout,
            options,
        )
    }

    /// Connect as described by a client settings file.
    ///
    /// # Errors
    ///
    /// As [`RegMapClient::connect`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, RegMapError> {
        Self::open(config.target(), config.timeout(), &config.options())
    }

    #[must_use]
    pub fn legend(&self) -> &DeviceLegend {
        &self.legend
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.legend.title.as_deref()
    }

    #[must_use]
    pub fn uuid(&self) -> Option<&str> {
        self.legend.uuid.as_deref()
    }

    /// Cache file written after a fresh download.
    #[must_use]
    pub fn map_file(&self) -> Option<&Path> {
        self.map_file.as_deref().map(PathBuf::as_path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.store).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.store).is_empty()
    }

    /// Run `f` on a register under the store lock.
    ///
    /// # Errors
    ///
    /// `RegMapError::Lookup` when nothing matches.
    pub fn with_register<'k, R>(
        &self,
        key: impl Into<RegisterKey<'k>>,
        f: impl FnOnce(&mut Register) -> R,
    ) -> Result<R, RegMapError> {
        let mut store = lock(&self.store);
        Ok(f(store.get_mut(key)?))
    }

    /// Snapshot of one register.
    ///
    /// # Errors
    ///
    /// `RegMapError::Lookup` when nothing matches.
    pub fn register<'k>(&self, key: impl Into<RegisterKey<'k>>) -> Result<Register, RegMapError> {
        self.with_register(key, |r| r.clone())
    }

    /// Last decoded value.
    ///
    /// # Errors
    ///
    /// `RegMapError::Lookup` when nothing matches.
    pub fn value<'k>(&self, key: impl Into<RegisterKey<'k>>) -> Result<Option<Value>, RegMapError> {
        self.with_register(key, |r| r.value().cloned())
    }

    /// Stage a raw-domain value; the next sweep writes it.
    ///
    /// # Errors
    ///
    /// `RegMapError::Lookup` when nothing matches.
    pub fn set<'k>(
        &self,
        key: impl Into<RegisterKey<'k>>,
        value: impl Into<Value>,
    ) -> Result<(), RegMapError> {
        let value = value.into();
        self.with_register(key, |r| r.stage_write(value))
    }

    /// # Errors
    ///
    /// `RegMapError::Lookup` when nothing matches.
    pub fn set_query<'k>(
        &self,
        key: impl Into<RegisterKey<'k>>,
        query: bool,
    ) -> Result<(), RegMapError> {
        self.with_register(key, |r| r.set_query(query))
    }

    /// # Errors
    ///
    /// `RegMapError::Lookup` when nothing matches.
    pub fn toggle_query<'k>(&self, key: impl Into<RegisterKey<'k>>) -> Result<bool, RegMapError> {
        self.with_register(key, |r| {
            r.toggle_query();
            r.query_enabled()
        })
    }

    pub fn apply_query_filter<S: AsRef<str>>(&self, names: &[S]) {
        lock(&self.store).apply_query_filter(names);
    }

    /// # Errors
    ///
    /// `RegMapError::Lookup` when nothing matches.
    pub fn portray<'k>(&self, key: impl Into<RegisterKey<'k>>) -> Result<String, RegMapError> {
        self.with_register(key, |r| portray(r))
    }

    /// Snapshot of all registers in map order.
    #[must_use]
    pub fn registers(&self) -> Vec<Register> {
        lock(&self.store).iter().cloned().collect()
    }

    #[must_use]
    pub fn names_sorted(&self, order: SortOrder, include_all: bool) -> Vec<String> {
        lock(&self.store).names_sorted(order, include_all)
    }

    #[must_use]
    pub fn snapshot_json(&self, include_all: bool) -> serde_json::Value {
        lock(&self.store).snapshot_json(include_all)
    }

    /// Perform one sweep on the calling thread.
    #[must_use]
    pub fn sweep_once(&self) -> SweepReport {
        sweep(&self.store, &self.transport)
    }

    /// Start the background sweep loop at the configured interval. The
    /// callback runs on the sweep thread after every sweep.
    ///
    /// # Errors
    ///
    /// `RegMapError::AlreadyPolling` when a loop is running.
    pub fn start_polling<F>(&self, callback: F) -> Result<(), RegMapError>
    where
        F: FnMut() + Send + 'static,
    {
        self.start_polling_every(self.poll_interval, Some(Box::new(callback)))
    }

    /// # Errors
    ///
    /// `RegMapError::AlreadyPolling` when a loop is running.
    pub fn start_polling_every(
        &self,
        interval: Duration,
        callback: Option<SweepCallback>,
    ) -> Result<(), RegMapError> {
        self.scheduler.start(
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            interval,
            callback,
        )
    }

    /// Stop the sweep loop; safe to call from the sweep callback.
    pub fn stop_polling(&self) {
        self.scheduler.stop();
    }

    #[must_use]
    pub fn poll_state(&self) -> PollState {
        self.scheduler.state()
    }
}

fn acquire(
    transport: &mut Box<dyn RegisterTransport>,
    options: &ClientOptions,
) -> Result<(RegisterStore, DeviceLegend, Option<PathBuf>), RegMapError> {
    let cache = CacheManager::new(options.cache_dir.clone());

    let mut acquired: Option<AcquiredMap> = None;
    if let Some(path) = &options.map_path {
        let mut source = FileMapSource::new(&cache, path);
        acquired = source.produce()?;
        if acquired.is_none() {
            log::warn!(
                "map file {} not usable, reading the map from the device",
                source.path().display()
            );
        }
    }
    let acquired = match acquired {
        Some(a) => a,
        None => DeviceMapSource::new(&mut **transport)
            .with_cache(options.use_cached_map.then_some(&cache))
            .with_window(options.map_address, options.map_window_words)
            .produce()?
            .ok_or(RegMapError::EmptyMap)?,
    };

    let (map, parsed_legend) = parse_map(&acquired.lines);
    let legend = DeviceLegend {
        title: parsed_legend.title.or(acquired.legend.title),
        uuid: parsed_legend.uuid.or(acquired.legend.uuid),
    };
    if map.is_empty() {
        log::error!("failed to read a register map from {}", legend.display_title());
        return Err(RegMapError::EmptyMap);
    }

    let mut map_file = None;
    match &acquired.origin {
        MapOrigin::Device => {
            log::info!(
                "{} registers were parsed from {}",
                map.len(),
                legend.display_title()
            );
            match cache.write(&acquired.lines, legend.uuid.as_deref()) {
                Ok(path) => map_file = Some(path),
                Err(e) => log::warn!("register map not cached: {e}"),
            }
        }
        MapOrigin::Cache(path) | MapOrigin::File(path) => {
            log::info!("{} registers were parsed from {}", map.len(), path.display());
        }
    }
    Ok((RegisterStore::from(map), legend, map_file))
}
