use std::path::{Path, PathBuf};

use crate::cache::CacheManager;
use crate::error::RegMapError;
use crate::map_parser::{DeviceLegend, LegendEvent};
use crate::mb_define::{MAP_ADDRESS, MAP_RESET_TEXT, MAP_WINDOW_WORDS};
use crate::transport::RegisterTransport;

/// Upper bound on window reads for one map download.
const MAX_MAP_CHUNKS: usize = 10_000;

/// Where an acquired map came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MapOrigin {
    /// Fully streamed from the device.
    Device,
    /// Cache file picked up after the device announced its UUID.
    Cache(PathBuf),
    /// Map file named by the caller.
    File(PathBuf),
}

#[derive(Clone, Debug)]
pub struct AcquiredMap {
    pub lines: Vec<String>,
    /// Legend as seen while producing the lines.
    pub legend: DeviceLegend,
    pub origin: MapOrigin,
}

pub trait MapSource {
    /// Produce the raw map lines. `Ok(None)` means the source has no map.
    ///
    /// # Errors
    ///
    /// Transport or file failures.
    fn produce(&mut self) -> Result<Option<AcquiredMap>, RegMapError>;
}

/// Streams the map from the device's map window.
pub struct DeviceMapSource<'a, T: RegisterTransport + ?Sized> {
    transport: &'a mut T,
    cache: Option<&'a CacheManager>,
    address: u16,
    window_words: u16,
}

impl<'a, T: RegisterTransport + ?Sized> DeviceMapSource<'a, T> {
    #[must_use]
    pub fn new(transport: &'a mut T) -> Self {
        Self {
            transport,
            cache: None,
            address: MAP_ADDRESS,
            window_words: MAP_WINDOW_WORDS,
        }
    }

    /// Enable the cache short-circuit once the device UUID is known.
    #[must_use]
    pub const fn with_cache(mut self, cache: Option<&'a CacheManager>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub const fn with_window(mut self, address: u16, window_words: u16) -> Self {
        self.address = address;
        self.window_words = window_words;
        self
    }

    fn cached_copy(&self, uuid: &str) -> Option<(Vec<String>, PathBuf)> {
        let cache = self.cache?;
        let name = CacheManager::file_name_for(Some(uuid));
        match cache.read(&name) {
            Ok(Some(lines)) => Some((lines, cache.path_for(&name))),
            Ok(None) => {
                log::info!("no cached map for {uuid}, downloading");
                None
            }
            Err(e) => {
                log::warn!("cached map for {uuid} unusable, downloading: {e}");
                None
            }
        }
    }
}

impl<T: RegisterTransport + ?Sized> MapSource for DeviceMapSource<'_, T> {
    fn produce(&mut self) -> Result<Option<AcquiredMap>, RegMapError> {
        self.transport
            .write_string(self.address, MAP_RESET_TEXT, self.window_words)?;
        let mut lines = Vec::new();
        let mut legend = DeviceLegend::default();
        for _ in 0..MAX_MAP_CHUNKS {
            let chunk = self.transport.read_string(self.address, self.window_words)?;
            if chunk.split('\0').next().map_or(true, str::is_empty) {
                log::debug!("map download complete, {} lines", lines.len());
                return Ok(Some(AcquiredMap {
                    lines,
                    legend,
                    origin: MapOrigin::Device,
                }));
            }
            for part in chunk.split('\0') {
                if part.is_empty() {
                    break;
                }
                if legend.observe(part) == LegendEvent::Uuid {
                    let cached = legend.uuid.as_deref().and_then(|u| self.cached_copy(u));
                    if let Some((cached_lines, path)) = cached {
                        log::info!("using cached map {}", path.display());
                        return Ok(Some(AcquiredMap {
                            lines: cached_lines,
                            legend,
                            origin: MapOrigin::Cache(path),
                        }));
                    }
                }
                lines.push(part.to_string());
            }
        }
        Err(RegMapError::Protocol(format!(
            "map window did not terminate after {MAX_MAP_CHUNKS} reads"
        )))
    }
}

/// Reads a map file, relative paths resolved under the cache directory.
pub struct FileMapSource {
    path: PathBuf,
}

impl FileMapSource {
    #[must_use]
    pub fn new(cache: &CacheManager, path: impl AsRef<Path>) -> Self {
        Self {
            path: cache.path_for(path),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MapSource for FileMapSource {
    fn produce(&mut self) -> Result<Option<AcquiredMap>, RegMapError> {
        if !self.path.is_file() {
            log::info!("map file {} not found", self.path.display());
            return Ok(None);
        }
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("map file {} unreadable: {e}", self.path.display());
                return Ok(None);
            }
        };
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let mut legend = DeviceLegend::default();
        for line in &lines {
            legend.observe(line);
        }
        Ok(Some(AcquiredMap {
            lines,
            legend,
            origin: MapOrigin::File(self.path.clone()),
        }))
    }
}
