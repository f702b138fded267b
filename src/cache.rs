use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::config::config as global_config;
use crate::error::RegMapError;
use crate::mb_define::{CACHE_FILE_EXT, FALLBACK_CACHE_FILE};

/// Flat-file store of downloaded register maps, one file per device UUID.
#[derive(Clone, Debug)]
pub struct CacheManager {
    dir: PathBuf,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(global_config().cache_dir.clone())
    }
}

impl CacheManager {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<uuid>.csv`, or the fallback name for devices without a UUID.
    #[must_use]
    pub fn file_name_for(uuid: Option<&str>) -> String {
        uuid.map_or_else(
            || FALLBACK_CACHE_FILE.to_string(),
            |u| format!("{u}.{CACHE_FILE_EXT}"),
        )
    }

    #[must_use]
    pub fn path_for(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.join(name)
    }

    #[must_use]
    pub fn exists(&self, name: impl AsRef<Path>) -> bool {
        self.path_for(name).is_file()
    }

    /// Lines of a cached map, `None` when the file does not exist.
    ///
    /// # Errors
    ///
    /// `RegMapError::Cache` when the file exists but cannot be read.
    pub fn read(&self, name: impl AsRef<Path>) -> Result<Option<Vec<String>>, RegMapError> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .map_err(|e| RegMapError::Cache(format!("read {}: {e}", path.display())))?;
        Ok(Some(text.lines().map(str::to_string).collect()))
    }

    /// Write `lines` under a timestamped header comment and return the path.
    ///
    /// # Errors
    ///
    /// `RegMapError::Cache` when the directory or file cannot be written.
    pub fn write<S: AsRef<str>>(
        &self,
        lines: &[S],
        uuid: Option<&str>,
    ) -> Result<PathBuf, RegMapError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| RegMapError::Cache(format!("create {}: {e}", self.dir.display())))?;
        let path = self.path_for(Self::file_name_for(uuid));
        let mut text = format!(
            "# modbus_regmap cache, map downloaded {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        for line in lines {
            text.push_str(line.as_ref());
            text.push('\n');
        }
        fs::write(&path, text)
            .map_err(|e| RegMapError::Cache(format!("write {}: {e}", path.display())))?;
        log::info!("register map cached in {}", path.display());
        Ok(path)
    }
}
