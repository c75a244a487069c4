//! Accumulates `config(key, value)` calls from the NBD host and validates
//! them into an [`EngineConfig`] on `config_complete()`.
//!
//! Grounded on `original_source/src/blkcache/plugin.py`'s module-level
//! `config`/`config_complete` functions, reshaped per `spec.md` §9's
//! re-architecture note into a builder the caller owns rather than global
//! mutable state.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::Error;

/// Where the effective block size for a device came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSizeSource {
    /// Supplied explicitly via the `block_size` or `block` config key.
    Manual,
    /// Taken from [`crate::probe::DeviceProbe`].
    Auto,
    /// Neither supplied nor probed; the optical-media default (2048) was used.
    Default,
}

impl BlockSizeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockSizeSource::Manual => "manual",
            BlockSizeSource::Auto => "auto",
            BlockSizeSource::Default => "default",
        }
    }
}

pub const DEFAULT_BLOCK_SIZE: u32 = 2048;
pub const FORMAT_VERSION: &str = "1.0";

/// Accumulates host `config(key, value)` calls.
#[derive(Debug, Default, Clone)]
pub struct ConfigBuilder {
    device: Option<PathBuf>,
    cache: Option<PathBuf>,
    /// From the `block_size` key. Outranks `block_override` (`spec.md` §9:
    /// `block_size` > `block` > probe > default).
    block_size: Option<u32>,
    /// From the `block` or `sector` keys.
    block_override: Option<u32>,
    metadata: BTreeMap<String, String>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores one `key=value` pair. Unknown keys are recorded in `metadata`
    /// rather than rejected, per `spec.md` §6.
    pub fn config(&mut self, key: &str, value: &str) {
        match key {
            "device" => self.device = Some(PathBuf::from(value)),
            "cache" => self.cache = Some(PathBuf::from(value)),
            "block_size" => {
                if let Ok(n) = value.parse() {
                    self.block_size = Some(n);
                } else {
                    self.metadata.insert(key.to_string(), value.to_string());
                }
            }
            "block" | "sector" => {
                if let Ok(n) = value.parse() {
                    self.block_override = Some(n);
                } else {
                    self.metadata.insert(key.to_string(), value.to_string());
                }
            }
            "metadata" => {
                for pair in value.split(',') {
                    if let Some((k, v)) = pair.split_once('=') {
                        self.metadata.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
            other => {
                self.metadata.insert(other.to_string(), value.to_string());
            }
        }
    }

    /// Validates that `device` is set and produces the finalized config.
    /// `cache` is also required by `spec.md` §6's table, but a missing
    /// `cache` is surfaced the same way: both are mandatory host inputs.
    pub fn complete(self) -> Result<EngineConfig, Error> {
        let device = self
            .device
            .ok_or_else(|| Error::Config("device= is required".into()))?;
        let cache = self
            .cache
            .ok_or_else(|| Error::Config("cache= is required".into()))?;
        let block_size = self.block_size.or(self.block_override);
        if let Some(n) = block_size {
            if n < 512 || !n.is_power_of_two() {
                return Err(Error::Config(format!(
                    "block size {n} must be a power of two >= 512"
                )));
            }
        }
        Ok(EngineConfig {
            device,
            cache,
            block_size,
            metadata: self.metadata,
        })
    }
}

/// Validated configuration, ready to open a [`crate::cache::BlockCache`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub device: PathBuf,
    pub cache: PathBuf,
    /// Explicit override from the `block_size` or `block`/`sector` config
    /// key; `None` means "resolve via probe, then default" (`spec.md` §9:
    /// `block_size` > `block` > probe > default).
    pub block_size: Option<u32>,
    pub metadata: BTreeMap<String, String>,
}

impl EngineConfig {
    /// Derives the mapfile path by appending `.log` to the cache path,
    /// preserving any existing extension (`spec.md` §6).
    pub fn mapfile_path(&self) -> PathBuf {
        let mut name = self
            .cache
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".log");
        self.cache.with_file_name(name)
    }
}
