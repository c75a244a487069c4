//! The device/sector-size/rotational-status probe, modeled as a trait.
//!
//! `spec.md` §1 treats `probe(path) -> (size, sector_size, rotational)` as an
//! assumed external collaborator (real block-device probing needs
//! `BLKGETSIZE64`/`BLKSSZGET`/`CDROM_GET_BLKSIZE` ioctls — see
//! `original_source/src/blkcache/device.py` — which is out of this crate's
//! scope). [`StatProbe`] below only covers the portable `stat(2)` fallback
//! that `device.py` itself falls back to for plain files, which
//! [`crate::cache::BlockCache::open`] needs as a default so it has something
//! to drive in tests that run against ordinary files rather than real
//! devices.

use std::path::Path;

use crate::error::Error;

/// The result of probing a device: its byte size, its reported sector size
/// (if any), and whether it spins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub size: u64,
    pub sector_size: Option<u32>,
    pub rotational: bool,
}

pub trait DeviceProbe {
    fn probe(&self, device: &Path) -> Result<ProbeResult, Error>;
}

/// Falls back to `stat(2)`'s file size, a 512-byte sector size, and
/// "not rotational" — the same defaults `device.py`'s final fallback path
/// uses for regular files.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatProbe;

impl DeviceProbe for StatProbe {
    fn probe(&self, device: &Path) -> Result<ProbeResult, Error> {
        let metadata = std::fs::metadata(device).map_err(Error::StdIo)?;
        Ok(ProbeResult {
            size: metadata.len(),
            sector_size: Some(512),
            rotational: false,
        })
    }
}
