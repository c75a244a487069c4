//! A read-through block cache that exports a device over NBD while
//! recording per-region read outcomes to a ddrescue-compatible mapfile.
//!
//! See [`cache::BlockCache`] for the read path, [`region_map::RegionMap`]
//! for the interval map the mapfile is built on, and [`mapfile`] for the
//! on-disk text format itself.

pub mod cache;
pub mod config;
pub mod error;
pub mod io_util;
pub mod logging;
pub mod mapfile;
pub mod plugin;
pub mod probe;
pub mod region_map;
pub mod status;

pub use cache::BlockCache;
pub use config::{ConfigBuilder, EngineConfig};
pub use error::Error;
pub use mapfile::MapfileDocument;
pub use plugin::Plugin;
pub use region_map::RegionMap;
pub use status::Status;
