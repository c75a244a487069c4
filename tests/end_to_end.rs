//! End-to-end exercises of the read-through cache lifecycle through the
//! public `Plugin` surface (dispatching by handle id through its internal
//! handle table), against plain files standing in for a device and its
//! sparse backing cache.

use std::path::Path;

use blkcache::probe::{DeviceProbe, ProbeResult};
use blkcache::{mapfile, Error, Plugin};

struct FixedSizeProbe {
    size: u64,
    sector_size: u32,
}

impl DeviceProbe for FixedSizeProbe {
    fn probe(&self, _device: &Path) -> Result<ProbeResult, Error> {
        Ok(ProbeResult {
            size: self.size,
            sector_size: Some(self.sector_size),
            rotational: false,
        })
    }
}

fn open_plugin(device: &Path, cache: &Path, probe: impl DeviceProbe + Send + Sync + 'static) -> Plugin {
    let mut plugin = Plugin::with_probe(probe);
    plugin.config("device", device.to_str().unwrap());
    plugin.config("cache", cache.to_str().unwrap());
    plugin.config_complete().unwrap();
    plugin
}

#[test]
fn fresh_cache_clean_read_touches_only_first_block() {
    let dir = tempfile::tempdir().unwrap();
    let device = dir.path().join("device.img");
    std::fs::write(&device, vec![b'A'; 8192]).unwrap();
    let cache = dir.path().join("cache.img");

    let mut plugin = open_plugin(&device, &cache, FixedSizeProbe { size: 8192, sector_size: 2048 });
    let handle = plugin.open(true).unwrap();
    assert_eq!(plugin.get_size(handle).unwrap(), 8192);

    let data = plugin.pread(handle, 100, 50).unwrap();
    assert_eq!(data, vec![b'A'; 100]);
    plugin.close(handle).unwrap();

    let mapfile_path = cache.with_file_name("cache.img.log");
    let file = std::fs::File::open(&mapfile_path).unwrap();
    let doc = mapfile::load(std::io::BufReader::new(file), 8192).unwrap();
    assert_eq!(
        doc.region_map.ranges(),
        vec![
            blkcache::region_map::Range { position: 0, length: 0x800, status: blkcache::Status::Ok },
            blkcache::region_map::Range { position: 0x800, length: 0x1800, status: blkcache::Status::Untried },
        ]
    );
}

#[test]
fn read_error_aborts_pread_without_substituting_zero_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let device = dir.path().join("device.img");
    // Only the first 2048-byte block actually exists on disk; the probe
    // claims a larger device, so block 1 is a short read that is NOT at the
    // real end of the (reported) device, and therefore a hard error.
    std::fs::write(&device, vec![b'A'; 2048]).unwrap();
    let cache = dir.path().join("cache.img");

    let mut plugin = open_plugin(&device, &cache, FixedSizeProbe { size: 8192, sector_size: 2048 });
    let handle = plugin.open(true).unwrap();

    let result = plugin.pread(handle, 8192, 0);
    assert!(result.is_err(), "a failed block must fail the whole pread, never return corrupted zero bytes");
}

#[test]
fn second_connection_serves_from_cache_without_reading_device_again() {
    let dir = tempfile::tempdir().unwrap();
    let device = dir.path().join("device.img");
    std::fs::write(&device, vec![b'A'; 8192]).unwrap();
    let cache = dir.path().join("cache.img");

    {
        let mut plugin = open_plugin(&device, &cache, FixedSizeProbe { size: 8192, sector_size: 2048 });
        let handle = plugin.open(true).unwrap();
        plugin.pread(handle, 100, 50).unwrap();
        plugin.close(handle).unwrap();
    }

    std::fs::remove_file(&device).unwrap();
    let mut plugin = open_plugin(&device, &cache, FixedSizeProbe { size: 8192, sector_size: 2048 });
    let handle = plugin.open(true).unwrap();
    let data = plugin.pread(handle, 100, 50).unwrap();
    assert_eq!(data, vec![b'A'; 100]);
}

#[test]
fn mapfile_round_trip_preserves_foreign_comments_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mapfile_path = dir.path().join("sr0.img.log");
    std::fs::write(
        &mapfile_path,
        "# Written by ddrescue 1.25\n\
         # current_pos   current_status  current_pass\n\
         0x0    ?  1\n\
         #  pos  size  status\n\
         0x0 0x1000 +\n\
         0x1000 0x1000 -\n",
    )
    .unwrap();

    let loaded = {
        let file = std::fs::File::open(&mapfile_path).unwrap();
        mapfile::load(std::io::BufReader::new(file), 0x2000).unwrap()
    };

    let resaved_path = dir.path().join("sr0.img.resaved.log");
    {
        let file = std::fs::File::create(&resaved_path).unwrap();
        mapfile::save(std::io::BufWriter::new(file), &loaded).unwrap();
    }

    let resaved_text = std::fs::read_to_string(&resaved_path).unwrap();
    assert!(resaved_text.starts_with("# Written by ddrescue 1.25\n"));
    assert!(resaved_text.contains("0x00000000  0x00001000  +\n"));
    assert!(resaved_text.contains("0x00001000  0x00001000  -\n"));
}

#[test]
fn partial_final_block_returns_exact_bytes_without_reading_past_device_end() {
    let dir = tempfile::tempdir().unwrap();
    let device = dir.path().join("device.img");
    std::fs::write(&device, vec![b'B'; 3000]).unwrap();
    let cache = dir.path().join("cache.img");

    let mut plugin = open_plugin(&device, &cache, FixedSizeProbe { size: 3000, sector_size: 2048 });
    let handle = plugin.open(true).unwrap();

    let data = plugin.pread(handle, 2000, 1500).unwrap();
    assert_eq!(data.len(), 2000);
    assert_eq!(data, vec![b'B'; 2000]);
}
