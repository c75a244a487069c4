//! Bidirectional translator between [`RegionMap`] and the on-disk
//! ddrescue-compatible mapfile text format.
//!
//! Grounded on `original_source/src/blkcache/diskmap.py`'s `read`/`write`
//! methods: `## blkcache:` lines carry embedded config, headers containing
//! the recognized tokens are regenerated rather than preserved, and range
//! lines are length-encoded (`0x<pos> 0x<length> <status>`), not end-encoded.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use crate::error::Error;
use crate::region_map::RegionMap;
use crate::status::Status;

/// A fully parsed mapfile: foreign comments, embedded config, the region map
/// itself, and the ddrescue "current position" triple.
#[derive(Debug, Clone)]
pub struct MapfileDocument {
    pub comments: Vec<String>,
    pub config: BTreeMap<String, String>,
    pub region_map: RegionMap,
    pub current_pos: u64,
    pub current_status: Status,
    pub current_pass: u64,
}

impl MapfileDocument {
    /// A fresh document for a device of the given size: no comments, no
    /// config, an all-UNTRIED region map, and pass 1.
    pub fn new(size: u64) -> Result<Self, Error> {
        Ok(MapfileDocument {
            comments: Vec::new(),
            config: BTreeMap::new(),
            region_map: RegionMap::new(size)?,
            current_pos: 0,
            current_status: Status::Untried,
            current_pass: 1,
        })
    }
}

fn is_current_pos_header(line: &str) -> bool {
    line.contains("current_pos") && line.contains("current_status") && line.contains("current_pass")
}

fn is_range_header(line: &str) -> bool {
    line.contains("pos") && line.contains("size") && line.contains("status")
}

/// Parses a mapfile, reconstructing its `RegionMap` against a device of
/// `size` bytes. `size` comes from the caller (the live device), not the
/// file, since a stale mapfile must never silently redefine device geometry.
pub fn load<R: BufRead>(reader: R, size: u64) -> Result<MapfileDocument, Error> {
    let mut doc = MapfileDocument::new(size)?;
    let mut current_pos_found = false;

    for line in reader.lines() {
        let line = line.map_err(Error::StdIo)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("## blkcache:") {
            match rest.trim().split_once('=') {
                Some((k, v)) => {
                    doc.config.insert(k.trim().to_string(), v.trim().to_string());
                }
                None => {
                    tracing::warn!(line, "malformed blkcache config comment, skipping");
                }
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix('#') {
            let rest = rest.trim();
            if is_current_pos_header(rest) || is_range_header(rest) {
                continue; // regenerated on save, not preserved
            }
            doc.comments.push(line.to_string());
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            tracing::warn!(line, "malformed mapfile line, skipping");
            continue;
        }

        if !current_pos_found {
            if let Some((pos, status, pass)) = try_parse_current_pos(&fields) {
                doc.current_pos = pos;
                doc.current_status = status;
                doc.current_pass = pass;
                current_pos_found = true;
                continue;
            }
        }

        apply_range_line(&mut doc.region_map, &fields, size)?;
    }

    Ok(doc)
}

fn try_parse_hex(s: &str) -> Option<u64> {
    u64::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16).ok()
}

fn try_parse_current_pos(fields: &[&str]) -> Option<(u64, Status, u64)> {
    let pos = try_parse_hex(fields[0])?;
    let status = Status::try_from_char(fields[1].chars().next()?).ok()?;
    if fields[1].chars().count() != 1 {
        return None;
    }
    let pass = fields[2].parse().ok()?;
    Some((pos, status, pass))
}

/// Applies one `pos size status` range line. An invalid status character is
/// a hard `Format` error; malformed numeric fields are skipped with a
/// warning (`spec.md` §4.2/§7's pinned policy).
fn apply_range_line(map: &mut RegionMap, fields: &[&str], size: u64) -> Result<(), Error> {
    let status_char = match fields[2].chars().next() {
        Some(c) if fields[2].chars().count() == 1 => c,
        _ => {
            tracing::warn!(line = fields.join(" "), "malformed status field, skipping line");
            return Ok(());
        }
    };
    let status = Status::try_from_char(status_char)?;

    let (start, length) = match (try_parse_hex(fields[0]), try_parse_hex(fields[1])) {
        (Some(s), Some(l)) => (s, l),
        _ => {
            tracing::warn!(line = fields.join(" "), "malformed numeric field, skipping line");
            return Ok(());
        }
    };
    if length == 0 {
        return Ok(()); // zero-length ranges are elided by the round-trip law
    }
    let end = start.saturating_add(length).min(size);
    if start >= size {
        tracing::warn!(start, size, "range line starts beyond device size, skipping");
        return Ok(());
    }
    map.set(start, end, status)
}

/// Serializes `doc` in ddrescue-compatible format.
pub fn save<W: Write>(mut writer: W, doc: &MapfileDocument) -> Result<(), Error> {
    for comment in &doc.comments {
        writeln!(writer, "{comment}").map_err(Error::StdIo)?;
    }
    for (key, value) in &doc.config {
        writeln!(writer, "## blkcache: {key}={value}").map_err(Error::StdIo)?;
    }

    writeln!(writer, "# current_pos   current_status  current_pass").map_err(Error::StdIo)?;
    writeln!(
        writer,
        "0x{:08x}    {}  {}",
        doc.current_pos, doc.current_status, doc.current_pass
    )
    .map_err(Error::StdIo)?;

    writeln!(writer, "#  pos  size  status").map_err(Error::StdIo)?;
    for range in doc.region_map.ranges() {
        if range.length == 0 {
            continue;
        }
        writeln!(
            writer,
            "0x{:08x}  0x{:08x}  {}",
            range.position, range.length, range.status
        )
        .map_err(Error::StdIo)?;
    }
    Ok(())
}

/// Recomputes `current_pos`/`current_status` from the region map before a
/// save, per `spec.md` §4.2's emitter contract ("pos = region_map.pos(),
/// status = region_map.status()"). `current_pass` is preserved as-is
/// (`spec.md` §9: "the engine may simply preserve whatever pass value it
/// loaded").
pub fn refresh_current_position(doc: &mut MapfileDocument) -> Result<(), Error> {
    doc.current_pos = doc.region_map.pos()?;
    doc.current_status = doc.region_map.status()?;
    Ok(())
}
