//! `RegionMap` — an interval map over `[0, size)` tagging every byte of the
//! device with a [`Status`].
//!
//! The on-disk mapfile format (`original_source/src/blkcache/diskmap.py`)
//! sorts a list of `(position, NO_SORT, status)` triples and compares only on
//! `position`, using a NaN sentinel to defeat tuple comparison past the first
//! field. Rust's `Vec::partition_point` gives us the same position-only
//! binary search without the NaN hack (`spec.md` §9's re-architecture notes
//! call this out explicitly), so `Transition` here carries no tie-breaker
//! field at all.

use crate::error::Error;
use crate::status::Status;

/// A point at which the region's status changes, or a boundary sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub position: u64,
    pub status: Status,
}

/// An interval map over `[0, size)`, represented as a sorted, compacted list
/// of transitions. See `spec.md` §3 for the full invariant list.
#[derive(Debug, Clone)]
pub struct RegionMap {
    size: u64,
    transitions: Vec<Transition>,
}

/// One contiguous run, as returned by [`RegionMap::ranges`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub position: u64,
    pub length: u64,
    pub status: Status,
}

impl RegionMap {
    /// Creates a map covering `[0, size)` with a single UNTRIED region.
    pub fn new(size: u64) -> Result<Self, Error> {
        if size == 0 {
            return Err(Error::OutOfRange {
                start: 0,
                end: 0,
                size: 0,
            });
        }
        Ok(RegionMap {
            size,
            transitions: vec![
                Transition {
                    position: 0,
                    status: Status::Untried,
                },
                Transition {
                    position: size,
                    status: Status::Untried,
                },
            ],
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The run index whose status applies at `position` (`position` may
    /// equal `self.size`, which resolves to the terminal sentinel).
    fn run_index(&self, position: u64) -> usize {
        self.transitions.partition_point(|t| t.position <= position) - 1
    }

    /// The status in effect at `position`. `position == size` returns the
    /// terminal sentinel's status.
    pub fn at(&self, position: u64) -> Status {
        self.transitions[self.run_index(position)].status
    }

    /// Assigns `status` to every position in `[start, end_exclusive)`.
    ///
    /// `start == end_exclusive` is a documented no-op (see `DESIGN.md`'s
    /// resolution of `spec.md` §8's boundary-behavior open question).
    pub fn set(&mut self, start: u64, end_exclusive: u64, status: Status) -> Result<(), Error> {
        if start > end_exclusive || end_exclusive > self.size {
            return Err(Error::OutOfRange {
                start,
                end: end_exclusive,
                size: self.size,
            });
        }
        if start == end_exclusive {
            return Ok(());
        }

        let status_after = self.at(end_exclusive);
        let i_start = self.run_index(start);
        let i_end = self.run_index(end_exclusive);
        let status_before = self.transitions[i_start].status;

        let mut replacement = Vec::with_capacity(3);
        if self.transitions[i_start].position == start {
            replacement.push(Transition { position: start, status });
        } else {
            replacement.push(Transition {
                position: self.transitions[i_start].position,
                status: status_before,
            });
            if status_before != status {
                replacement.push(Transition { position: start, status });
            }
        }
        // The boundary at `end_exclusive` must survive even when its status
        // matches the assigned one, whenever `end_exclusive == self.size`:
        // that boundary *is* the mandatory terminal sentinel (§3), not an
        // ordinary run split, and it must never be spliced away.
        if status_after != status || end_exclusive == self.size {
            replacement.push(Transition {
                position: end_exclusive,
                status: status_after,
            });
        }

        self.transitions.splice(i_start..=i_end, replacement);
        self.compact_from(i_start.saturating_sub(1));
        Ok(())
    }

    /// Removes adjacent duplicate-status transitions starting at index `i`.
    /// Bounded: edits are local, so this walks at most a handful of entries.
    /// Never removes the terminal sentinel (the transition at `self.size`):
    /// its status is "arbitrary" per §3 and may coincidentally match the
    /// preceding run's without that being a genuine compaction opportunity —
    /// the sentinel's *position* must always survive regardless.
    fn compact_from(&mut self, mut i: usize) {
        loop {
            if i + 1 >= self.transitions.len() {
                break;
            }
            if self.transitions[i + 1].position == self.size {
                break;
            }
            if self.transitions[i].status == self.transitions[i + 1].status {
                self.transitions.remove(i + 1);
            } else {
                break;
            }
        }
    }

    /// The position of the first UNTRIED transition, or `size` if the only
    /// UNTRIED entry is the terminal sentinel.
    pub fn pos(&self) -> Result<u64, Error> {
        let (last, rest) = self
            .transitions
            .split_last()
            .expect("transitions always has a terminal sentinel");
        for t in rest {
            if t.status == Status::Untried {
                return Ok(t.position);
            }
        }
        if last.status == Status::Untried {
            return Ok(self.size);
        }
        Err(Error::Corrupted(
            "no UNTRIED transition found anywhere, including the terminal sentinel".into(),
        ))
    }

    /// The worst (highest-priority) status across the whole device.
    pub fn status(&self) -> Result<Status, Error> {
        self.transitions[..self.transitions.len() - 1]
            .iter()
            .map(|t| t.status)
            .min_by_key(|s| s.priority())
            .ok_or_else(|| Error::Corrupted("region map has no non-terminal transitions".into()))
    }

    /// A synthetic view of `[start, end_exclusive)`: an entry at `start`, one
    /// per internal transition, and a final inclusive-end entry at
    /// `end_exclusive - 1`. Empty when `start == end_exclusive`.
    pub fn slice(&self, start: u64, end_exclusive: u64) -> Vec<(u64, Status)> {
        if start == end_exclusive {
            return Vec::new();
        }
        let mut out = vec![(start, self.at(start))];
        let i_start = self.transitions.partition_point(|t| t.position <= start);
        for t in &self.transitions[i_start..] {
            if t.position >= end_exclusive {
                break;
            }
            out.push((t.position, t.status));
        }
        let last_pos = end_exclusive - 1;
        if out.last().map(|(p, _)| *p) != Some(last_pos) {
            out.push((last_pos, self.at(last_pos)));
        }
        out
    }

    /// One entry per adjacent pair of transitions; the terminal sentinel
    /// itself produces no entry.
    pub fn ranges(&self) -> Vec<Range> {
        self.transitions
            .windows(2)
            .map(|w| Range {
                position: w[0].position,
                length: w[1].position - w[0].position,
                status: w[0].status,
            })
            .collect()
    }

    /// Checks the invariants from `spec.md` §8, for use by tests.
    ///
    /// The no-adjacent-duplicate-status check excludes the final window (the
    /// last real run against the terminal sentinel): the sentinel's status
    /// is arbitrary and commonly coincides with whatever precedes it (e.g. a
    /// freshly constructed map is `[(0, Untried), (size, Untried)]`), and
    /// that pairing must never be compacted away since it would delete the
    /// mandatory terminal transition.
    #[cfg(test)]
    fn check_invariants(&self) {
        assert_eq!(self.transitions.first().unwrap().position, 0);
        assert_eq!(self.transitions.last().unwrap().position, self.size);
        let last_window = self.transitions.len().saturating_sub(2);
        for (idx, w) in self.transitions.windows(2).enumerate() {
            assert!(w[0].position < w[1].position, "positions must strictly increase");
            if idx != last_window {
                assert_ne!(w[0].status, w[1].status, "no two adjacent transitions may share a status");
            }
        }
    }
}
