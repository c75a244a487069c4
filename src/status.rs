//! The closed set of ddrescue-compatible region statuses.

use crate::error::Error;

/// Outcome of the most recent read attempt for a region of the device.
///
/// The variants are ordered here for readability, not priority — use
/// [`Status::priority`] for the "worst status" ordering described in
/// `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// `?` — not attempted.
    Untried,
    /// `*` — slow read, not yet scraped.
    Slow,
    /// `#` — slow read completed.
    Scraped,
    /// `/` — skipped following a read error.
    Trimmed,
    /// `-` — hard read failure.
    Error,
    /// `+` — successfully read.
    Ok,
}

impl Status {
    /// The single ddrescue character for this status.
    pub fn code(self) -> char {
        match self {
            Status::Untried => '?',
            Status::Slow => '*',
            Status::Scraped => '#',
            Status::Trimmed => '/',
            Status::Error => '-',
            Status::Ok => '+',
        }
    }

    /// Priority for the "worst status" aggregate query. Lower is worse
    /// (higher priority); `Error` is 1, `Ok` is 6.
    pub fn priority(self) -> u8 {
        match self {
            Status::Error => 1,
            Status::Trimmed => 2,
            Status::Untried => 3,
            Status::Slow => 4,
            Status::Scraped => 5,
            Status::Ok => 6,
        }
    }

    /// True if data for this status is present in the backing cache file.
    pub fn is_cached(self) -> bool {
        matches!(self, Status::Ok | Status::Slow | Status::Scraped)
    }

    /// True if this status must be skipped rather than served (zeros returned
    /// to the caller is not a legal response for these).
    pub fn is_errored(self) -> bool {
        matches!(self, Status::Error | Status::Trimmed)
    }

    /// True if this status means the region has never been attempted.
    pub fn is_uncached(self) -> bool {
        matches!(self, Status::Untried)
    }

    pub fn try_from_char(c: char) -> Result<Self, Error> {
        match c {
            '?' => Ok(Status::Untried),
            '*' => Ok(Status::Slow),
            '#' => Ok(Status::Scraped),
            '/' => Ok(Status::Trimmed),
            '-' => Ok(Status::Error),
            '+' => Ok(Status::Ok),
            other => Err(Error::Format(format!("unrecognized status character {other:?}"))),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_code() {
        for &c in &['?', '*', '#', '/', '-', '+'] {
            let status = Status::try_from_char(c).unwrap();
            assert_eq!(status.code(), c);
        }
    }

    #[test]
    fn rejects_unknown_code() {
        assert!(Status::try_from_char('x').is_err());
    }

    #[test]
    fn priority_ordering_matches_spec() {
        // Error is the single worst (highest-priority) status.
        let worst = [
            Status::Untried,
            Status::Slow,
            Status::Scraped,
            Status::Trimmed,
            Status::Error,
            Status::Ok,
        ]
        .into_iter()
        .min_by_key(|s| s.priority())
        .unwrap();
        assert_eq!(worst, Status::Error);
    }

    #[test]
    fn derived_sets_are_disjoint_and_exhaustive() {
        for s in [
            Status::Untried,
            Status::Slow,
            Status::Scraped,
            Status::Trimmed,
            Status::Error,
            Status::Ok,
        ] {
            let flags = [s.is_cached(), s.is_errored(), s.is_uncached()];
            assert_eq!(flags.iter().filter(|b| **b).count(), 1, "status {s:?} must be in exactly one derived set, or none (Ok/Slow/Scraped -> cached, Untried -> uncached, Error/Trimmed -> errored)");
        }
    }
}
