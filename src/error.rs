//! Crate-wide error taxonomy.
//!
//! Kinds mirror `spec.md` §7: `Config`, `Io`, `OutOfRange`, `Corrupted`, `Format`.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error ({errno}): {message}")]
    Io {
        errno: nix::errno::Errno,
        message: String,
    },

    #[error("range [{start}, {end}) is outside of device range [0, {size})")]
    OutOfRange { start: u64, end: u64, size: u64 },

    #[error("region map invariant violated: {0}")]
    Corrupted(String),

    #[error("mapfile format error: {0}")]
    Format(String),

    #[error("io error: {0}")]
    StdIo(#[from] std::io::Error),
}

impl Error {
    pub fn io(errno: nix::errno::Errno, message: impl Into<String>) -> Self {
        Error::Io {
            errno,
            message: message.into(),
        }
    }
}
