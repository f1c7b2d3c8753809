use thiserror::Error;

use crate::blkpool::BlockTag;
use crate::config::{Lpn, MVpn};

/// Every error here is fatal for a simulation run: they flag misconfiguration or
/// logic errors, never transient device faults.
#[derive(Error, Debug)]
pub enum FtlError {
    #[error("out of space: no channel has a free block for {tag:?} pages")]
    OutOfSpace { tag: BlockTag },

    #[error("mapping cache exhausted: no evictable row (avoiding m_vpns {avoid:?}, rows {stats})")]
    CacheExhausted { avoid: Vec<MVpn>, stats: String },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("lpn {lpn} is outside the logical space of {limit} pages")]
    LpnOutOfRange { lpn: Lpn, limit: Lpn },
}

pub type Result<T> = std::result::Result<T, FtlError>;

macro_rules! ensure_invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::FtlError::InvariantViolation(format!($($arg)+)));
        }
    };
}

pub(crate) use ensure_invariant;
