//! Error taxonomy for the mosaic job.
//!
//! Five categories, matching the failure modes the driver's state machine
//! can hit. `main` downcasts the top-level `anyhow::Error` to one of these
//! to pick an exit code; everything else propagates as `anyhow::Error` with
//! `.context(...)` chains in the teacher's style.

use thiserror::Error;

/// A categorized, user-facing mosaic failure.
#[derive(Debug, Error)]
pub enum MosaicError {
    /// Bad options, missing input list, conflicting projection options.
    #[error("usage error: {0}")]
    Usage(String),

    /// An input could not be probed, or inputs are in incompatible
    /// projections with no resolvable target.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// A block read failed (the provider decides transient vs permanent;
    /// the core never retries).
    #[error("read error: {0}")]
    Read(String),

    /// Output creation or block write failed.
    #[error("write error: {0}")]
    Write(String),

    /// A plan/cache contract was violated. This indicates a bug; callers
    /// should treat this as fatal. In practice these are raised via
    /// `panic!` at the point of violation rather than returned, but the
    /// variant exists so the taxonomy and exit-code mapping stay complete.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl MosaicError {
    /// Exit code per spec: 0 success, 1 usage, 2 I/O (read/write), 3
    /// geometry/projection (folded into Metadata here since that's where
    /// projection-resolution failures land).
    pub fn exit_code(&self) -> i32 {
        match self {
            MosaicError::Usage(_) => 1,
            MosaicError::Read(_) | MosaicError::Write(_) => 2,
            MosaicError::Metadata(_) => 3,
            MosaicError::Invariant(_) => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MosaicError::Usage("x".into()).exit_code(), 1);
        assert_eq!(MosaicError::Read("x".into()).exit_code(), 2);
        assert_eq!(MosaicError::Write("x".into()).exit_code(), 2);
        assert_eq!(MosaicError::Metadata("x".into()).exit_code(), 3);
    }

    #[test]
    fn test_display() {
        let e = MosaicError::Usage("missing -i".into());
        assert_eq!(e.to_string(), "usage error: missing -i");
    }
}
