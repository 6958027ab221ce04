use thiserror::Error;

/// Unrecoverable failures of the checking pass. Ordinary type errors are
/// reported as diagnostics and never abort the pass; these do.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CheckError {
    /// Reservation of a transient table failed. The pass stops early and
    /// suppresses follow-on diagnostics.
    #[error("out of memory")]
    OutOfMemory,
}
