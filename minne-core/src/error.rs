use thiserror::Error;

/// Recoverable allocation failures.
///
/// Contract violations (double free, mismatched zone, corrupt header) are not
/// represented here; they go through [`crate::diagnostics::fatal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("Out of memory: {size} bytes aligned to {align}")]
    OutOfMemory { size: usize, align: usize },

    #[error("Unsupported alignment {align} (minimum {min}, must be a power of two)")]
    AlignmentViolation { align: usize, min: usize },
}
