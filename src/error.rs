//! Transport error handling

use thiserror::Error;

/// Errors surfaced by the transport layer.
///
/// The first non-success result from an underlying operation aborts the
/// collective in progress and is propagated to the caller. Outstanding
/// operations are not cancelled; caller-visible buffers may be partially
/// written. Argument invariant violations (negative counts, ranks outside
/// `[0, size)`) are debug-mode assertions rather than error values.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// An incoming message does not fit the posted receive buffer.
    #[error("message of {got} bytes truncated by a receive buffer of {capacity} bytes")]
    Truncated {
        /// Length of the matched message in bytes.
        got: usize,
        /// Capacity of the posted receive buffer in bytes.
        capacity: usize,
    },

    /// A one-sided write fell outside the target's exposed region.
    #[error("put of {len} bytes at byte offset {offset} exceeds a window of {capacity} bytes")]
    WindowRange {
        /// Byte offset of the write within the target window.
        offset: usize,
        /// Length of the write in bytes.
        len: usize,
        /// Capacity of the target window in bytes.
        capacity: usize,
    },
}
