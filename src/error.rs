//! Error types and result handling.
//!
//! The structures in this crate perform no I/O and allocate only at
//! construction or growth time, so the error surface is small: callers can
//! hand a constructor an out-of-range argument, and capacity arithmetic can
//! overflow on absurd requests. Contract violations during steady-state
//! operation (such as enqueueing at an invalid priority) are programming
//! errors and are asserted, not propagated.

use core::fmt;

/// Result type alias for fallible operations in this crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Error codes for constructor-time failures.
///
/// The numeric values are stable and may be used for FFI or logging.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum Error {
    /// An argument was outside the range the structure supports.
    InvalidArgument = 1,

    /// A requested capacity overflowed the platform's address arithmetic.
    CapacityOverflow = 2,
}

impl Error {
    /// Get the stable numeric code for this error.
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Get a short static description of this error.
    pub const fn as_str(self) -> &'static str {
        match self {
            Error::InvalidArgument => "invalid argument",
            Error::CapacityOverflow => "capacity overflow",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// TESTS
// =============================================================================
