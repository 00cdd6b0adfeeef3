//! Errors from fallible construction.
use core::fmt;

use crate::heap::AllocError;

/// Why a fallible in-place construction produced no handle.
///
/// Either way the block's storage has already been released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitError<E> {
    /// The combined block could not be allocated; the payload constructor
    /// was never called.
    Alloc(AllocError),
    /// The payload constructor returned an error.
    Init(E),
}

impl<E: fmt::Display> fmt::Display for InitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::Alloc(e) => fmt::Display::fmt(e, f),
            InitError::Init(e) => write!(f, "payload construction failed: {}", e),
        }
    }
}

impl<E: core::error::Error + 'static> core::error::Error for InitError<E> {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            InitError::Alloc(e) => Some(e),
            InitError::Init(e) => Some(e),
        }
    }
}

impl<E> From<AllocError> for InitError<E> {
    fn from(e: AllocError) -> Self {
        InitError::Alloc(e)
    }
}
