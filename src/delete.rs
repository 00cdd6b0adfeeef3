//! Destruction routines for payloads adopted from raw pointers.
use alloc::boxed::Box;
use core::ptr::NonNull;

/// Destroys a payload that a `Shared` adopted from a raw pointer.
///
/// Called at most once, when the last `Shared` sharing the block goes away.
/// Any `FnOnce(NonNull<T>)` is a deleter.
pub trait Deleter<T: ?Sized> {
    fn delete(self, ptr: NonNull<T>);
}

/// Frees the payload as a `Box<T>`. Used by `Shared::from_box` and
/// `Shared::from_raw`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    fn delete(self, ptr: NonNull<T>) {
        // Safety: callers of `from_raw` promise that `ptr` came from
        // `Box::into_raw`; `from_box` does that itself.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

impl<T: ?Sized, F: FnOnce(NonNull<T>)> Deleter<T> for F {
    fn delete(self, ptr: NonNull<T>) {
        self(ptr)
    }
}
