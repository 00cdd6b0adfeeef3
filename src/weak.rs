//! `Weak<T>`: observes a value without keeping it alive.
use core::{fmt, mem, ptr::NonNull};

use crate::{
    block::ControlBlock,
    shared::{Inner, Shared, Upcast},
};

/// A weak reference to a value owned by [`Shared`] handles.
///
/// A `Weak` keeps the control block allocated, never the value. It never
/// destroys the value; dropping the last `Weak` after the value is gone frees
/// the block. [`Weak::lock`] is the only way back to a `Shared`.
pub struct Weak<T: ?Sized> {
    block: Option<NonNull<ControlBlock>>,
    // `None` with a block present means the value was already gone when this
    // handle was made, so it can never be locked.
    ptr: Option<NonNull<T>>,
}

impl<T: ?Sized> Weak<T> {
    /// A weak handle with no block. It is always expired.
    pub const fn new() -> Weak<T> {
        Weak {
            block: None,
            ptr: None,
        }
    }

    // Takes over one weak reference the caller already counted.
    pub(crate) fn from_parts(block: NonNull<ControlBlock>, ptr: Option<NonNull<T>>) -> Weak<T> {
        Weak {
            block: Some(block),
            ptr,
        }
    }

    fn header(&self) -> Option<&ControlBlock> {
        // Safety: the block outlives every weak reference to it
        self.block.map(|b| unsafe { &*b.as_ptr() })
    }

    /// True once the last `Shared` for the block is gone, and for a null
    /// `Weak`.
    pub fn expired(&self) -> bool {
        match self.header() {
            Some(h) => h.strong() == 0,
            None => true,
        }
    }

    /// Returns a new strong handle to the value, or a null `Shared` if it
    /// has expired.
    pub fn lock(&self) -> Shared<T> {
        match (self.block, self.ptr) {
            (Some(block), Some(ptr)) if unsafe { block.as_ref() }.inc_strong_if_nonzero() => {
                Shared::from_inner(Inner { block, ptr })
            }
            _ => Shared::null(),
        }
    }

    /// [`Weak::lock`], with expiry reported as `None`.
    pub fn upgrade(&self) -> Option<Shared<T>> {
        let s = self.lock();
        if Shared::is_null(&s) {
            None
        } else {
            Some(s)
        }
    }

    /// Number of live `Shared` handles for the block.
    pub fn use_count(&self) -> usize {
        self.header().map_or(0, ControlBlock::strong)
    }

    /// Number of live `Weak` handles for the block, including this one.
    pub fn weak_count(&self) -> usize {
        self.header().map_or(0, ControlBlock::weak)
    }

    /// Converts to a weak handle of a type `T` can be viewed as.
    ///
    /// The view is computed from the live value, so an expired `Weak`
    /// converts to one that keeps the block but can never be locked, which
    /// is what it already was.
    pub fn upcast<U: ?Sized>(this: Self) -> Weak<U>
    where
        T: Upcast<U> + 'static,
    {
        let strong = this.lock();
        if !Shared::is_null(&strong) {
            return Shared::downgrade(&Shared::upcast(strong));
        }
        let block = this.block;
        // Hand our weak reference over instead of releasing it.
        mem::forget(this);
        Weak { block, ptr: None }
    }

    /// Returns true if both handles refer to the same control block, or are
    /// both null.
    pub fn root_ptr_eq<U: ?Sized>(&self, other: &Weak<U>) -> bool {
        self.block == other.block
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    fn clone(&self) -> Self {
        if let Some(h) = self.header() {
            h.inc_weak();
        }
        Weak {
            block: self.block,
            ptr: self.ptr,
        }
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        if let Some(b) = self.block.take() {
            unsafe { ControlBlock::release_weak(b) }
        }
    }
}

impl<T: ?Sized> Default for Weak<T> {
    fn default() -> Self {
        Weak::new()
    }
}

impl<T: ?Sized> From<&Shared<T>> for Weak<T> {
    fn from(s: &Shared<T>) -> Self {
        Shared::downgrade(s)
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Weak)")
    }
}
