//! Allocator seam for control blocks.
//!
//! Blocks are allocated and freed through [`Allocator`]. On stable this is a
//! small trait owned by this crate; with the `allocator_api` feature any
//! `core::alloc::Allocator` (e.g. `&bumpalo::Bump`) can be used through
//! `Std`.
use core::{alloc::Layout, fmt, ptr::NonNull};

/// The error returned when a block allocation fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("control block allocation failed")
    }
}

impl core::error::Error for AllocError {}

/// Allocates and frees the storage backing a control block.
///
/// The allocator is moved into the block it allocated, and is used exactly
/// once more, to free that block after the last `Shared` and `Weak` are gone.
///
/// # Safety
/// `allocate` must return memory valid for `layout` that stays valid until
/// it is passed back to `deallocate` on the same allocator.
pub unsafe trait Allocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// # Safety
    /// `ptr` must come from `allocate` on this allocator with `layout`.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The global heap, via `alloc::alloc`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Global;

unsafe impl Allocator for Global {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            // dangling but aligned, like `alloc::alloc::Global`
            return NonNull::new(layout.align() as *mut u8).ok_or(AllocError);
        }
        let p = unsafe { alloc::alloc::alloc(layout) };
        NonNull::new(p).ok_or(AllocError)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            alloc::alloc::dealloc(ptr.as_ptr(), layout)
        }
    }
}

unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        (**self).deallocate(ptr, layout)
    }
}

#[cfg(feature = "allocator_api")]
mod nightly {
    use super::{AllocError, Allocator};
    use core::{alloc::Layout, ptr::NonNull};

    /// Wraps any `core::alloc::Allocator` so it can back a control block.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Std<A>(pub A);

    unsafe impl<A: core::alloc::Allocator> Allocator for Std<A> {
        fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
            self.0
                .allocate(layout)
                .map(NonNull::cast)
                .map_err(|_| AllocError)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            self.0.deallocate(ptr, layout)
        }
    }
}
#[cfg(feature = "allocator_api")]
pub use nightly::Std;
