//! Control blocks: the shared counts plus a type-erased way to destroy the
//! payload and the block itself.
//!
//! Every block starts with a [`ControlBlock`] header, so handles can keep a
//! plain `NonNull<ControlBlock>` no matter which concrete block (and which
//! payload, deleter and allocator types) created it. The two destructors are
//! stored in the header as function pointers instantiated for the concrete
//! block type.
//!
//! Counting protocol: `strong` is the number of live `Shared` handles.
//! `weak` is the number of live `Weak` handles, plus one extra reference
//! held collectively by the strong handles for as long as `strong > 0`.
//! The payload is destroyed when `strong` drops to zero; the block is freed
//! when `weak` drops to zero, which can only happen after that.
use core::{
    alloc::Layout,
    cell::Cell,
    mem::{self, ManuallyDrop, MaybeUninit},
    ptr::{self, NonNull},
};

use crate::{delete::Deleter, error::InitError, heap::Allocator, heap::AllocError};

/// Which kind of control block owns a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// The payload lives in its own allocation; the block holds a pointer to
    /// it and the deleter that destroys it.
    Regular,
    /// The payload is stored inside the block, in the same allocation.
    InPlace,
}

// Counts and destructors shared by every handle to one payload.
pub(crate) struct ControlBlock {
    strong: Cell<usize>,
    weak: Cell<usize>,
    kind: BlockKind,
    destroy_payload: unsafe fn(NonNull<ControlBlock>),
    destroy_self: unsafe fn(NonNull<ControlBlock>),
}

impl ControlBlock {
    fn new(
        kind: BlockKind,
        strong: usize,
        destroy_payload: unsafe fn(NonNull<ControlBlock>),
        destroy_self: unsafe fn(NonNull<ControlBlock>),
    ) -> ControlBlock {
        ControlBlock {
            strong: Cell::new(strong),
            weak: Cell::new(1),
            kind,
            destroy_payload,
            destroy_self,
        }
    }

    pub(crate) fn kind(&self) -> BlockKind {
        self.kind
    }

    pub(crate) fn strong(&self) -> usize {
        self.strong.get()
    }

    /// Number of `Weak` handles, not counting the one owned by the strong
    /// handles.
    pub(crate) fn weak(&self) -> usize {
        let w = self.weak.get();
        if self.strong.get() > 0 {
            w - 1
        } else {
            w
        }
    }

    pub(crate) fn inc_strong(&self) {
        debug_assert!(self.strong.get() > 0, "strong count revived from zero");
        self.strong.set(self.strong.get() + 1);
    }

    pub(crate) fn inc_strong_if_nonzero(&self) -> bool {
        let s = self.strong.get();
        if s == 0 {
            false
        } else {
            self.strong.set(s + 1);
            true
        }
    }

    pub(crate) fn inc_weak(&self) {
        debug_assert!(self.weak.get() > 0, "weak count revived from zero");
        self.weak.set(self.weak.get() + 1);
    }

    /// Drops one strong reference, destroying the payload if it was the last
    /// one and the block too if no `Weak` is left.
    ///
    /// # Safety
    /// `block` must be live and the caller must own one strong reference.
    pub(crate) unsafe fn release_strong(block: NonNull<ControlBlock>) {
        let h = block.as_ref();
        let s = h.strong.get() - 1;
        h.strong.set(s);
        if s != 0 {
            return;
        }
        // last strong reference was just dropped
        let destroy_payload = h.destroy_payload;
        destroy_payload(block);

        // The payload's drop may have released weak references to its own
        // block. The implicit weak reference kept the block alive until here.
        ControlBlock::release_weak(block);
    }

    /// Drops one weak reference, freeing the block if it was the last one.
    ///
    /// # Safety
    /// `block` must be live and the caller must own one weak reference.
    pub(crate) unsafe fn release_weak(block: NonNull<ControlBlock>) {
        let h = block.as_ref();
        let w = h.weak.get() - 1;
        h.weak.set(w);
        if w != 0 {
            return;
        }
        debug_assert_eq!(h.strong.get(), 0, "block freed with live payload");
        let destroy_self = h.destroy_self;
        destroy_self(block);
    }
}

fn allocate<B, A: Allocator>(alloc: &A) -> Result<NonNull<B>, AllocError> {
    alloc.allocate(Layout::new::<B>()).map(NonNull::cast)
}

/// Block for a payload that was allocated on its own. Holds the payload
/// pointer, the deleter that destroys it, and the allocator for the block's
/// own storage.
#[repr(C)]
pub(crate) struct RegularBlock<T: ?Sized, D, A> {
    header: ControlBlock,
    alloc: ManuallyDrop<A>,
    deleter: ManuallyDrop<D>,
    ptr: NonNull<T>,
}

impl<T: ?Sized, D: Deleter<T>, A: Allocator> RegularBlock<T, D, A> {
    /// Allocates a block adopting `ptr`, with a strong count of one.
    ///
    /// On failure `ptr` is left untouched and `deleter` is dropped without
    /// being called.
    pub(crate) fn try_new(
        ptr: NonNull<T>,
        deleter: D,
        alloc: A,
    ) -> Result<NonNull<ControlBlock>, AllocError> {
        let b = allocate::<Self, A>(&alloc)?;
        unsafe {
            b.as_ptr().write(RegularBlock {
                header: ControlBlock::new(
                    BlockKind::Regular,
                    1,
                    Self::destroy_payload,
                    Self::destroy_self,
                ),
                alloc: ManuallyDrop::new(alloc),
                deleter: ManuallyDrop::new(deleter),
                ptr,
            });
        }
        Ok(b.cast())
    }

    unsafe fn destroy_payload(block: NonNull<ControlBlock>) {
        let b = block.cast::<Self>().as_ptr();
        let deleter = ManuallyDrop::take(&mut (*b).deleter);
        deleter.delete((*b).ptr);
    }

    unsafe fn destroy_self(block: NonNull<ControlBlock>) {
        let b = block.cast::<Self>().as_ptr();
        // The deleter was already consumed by `destroy_payload`; the rest
        // of the block has no drop glue apart from the allocator.
        let alloc = ManuallyDrop::take(&mut (*b).alloc);
        alloc.deallocate(block.cast(), Layout::new::<Self>());
    }
}

/// Block that stores the payload inline, so value and counts share one
/// allocation.
#[repr(C)]
pub(crate) struct InPlaceBlock<T, A> {
    header: ControlBlock,
    alloc: ManuallyDrop<A>,
    value: MaybeUninit<T>,
}

// Frees a block whose value was never written. Armed while user code that
// produces the value runs, so a panic there doesn't leak the block.
struct Unfinished<T, A: Allocator> {
    block: NonNull<InPlaceBlock<T, A>>,
}

impl<T, A: Allocator> Drop for Unfinished<T, A> {
    fn drop(&mut self) {
        unsafe { InPlaceBlock::<T, A>::destroy_self(self.block.cast()) }
    }
}

impl<T, A: Allocator> InPlaceBlock<T, A> {
    // Allocates the block with `value` uninitialized.
    fn allocate_uninit(alloc: A, strong: usize) -> Result<NonNull<Self>, AllocError> {
        let b = allocate::<Self, A>(&alloc)?;
        unsafe {
            let p = b.as_ptr();
            ptr::addr_of_mut!((*p).header).write(ControlBlock::new(
                BlockKind::InPlace,
                strong,
                Self::destroy_payload,
                Self::destroy_self,
            ));
            ptr::addr_of_mut!((*p).alloc).write(ManuallyDrop::new(alloc));
        }
        Ok(b)
    }

    fn value_ptr(b: NonNull<Self>) -> NonNull<T> {
        unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*b.as_ptr()).value) as *mut T) }
    }

    /// Allocates a block and moves the value produced by `init` into it, with
    /// a strong count of one. If `init` fails or panics, the block is freed
    /// and no handle ever sees it.
    pub(crate) fn try_new_with<E, F>(
        alloc: A,
        init: F,
    ) -> Result<(NonNull<ControlBlock>, NonNull<T>), InitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let b = Self::allocate_uninit(alloc, 0).map_err(InitError::Alloc)?;
        let guard = Unfinished { block: b };
        let value = init().map_err(InitError::Init)?;
        mem::forget(guard);
        let v = Self::value_ptr(b);
        unsafe {
            v.as_ptr().write(value);
            b.as_ref().header.strong.set(1);
        }
        Ok((b.cast(), v))
    }

    /// Allocates a block with a strong count of zero and one weak reference,
    /// which the caller owns. The value must be written through the returned
    /// pointer before calling [`InPlaceBlock::finish_cyclic`].
    pub(crate) fn new_cyclic_uninit(
        alloc: A,
    ) -> Result<(NonNull<ControlBlock>, NonNull<T>), AllocError> {
        let b = Self::allocate_uninit(alloc, 0)?;
        Ok((b.cast(), Self::value_ptr(b)))
    }

    /// Marks the value of a cyclic block as initialized. The caller's weak
    /// reference becomes the one held by the strong handles.
    ///
    /// # Safety
    /// The value must have been written.
    pub(crate) unsafe fn finish_cyclic(block: NonNull<ControlBlock>) {
        let h = block.as_ref();
        debug_assert_eq!(h.strong.get(), 0, "no prior strong references should exist");
        h.strong.set(1);
    }

    unsafe fn destroy_payload(block: NonNull<ControlBlock>) {
        let b = block.cast::<Self>().as_ptr();
        (*b).value.assume_init_drop();
    }

    unsafe fn destroy_self(block: NonNull<ControlBlock>) {
        let b = block.cast::<Self>().as_ptr();
        let alloc = ManuallyDrop::take(&mut (*b).alloc);
        alloc.deallocate(block.cast(), Layout::new::<Self>());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Global;
    use alloc::boxed::Box;
    use core::convert::Infallible;
    use std::{cell::Cell, rc::Rc};

    #[derive(Default)]
    struct Log {
        payload: Cell<usize>,
    }

    struct Tracked(Rc<Log>);
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.payload.set(self.0.payload.get() + 1);
        }
    }

    #[test]
    fn test_in_place_protocol() {
        let log = Rc::new(Log::default());
        let l = log.clone();
        let (b, v) =
            InPlaceBlock::<Tracked, Global>::try_new_with(Global, || Ok::<_, Infallible>(Tracked(l)))
                .unwrap();
        unsafe {
            assert_eq!(b.as_ref().kind(), BlockKind::InPlace);
            assert!(Rc::ptr_eq(&v.as_ref().0, &log));
            assert_eq!((b.as_ref().strong(), b.as_ref().weak()), (1, 0));

            // one extra weak keeps the block alive past the payload
            b.as_ref().inc_weak();
            assert_eq!(b.as_ref().weak(), 1);
            ControlBlock::release_strong(b);
            assert_eq!(log.payload.get(), 1);
            assert_eq!((b.as_ref().strong(), b.as_ref().weak()), (0, 1));
            assert!(!b.as_ref().inc_strong_if_nonzero());
            ControlBlock::release_weak(b);
        }
        assert_eq!(log.payload.get(), 1);
    }

    #[test]
    fn test_regular_deleter_runs_once() {
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let p = NonNull::from(Box::leak(Box::new(7u32)));
        let deleter = move |p: NonNull<u32>| {
            c.set(c.get() + 1);
            drop(unsafe { Box::from_raw(p.as_ptr()) });
        };
        let b = RegularBlock::try_new(p, deleter, Global).unwrap();
        unsafe {
            assert_eq!(b.as_ref().kind(), BlockKind::Regular);
            b.as_ref().inc_strong();
            ControlBlock::release_strong(b);
            assert_eq!(calls.get(), 0);
            ControlBlock::release_strong(b);
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_failed_init_frees_block() {
        let r = InPlaceBlock::<u64, Global>::try_new_with(Global, || Err::<u64, _>("nope"));
        assert!(matches!(r, Err(InitError::Init("nope"))));
    }
}
