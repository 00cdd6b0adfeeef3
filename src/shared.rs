//! `Shared<T>`: the owning handle.
//!
//! See the crate docs for an overview.
use alloc::{alloc::handle_alloc_error, boxed::Box};
use core::{
    alloc::Layout,
    borrow, cmp,
    convert::Infallible,
    fmt,
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::{self, NonNull},
};

use crate::{
    block::{BlockKind, ControlBlock, InPlaceBlock, RegularBlock},
    delete::{DefaultDelete, Deleter},
    error::InitError,
    heap::{AllocError, Allocator, Global},
    weak::Weak,
};

/// Declares that a `&Self` can be viewed as a `&U`, the way a derived class
/// converts to its base. This is what [`Shared::upcast`] and [`Weak::upcast`]
/// require.
///
/// ```
/// use blockrc::{Shared, Upcast};
///
/// trait Shape {
///     fn area(&self) -> f64;
/// }
/// struct Square(f64);
/// impl Shape for Square {
///     fn area(&self) -> f64 {
///         self.0 * self.0
///     }
/// }
/// impl Upcast<dyn Shape> for Square {
///     fn upcast(&self) -> &(dyn Shape + 'static) {
///         self
///     }
/// }
///
/// let sq = Shared::new(Square(2.0));
/// let shape: Shared<dyn Shape> = Shared::upcast(sq.clone());
/// assert_eq!(shape.area(), 4.0);
/// assert_eq!(Shared::use_count(&sq), 2);
/// ```
pub trait Upcast<U: ?Sized> {
    fn upcast(&self) -> &U;
}

impl<T: ?Sized> Upcast<T> for T {
    fn upcast(&self) -> &T {
        self
    }
}

// Block plus payload pointer. Both are live while the owning handle is.
pub(crate) struct Inner<T: ?Sized> {
    pub(crate) block: NonNull<ControlBlock>,
    pub(crate) ptr: NonNull<T>,
}

impl<T: ?Sized> Clone for Inner<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Inner<T> {}

/// A strong reference to a value whose control block may be shared with
/// other `Shared` and [`Weak`] handles.
///
/// A `Shared` is either null or keeps its value alive. The value is
/// destroyed when the last non-null `Shared` for its block is dropped or
/// reset.
pub struct Shared<T: ?Sized> {
    inner: Option<Inner<T>>,
    phantom: PhantomData<T>,
}

impl<T> Shared<T> {
    /// Allocates the value and its control block together.
    pub fn new(value: T) -> Shared<T> {
        Shared::new_in(value, Global)
    }

    /// Like [`Shared::new`], but returns an error instead of aborting when
    /// the allocation fails. The value is dropped in that case.
    pub fn try_new(value: T) -> Result<Shared<T>, AllocError> {
        Shared::try_new_in(value, Global)
    }

    /// Allocates the value and its control block together, in `alloc`.
    pub fn new_in<A>(value: T, alloc: A) -> Shared<T>
    where
        A: Allocator + 'static,
    {
        match Shared::try_new_in(value, alloc) {
            Ok(s) => s,
            Err(AllocError) => handle_alloc_error(Layout::new::<InPlaceBlock<T, A>>()),
        }
    }

    pub fn try_new_in<A>(value: T, alloc: A) -> Result<Shared<T>, AllocError>
    where
        A: Allocator + 'static,
    {
        match Shared::try_new_with_in(alloc, || Ok::<T, Infallible>(value)) {
            Ok(s) => Ok(s),
            Err(InitError::Alloc(e)) => Err(e),
            Err(InitError::Init(never)) => match never {},
        }
    }

    /// Allocates a control block, then builds the value with `init`.
    ///
    /// If `init` fails (or panics) the block is freed and the error is
    /// returned; no handle to the half-built block ever exists.
    ///
    /// ```
    /// use blockrc::{InitError, Shared};
    /// let ok = Shared::try_new_with(|| "42".parse::<i32>()).unwrap();
    /// assert_eq!(*ok, 42);
    ///
    /// let bad = Shared::try_new_with(|| "nope".parse::<i32>());
    /// assert!(matches!(bad, Err(InitError::Init(_))));
    /// ```
    pub fn try_new_with<E, F>(init: F) -> Result<Shared<T>, InitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        Shared::try_new_with_in(Global, init)
    }

    pub fn try_new_with_in<A, E, F>(alloc: A, init: F) -> Result<Shared<T>, InitError<E>>
    where
        A: Allocator + 'static,
        F: FnOnce() -> Result<T, E>,
    {
        let (block, ptr) = InPlaceBlock::try_new_with(alloc, init)?;
        Ok(Shared::from_inner(Inner { block, ptr }))
    }

    /// Constructs a new `Shared<T>` while giving you a `Weak<T>` to the
    /// allocation, to allow you to construct a `T` which holds a weak pointer
    /// to itself.
    ///
    /// The weak pointer is expired until `data_fn` returns.
    pub fn new_cyclic<F>(data_fn: F) -> Shared<T>
    where
        F: FnOnce(&Weak<T>) -> T,
    {
        let (block, ptr) = match InPlaceBlock::<T, Global>::new_cyclic_uninit(Global) {
            Ok(b) => b,
            Err(AllocError) => handle_alloc_error(Layout::new::<InPlaceBlock<T, Global>>()),
        };
        // If `data_fn` panics, dropping `weak` frees the block without
        // touching the uninitialized value.
        let weak = Weak::from_parts(block, Some(ptr));
        let value = data_fn(&weak);
        unsafe {
            ptr.as_ptr().write(value);
            InPlaceBlock::<T, Global>::finish_cyclic(block);
        }
        // Strong references collectively own a shared weak reference, so don't
        // run the destructor for our old weak reference.
        mem::forget(weak);
        Shared::from_inner(Inner { block, ptr })
    }
}

impl<T: ?Sized> Shared<T> {
    /// A handle that owns nothing and has no control block.
    pub const fn null() -> Shared<T> {
        Shared {
            inner: None,
            phantom: PhantomData,
        }
    }

    pub(crate) fn from_inner(inner: Inner<T>) -> Shared<T> {
        Shared {
            inner: Some(inner),
            phantom: PhantomData,
        }
    }

    /// Return a `Shared<T>` for a boxed value. The box allocation is reused
    /// as-is; only the control block is allocated.
    pub fn from_box(value: Box<T>) -> Shared<T> {
        let ptr = NonNull::from(Box::leak(value));
        match RegularBlock::try_new(ptr, DefaultDelete, Global) {
            Ok(block) => Shared::from_inner(Inner { block, ptr }),
            Err(AllocError) => {
                drop(unsafe { Box::from_raw(ptr.as_ptr()) });
                handle_alloc_error(Layout::new::<RegularBlock<T, DefaultDelete, Global>>())
            }
        }
    }

    /// Adopts a pointer obtained from `Box::into_raw`. A null pointer gives
    /// a null handle.
    ///
    /// # Safety
    /// `ptr` must be null or come from `Box::into_raw`, and nothing else may
    /// free it.
    pub unsafe fn from_raw(ptr: *mut T) -> Shared<T> {
        Shared::from_raw_in(ptr, DefaultDelete, Global)
    }

    /// Adopts `ptr`, which `deleter` destroys once the last strong handle
    /// is gone.
    ///
    /// # Safety
    /// `ptr` must be null or valid for shared reads until `deleter` runs,
    /// and nothing else may mutate or free it in that time.
    pub unsafe fn from_raw_with<D>(ptr: *mut T, deleter: D) -> Shared<T>
    where
        D: Deleter<T> + 'static,
    {
        Shared::from_raw_in(ptr, deleter, Global)
    }

    /// Adopts `ptr` with a custom deleter, allocating the control block in
    /// `alloc`.
    ///
    /// # Safety
    /// As for [`Shared::from_raw_with`].
    pub unsafe fn from_raw_in<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Shared<T>
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        match Shared::try_from_raw_in(ptr, deleter, alloc) {
            Ok(s) => s,
            Err(AllocError) => handle_alloc_error(Layout::new::<RegularBlock<T, D, A>>()),
        }
    }

    /// Fallible [`Shared::from_raw_in`].
    ///
    /// If the block can't be allocated, the error is returned and `ptr` is
    /// *not* destroyed: ownership was never taken, so freeing it is up to
    /// the caller. `deleter` is dropped without being called.
    ///
    /// # Safety
    /// As for [`Shared::from_raw_with`].
    pub unsafe fn try_from_raw_in<D, A>(
        ptr: *mut T,
        deleter: D,
        alloc: A,
    ) -> Result<Shared<T>, AllocError>
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        let Some(ptr) = NonNull::new(ptr) else {
            return Ok(Shared::null());
        };
        let block = RegularBlock::try_new(ptr, deleter, alloc)?;
        Ok(Shared::from_inner(Inner { block, ptr }))
    }

    /// Return a `Shared<U>` for any type U contained within T, e.g. an element
    /// of a slice, or &dyn view of an object. The result shares ownership (and
    /// counts) with `this`.
    pub fn project<U: ?Sized, F: FnOnce(&T) -> &U>(this: Self, f: F) -> Shared<U>
    where
        T: 'static,
    {
        match Shared::try_project(this, |x| Some(f(x))) {
            Some(u) => u,
            None => Shared::null(),
        }
    }

    /// Fallible version of `project()`. Returns `None` if `f` does, and
    /// releases `this` in that case. A null `this` gives `Some(null)`.
    pub fn try_project<U: ?Sized, F: FnOnce(&T) -> Option<&U>>(
        this: Self,
        f: F,
    ) -> Option<Shared<U>>
    where
        T: 'static,
    {
        let Some(inner) = this.inner else {
            return Some(Shared::null());
        };
        let ptr = NonNull::from(f(unsafe { inner.ptr.as_ref() })?);
        // Forget `this` so it doesn't adjust the refcount, since we moved it
        // into the result.
        mem::forget(this);
        Some(Shared::from_inner(Inner {
            block: inner.block,
            ptr,
        }))
    }

    /// Converts to a handle of a type `T` can be viewed as. Counts are
    /// unaffected; both names observe the same block.
    pub fn upcast<U: ?Sized>(this: Self) -> Shared<U>
    where
        T: Upcast<U> + 'static,
    {
        Shared::project(this, <T as Upcast<U>>::upcast)
    }

    /// Convert `Shared<T>` to `Shared<U>`, as long as &T converts to &U.
    pub fn cast<U: ?Sized>(this: Self) -> Shared<U>
    where
        T: 'static,
        for<'u> &'u U: From<&'u T>,
    {
        Shared::project(this, |x| From::from(x))
    }

    /// Return a [`Weak`] pointer to this object. A null handle gives a null
    /// `Weak`.
    pub fn downgrade(this: &Self) -> Weak<T> {
        match this.inner {
            None => Weak::new(),
            Some(inner) => {
                unsafe { inner.block.as_ref() }.inc_weak();
                Weak::from_parts(inner.block, Some(inner.ptr))
            }
        }
    }

    /// Releases this handle's reference and leaves it null.
    pub fn reset(this: &mut Self) {
        drop(mem::take(this));
    }

    /// Replaces the value with a freshly adopted box. The old reference is
    /// released after the new handle is in place.
    pub fn reset_box(this: &mut Self, value: Box<T>) {
        drop(mem::replace(this, Shared::from_box(value)));
    }

    /// Replaces the value with `ptr`, adopted as by [`Shared::from_raw`].
    ///
    /// # Safety
    /// As for [`Shared::from_raw`].
    pub unsafe fn reset_raw(this: &mut Self, ptr: *mut T) {
        drop(mem::replace(this, Shared::from_raw(ptr)));
    }

    /// Replaces the value with `ptr` and a custom deleter.
    ///
    /// # Safety
    /// As for [`Shared::from_raw_with`].
    pub unsafe fn reset_raw_with<D>(this: &mut Self, ptr: *mut T, deleter: D)
    where
        D: Deleter<T> + 'static,
    {
        drop(mem::replace(this, Shared::from_raw_with(ptr, deleter)));
    }

    /// Replaces the value with a freshly adopted raw pointer, allocating the
    /// new block in `alloc`.
    ///
    /// # Safety
    /// As for [`Shared::from_raw_with`].
    pub unsafe fn reset_raw_in<D, A>(this: &mut Self, ptr: *mut T, deleter: D, alloc: A)
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        drop(mem::replace(this, Shared::from_raw_in(ptr, deleter, alloc)));
    }

    pub fn is_null(this: &Self) -> bool {
        this.inner.is_none()
    }

    pub fn get(this: &Self) -> Option<&T> {
        this.inner.map(|i| unsafe { &*i.ptr.as_ptr() })
    }

    /// Number of live `Shared` handles for this block; 0 for a null handle.
    pub fn use_count(this: &Self) -> usize {
        match this.inner {
            Some(i) => unsafe { i.block.as_ref() }.strong(),
            None => 0,
        }
    }

    /// Number of live [`Weak`] handles for this block; 0 for a null handle.
    pub fn weak_count(this: &Self) -> usize {
        match this.inner {
            Some(i) => unsafe { i.block.as_ref() }.weak(),
            None => 0,
        }
    }

    /// How the value is stored, or `None` for a null handle.
    pub fn block_kind(this: &Self) -> Option<BlockKind> {
        this.inner.map(|i| unsafe { i.block.as_ref() }.kind())
    }

    /// Returns true if two `Shared` pointers point to the same object (or are
    /// both null). This is not the same as sharing the same block: see
    /// [`Shared::root_ptr_eq`].
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.inner.map(|i| i.ptr) == other.inner.map(|i| i.ptr)
    }

    /// Returns true if two `Shared` pointers share a control block, i.e.
    /// they share reference counts. They may point to different subobjects
    /// within that block due to `project()`.
    pub fn root_ptr_eq<U: ?Sized>(this: &Self, other: &Shared<U>) -> bool {
        this.inner.map(|i| i.block) == other.inner.map(|i| i.block)
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    /// # Panics
    /// If the handle is null.
    fn deref(&self) -> &T {
        match Shared::get(self) {
            Some(v) => v,
            None => panic!("dereferenced a null `Shared`"),
        }
    }
}

impl<T: ?Sized> AsRef<T> for Shared<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: ?Sized> borrow::Borrow<T> for Shared<T> {
    fn borrow(&self) -> &T {
        self
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        if let Some(i) = self.inner {
            unsafe { i.block.as_ref() }.inc_strong();
        }
        Shared {
            inner: self.inner,
            phantom: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Some(i) = self.inner.take() {
            unsafe { ControlBlock::release_strong(i.block) }
        }
    }
}

/// The null handle.
impl<T: ?Sized> Default for Shared<T> {
    fn default() -> Self {
        Shared::null()
    }
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Shared::new(value)
    }
}

impl<T: ?Sized> From<Box<T>> for Shared<T> {
    fn from(value: Box<T>) -> Self {
        Shared::from_box(value)
    }
}

impl<T: ?Sized + PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        Shared::get(self) == Shared::get(other)
    }
}

impl<T: ?Sized + Eq> Eq for Shared<T> {}

impl<T: ?Sized + PartialOrd> PartialOrd for Shared<T> {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Shared::get(self).partial_cmp(&Shared::get(other))
    }
}

impl<T: ?Sized + Ord> Ord for Shared<T> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        Shared::get(self).cmp(&Shared::get(other))
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Shared::get(self) {
            Some(v) => fmt::Display::fmt(v, f),
            None => f.write_str("(null)"),
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Shared::get(self) {
            Some(v) => fmt::Debug::fmt(v, f),
            None => f.write_str("(null)"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner {
            Some(i) => fmt::Pointer::fmt(&(i.ptr.as_ptr() as *const T), f),
            None => fmt::Pointer::fmt(&ptr::null::<u8>(), f),
        }
    }
}
