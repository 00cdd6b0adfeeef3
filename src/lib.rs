/*!
This crate provides [`Shared<T>`] and [`Weak<T>`], single-threaded
reference-counted pointers modelled on C++'s
[`shared_ptr`](https://en.cppreference.com/w/cpp/memory/shared_ptr) and
[`weak_ptr`](https://en.cppreference.com/w/cpp/memory/weak_ptr).

Like `shared_ptr`, every handle points at a *control block* holding the strong
and weak counts, and the block knows how to destroy the value and itself. The
block is type-erased: a `Shared<dyn Trait>` can share counts with a
`Shared<Concrete>` without knowing which deleter, allocator or payload type
created the block.

```rust
    use blockrc::{Shared, Weak};

    let a: Shared<[i32; 3]> = Shared::new([1, 2, 3]);
    let w: Weak<[i32; 3]> = Shared::downgrade(&a);

    let b = a.clone();
    assert_eq!(Shared::use_count(&a), 2);
    drop(a);
    assert_eq!(w.use_count(), 1);

    // `b` is keeping the whole object alive
    assert!(!w.expired());
    drop(b);
    assert!(w.expired());
    assert!(Shared::is_null(&w.lock()));
```

# Two kinds of blocks

[`Shared::new`] (and [`new_in`][Shared::new_in], [`try_new_with`][Shared::try_new_with])
allocates the value and its counts together, in one allocation
([`BlockKind::InPlace`]).

[`Shared::from_box`] and the `from_raw` family adopt a value that was
allocated separately. Only the counts are allocated, next to a [`Deleter`]
that destroys the value and the [`Allocator`] that frees the block
([`BlockKind::Regular`]).

```
    use blockrc::{BlockKind, Shared};
    use std::ptr::NonNull;

    let a = Shared::new(String::from("inline"));
    assert_eq!(Shared::block_kind(&a), Some(BlockKind::InPlace));

    let raw = Box::into_raw(Box::new(String::from("adopted")));
    let b = unsafe {
        Shared::from_raw_with(raw, |p: NonNull<String>| {
            drop(Box::from_raw(p.as_ptr()));
        })
    };
    assert_eq!(Shared::block_kind(&b), Some(BlockKind::Regular));
```

# Lifetimes of the value and the block

The value is destroyed exactly once, when the last `Shared` for its block is
dropped or [reset][Shared::reset]. The block itself is freed when the last
`Shared` *and* the last `Weak` are gone. A `Weak` never destroys the value;
[`Weak::lock`] is the only way to get a `Shared` back, and returns a null
`Shared` once the value is gone.

Cycles are not collected. Break them with `Weak`:

```
    use blockrc::{Shared, Weak};

    struct Tree {
        parent: Weak<Tree>,
        children: Vec<Shared<Tree>>,
    }

    let root = Shared::new_cyclic(|me| Tree {
        parent: Weak::new(),
        children: (0..2)
            .map(|_| Shared::new(Tree { parent: me.clone(), children: vec![] }))
            .collect(),
    });
    let child = &root.children[0];
    assert!(Shared::ptr_eq(&child.parent.lock(), &root));
```

# Null handles

Unlike `std::rc::Rc`, a `Shared` can be null: [`Shared::null`],
[`Default`], a moved-from handle (`mem::take`), a [reset][Shared::reset]
handle, or a failed [`Weak::lock`]. A null handle has no block and a
[`use_count`][Shared::use_count] of zero. Dereferencing it panics; use
[`Shared::get`] to check.

# Conversions

[`Shared::upcast`] converts `Shared<T>` to `Shared<U>` whenever `T:`
[`Upcast<U>`], e.g. a concrete type to a trait object it implements.
[`Shared::project`] converts to any view borrowed from the value, such as a
field or a slice. Either way the counts stay shared:

```
    use blockrc::Shared;

    let a: Shared<(String, u32)> = Shared::new(("name".into(), 7));
    let name: Shared<str> = Shared::project(a.clone(), |x| x.0.as_str());
    drop(a);
    assert_eq!(&*name, "name");
    assert_eq!(Shared::use_count(&name), 1);
```

# Threads

Counts are plain `Cell`s. `Shared` and `Weak` are neither `Send` nor `Sync`.

# Differences from `std::rc::Rc`

If you leak so many handles that a count overflows, `Rc` aborts. `blockrc`
panics in debug builds and wraps in release, because there is no `abort()`
in `no_std`.

`from_raw` adopts a pointer together with a deleter, like `shared_ptr`'s
constructor; it is not the inverse of an `into_raw`.
*/
#![no_std]
#![cfg_attr(feature = "allocator_api", feature(allocator_api))]
#[cfg(test)]
extern crate std;

extern crate alloc;

mod block;
pub mod delete;
pub mod error;
pub mod heap;
mod shared;
mod weak;

pub use self::block::BlockKind;
pub use self::delete::{DefaultDelete, Deleter};
pub use self::error::InitError;
pub use self::heap::{AllocError, Allocator, Global};
pub use self::shared::{Shared, Upcast};
pub use self::weak::Weak;
