//! Random copy/move/drop/lock sequences over handles sharing one block.
use blockrc::{AllocError, Allocator, Global, Shared, Weak};
use rand_core::{RngCore, SeedableRng};
use rand_pcg::Lcg128Xsl64 as Pcg;
use std::alloc::Layout;
use std::cell::Cell;
use std::ptr::NonNull;
use std::rc::Rc;

#[derive(Default)]
struct Events {
    payload_drops: Cell<usize>,
    block_frees: Cell<usize>,
}

#[derive(Clone)]
struct Tracking(Rc<Events>);

unsafe impl Allocator for Tracking {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        Global.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // the block is never freed ahead of its payload
        assert_eq!(self.0.payload_drops.get(), 1);
        self.0.block_frees.set(self.0.block_frees.get() + 1);
        Global.deallocate(ptr, layout)
    }
}

struct Payload(Rc<Events>);

impl Drop for Payload {
    fn drop(&mut self) {
        self.0.payload_drops.set(self.0.payload_drops.get() + 1);
    }
}

fn pick(rng: &mut Pcg, n: usize) -> usize {
    (rng.next_u64() % n as u64) as usize
}

fn run(seed: u64, in_place: bool) {
    let mut rng = Pcg::seed_from_u64(seed);
    let events = Rc::new(Events::default());
    let alloc = Tracking(events.clone());
    let first = if in_place {
        Shared::new_in(Payload(events.clone()), alloc)
    } else {
        let raw = Box::into_raw(Box::new(Payload(events.clone())));
        unsafe { Shared::from_raw_in(raw, blockrc::DefaultDelete, alloc) }
    };
    let mut strong: Vec<Shared<Payload>> = vec![first];
    let mut weak: Vec<Weak<Payload>> = Vec::new();

    for _ in 0..200 {
        if strong.is_empty() && weak.is_empty() {
            break;
        }
        match pick(&mut rng, 7) {
            0 if !strong.is_empty() => {
                let i = pick(&mut rng, strong.len());
                strong.push(strong[i].clone());
            }
            1 if !strong.is_empty() => {
                let i = pick(&mut rng, strong.len());
                drop(strong.swap_remove(i));
            }
            2 if !strong.is_empty() => {
                // move out, leaving a null handle behind that is then dropped
                let i = pick(&mut rng, strong.len());
                let moved = std::mem::take(&mut strong[i]);
                let null = std::mem::replace(&mut strong[i], moved);
                assert!(Shared::is_null(&null));
            }
            3 if !strong.is_empty() => {
                let i = pick(&mut rng, strong.len());
                weak.push(Shared::downgrade(&strong[i]));
            }
            4 if !weak.is_empty() => {
                let i = pick(&mut rng, weak.len());
                weak.push(weak[i].clone());
            }
            5 if !weak.is_empty() => {
                let i = pick(&mut rng, weak.len());
                drop(weak.swap_remove(i));
            }
            6 if !weak.is_empty() => {
                let i = pick(&mut rng, weak.len());
                let s = weak[i].lock();
                if strong.is_empty() {
                    assert!(Shared::is_null(&s));
                } else {
                    assert_eq!(Shared::use_count(&s), strong.len() + 1);
                    strong.push(s);
                }
            }
            _ => continue,
        }

        let expect_drops = usize::from(strong.is_empty());
        assert_eq!(events.payload_drops.get(), expect_drops);
        let expect_frees = usize::from(strong.is_empty() && weak.is_empty());
        assert_eq!(events.block_frees.get(), expect_frees);
        if let Some(s) = strong.first() {
            assert_eq!(Shared::use_count(s), strong.len());
            assert_eq!(Shared::weak_count(s), weak.len());
        }
        for w in &weak {
            assert_eq!(w.expired(), strong.is_empty());
            assert_eq!(w.weak_count(), weak.len());
        }
    }

    drop(strong);
    assert_eq!(events.payload_drops.get(), 1);
    drop(weak);
    assert_eq!(events.payload_drops.get(), 1);
    assert_eq!(events.block_frees.get(), 1);
}

#[test]
fn random_sequences_in_place() {
    for seed in 0..64 {
        run(seed, true);
    }
}

#[test]
fn random_sequences_regular() {
    for seed in 0..64 {
        run(seed, false);
    }
}
