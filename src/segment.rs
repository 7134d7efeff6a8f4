use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::{MaybeUninit, size_of};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

type Slot<T> = UnsafeCell<MaybeUninit<T>>;

/// Largest number of slots a single segment may hold for element type `T`.
///
/// A segment's slots live in one allocation, which Rust caps at
/// `isize::MAX` bytes.
pub(crate) fn max_slots<T>() -> usize {
    isize::MAX as usize / size_of::<Slot<T>>().max(1)
}

/// One fixed-size block of the chain.
///
/// A segment is written by exactly one writer and read by any number of
/// readers. Slots are written in order and never touched again; `len` is the
/// publication point for them:
///
/// ```text
/// slots: [ v0 | v1 | v2 | uninit | uninit ]     next: null
///                       ^
///                       len = 3 (release-stored after v2 was written)
/// ```
///
/// A reader that acquire-loads `len == n` may read slots `0..n`. Once `len`
/// reaches `slots.len()` the segment is sealed and the only remaining change
/// is the one-time store of `next`.
pub(crate) struct Segment<T> {
    /// Number of initialized slots. Padded so the writer's hot counter does
    /// not share a cache line with `next`.
    len: CachePadded<AtomicUsize>,

    /// Successor segment, null until the writer links one.
    next: AtomicPtr<Segment<T>>,

    slots: Box<[Slot<T>]>,
}

impl<T> Segment<T> {
    /// Allocates an empty segment with `slots` element slots and leaks it.
    ///
    /// Ownership passes to the caller, which must eventually hand the
    /// pointer to [`free_chain`] (directly, or through a predecessor's link).
    pub(crate) fn alloc(slots: usize) -> NonNull<Segment<T>> {
        let uninit: Box<[MaybeUninit<Slot<T>>]> = Box::new_uninit_slice(slots);
        // SAFETY: `Slot<T>` is `UnsafeCell<MaybeUninit<T>>`, which is valid
        // uninitialized and has the same layout as `MaybeUninit<Slot<T>>`.
        // Nothing is written per slot, so zero-sized `T` costs no time.
        let slots = unsafe { Box::from_raw(Box::into_raw(uninit) as *mut [Slot<T>]) };
        let segment = Box::new(Self {
            len: CachePadded::new(AtomicUsize::new(0)),
            next: AtomicPtr::new(ptr::null_mut()),
            slots,
        });
        NonNull::from(Box::leak(segment))
    }

    #[inline(always)]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots a reader may safely read.
    #[inline(always)]
    pub(crate) fn published(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns the linked successor, if the writer has published one.
    #[inline(always)]
    pub(crate) fn successor(&self) -> Option<&Segment<T>> {
        let next = self.next.load(Ordering::Acquire);
        // SAFETY: a non-null `next` points to a fully constructed segment
        // (release-stored by `link`). Segments are freed only by
        // `free_chain`, which runs once no borrow of the chain remains.
        unsafe { next.as_ref() }
    }

    /// Moves `value` into slot `offset` and publishes it.
    ///
    /// # Safety
    ///
    /// The caller must be the only writer of this segment, and `offset` must
    /// equal the current published length and be below `slot_count()`.
    #[inline(always)]
    pub(crate) unsafe fn write(&self, offset: usize, value: T) {
        debug_assert_eq!(offset, self.len.load(Ordering::Relaxed));
        debug_assert!(offset < self.slots.len());
        // SAFETY: slot `offset` is past the published prefix, so no reader
        // holds a reference into it and no other writer exists.
        unsafe { (*self.slots[offset].get()).write(value) };
        self.len.store(offset + 1, Ordering::Release);
    }

    /// Returns a reference to an initialized slot.
    ///
    /// # Safety
    ///
    /// `index` must be below a value previously returned by `published()`.
    #[inline(always)]
    pub(crate) unsafe fn get(&self, index: usize) -> &T {
        // SAFETY: the acquire load in `published()` synchronized with the
        // release store that followed the slot write; the slot is never
        // written again.
        unsafe { (*self.slots[index].get()).assume_init_ref() }
    }

    /// Publishes `next` as this segment's successor.
    ///
    /// # Safety
    ///
    /// The caller must be the only writer, this segment must have no
    /// successor yet, and `next` must come from [`Segment::alloc`] and not be
    /// owned by any other chain.
    pub(crate) unsafe fn link(&self, next: NonNull<Segment<T>>) {
        debug_assert!(self.next.load(Ordering::Relaxed).is_null());
        self.next.store(next.as_ptr(), Ordering::Release);
    }
}

impl<T> Drop for Segment<T> {
    fn drop(&mut self) {
        let len = *self.len.get_mut();
        for slot in &mut self.slots[..len] {
            // SAFETY: the first `len` slots were initialized by `write` and
            // are dropped exactly once, here.
            unsafe { slot.get_mut().assume_init_drop() };
        }
    }
}

/// Frees every segment reachable from `head`, iteratively, so long chains
/// cannot overflow the stack.
///
/// # Safety
///
/// `head` must come from [`Segment::alloc`], every segment in the chain must
/// be owned solely by it, and no reference into the chain may outlive this
/// call.
pub(crate) unsafe fn free_chain<T>(head: NonNull<Segment<T>>) {
    let mut cursor = head.as_ptr();
    while !cursor.is_null() {
        // SAFETY: each pointer was leaked by `alloc` and is reclaimed once.
        let mut segment = unsafe { Box::from_raw(cursor) };
        cursor = *segment.next.get_mut();
        drop(segment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn alloc_starts_empty_and_unlinked() {
        let seg = Segment::<u64>::alloc(4);
        let r = unsafe { seg.as_ref() };
        assert_eq!(r.slot_count(), 4);
        assert_eq!(r.published(), 0);
        assert!(r.successor().is_none());
        unsafe { free_chain(seg) };
    }

    #[test]
    fn write_publishes_in_order() {
        let seg = Segment::<u64>::alloc(3);
        let r = unsafe { seg.as_ref() };

        unsafe { r.write(0, 10) };
        assert_eq!(r.published(), 1);
        unsafe { r.write(1, 20) };
        assert_eq!(r.published(), 2);

        let values: Vec<u64> = (0..r.published()).map(|i| unsafe { *r.get(i) }).collect();
        assert_eq!(values, vec![10, 20]);
        unsafe { free_chain(seg) };
    }

    #[test]
    fn link_exposes_successor() {
        let first = Segment::<u64>::alloc(1);
        let second = Segment::<u64>::alloc(1);
        unsafe {
            first.as_ref().write(0, 1);
            first.as_ref().link(second);
            second.as_ref().write(0, 2);
        }

        let succ = unsafe { first.as_ref() }.successor().unwrap();
        assert!(ptr::eq(succ, second.as_ptr()));
        assert_eq!(unsafe { *succ.get(0) }, 2);
        unsafe { free_chain(first) };
    }

    #[test]
    fn free_chain_drops_only_written_slots() {
        let payload = Arc::new(());
        let first = Segment::<Arc<()>>::alloc(2);
        let second = Segment::<Arc<()>>::alloc(2);
        unsafe {
            first.as_ref().write(0, payload.clone());
            first.as_ref().write(1, payload.clone());
            first.as_ref().link(second);
            second.as_ref().write(0, payload.clone());
        }
        assert_eq!(Arc::strong_count(&payload), 4);

        unsafe { free_chain(first) };
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn huge_zero_sized_segment_allocates_without_touching_slots() {
        let seg = Segment::<()>::alloc(1 << 40);
        let r = unsafe { seg.as_ref() };
        assert_eq!(r.slot_count(), 1 << 40);
        unsafe { r.write(0, ()) };
        assert_eq!(r.published(), 1);
        unsafe { free_chain(seg) };
    }

    #[test]
    fn zero_slot_segment_is_legal() {
        let seg = Segment::<String>::alloc(0);
        let r = unsafe { seg.as_ref() };
        assert_eq!(r.slot_count(), 0);
        assert_eq!(r.published(), 0);
        unsafe { free_chain(seg) };
    }

    #[test]
    fn max_slots_scales_with_element_size() {
        assert!(max_slots::<u8>() > max_slots::<u64>());
        assert_eq!(max_slots::<u64>(), isize::MAX as usize / 8);
        assert_eq!(max_slots::<()>(), isize::MAX as usize);
    }
}
