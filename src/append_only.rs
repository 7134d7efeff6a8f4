use crate::error::{BufferError, Result};
use crate::segment::{Segment, free_chain, max_slots};
use std::fmt::Debug;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::trace;

/// Why a [`scan_until`](AppendOnlyBuffer::scan_until) traversal stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Termination {
    /// The predicate returned `true`; no later value was visited.
    Matched,
    /// Every value published so far was visited without a match.
    Exhausted,
}

impl Termination {
    #[inline]
    pub fn is_matched(self) -> bool {
        self == Termination::Matched
    }
}

/// Receiver of replayed values.
///
/// This is the boundary to whatever observer protocol the owning relay
/// uses. Closures `FnMut(&T)` implement it directly.
pub trait Sink<T: ?Sized> {
    fn accept(&mut self, value: &T);
}

impl<T: ?Sized, F: FnMut(&T)> Sink<T> for F {
    #[inline(always)]
    fn accept(&mut self, value: &T) {
        self(value)
    }
}

/// The segment chain shared by the writer and all readers.
///
/// Owns every segment reachable from `head`. Freed when the last
/// [`AppendOnlyBuffer`] or [`BufferReader`] referencing it drops.
struct Chain<T> {
    head: NonNull<Segment<T>>,

    /// Slots per segment as requested at construction (may be 0).
    capacity: usize,

    _marker: PhantomData<Box<Segment<T>>>,
}

// SAFETY: the chain hands out `&T` to any thread holding a handle (needs
// `T: Sync`) and drops the values on whichever thread releases it last
// (needs `T: Send`). All shared mutation goes through the segments' atomics.
unsafe impl<T: Send + Sync> Send for Chain<T> {}
unsafe impl<T: Send + Sync> Sync for Chain<T> {}

impl<T> Chain<T> {
    #[inline(always)]
    fn head(&self) -> &Segment<T> {
        // SAFETY: `head` is allocated in `AppendOnlyBuffer::try_new` and
        // freed only in `Drop for Chain`.
        unsafe { self.head.as_ref() }
    }

    #[inline]
    fn iter(&self) -> Iter<'_, T> {
        let head = self.head();
        Iter {
            published: head.published(),
            segment: Some(head),
            index: 0,
        }
    }

    #[inline]
    fn scan_until(&self, predicate: impl FnMut(&T) -> bool) -> Termination {
        if self.iter().any(predicate) {
            Termination::Matched
        } else {
            Termination::Exhausted
        }
    }
}

impl<T> Drop for Chain<T> {
    fn drop(&mut self) {
        // SAFETY: the chain is the sole owner of its segments, and no handle
        // (hence no `Iter` borrow) outlives it.
        unsafe { free_chain(self.head) };
    }
}

/// An append-only list of fixed-size segments with one writer and any
/// number of lock-free readers.
///
/// Values are moved into segments of `capacity` slots. When the tail segment
/// is full, a new segment is allocated and linked behind it; nothing already
/// stored is ever copied or moved, so a reference handed out by a traversal
/// stays valid for as long as the buffer (or any reader) lives.
///
/// ```text
/// head                                 tail
///  [ a | b ] --> [ c | d ] --> [ e | _ ]
///                                    ^ offset = 1
/// ```
///
/// # Writers
///
/// [`append`](Self::append) takes `&mut self`, so the single-writer rule is
/// enforced by the borrow checker. A relay that emits from several threads
/// puts the buffer behind its own lock and holds it across the
/// emit-and-record step.
///
/// # Readers
///
/// Traversals take `&self`, and [`reader`](Self::reader) hands out a
/// [`BufferReader`] that shares the chain without any lock. Readers only
/// ever see a prefix of what was appended, in append order:
///
/// 1. a value is written to its slot before the segment's length is
///    release-stored past it, and
/// 2. a segment is fully constructed before it is release-stored as its
///    predecessor's successor.
///
/// Readers acquire-load both, so a traversal never observes a partially
/// written value or a partially built segment.
pub struct AppendOnlyBuffer<T> {
    chain: Arc<Chain<T>>,

    /// Segment receiving appends. Only the writer follows this pointer.
    tail: NonNull<Segment<T>>,

    /// Next free slot within `tail`.
    offset: usize,

    len: usize,
    segments: usize,
}

// SAFETY: `tail` points into the chain owned by `chain` and is dereferenced
// only through `&mut self` to write, so moving or sharing the handle is as
// safe as moving or sharing the chain.
unsafe impl<T: Send + Sync> Send for AppendOnlyBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for AppendOnlyBuffer<T> {}

impl<T> AppendOnlyBuffer<T> {
    /// Creates an empty buffer whose segments each hold `capacity` values.
    ///
    /// A capacity of zero is accepted: the head segment then holds nothing
    /// and every append links a new single-slot segment.
    ///
    /// # Panics
    ///
    /// Panics if a segment of `capacity` slots cannot be allocated. Use
    /// [`try_new`](Self::try_new) to handle that case.
    pub fn new(capacity: usize) -> Self {
        match Self::try_new(capacity) {
            Ok(buffer) => buffer,
            Err(err) => panic!("{err}"),
        }
    }

    /// Creates an empty buffer, rejecting capacities whose segment
    /// allocation would exceed `isize::MAX` bytes.
    pub fn try_new(capacity: usize) -> Result<Self> {
        let max = max_slots::<T>();
        if capacity > max {
            return Err(BufferError::CapacityOverflow { capacity, max });
        }
        let head = Segment::alloc(capacity);
        Ok(Self {
            chain: Arc::new(Chain {
                head,
                capacity,
                _marker: PhantomData,
            }),
            tail: head,
            offset: 0,
            len: 0,
            segments: 1,
        })
    }

    /// Appends `value` after everything appended so far.
    ///
    /// Runs in O(1): when the tail is full a fresh segment is linked, and
    /// previously stored values are never touched.
    pub fn append(&mut self, value: T) {
        let mut tail = self.tail;
        // SAFETY: `tail` belongs to the chain kept alive by `self.chain`.
        if self.offset == unsafe { tail.as_ref() }.slot_count() {
            let next = Segment::alloc(self.chain.capacity.max(1));
            // SAFETY: `&mut self` makes us the only writer; `tail` has no
            // successor because it has always been the last segment.
            unsafe { tail.as_ref().link(next) };
            tail = next;
            self.tail = next;
            self.offset = 0;
            self.segments += 1;
            trace!(
                segments = self.segments,
                capacity = self.chain.capacity,
                "linked new segment"
            );
        }
        // SAFETY: only writer; `offset` equals the tail's published length
        // and is below its slot count.
        unsafe { tail.as_ref().write(self.offset, value) };
        self.offset += 1;
        self.len += 1;
    }

    /// Visits values in append order until `predicate` returns `true` or
    /// no further value has been published.
    pub fn scan_until(&self, predicate: impl FnMut(&T) -> bool) -> Termination {
        self.chain.scan_until(predicate)
    }

    /// Passes every published value, in append order, to `sink`.
    pub fn for_each(&self, sink: impl FnMut(&T)) {
        self.chain.iter().for_each(sink)
    }

    /// Replays every published value into `sink`.
    pub fn accept<S: Sink<T> + ?Sized>(&self, sink: &mut S) {
        for value in self.chain.iter() {
            sink.accept(value);
        }
    }

    /// Iterates over the published values, starting again from the head.
    pub fn iter(&self) -> Iter<'_, T> {
        self.chain.iter()
    }

    /// Returns a lock-free reader sharing this buffer's chain.
    pub fn reader(&self) -> BufferReader<T> {
        BufferReader {
            chain: Arc::clone(&self.chain),
        }
    }

    /// Slots per segment, as requested at construction.
    pub fn capacity(&self) -> usize {
        self.chain.capacity
    }

    /// Number of values appended so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of segments in the chain, including a not-yet-written tail.
    pub fn segment_count(&self) -> usize {
        self.segments
    }
}

impl<T> Extend<T> for AppendOnlyBuffer<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.append(value);
        }
    }
}

impl<'a, T> IntoIterator for &'a AppendOnlyBuffer<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> Debug for AppendOnlyBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppendOnlyBuffer")
            .field("capacity", &self.chain.capacity)
            .field("len", &self.len)
            .field("segments", &self.segments)
            .field("offset", &self.offset)
            .finish()
    }
}

/// Read-only handle to an [`AppendOnlyBuffer`]'s chain.
///
/// Readers are cheap to clone, `Send + Sync` for `T: Send + Sync`, and never
/// block the writer. Each traversal starts again at the head and sees every
/// value published before it reached that value's slot. A reader keeps the
/// chain alive after the buffer itself is dropped.
pub struct BufferReader<T> {
    chain: Arc<Chain<T>>,
}

impl<T> BufferReader<T> {
    /// See [`AppendOnlyBuffer::scan_until`].
    pub fn scan_until(&self, predicate: impl FnMut(&T) -> bool) -> Termination {
        self.chain.scan_until(predicate)
    }

    /// See [`AppendOnlyBuffer::for_each`].
    pub fn for_each(&self, sink: impl FnMut(&T)) {
        self.chain.iter().for_each(sink)
    }

    /// See [`AppendOnlyBuffer::accept`].
    pub fn accept<S: Sink<T> + ?Sized>(&self, sink: &mut S) {
        for value in self.chain.iter() {
            sink.accept(value);
        }
    }

    pub fn iter(&self) -> Iter<'_, T> {
        self.chain.iter()
    }

    pub fn capacity(&self) -> usize {
        self.chain.capacity
    }
}

impl<T> Clone for BufferReader<T> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
        }
    }
}

impl<'a, T> IntoIterator for &'a BufferReader<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> Debug for BufferReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferReader")
            .field("capacity", &self.chain.capacity)
            .finish_non_exhaustive()
    }
}

/// Traversal over the values published in a chain.
///
/// Stops at the first slot not yet published, or at a full segment with no
/// successor. Once it returns `None` it keeps returning `None`; start a new
/// traversal to pick up later appends.
pub struct Iter<'a, T> {
    segment: Option<&'a Segment<T>>,
    index: usize,

    /// Published length of `segment` as last observed.
    published: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    #[inline]
    fn next(&mut self) -> Option<&'a T> {
        loop {
            let segment = self.segment?;
            if self.index < self.published {
                // SAFETY: `index` is below a length acquire-loaded from this
                // segment.
                let value = unsafe { segment.get(self.index) };
                self.index += 1;
                return Some(value);
            }

            // The writer may have published more since we last looked.
            self.published = segment.published();
            if self.index < self.published {
                continue;
            }

            if self.published < segment.slot_count() {
                self.segment = None;
                return None;
            }

            self.segment = segment.successor();
            self.index = 0;
            self.published = self.segment.map_or(0, Segment::published);
        }
    }
}

impl<T> FusedIterator for Iter<'_, T> {}
