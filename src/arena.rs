use core::{mem, ptr, slice};
use std::alloc;

use crossbeam_utils::CachePadded;

use crate::{
  error::ArenaError,
  node::{Node, NodePtr, MAX_NODE_SIZE},
  sync::{AtomicU32, AtomicU64, Ordering},
  value::{Value, ValueRef},
  MAX_HEIGHT,
};

/// Size of a single tower link inside the arena.
const LINK_SIZE: usize = mem::size_of::<u32>();

/// Alignment of node allocations, so that the 64-bit value slot at the start
/// of every node can be loaded and stored atomically.
const NODE_ALIGNMENT: u32 = mem::align_of::<u64>() as u32;

/// A fixed-capacity, append-only bump allocator. Everything a skiplist owns
/// lives in here: nodes, raw keys and encoded values, all addressed by `u32`
/// offsets. Offset 0 is reserved as a kind of nil pointer, so the watermark
/// starts at 1.
///
/// Allocation is a single fetch-add on the watermark; appended regions are
/// immutable afterwards except for the atomic words inside nodes.
pub(crate) struct Arena {
  data_ptr: ptr::NonNull<u8>,
  n: CachePadded<AtomicU64>,
  cap: usize,
}

// Safety: the arena is a bag of bytes plus a watermark; all mutation of
// shared regions goes through the atomic words embedded in them.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
  /// The smallest buffer able to hold the head sentinel plus one full node.
  pub(crate) const MIN_CAP: usize = 1 + 2 * (MAX_NODE_SIZE + NODE_ALIGNMENT as usize);

  pub(crate) fn new(cap: usize) -> Self {
    let cap = cap.clamp(Self::MIN_CAP, u32::MAX as usize);
    // Safety: cap is non-zero and NODE_ALIGNMENT is a power of two well
    // below it.
    let data_ptr = unsafe {
      let layout = alloc::Layout::from_size_align_unchecked(cap, NODE_ALIGNMENT as usize);
      let ptr = alloc::alloc_zeroed(layout);
      if ptr.is_null() {
        alloc::handle_alloc_error(layout);
      }
      ptr::NonNull::new_unchecked(ptr)
    };

    Self {
      data_ptr,
      // Don't store data at position 0 in order to reserve offset=0 as a
      // kind of nil pointer.
      n: CachePadded::new(AtomicU64::new(1)),
      cap,
    }
  }

  /// Returns the number of bytes allocated from the arena, including the
  /// reserved null byte.
  #[inline]
  pub(crate) fn size(&self) -> u32 {
    self.n.load(Ordering::Acquire).min(u32::MAX as u64) as u32
  }

  /// Returns the capacity of the arena.
  #[inline]
  pub(crate) const fn capacity(&self) -> usize {
    self.cap
  }

  /// Returns the number of bytes the arena can still hand out.
  #[inline]
  pub(crate) fn remaining(&self) -> usize {
    self.cap.saturating_sub(self.size() as usize)
  }

  /// Reserves `size` bytes, padding the request so the returned offset can
  /// be rounded up to a multiple of `align`. `align` must be a power of two.
  fn alloc(&self, size: u32, align: u32) -> Result<u32, ArenaError> {
    let total = size as u64 + (align - 1) as u64;
    let end = self.n.fetch_add(total, Ordering::AcqRel) + total;
    if end > self.cap as u64 {
      return Err(ArenaError {
        requested: total,
        remaining: (self.cap as u64).saturating_sub(end - total),
      });
    }

    let start = (end - total) as u32;
    Ok((start + (align - 1)) & !(align - 1))
  }

  /// Allocates a node with a tower of `height` forward links. The tower
  /// above `height` is never accessed, so it is not allocated.
  pub(crate) fn put_node(&self, height: usize) -> Result<u32, ArenaError> {
    let unused = (MAX_HEIGHT - height) * LINK_SIZE;
    self.alloc((MAX_NODE_SIZE - unused) as u32, NODE_ALIGNMENT)
  }

  /// Copies `key` into the arena and returns its start offset.
  pub(crate) fn put_key(&self, key: &[u8]) -> Result<u32, ArenaError> {
    let offset = self.alloc(key.len() as u32, 1)?;
    // Safety: the region was just reserved for us and nothing else can see
    // it yet.
    unsafe {
      self
        .get_bytes_mut(offset as usize, key.len())
        .copy_from_slice(key);
    }
    Ok(offset)
  }

  /// Encodes `val` into the arena, returning the offset and encoded size.
  pub(crate) fn put_val(&self, val: &Value) -> Result<(u32, u32), ArenaError> {
    let size = val.encoded_size();
    let offset = self.alloc(size, 1)?;
    // Safety: the region was just reserved for us and nothing else can see
    // it yet.
    unsafe {
      val.encode(self.get_bytes_mut(offset as usize, size as usize));
    }
    Ok((offset, size))
  }

  /// Returns the node at `offset`; offset 0 yields the null pointer.
  #[inline]
  pub(crate) fn get_node(&self, offset: u32) -> NodePtr {
    if offset == 0 {
      return NodePtr::NULL;
    }
    // Safety: non-zero node offsets are only ever produced by put_node.
    unsafe { NodePtr::new(self.get_pointer(offset as usize), offset) }
  }

  /// ## Safety
  /// - `offset` and `size` must denote a region produced by [`put_key`](Arena::put_key).
  #[inline]
  pub(crate) unsafe fn get_key(&self, offset: u32, size: u16) -> &[u8] {
    self.get_bytes(offset as usize, size as usize)
  }

  /// Decodes the value record held at the given region.
  ///
  /// ## Safety
  /// - `offset` and `size` must denote a region produced by [`put_val`](Arena::put_val).
  #[inline]
  pub(crate) unsafe fn get_val(&self, offset: u32, size: u32) -> ValueRef<'_> {
    ValueRef::decode(self.get_bytes(offset as usize, size as usize))
  }

  /// Returns the tower link of the node at `offset` for the given level.
  ///
  /// ## Safety
  /// - `offset` must be a node offset whose tower holds at least
  ///   `level + 1` links.
  #[inline]
  pub(crate) unsafe fn tower(&self, offset: usize, level: usize) -> &AtomicU32 {
    let ptr = self.get_pointer(offset + mem::size_of::<Node>() + level * LINK_SIZE);
    &*ptr.cast()
  }

  /// ## Safety
  /// - `offset + size` must not exceed the capacity of the arena.
  #[inline]
  pub(crate) unsafe fn get_bytes(&self, offset: usize, size: usize) -> &[u8] {
    if offset == 0 {
      return &[];
    }

    slice::from_raw_parts(self.get_pointer(offset), size)
  }

  /// ## Safety
  /// - `offset + size` must not exceed the capacity of the arena.
  /// - The region must not be read or written by anyone else concurrently.
  #[allow(clippy::mut_from_ref)]
  #[inline]
  pub(crate) unsafe fn get_bytes_mut(&self, offset: usize, size: usize) -> &mut [u8] {
    if offset == 0 {
      return &mut [];
    }

    slice::from_raw_parts_mut(self.get_pointer_mut(offset), size)
  }

  /// ## Safety
  /// - `offset` must not exceed the capacity of the arena.
  #[inline]
  pub(crate) unsafe fn get_pointer(&self, offset: usize) -> *const u8 {
    if offset == 0 {
      return ptr::null();
    }
    self.data_ptr.as_ptr().add(offset)
  }

  /// ## Safety
  /// - `offset` must not exceed the capacity of the arena.
  #[inline]
  pub(crate) unsafe fn get_pointer_mut(&self, offset: usize) -> *mut u8 {
    if offset == 0 {
      return ptr::null_mut();
    }
    self.data_ptr.as_ptr().add(offset)
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    // Safety: the layout is the one the buffer was allocated with, and the
    // borrow checker guarantees no outstanding view into it survives the
    // list that owns us.
    unsafe {
      let layout = alloc::Layout::from_size_align_unchecked(self.cap, NODE_ALIGNMENT as usize);
      alloc::dealloc(self.data_ptr.as_ptr(), layout);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_reserves_null_offset() {
    let a = Arena::new(1 << 10);
    assert_eq!(a.size(), 1);
    assert!(a.get_node(0).is_null());

    let offset = a.put_key(b"abc").unwrap();
    assert_eq!(offset, 1);
    unsafe {
      assert_eq!(a.get_key(offset, 3), b"abc");
    }
  }

  #[test]
  fn test_node_offsets_are_aligned() {
    let a = Arena::new(1 << 16);
    a.put_key(b"x").unwrap();
    for height in 1..=MAX_HEIGHT {
      let offset = a.put_node(height).unwrap();
      assert_eq!(offset % NODE_ALIGNMENT, 0, "height {height}");
      a.put_key(b"odd").unwrap();
    }
  }

  #[test]
  fn test_watermark_accounting() {
    let a = Arena::new(1 << 16);

    let key = a.put_key(b"alice").unwrap();
    assert_eq!(key, 1);
    assert_eq!(a.size(), 1 + 5);

    // A tower of one link plus the 7 alignment pad bytes.
    let node = a.put_node(1).unwrap();
    let node_size = MAX_NODE_SIZE - (MAX_HEIGHT - 1) * LINK_SIZE;
    assert_eq!(node as usize, (6 + 7) & !7);
    assert_eq!(a.size() as usize, 6 + node_size + 7);

    let val = Value::from("v");
    let (_, size) = a.put_val(&val).unwrap();
    assert_eq!(size, val.encoded_size());
    assert_eq!(a.size() as usize, 6 + node_size + 7 + size as usize);
  }

  #[test]
  fn test_full() {
    let a = Arena::new(0);
    assert_eq!(a.capacity(), Arena::MIN_CAP);

    let mut found_arena_full = false;
    for _ in 0..8 {
      if let Err(e) = a.put_node(MAX_HEIGHT) {
        assert!(e.requested > e.remaining);
        found_arena_full = true;
        break;
      }
    }
    assert!(found_arena_full);
  }

  #[test]
  fn test_value_round_trip_through_arena() {
    let a = Arena::new(1 << 12);
    let mut v = Value::from("00042");
    v.set_meta(55);
    v.set_expires_at(7);

    let (offset, size) = a.put_val(&v).unwrap();
    let got = unsafe { a.get_val(offset, size) };
    assert_eq!(got.value(), b"00042");
    assert_eq!(got.meta(), 55);
    assert_eq!(got.expires_at(), 7);
  }
}
