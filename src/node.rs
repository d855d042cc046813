use core::{mem, ptr};

use crate::{
  arena::Arena,
  error::ArenaError,
  sync::{AtomicU64, Ordering},
  value::{Value, ValueRef},
  MAX_HEIGHT,
};

/// The maximum memory footprint of a single node: the node header plus a
/// full tower of [`MAX_HEIGHT`] forward links.
pub const MAX_NODE_SIZE: usize = mem::size_of::<Node>() + MAX_HEIGHT * mem::size_of::<u32>();

/// A single 64-bit word packing the arena offset (low half) and encoded
/// size (high half) of a node's current value.
#[repr(C, align(8))]
pub(crate) struct AtomicValuePointer(AtomicU64);

impl core::fmt::Debug for AtomicValuePointer {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    let (offset, size) = decode_value_pointer(self.0.load(Ordering::Relaxed));
    f.debug_struct("AtomicValuePointer")
      .field("offset", &offset)
      .field("size", &size)
      .finish()
  }
}

impl AtomicValuePointer {
  #[inline]
  fn new(offset: u32, size: u32) -> Self {
    Self(AtomicU64::new(encode_value_pointer(offset, size)))
  }

  #[inline]
  pub(crate) fn load(&self) -> (u32, u32) {
    decode_value_pointer(self.0.load(Ordering::Acquire))
  }

  #[inline]
  pub(crate) fn store(&self, offset: u32, size: u32) {
    self
      .0
      .store(encode_value_pointer(offset, size), Ordering::Release);
  }
}

/// A node of the skiplist, living inside the arena.
#[derive(Debug)]
#[repr(C)]
pub(crate) struct Node {
  /// Where the current encoded value lives. Rewritten atomically when a put
  /// overwrites an existing key.
  value: AtomicValuePointer,

  // Immutable. No need to lock to access the key.
  key_offset: u32,
  key_size: u16,

  /// Number of tower levels this node is linked into, 1..=MAX_HEIGHT.
  height: u16,
  // The tower of forward links is attached right behind this struct in the
  // arena. Most nodes do not need the full height, since the probability of
  // each successive level decreases exponentially, so the allocation is
  // deliberately truncated to `height` links. All accesses to the links go
  // through atomic operations on the link words.
  //
  // tower: [AtomicU32; MAX_HEIGHT],
}

impl Node {
  /// Allocates a node, its key and its encoded value in the arena and
  /// initializes the header. The tower links start out zeroed (end of
  /// list); nothing can observe the node until it is spliced in.
  pub(crate) fn new_node_ptr(
    arena: &Arena,
    height: usize,
    key: &[u8],
    val: &Value,
  ) -> Result<NodePtr, ArenaError> {
    debug_assert!(
      (1..=MAX_HEIGHT).contains(&height),
      "height must be in 1..=MAX_HEIGHT"
    );

    let node_offset = arena.put_node(height)?;
    let key_offset = arena.put_key(key)?;
    let (value_offset, value_size) = arena.put_val(val)?;

    // Safety: put_node reserved an aligned region large enough for the
    // header and the first `height` tower links.
    unsafe {
      let ptr = arena.get_pointer_mut(node_offset as usize);
      let node = &mut *ptr.cast::<Node>();
      node.value = AtomicValuePointer::new(value_offset, value_size);
      node.key_offset = key_offset;
      node.key_size = key.len() as u16;
      node.height = height as u16;
      Ok(NodePtr::new(ptr, node_offset))
    }
  }

  /// Allocates the head sentinel: full height, empty key, empty value.
  pub(crate) fn new_empty_node_ptr(arena: &Arena) -> Result<NodePtr, ArenaError> {
    let node_offset = arena.put_node(MAX_HEIGHT)?;

    // Safety: same as new_node_ptr.
    unsafe {
      let ptr = arena.get_pointer_mut(node_offset as usize);
      let node = &mut *ptr.cast::<Node>();
      node.value = AtomicValuePointer::new(0, 0);
      node.key_offset = 0;
      node.key_size = 0;
      node.height = MAX_HEIGHT as u16;
      Ok(NodePtr::new(ptr, node_offset))
    }
  }

  /// ## Safety
  /// - The node must be allocated by `arena`.
  #[inline]
  pub(crate) unsafe fn get_key<'a, 'b: 'a>(&'a self, arena: &'b Arena) -> &'b [u8] {
    arena.get_key(self.key_offset, self.key_size)
  }

  /// Atomically loads the value slot and decodes the record it points at.
  ///
  /// ## Safety
  /// - The node must be allocated by `arena`.
  #[inline]
  pub(crate) unsafe fn get_value<'a, 'b: 'a>(&'a self, arena: &'b Arena) -> ValueRef<'b> {
    let (offset, size) = self.value.load();
    arena.get_val(offset, size)
  }

  /// Atomically repoints the value slot at a freshly encoded value. The old
  /// region becomes unreachable but is not reclaimed.
  #[inline]
  pub(crate) fn set_value(&self, offset: u32, size: u32) {
    self.value.store(offset, size);
  }
}

/// A dereferenced node handle: the raw pointer into the arena plus the
/// node's own arena offset, so converting back to an offset is a field
/// read.
#[derive(Debug)]
pub(crate) struct NodePtr {
  pub(crate) ptr: *const Node,
  pub(crate) offset: u32,
}

impl Clone for NodePtr {
  #[inline]
  fn clone(&self) -> Self {
    *self
  }
}

impl Copy for NodePtr {}

impl NodePtr {
  pub(crate) const NULL: Self = Self {
    ptr: ptr::null(),
    offset: 0,
  };

  #[inline]
  pub(crate) const fn new(ptr: *const u8, offset: u32) -> Self {
    Self {
      ptr: ptr.cast(),
      offset,
    }
  }

  #[inline]
  pub(crate) fn is_null(&self) -> bool {
    self.ptr.is_null()
  }

  /// ## Safety
  /// - The pointer must be valid.
  #[inline]
  pub(crate) const unsafe fn as_ref(&self) -> &Node {
    &*self.ptr
  }

  /// ## Safety
  /// - The node must be allocated by `arena` and `level` must be below its
  ///   height.
  #[inline]
  pub(crate) unsafe fn next_offset(&self, arena: &Arena, level: usize) -> u32 {
    arena.tower(self.offset as usize, level).load(Ordering::Acquire)
  }

  /// Initializes the link of a node that has not been published yet; the
  /// release CAS on the predecessor is what makes it visible.
  ///
  /// ## Safety
  /// - The node must be allocated by `arena` and `level` must be below its
  ///   height.
  #[inline]
  pub(crate) unsafe fn store_next_offset(&self, arena: &Arena, level: usize, next: u32) {
    arena
      .tower(self.offset as usize, level)
      .store(next, Ordering::Relaxed);
  }

  /// ## Safety
  /// - The node must be allocated by `arena` and `level` must be below its
  ///   height.
  #[inline]
  pub(crate) unsafe fn cas_next_offset(
    &self,
    arena: &Arena,
    level: usize,
    current: u32,
    new: u32,
  ) -> Result<u32, u32> {
    arena
      .tower(self.offset as usize, level)
      .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
  }
}

#[inline]
const fn encode_value_pointer(offset: u32, val_size: u32) -> u64 {
  (val_size as u64) << 32 | offset as u64
}

#[inline]
const fn decode_value_pointer(value: u64) -> (u32, u32) {
  let offset = value as u32;
  let val_size = (value >> 32) as u32;
  (offset, val_size)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_value_pointer_packing() {
    let cases = [
      (0, 0),
      (1, 1),
      (u32::MAX, 0),
      (0, u32::MAX),
      (u32::MAX, u32::MAX),
      (0xdead_beef, 0x0bad_cafe),
    ];

    for &(offset, size) in &cases {
      let (o, s) = decode_value_pointer(encode_value_pointer(offset, size));
      assert_eq!(o, offset);
      assert_eq!(s, size);
    }
  }

  #[test]
  fn test_node_ptr_clone() {
    let node_ptr = NodePtr::NULL;
    #[allow(clippy::clone_on_copy)]
    let _ = node_ptr.clone();
    assert!(node_ptr.is_null());
  }

  #[test]
  fn test_max_node_size() {
    // Header plus a full tower; keep the header in sync with this constant
    // if fields ever change.
    assert_eq!(mem::size_of::<Node>(), 16);
    assert_eq!(MAX_NODE_SIZE, 96);
  }
}
