use core::cmp;

use crossbeam_utils::CachePadded;
use rand::{thread_rng, Rng};

use crate::{
  arena::Arena,
  error::Error,
  key::{compare_keys, parse_ts, same_key},
  node::{Node, NodePtr},
  options::Options,
  sync::{AtomicU32, Ordering},
  value::{Value, ValueRef},
  MAX_HEIGHT,
};

mod iterator;
pub use iterator::{Iter, UniIter};

#[cfg(test)]
mod tests;

/// Chance, out of `u32::MAX`, that a tower grows one more level.
const HEIGHT_INCREASE: u32 = u32::MAX / 2;

/// The largest value payload a node can reference: the encoded record size
/// must fit the 32-bit half of the value slot, and the expiry varint can
/// take up to 10 bytes on top of the two metadata bytes.
const MAX_VALUE_SIZE: usize = u32::MAX as usize - 12;

/// A fast, concurrent map from timestamped keys to values, ordered newest
/// version first, backed by a preallocated arena. Keys and values are
/// immutable once added; deletion is not supported. Higher-level code is
/// expected to add new entries that shadow existing ones and to perform
/// deletion via tombstone bits in the value metadata, which this list never
/// interprets.
///
/// The list is `Send + Sync`; share it across writer and reader threads
/// behind an [`Arc`](std::sync::Arc). Iterators borrow the list, so the
/// arena stays alive for as long as any of them is open.
pub struct SkipList {
  arena: Arena,
  head: NodePtr,

  /// Current height. 1 <= height <= MAX_HEIGHT. CAS.
  height: CachePadded<AtomicU32>,
}

// Safety: all shared mutation funnels through the atomic words inside the
// arena; the raw head pointer is written once at construction.
unsafe impl Send for SkipList {}
unsafe impl Sync for SkipList {}

impl SkipList {
  /// Creates a skiplist backed by an arena of `cap` bytes. Capacities too
  /// small to hold the head sentinel are raised to the minimum.
  pub fn new(cap: usize) -> Self {
    let arena = Arena::new(cap);
    let head = Node::new_empty_node_ptr(&arena).expect("arena capacity is clamped above head size");
    Self {
      arena,
      head,
      height: CachePadded::new(AtomicU32::new(1)),
    }
  }

  /// Creates a skiplist sized per the memtable arena contract of `opts`.
  #[inline]
  pub fn with_options(opts: Options) -> Self {
    Self::new(opts.arena_size())
  }

  /// Returns the height of the highest tower within any node ever allocated
  /// as part of this list.
  #[inline]
  pub fn height(&self) -> u32 {
    self.height.load(Ordering::Acquire)
  }

  /// Returns the number of bytes allocated from the arena so far.
  #[inline]
  pub fn size(&self) -> u32 {
    self.arena.size()
  }

  /// Returns the capacity of the backing arena.
  #[inline]
  pub fn capacity(&self) -> usize {
    self.arena.capacity()
  }

  /// Returns the number of bytes the backing arena can still hand out.
  #[inline]
  pub fn remaining(&self) -> usize {
    self.arena.remaining()
  }

  /// Returns true if the list holds no entries.
  #[inline]
  pub fn is_empty(&self) -> bool {
    // Safety: the head is allocated by our arena.
    unsafe { self.get_next(self.head, 0).is_null() }
  }

  /// Returns a bidirectional iterator over the list.
  #[inline]
  pub fn iter(&self) -> Iter<'_> {
    Iter::new(self)
  }

  /// Returns a unidirectional iterator; when `reversed` it walks from the
  /// largest key down.
  #[inline]
  pub fn uni_iter(&self, reversed: bool) -> UniIter<'_> {
    UniIter::new(self, reversed)
  }

  /// Inserts a key-value pair, or overwrites the value of the existing
  /// entry carrying the same user key and timestamp.
  ///
  /// # Errors
  ///
  /// - [`Error::KeyTooLarge`] if the key does not fit the node header.
  /// - [`Error::ValueTooLarge`] if the encoded value does not fit the value
  ///   slot.
  /// - [`Error::Arena`] if the arena cannot hold the new entry; the list is
  ///   left unchanged.
  pub fn put(&self, key: &[u8], val: &Value) -> Result<(), Error> {
    if key.len() > u16::MAX as usize {
      return Err(Error::KeyTooLarge {
        size: key.len(),
        maximum_size: u16::MAX as usize,
      });
    }
    if val.value().len() > MAX_VALUE_SIZE {
      return Err(Error::ValueTooLarge {
        size: val.value().len(),
        maximum_size: MAX_VALUE_SIZE,
      });
    }

    // Node allocation and the height CAS wait until the descent below has
    // proven the key absent; a hit degenerates into a value-slot store.
    let list_height = self.height() as usize;
    let mut prev = [NodePtr::NULL; MAX_HEIGHT + 1];
    let mut next = [NodePtr::NULL; MAX_HEIGHT + 1];
    prev[list_height] = self.head;

    // Safety: all node pointers involved come out of our own arena.
    unsafe {
      for i in (0..list_height).rev() {
        // The splice one level up bounds the walk at this level.
        let (p, n) = self.find_splice_for_level(key, prev[i + 1], i);
        prev[i] = p;
        next[i] = n;
        if p.ptr == n.ptr {
          // The key already exists; repoint its value slot at a freshly
          // encoded value.
          let (value_offset, value_size) = self.arena.put_val(val)?;
          p.as_ref().set_value(value_offset, value_size);
          return Ok(());
        }
      }
    }

    let height = Self::random_height();
    let x = Node::new_node_ptr(&self.arena, height, key, val)?;

    // Try to increase the list height via CAS.
    let mut list_height = self.height();
    while height as u32 > list_height {
      match self.height.compare_exchange_weak(
        list_height,
        height as u32,
        Ordering::SeqCst,
        Ordering::Acquire,
      ) {
        // Successfully increased the height.
        Ok(_) => break,
        Err(h) => list_height = h,
      }
    }

    // Splice level 0 first. Once the node is reachable at the base, no
    // competing writer can splice the same key into an upper level: its own
    // descent would have run into the node down there.
    unsafe {
      for i in 0..height {
        loop {
          if prev[i].is_null() {
            // This cannot happen at level 0 or 1, which are always computed
            // above; the new node just outgrew the height the splice search
            // ran at. Upper levels are sparse, so searching from the head is
            // cheap.
            assert!(i > 1, "unset splice below the searched height");
            let (p, n) = self.find_splice_for_level(key, self.head, i);
            prev[i] = p;
            next[i] = n;
            // Someone else adding the exact same key is only possible at the
            // base level.
            assert!(p.ptr != n.ptr, "duplicate key at a non-base level");
          }

          x.store_next_offset(&self.arena, i, next[i].offset);
          match prev[i].cas_next_offset(&self.arena, i, next[i].offset, x.offset) {
            // Managed to insert x between prev[i] and next[i]. Go to the
            // next level.
            Ok(_) => break,
            Err(_) => {
              // Lost the race: another writer got its offset into
              // prev[i]'s link word first. Links only ever advance
              // rightward, so prev[i] is still a valid place to re-walk
              // this level from.
              let (p, n) = self.find_splice_for_level(key, prev[i], i);
              if p.ptr == n.ptr {
                assert_eq!(i, 0, "duplicate key at a non-base level");
                // A concurrent writer beat us with the exact same key;
                // resolve by overwriting its value slot.
                let (value_offset, value_size) = self.arena.put_val(val)?;
                p.as_ref().set_value(value_offset, value_size);
                return Ok(());
              }
              prev[i] = p;
              next[i] = n;
            }
          }
        }
      }
    }

    Ok(())
  }

  /// Returns the value of the freshest version of `key`'s user key whose
  /// timestamp does not exceed the one embedded in `key`, or `None` when no
  /// such version exists. The returned record's version is the probe key's
  /// timestamp.
  pub fn get(&self, key: &[u8]) -> Option<ValueRef<'_>> {
    // findGreaterOrEqual.
    let (n, _) = unsafe { self.find_near(key, false, true) };
    if n.is_null() {
      return None;
    }

    // Safety: we have checked that n is not null.
    unsafe {
      let node = n.as_ref();
      if !same_key(key, node.get_key(&self.arena)) {
        return None;
      }

      let mut value = node.get_value(&self.arena);
      value.set_version(parse_ts(key));
      Some(value)
    }
  }

  #[inline]
  fn random_height() -> usize {
    let mut rng = thread_rng();
    let mut h = 1;
    while h < MAX_HEIGHT && rng.gen::<u32>() < HEIGHT_INCREASE {
      h += 1;
    }
    h
  }

  /// ## Safety
  /// - `nptr` must be null or allocated by this list's arena.
  #[inline]
  pub(crate) unsafe fn get_next(&self, nptr: NodePtr, level: usize) -> NodePtr {
    if nptr.is_null() {
      return NodePtr::NULL;
    }
    self.arena.get_node(nptr.next_offset(&self.arena, level))
  }

  /// Returns `(before, next)` bracketing `key` at `level`, walking right
  /// from `before`. An exact full-key match collapses both sides onto the
  /// found node, which the caller detects with a pointer compare.
  ///
  /// ## Safety
  /// - `before` must be allocated by this list's arena and sit at or before
  ///   `key` on `level`.
  unsafe fn find_splice_for_level(
    &self,
    key: &[u8],
    mut before: NodePtr,
    level: usize,
  ) -> (NodePtr, NodePtr) {
    loop {
      // Assume before.key < key.
      let next = self.get_next(before, level);
      if next.is_null() {
        return (before, next);
      }

      let next_key = next.as_ref().get_key(&self.arena);
      match compare_keys(key, next_key) {
        // The key is already present at this level.
        cmp::Ordering::Equal => return (next, next),
        // before.key < key < next.key; we are done for this level.
        cmp::Ordering::Less => return (before, next),
        // Keep moving right on this level.
        cmp::Ordering::Greater => before = next,
      }
    }
  }

  /// Finds the node near `key`.
  ///
  /// If `less` is true, it finds the rightmost node such that
  /// `node.key < key` (or `node.key <= key` with `allow_equal`). Otherwise
  /// it finds the leftmost node such that `node.key > key` (or
  /// `node.key >= key` with `allow_equal`). The bool is true when the
  /// returned node's key equals `key`. The head sentinel is never returned.
  ///
  /// ## Safety
  /// - `key` must carry a timestamp suffix.
  pub(crate) unsafe fn find_near(
    &self,
    key: &[u8],
    less: bool,
    allow_equal: bool,
  ) -> (NodePtr, bool) {
    let mut x = self.head;
    let mut level = self.height() as usize - 1;

    loop {
      // Assume x.key < key.
      let next = self.get_next(x, level);
      if next.is_null() {
        // x.key < key < END OF LIST
        if level > 0 {
          // Can descend further to iterate closer to the end.
          level -= 1;
          continue;
        }

        // level == 0. Can't descend further. Let's return something that
        // makes sense.
        if !less {
          return (NodePtr::NULL, false);
        }

        // Try to return x. Make sure it is not a head node.
        if x.ptr == self.head.ptr {
          return (NodePtr::NULL, false);
        }
        return (x, false);
      }

      let next_key = next.as_ref().get_key(&self.arena);
      match compare_keys(key, next_key) {
        cmp::Ordering::Greater => {
          // x.key < next.key < key. We can continue to move right.
          x = next;
        }
        cmp::Ordering::Equal => {
          // x.key < key == next.key.
          if allow_equal {
            return (next, true);
          }

          if !less {
            // We want >, so go to base level to grab the next bigger node.
            return (self.get_next(next, 0), false);
          }

          // We want <. If not base level, we should go closer in the next
          // level.
          if level > 0 {
            level -= 1;
            continue;
          }

          // On base level. Return x.
          if x.ptr == self.head.ptr {
            return (NodePtr::NULL, false);
          }
          return (x, false);
        }
        cmp::Ordering::Less => {
          // x.key < key < next.key.
          if level > 0 {
            level -= 1;
            continue;
          }

          // At base level. Need to return something.
          if !less {
            return (next, false);
          }

          // Try to return x. Make sure it is not a head node.
          if x.ptr == self.head.ptr {
            return (NodePtr::NULL, false);
          }
          return (x, false);
        }
      }
    }
  }

  /// Returns the last node in the list, or null if the list is empty: walk
  /// the top-level chain all the way right, then descend.
  pub(crate) unsafe fn find_last(&self) -> NodePtr {
    let mut x = self.head;
    let mut level = self.height() as usize - 1;

    loop {
      let next = self.get_next(x, level);
      if !next.is_null() {
        x = next;
        continue;
      }
      if level == 0 {
        if x.ptr == self.head.ptr {
          return NodePtr::NULL;
        }
        return x;
      }
      level -= 1;
    }
  }
}
