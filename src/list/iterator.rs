use super::*;

/// A bidirectional cursor over a [`SkipList`]. Keys and values borrow from
/// the list's arena, so entries handed out stay valid for as long as the
/// iterator's borrow of the list.
///
/// A freshly created iterator is not positioned anywhere; seek before
/// stepping. Stepping or reading an unpositioned iterator panics.
pub struct Iter<'a> {
  list: &'a SkipList,
  curr: NodePtr,
}

impl<'a> Iter<'a> {
  #[inline]
  pub(super) const fn new(list: &'a SkipList) -> Self {
    Self {
      list,
      curr: NodePtr::NULL,
    }
  }

  /// Returns true when the iterator is positioned at an entry.
  #[inline]
  pub fn valid(&self) -> bool {
    !self.curr.is_null()
  }

  /// Returns the key at the current position.
  ///
  /// # Panics
  ///
  /// Panics when the iterator is not valid.
  #[inline]
  pub fn key(&self) -> &'a [u8] {
    assert!(self.valid(), "iterator is not positioned at an entry");
    // Safety: a valid iterator points at a node in the list's arena.
    unsafe { self.curr.as_ref().get_key(&self.list.arena) }
  }

  /// Returns the value at the current position, with its version taken from
  /// the entry's key.
  ///
  /// # Panics
  ///
  /// Panics when the iterator is not valid.
  pub fn value(&self) -> ValueRef<'a> {
    assert!(self.valid(), "iterator is not positioned at an entry");
    // Safety: a valid iterator points at a node in the list's arena.
    unsafe {
      let node = self.curr.as_ref();
      let mut value = node.get_value(&self.list.arena);
      value.set_version(parse_ts(node.get_key(&self.list.arena)));
      value
    }
  }

  /// Advances to the next entry.
  ///
  /// # Panics
  ///
  /// Panics when the iterator is not valid.
  #[allow(clippy::should_implement_trait)]
  pub fn next(&mut self) {
    assert!(self.valid(), "iterator is not positioned at an entry");
    // Safety: a valid iterator points at a node in the list's arena.
    self.curr = unsafe { self.list.get_next(self.curr, 0) };
  }

  /// Steps back to the previous entry.
  ///
  /// # Panics
  ///
  /// Panics when the iterator is not valid.
  pub fn prev(&mut self) {
    assert!(self.valid(), "iterator is not positioned at an entry");
    // Safety: entry keys always carry a timestamp suffix.
    let (n, _) = unsafe { self.list.find_near(self.key(), true, false) };
    self.curr = n;
  }

  /// Positions the iterator at the first entry with key at or past
  /// `target`.
  pub fn seek(&mut self, target: &[u8]) {
    // Safety: the caller supplies a timestamped key.
    let (n, _) = unsafe { self.list.find_near(target, false, true) };
    self.curr = n;
  }

  /// Positions the iterator at the last entry with key at or before
  /// `target`.
  pub fn seek_for_prev(&mut self, target: &[u8]) {
    // Safety: the caller supplies a timestamped key.
    let (n, _) = unsafe { self.list.find_near(target, true, true) };
    self.curr = n;
  }

  /// Positions the iterator at the first entry of the list.
  pub fn seek_to_first(&mut self) {
    // Safety: the head is allocated by the list's arena.
    self.curr = unsafe { self.list.get_next(self.list.head, 0) };
  }

  /// Positions the iterator at the last entry of the list.
  pub fn seek_to_last(&mut self) {
    self.curr = unsafe { self.list.find_last() };
  }
}

/// A unidirectional view over [`Iter`] for merge-style consumers: with
/// `reversed` set, stepping and seeking run toward smaller keys.
pub struct UniIter<'a> {
  iter: Iter<'a>,
  reversed: bool,
}

impl<'a> UniIter<'a> {
  #[inline]
  pub(super) const fn new(list: &'a SkipList, reversed: bool) -> Self {
    Self {
      iter: Iter::new(list),
      reversed,
    }
  }

  /// Returns true when the iterator is positioned at an entry.
  #[inline]
  pub fn valid(&self) -> bool {
    self.iter.valid()
  }

  /// Returns the key at the current position.
  #[inline]
  pub fn key(&self) -> &'a [u8] {
    self.iter.key()
  }

  /// Returns the value at the current position.
  #[inline]
  pub fn value(&self) -> ValueRef<'a> {
    self.iter.value()
  }

  /// Steps one entry in iteration direction.
  #[allow(clippy::should_implement_trait)]
  #[inline]
  pub fn next(&mut self) {
    if self.reversed {
      self.iter.prev()
    } else {
      self.iter.next()
    }
  }

  /// Repositions the iterator at the first entry in iteration direction.
  #[inline]
  pub fn rewind(&mut self) {
    if self.reversed {
      self.iter.seek_to_last()
    } else {
      self.iter.seek_to_first()
    }
  }

  /// Positions the iterator at the first entry at or past `target` in
  /// iteration direction.
  #[inline]
  pub fn seek(&mut self, target: &[u8]) {
    if self.reversed {
      self.iter.seek_for_prev(target)
    } else {
      self.iter.seek(target)
    }
  }
}
