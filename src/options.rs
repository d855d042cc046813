use crate::node::MAX_NODE_SIZE;

/// Sizing knobs for a memtable backed by a [`SkipList`](crate::SkipList).
///
/// The arena never grows, so the layer above has to provision it with
/// enough headroom that a memtable can absorb its soft cap plus the largest
/// write batch in flight before being rotated. [`arena_size`](Options::arena_size)
/// computes exactly that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
  mem_table_size: u32,
  max_batch_size: u64,
  max_batch_count: u64,
}

impl Default for Options {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl Options {
  /// Creates options with a 64 MiB memtable soft cap and batch limits
  /// derived from it.
  #[inline]
  pub const fn new() -> Self {
    Self {
      mem_table_size: 0,
      max_batch_size: 0,
      max_batch_count: 0,
    }
    .with_mem_table_size(64 << 20)
  }

  /// Sets the memtable soft cap and re-derives the batch limits from it: a
  /// batch may hold up to 15% of the memtable, and at most that many bytes
  /// worth of maximum-size nodes.
  #[inline]
  pub const fn with_mem_table_size(mut self, mem_table_size: u32) -> Self {
    self.mem_table_size = mem_table_size;
    self.max_batch_size = (15 * mem_table_size as u64) / 100;
    self.max_batch_count = self.max_batch_size / MAX_NODE_SIZE as u64;
    self
  }

  /// Overrides the maximum total size of a write batch.
  #[inline]
  pub const fn with_max_batch_size(mut self, max_batch_size: u64) -> Self {
    self.max_batch_size = max_batch_size;
    self
  }

  /// Overrides the maximum number of entries in a write batch.
  #[inline]
  pub const fn with_max_batch_count(mut self, max_batch_count: u64) -> Self {
    self.max_batch_count = max_batch_count;
    self
  }

  /// Returns the memtable soft cap in bytes.
  #[inline]
  pub const fn mem_table_size(&self) -> u32 {
    self.mem_table_size
  }

  /// Returns the maximum total size of a write batch.
  #[inline]
  pub const fn max_batch_size(&self) -> u64 {
    self.max_batch_size
  }

  /// Returns the maximum number of entries in a write batch.
  #[inline]
  pub const fn max_batch_count(&self) -> u64 {
    self.max_batch_count
  }

  /// Returns the arena capacity the memtable contract calls for:
  /// `mem_table_size + max_batch_size + max_batch_count * MAX_NODE_SIZE`.
  #[inline]
  pub const fn arena_size(&self) -> usize {
    self.mem_table_size as usize
      + self.max_batch_size as usize
      + self.max_batch_count as usize * MAX_NODE_SIZE
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_arena_size_contract() {
    let opts = Options::new()
      .with_mem_table_size(1 << 20)
      .with_max_batch_size(1 << 10)
      .with_max_batch_count(8);
    assert_eq!(
      opts.arena_size(),
      (1 << 20) + (1 << 10) + 8 * MAX_NODE_SIZE
    );
  }

  #[test]
  fn test_batch_limits_follow_mem_table_size() {
    let opts = Options::new().with_mem_table_size(100 * MAX_NODE_SIZE as u32 * 100 / 15);
    assert_eq!(opts.max_batch_size(), 15 * opts.mem_table_size() as u64 / 100);
    assert_eq!(
      opts.max_batch_count(),
      opts.max_batch_size() / MAX_NODE_SIZE as u64
    );
  }
}
