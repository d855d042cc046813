/// An error indicating that the arena cannot satisfy an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaError {
  /// The number of bytes the allocation asked for, including alignment
  /// padding.
  pub requested: u64,
  /// The number of bytes the arena could still hand out before the request.
  pub remaining: u64,
}

impl core::fmt::Display for ArenaError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(
      f,
      "allocation failed because arena is full: requested {}, remaining {}",
      self.requested, self.remaining
    )
  }
}

impl std::error::Error for ArenaError {}

/// Error type for the [`SkipList`](crate::SkipList).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
  /// Indicates that there isn't enough room left in the arena.
  Arena(ArenaError),

  /// Indicates that the key is too large to be stored in the list.
  KeyTooLarge {
    /// The size of the key.
    size: usize,
    /// The max size of a key.
    maximum_size: usize,
  },

  /// Indicates that the value payload is too large to be stored in the list.
  ValueTooLarge {
    /// The size of the value payload.
    size: usize,
    /// The max size of a value payload.
    maximum_size: usize,
  },
}

impl core::fmt::Display for Error {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      Self::Arena(e) => write!(f, "{e}"),
      Self::KeyTooLarge { size, maximum_size } => write!(
        f,
        "key size {size} larger than the maximum size {maximum_size}"
      ),
      Self::ValueTooLarge { size, maximum_size } => write!(
        f,
        "value size {size} larger than the maximum size {maximum_size}"
      ),
    }
  }
}

impl std::error::Error for Error {}

impl From<ArenaError> for Error {
  fn from(e: ArenaError) -> Self {
    Self::Arena(e)
  }
}
