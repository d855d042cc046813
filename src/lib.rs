#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

mod arena;
mod error;
pub mod key;
mod list;
mod node;
mod options;
mod value;

pub use error::{ArenaError, Error};
pub use list::{Iter, SkipList, UniIter};
pub use node::MAX_NODE_SIZE;
pub use options::Options;
pub use value::{Value, ValueRef};

/// Re-export bytes crate
pub use bytes;

/// The maximum number of levels a node can be linked into. The level of a
/// new node is drawn from a geometric distribution with p = 1/2, so towers
/// this tall are effectively never reached before the arena fills up.
pub const MAX_HEIGHT: usize = 20;

mod sync {
  #[cfg(not(loom))]
  pub(crate) use core::sync::atomic::*;

  #[cfg(loom)]
  pub(crate) use loom::sync::atomic::*;
}
