//! Utilities for the timestamped keys the skiplist orders by.
//!
//! A key is the user-supplied bytes followed by a fixed-width timestamp
//! suffix. The suffix stores `u64::MAX - ts` big-endian, so under a plain
//! byte comparison of two suffixes a newer version of the same user key
//! sorts before an older one. The skiplist itself never interprets the
//! timestamp; it only goes through [`compare_keys`] and [`same_key`].

use core::cmp;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

/// Width of the timestamp suffix appended to every key.
pub const TIMESTAMP_SIZE: usize = core::mem::size_of::<u64>();

/// Returns `key` with the timestamp suffix for `ts` appended.
#[inline]
pub fn key_with_ts(key: &[u8], ts: u64) -> Bytes {
  let mut out = BytesMut::with_capacity(key.len() + TIMESTAMP_SIZE);
  out.put_slice(key);
  out.put_u64(u64::MAX - ts);
  out.freeze()
}

/// Extracts the timestamp a key was written with. Keys too short to carry a
/// suffix parse as timestamp 0.
#[inline]
pub fn parse_ts(key: &[u8]) -> u64 {
  if key.len() <= TIMESTAMP_SIZE {
    return 0;
  }
  u64::MAX - BigEndian::read_u64(&key[key.len() - TIMESTAMP_SIZE..])
}

/// Returns the user portion of `key`, without the timestamp suffix.
#[inline]
pub fn parse_key(key: &[u8]) -> &[u8] {
  if key.len() < TIMESTAMP_SIZE {
    return key;
  }
  &key[..key.len() - TIMESTAMP_SIZE]
}

/// Compares two timestamped keys: user portion ascending, then timestamp
/// descending. The suffix encoding makes the second leg a plain byte
/// comparison.
#[inline]
pub fn compare_keys(a: &[u8], b: &[u8]) -> cmp::Ordering {
  debug_assert!(
    a.len() >= TIMESTAMP_SIZE && b.len() >= TIMESTAMP_SIZE,
    "keys must carry a timestamp suffix"
  );
  parse_key(a)
    .cmp(parse_key(b))
    .then_with(|| a[a.len() - TIMESTAMP_SIZE..].cmp(&b[b.len() - TIMESTAMP_SIZE..]))
}

/// Returns true when both keys share the same user portion, ignoring the
/// timestamp suffixes.
#[inline]
pub fn same_key(a: &[u8], b: &[u8]) -> bool {
  parse_key(a) == parse_key(b)
}
