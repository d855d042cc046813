use super::*;
use crate::key::key_with_ts;

use std::sync::Arc;

use bytes::Bytes;

const ARENA_SIZE: usize = 1 << 20;

fn run(f: impl Fn() + Send + Sync + 'static) {
  f();
}

/// Only used for testing
fn key(i: usize) -> Bytes {
  key_with_ts(format!("{:05}", i).as_bytes(), 0)
}

/// Only used for testing
fn new_value(i: usize) -> Value {
  Value::from(format!("{:05}", i))
}

fn length(l: &SkipList) -> usize {
  let mut it = l.iter();
  it.seek_to_first();
  let mut ctr = 0;
  while it.valid() {
    ctr += 1;
    it.next();
  }
  ctr
}

fn empty_in(l: SkipList) {
  assert!(l.is_empty());
  assert!(l.get(&key_with_ts(b"aaa", 0)).is_none());

  let mut it = l.iter();
  assert!(!it.valid());
  it.seek_to_first();
  assert!(!it.valid());
  it.seek_to_last();
  assert!(!it.valid());
  it.seek(&key_with_ts(b"aaa", 0));
  assert!(!it.valid());
  it.seek_for_prev(&key_with_ts(b"aaa", 0));
  assert!(!it.valid());

  assert!(l.size() > 0);
  assert!(l.capacity() > 0);
  assert_eq!(l.remaining(), l.capacity() - l.size() as usize);
}

#[test]
fn test_empty() {
  run(|| empty_in(SkipList::new(ARENA_SIZE)));
}

fn basic_in(l: SkipList) {
  let mut v1 = new_value(42);
  v1.set_meta(55);
  let mut v2 = new_value(52);
  v2.set_meta(56);
  let mut v3 = new_value(62);
  v3.set_meta(57);

  l.put(&key_with_ts(b"key1", 0), &v1).unwrap();
  l.put(&key_with_ts(b"key2", 2), &v2).unwrap();
  l.put(&key_with_ts(b"key3", 0), &v3).unwrap();

  assert!(l.get(&key_with_ts(b"key", 0)).is_none());

  let v = l.get(&key_with_ts(b"key1", 0)).unwrap();
  assert_eq!(v.value(), b"00042");
  assert_eq!(v.meta(), 55);

  // "key2" only exists at timestamp 2, which a probe at 0 must not see.
  assert!(l.get(&key_with_ts(b"key2", 0)).is_none());

  let v = l.get(&key_with_ts(b"key3", 0)).unwrap();
  assert_eq!(v.value(), b"00062");
  assert_eq!(v.meta(), 57);

  let mut v4 = new_value(72);
  v4.set_meta(12);
  l.put(&key_with_ts(b"key3", 1), &v4).unwrap();

  let v = l.get(&key_with_ts(b"key3", 1)).unwrap();
  assert_eq!(v.value(), b"00072");
  assert_eq!(v.meta(), 12);
  assert_eq!(v.version(), 1);

  // Have size 100 KiB which is > u16::MAX.
  let mut v5 = Value::from(format!("{}1", "0".repeat(102399)));
  v5.set_meta(60);
  l.put(&key_with_ts(b"key4", 1), &v5).unwrap();

  let v = l.get(&key_with_ts(b"key4", 1)).unwrap();
  assert_eq!(v.value(), v5.value());
  assert_eq!(v.meta(), 60);
}

#[test]
fn test_basic() {
  run(|| basic_in(SkipList::new(ARENA_SIZE)));
}

fn version_probe_in(l: SkipList) {
  l.put(&key_with_ts(b"a", 5), &Value::from("X")).unwrap();
  l.put(&key_with_ts(b"a", 2), &Value::from("Y")).unwrap();

  let v = l.get(&key_with_ts(b"a", 5)).unwrap();
  assert_eq!(v.value(), b"X");
  assert_eq!(v.version(), 5);

  // The freshest version not newer than the probe.
  let v = l.get(&key_with_ts(b"a", 3)).unwrap();
  assert_eq!(v.value(), b"Y");
  assert_eq!(v.version(), 3);

  assert!(l.get(&key_with_ts(b"a", 1)).is_none());

  let v = l.get(&key_with_ts(b"a", 100)).unwrap();
  assert_eq!(v.value(), b"X");
}

#[test]
fn test_version_probe() {
  run(|| version_probe_in(SkipList::new(ARENA_SIZE)));
}

fn overwrite_in(l: SkipList) {
  let k = key_with_ts(b"alice", 7);
  l.put(&k, &Value::from("first")).unwrap();
  l.put(&k, &Value::from("second")).unwrap();

  let v = l.get(&k).unwrap();
  assert_eq!(v.value(), b"second");
  assert_eq!(length(&l), 1);
}

#[test]
fn test_overwrite() {
  run(|| overwrite_in(SkipList::new(ARENA_SIZE)));
}

fn iteration_in(l: SkipList) {
  const N: usize = 1000;

  // Insert in reverse so the ordering work is done by the list.
  for i in (0..N).rev() {
    l.put(&key(i), &new_value(i)).unwrap();
  }

  let mut it = l.iter();
  it.seek_to_first();
  for i in 0..N {
    assert!(it.valid());
    assert_eq!(it.key(), key(i).as_ref());
    assert_eq!(it.value().value(), new_value(i).value());
    it.next();
  }
  assert!(!it.valid());

  it.seek_to_last();
  for i in (0..N).rev() {
    assert!(it.valid());
    assert_eq!(it.key(), key(i).as_ref());
    it.prev();
  }
  assert!(!it.valid());
}

#[test]
fn test_iteration() {
  run(|| iteration_in(SkipList::new(ARENA_SIZE)));
}

fn seek_in(l: SkipList) {
  // Sparse keys with gaps to probe into.
  for i in 1..=100 {
    l.put(&key(i * 10), &new_value(i * 10)).unwrap();
  }

  let mut it = l.iter();

  // Before the first entry.
  it.seek(&key(1));
  assert!(it.valid());
  assert_eq!(it.key(), key(10).as_ref());

  // Exact hit.
  it.seek(&key(500));
  assert_eq!(it.key(), key(500).as_ref());

  // A probe at a newer timestamp still lands on the stored version.
  it.seek(&key_with_ts(b"00500", 5));
  assert_eq!(it.key(), key(500).as_ref());

  // Between two entries.
  it.seek(&key(505));
  assert_eq!(it.key(), key(510).as_ref());

  // Past the last entry.
  it.seek(&key(1005));
  assert!(!it.valid());

  it.seek_for_prev(&key(500));
  assert_eq!(it.key(), key(500).as_ref());
  it.seek_for_prev(&key(505));
  assert_eq!(it.key(), key(500).as_ref());
  it.seek_for_prev(&key(5));
  assert!(!it.valid());

  // Stepping back from the first entry past a gap lands on its
  // predecessor.
  it.seek(&key(505));
  it.prev();
  assert_eq!(it.key(), key(500).as_ref());
}

#[test]
fn test_seek() {
  run(|| seek_in(SkipList::new(ARENA_SIZE)));
}

fn multiple_versions_in(l: SkipList) {
  l.put(&key_with_ts(b"a", 1), &Value::from("a1")).unwrap();
  l.put(&key_with_ts(b"a", 3), &Value::from("a3")).unwrap();
  l.put(&key_with_ts(b"a", 2), &Value::from("a2")).unwrap();
  l.put(&key_with_ts(b"b", 1), &Value::from("b1")).unwrap();

  let mut it = l.iter();
  it.seek_to_first();
  let mut seen = Vec::new();
  while it.valid() {
    seen.push((parse_ts(it.key()), it.value().to_value()));
    it.next();
  }

  // Versions of "a" come out newest first, before anything of "b".
  assert_eq!(seen.len(), 4);
  assert_eq!(seen[0].0, 3);
  assert_eq!(seen[1].0, 2);
  assert_eq!(seen[2].0, 1);
  assert_eq!(seen[0].1.value(), b"a3");
  assert_eq!(seen[3].1.value(), b"b1");

  // Iterator entries carry their own key's version.
  it.seek_to_first();
  assert_eq!(it.value().version(), 3);
}

#[test]
fn test_multiple_versions() {
  run(|| multiple_versions_in(SkipList::new(ARENA_SIZE)));
}

fn uni_iter_in(l: SkipList) {
  for i in 0..10 {
    l.put(&key(i), &new_value(i)).unwrap();
  }

  let mut it = l.uni_iter(false);
  it.rewind();
  for i in 0..10 {
    assert!(it.valid());
    assert_eq!(it.key(), key(i).as_ref());
    assert_eq!(it.value().value(), new_value(i).value());
    it.next();
  }
  assert!(!it.valid());

  let mut rev = l.uni_iter(true);
  rev.rewind();
  for i in (0..10).rev() {
    assert!(rev.valid());
    assert_eq!(rev.key(), key(i).as_ref());
    rev.next();
  }
  assert!(!rev.valid());

  rev.seek(&key(5));
  assert_eq!(rev.key(), key(5).as_ref());
  rev.next();
  assert_eq!(rev.key(), key(4).as_ref());
}

#[test]
fn test_uni_iter() {
  run(|| uni_iter_in(SkipList::new(ARENA_SIZE)));
}

#[test]
fn test_height_grows_monotonically() {
  run(|| {
    let l = SkipList::new(ARENA_SIZE);
    let mut last = l.height();
    assert_eq!(last, 1);

    for i in 0..500 {
      l.put(&key(i), &new_value(i)).unwrap();
      let h = l.height();
      assert!(h >= last);
      assert!(h <= MAX_HEIGHT as u32);
      last = h;
    }
    assert!(last > 1, "500 inserts should raise the height");
  })
}

#[test]
fn test_size_grows_with_inserts() {
  run(|| {
    let l = SkipList::new(ARENA_SIZE);
    let empty = l.size();
    let mut last = empty;

    for i in 0..100 {
      l.put(&key(i), &new_value(i)).unwrap();
      assert!(l.size() > last);
      last = l.size();
    }

    // Every entry holds at least a 13-byte key, an 8-byte encoded value
    // and a single-link node.
    assert!((last - empty) as usize >= 100 * (13 + 8 + 20));
    assert_eq!(length(&l), 100);
  })
}

#[test]
fn test_full() {
  run(|| {
    // Clamped to the minimum capacity, which holds little more than the
    // head sentinel.
    let l = SkipList::new(0);
    let mut found_arena_full = false;

    for i in 0..32 {
      if let Err(e) = l.put(&key(i), &new_value(i)) {
        assert!(matches!(e, Error::Arena(_)));
        found_arena_full = true;
        break;
      }
    }

    assert!(found_arena_full);
  })
}

#[test]
fn test_oversize_key() {
  run(|| {
    let l = SkipList::new(ARENA_SIZE);
    let big = vec![0u8; u16::MAX as usize + 1];
    assert!(matches!(
      l.put(&key_with_ts(&big, 0), &new_value(1)),
      Err(Error::KeyTooLarge { .. })
    ));
    assert!(l.is_empty());
  })
}

fn concurrent_basic_runner(l: Arc<SkipList>) {
  const N: usize = 1000;

  let wg = Arc::new(());
  for i in 0..N {
    let w = wg.clone();
    let l = l.clone();
    std::thread::spawn(move || {
      l.put(&key(i), &new_value(i)).unwrap();
      drop(w);
    });
  }
  while Arc::strong_count(&wg) > 1 {}

  for i in 0..N {
    let w = wg.clone();
    let l = l.clone();
    std::thread::spawn(move || {
      let v = l.get(&key(i)).unwrap_or_else(|| panic!("broken: {i}"));
      assert_eq!(v.value(), new_value(i).value(), "broken: {i}");
      drop(w);
    });
  }
  while Arc::strong_count(&wg) > 1 {}

  assert_eq!(length(&l), N);
}

#[test]
fn test_concurrent_basic() {
  run(|| concurrent_basic_runner(Arc::new(SkipList::new(ARENA_SIZE))));
}

#[test]
fn test_concurrent_one_key() {
  run(|| {
    const N: usize = 100;
    let l = Arc::new(SkipList::new(ARENA_SIZE));

    let wg = Arc::new(());
    for i in 0..N {
      let w = wg.clone();
      let l = l.clone();
      std::thread::spawn(move || {
        l.put(&key(0), &new_value(i)).unwrap();
        drop(w);
      });
    }
    while Arc::strong_count(&wg) > 1 {}

    // Exactly one winner, and it is one of the written values.
    let v = l.get(&key(0)).unwrap();
    let num: usize = std::str::from_utf8(v.value()).unwrap().parse().unwrap();
    assert!(num < N);
    assert_eq!(length(&l), 1);
  })
}

#[test]
fn test_with_options() {
  run(|| {
    let opts = Options::new().with_mem_table_size(1 << 20);
    let l = SkipList::with_options(opts);
    assert_eq!(l.capacity(), opts.arena_size());
    basic_in(l);
  })
}
