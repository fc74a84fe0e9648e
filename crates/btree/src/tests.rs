use super::*;
use pretty_assertions::assert_eq;
use rand::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use storage::PageManager;
use tempfile::tempdir;

fn tree() -> (BPlusTree, Arc<PageManager>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let pgm = Arc::new(PageManager::create(dir.path().join("t.db"), 64).unwrap());
    let tree = BPlusTree::create(pgm.clone(), BytewiseComparator).unwrap();
    (tree, pgm, dir)
}

fn drain(iter: &mut TreeIter<BytewiseComparator>) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    while let Some(pair) = iter.next().unwrap() {
        out.push(pair);
    }
    out
}

#[test]
fn insert_get_and_bounded_iteration() {
    let (tree, _pgm, _dir) = tree();
    assert!(tree.insert(b"apple", b"1").unwrap());
    assert!(tree.insert(b"banana", b"2").unwrap());
    assert!(tree.insert(b"cherry", b"3").unwrap());

    assert_eq!(tree.get(b"banana").unwrap(), Some(b"2".to_vec()));
    assert_eq!(tree.get(b"durian").unwrap(), None);
    assert_eq!(tree.tuple_num().unwrap(), 3);

    let mut iter = tree.lower_bound(b"b").unwrap();
    assert_eq!(
        drain(&mut iter),
        vec![
            (b"banana".to_vec(), b"2".to_vec()),
            (b"cherry".to_vec(), b"3".to_vec()),
        ]
    );
}

#[test]
fn duplicate_insert_leaves_mapping_unchanged() {
    let (tree, _pgm, _dir) = tree();
    assert!(tree.insert(b"k", b"old").unwrap());
    assert!(!tree.insert(b"k", b"new").unwrap());
    assert_eq!(tree.get(b"k").unwrap(), Some(b"old".to_vec()));
    assert_eq!(tree.tuple_num().unwrap(), 1);
}

#[test]
fn update_only_touches_existing_keys() {
    let (tree, _pgm, _dir) = tree();
    assert!(!tree.update(b"ghost", b"x").unwrap());
    tree.insert(b"k", b"v1").unwrap();
    assert!(tree.update(b"k", b"v2-longer-than-before").unwrap());
    assert_eq!(tree.get(b"k").unwrap(), Some(b"v2-longer-than-before".to_vec()));
    assert_eq!(tree.tuple_num().unwrap(), 1);
}

#[test]
fn fill_leaf_until_split_then_delete_evens() {
    let (tree, _pgm, _dir) = tree();
    let value = vec![b'v'; 40];
    for i in 0..100 {
        let key = format!("k{i:02}");
        assert!(tree.insert(key.as_bytes(), &value).unwrap(), "insert {key}");
    }
    assert_eq!(tree.tuple_num().unwrap(), 100);

    let pairs = drain(&mut tree.begin().unwrap());
    assert_eq!(pairs.len(), 100);
    for window in pairs.windows(2) {
        assert!(window[0].0 < window[1].0, "keys out of order");
    }

    for i in (0..100).step_by(2) {
        let key = format!("k{i:02}");
        assert!(tree.delete(key.as_bytes()).unwrap(), "delete {key}");
    }
    assert_eq!(tree.tuple_num().unwrap(), 50);

    let pairs = drain(&mut tree.begin().unwrap());
    assert_eq!(pairs.len(), 50);
    for (i, (key, _)) in pairs.iter().enumerate() {
        assert_eq!(key, format!("k{:02}", 2 * i + 1).as_bytes());
    }
}

#[test]
fn take_returns_removed_value() {
    let (tree, _pgm, _dir) = tree();
    tree.insert(b"k", b"payload").unwrap();
    assert_eq!(tree.take(b"k").unwrap(), Some(b"payload".to_vec()));
    assert_eq!(tree.take(b"k").unwrap(), None);
    assert!(tree.is_empty().unwrap());
}

#[test]
fn max_key_tracks_the_largest() {
    let (tree, _pgm, _dir) = tree();
    assert_eq!(tree.max_key().unwrap(), None);
    for key in ["m", "a", "z", "q"] {
        tree.insert(key.as_bytes(), b"v").unwrap();
    }
    assert_eq!(tree.max_key().unwrap(), Some(b"z".to_vec()));
    tree.delete(b"z").unwrap();
    assert_eq!(tree.max_key().unwrap(), Some(b"q".to_vec()));
}

#[test]
fn bounds_on_a_multi_page_tree() {
    let (tree, _pgm, _dir) = tree();
    let value = vec![b'x'; 120];
    for i in (0..400).step_by(2) {
        tree.insert(format!("key{i:04}").as_bytes(), &value).unwrap();
    }
    // lower_bound of a present key starts at it, of an absent key at the
    // next greater one; upper_bound always starts past the key.
    let mut it = tree.lower_bound(b"key0100").unwrap();
    assert_eq!(it.next().unwrap().unwrap().0, b"key0100".to_vec());
    let mut it = tree.lower_bound(b"key0101").unwrap();
    assert_eq!(it.next().unwrap().unwrap().0, b"key0102".to_vec());
    let mut it = tree.upper_bound(b"key0100").unwrap();
    assert_eq!(it.next().unwrap().unwrap().0, b"key0102".to_vec());
    // Past-the-end bounds yield empty iterators.
    let mut it = tree.lower_bound(b"zzz").unwrap();
    assert_eq!(it.next().unwrap(), None);
}

#[test]
fn random_workload_matches_btreemap_oracle() {
    let (tree, _pgm, _dir) = tree();
    let mut oracle: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for step in 0..4000 {
        let key = format!("key-{:03}", rng.gen_range(0..500)).into_bytes();
        match rng.gen_range(0..4) {
            0 | 1 => {
                let value = vec![b'a' + (step % 26) as u8; rng.gen_range(1..200)];
                let inserted = tree.insert(&key, &value).unwrap();
                assert_eq!(inserted, !oracle.contains_key(&key));
                if inserted {
                    oracle.insert(key, value);
                }
            }
            2 => {
                let value = vec![b'A' + (step % 26) as u8; rng.gen_range(1..200)];
                let updated = tree.update(&key, &value).unwrap();
                assert_eq!(updated, oracle.contains_key(&key));
                if updated {
                    oracle.insert(key, value);
                }
            }
            _ => {
                let deleted = tree.delete(&key).unwrap();
                assert_eq!(deleted, oracle.remove(&key).is_some());
            }
        }
    }

    assert_eq!(tree.tuple_num().unwrap(), oracle.len() as u64);
    let pairs = drain(&mut tree.begin().unwrap());
    let expect: Vec<(Vec<u8>, Vec<u8>)> =
        oracle.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    assert_eq!(pairs, expect);
    for (key, value) in &oracle {
        assert_eq!(tree.get(key).unwrap().as_ref(), Some(value));
    }
}

#[test]
fn persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.db");
    let meta;
    {
        let pgm = Arc::new(PageManager::create(&path, 32).unwrap());
        let tree = BPlusTree::create(pgm.clone(), BytewiseComparator).unwrap();
        meta = tree.meta_page_id();
        for i in 0..200 {
            tree.insert(format!("k{i:03}").as_bytes(), format!("v{i}").as_bytes())
                .unwrap();
        }
        pgm.flush().unwrap();
    }
    let pgm = Arc::new(PageManager::open(&path, 32).unwrap());
    let tree = BPlusTree::open(pgm, meta, BytewiseComparator);
    assert_eq!(tree.tuple_num().unwrap(), 200);
    assert_eq!(tree.get(b"k123").unwrap(), Some(b"v123".to_vec()));
    assert_eq!(drain(&mut tree.begin().unwrap()).len(), 200);
}

#[test]
fn destroy_releases_every_page() {
    let (tree, pgm, _dir) = tree();
    let value = vec![b'v'; 100];
    for i in 0..500 {
        tree.insert(format!("k{i:04}").as_bytes(), &value).unwrap();
    }
    let grown = pgm.page_num();
    tree.destroy().unwrap();
    // A rebuilt tree of the same shape reuses the freed pages instead of
    // growing the file further.
    let tree = BPlusTree::create(pgm.clone(), BytewiseComparator).unwrap();
    for i in 0..500 {
        tree.insert(format!("k{i:04}").as_bytes(), &value).unwrap();
    }
    assert_eq!(pgm.page_num(), grown);
}

#[test]
fn emptied_tree_accepts_new_inserts() {
    let (tree, _pgm, _dir) = tree();
    for i in 0..50 {
        tree.insert(format!("k{i:02}").as_bytes(), b"value").unwrap();
    }
    for i in 0..50 {
        assert!(tree.delete(format!("k{i:02}").as_bytes()).unwrap());
    }
    assert!(tree.is_empty().unwrap());
    assert_eq!(drain(&mut tree.begin().unwrap()), vec![]);
    assert!(tree.insert(b"fresh", b"start").unwrap());
    assert_eq!(tree.get(b"fresh").unwrap(), Some(b"start".to_vec()));
}

#[test]
fn update_that_forces_a_split_keeps_all_pairs() {
    let (tree, _pgm, _dir) = tree();
    for i in 0..40 {
        tree.insert(format!("k{i:02}").as_bytes(), &vec![b'v'; 90]).unwrap();
    }
    // Growing one value past the page's free space forces a replace-split.
    assert!(tree.update(b"k17", &vec![b'w'; 900]).unwrap());
    assert_eq!(tree.get(b"k17").unwrap(), Some(vec![b'w'; 900]));
    let pairs = drain(&mut tree.begin().unwrap());
    assert_eq!(pairs.len(), 40);
    for window in pairs.windows(2) {
        assert!(window[0].0 < window[1].0);
    }
}
