use super::*;
use codec::FixedStr;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tempfile::{tempdir, TempDir};

fn temp_tree(order: usize) -> (BPlusTree<u32, u64>, TempDir) {
    let dir = tempdir().unwrap();
    let config = TreeConfig::builder()
        .path(dir.path().join("test.idx"))
        .order(order)
        .build();
    (BPlusTree::open(config).unwrap(), dir)
}

#[test]
fn empty_tree_finds_nothing() {
    let (mut tree, _dir) = temp_tree(4);
    assert!(tree.is_empty());
    assert_eq!(tree.find(&42).unwrap(), None);
    assert_eq!(tree.scan().unwrap().count(), 0);
}

#[test]
fn insert_and_find_single_key() {
    let (mut tree, _dir) = temp_tree(4);
    tree.insert(42, 420).unwrap();

    assert!(!tree.is_empty());
    assert_eq!(tree.find(&42).unwrap(), Some(420));
    assert_eq!(tree.find(&99).unwrap(), None);
}

#[test]
fn duplicate_insert_is_rejected_and_keeps_old_value() {
    let (mut tree, _dir) = temp_tree(4);
    tree.insert(7, 70).unwrap();

    let err = tree.insert(7, 71).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey));
    assert_eq!(tree.find(&7).unwrap(), Some(70));
}

#[test]
fn duplicate_of_a_separator_key_is_rejected() {
    let (mut tree, _dir) = temp_tree(4);
    for k in 1..=5u32 {
        tree.insert(k, u64::from(k)).unwrap();
    }

    // 3 was copied up as the root separator during the leaf split; the
    // key still lives in the right leaf and must stay unique.
    let err = tree.insert(3, 33).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey));
    assert_eq!(tree.find(&3).unwrap(), Some(3));
}

#[test]
fn five_keys_split_a_leaf_once_at_order_four() {
    let (mut tree, _dir) = temp_tree(4);
    for k in 1..=5u32 {
        tree.insert(k, u64::from(k) * 10).unwrap();
    }

    let root_offset = tree.root.unwrap();
    let root = tree.read_node(root_offset).unwrap();
    assert!(!root.is_leaf);
    assert_eq!(root.children.len(), 2);
    // The separator is a copy of the right leaf's first key.
    assert_eq!(root.keys, vec![3]);

    let left = tree.read_node(root.children[0]).unwrap();
    let right = tree.read_node(root.children[1]).unwrap();
    assert!(left.is_leaf && right.is_leaf);
    assert_eq!(left.keys, vec![1, 2]);
    assert_eq!(right.keys, vec![3, 4, 5]);
    assert_eq!(left.next, Some(root.children[1]));
    assert_eq!(right.next, None);

    let entries: Vec<(u32, u64)> = tree.scan().unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(entries, vec![(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)]);
}

#[test]
fn scan_is_sorted_after_shuffled_inserts() {
    let (mut tree, _dir) = temp_tree(4);

    // 37 is coprime with 500, so this visits every key exactly once.
    for i in 0..500u32 {
        let k = (i * 37) % 500;
        tree.insert(k, u64::from(k) * 2).unwrap();
    }

    let entries: Vec<(u32, u64)> = tree.scan().unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(entries.len(), 500);
    for (i, (k, v)) in entries.iter().enumerate() {
        assert_eq!(*k, i as u32);
        assert_eq!(*v, u64::from(*k) * 2);
    }

    for i in 0..500u32 {
        assert_eq!(tree.find(&i).unwrap(), Some(u64::from(i) * 2));
    }
    assert_eq!(tree.find(&500).unwrap(), None);
}

#[test]
fn structural_invariants_hold_under_insert_only_load() {
    let order = 4;
    let (mut tree, _dir) = temp_tree(order);
    for i in 0..300u32 {
        let k = (i * 113) % 300;
        tree.insert(k, u64::from(k)).unwrap();
    }

    let root_offset = tree.root.unwrap();
    let mut stack = vec![(root_offset, 0usize)];
    let mut leaves = Vec::new();
    let mut leaf_depth = None;

    while let Some((offset, depth)) = stack.pop() {
        let node = tree.read_node(offset).unwrap();

        if offset != root_offset {
            if node.is_leaf {
                assert!(node.size() >= order / 2, "underfull leaf: {}", node.size());
            } else {
                // The right half of an internal split starts one key
                // short of min_keys: its median moved up into the parent.
                assert!(
                    node.size() >= order / 2 - 1,
                    "underfull internal node: {}",
                    node.size()
                );
            }
        }
        assert!(node.size() <= order, "overfull node: {}", node.size());

        if node.is_leaf {
            assert_eq!(*leaf_depth.get_or_insert(depth), depth);
            leaves.push((offset, node.next));
        } else {
            assert_eq!(node.children.len(), node.size() + 1);
            for &child in node.children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
    }

    // The next chain visits every leaf exactly once, left to right,
    // terminating at none.
    for pair in leaves.windows(2) {
        assert_eq!(pair[0].1, Some(pair[1].0));
    }
    assert_eq!(leaves.last().unwrap().1, None);
}

#[test]
fn persistence_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.idx");

    {
        let config = TreeConfig::builder().path(path.clone()).order(4).build();
        let mut tree: BPlusTree<u32, u64> = BPlusTree::open(config).unwrap();
        for k in 0..50u32 {
            tree.insert(k, u64::from(k) + 1000).unwrap();
        }
    }

    let config = TreeConfig::builder().path(path).order(4).build();
    let mut tree: BPlusTree<u32, u64> = BPlusTree::open(config).unwrap();
    assert_eq!(tree.find(&17).unwrap(), Some(1017));

    let keys: Vec<u32> = tree.scan().unwrap().map(|r| r.unwrap().0).collect();
    assert_eq!(keys, (0..50).collect::<Vec<_>>());

    // The restored allocator must keep handing out fresh offsets.
    tree.insert(50, 1050).unwrap();
    assert_eq!(tree.find(&50).unwrap(), Some(1050));
}

#[test]
fn reopen_with_different_order_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.idx");

    {
        let config = TreeConfig::builder().path(path.clone()).order(4).build();
        let mut tree: BPlusTree<u32, u64> = BPlusTree::open(config).unwrap();
        tree.insert(1, 1).unwrap();
    }

    let config = TreeConfig::builder().path(path).order(8).build();
    let err = BPlusTree::<u32, u64>::open(config).unwrap_err();
    assert!(matches!(err, StoreError::Storage(_)));
}

#[test]
fn odd_or_tiny_order_is_rejected() {
    let dir = tempdir().unwrap();

    let config = TreeConfig::builder()
        .path(dir.path().join("a.idx"))
        .order(5)
        .build();
    assert!(BPlusTree::<u32, u64>::open(config).is_err());

    let config = TreeConfig::builder()
        .path(dir.path().join("b.idx"))
        .order(2)
        .build();
    assert!(BPlusTree::<u32, u64>::open(config).is_err());
}

#[test]
fn clear_resets_fully() {
    let (mut tree, _dir) = temp_tree(4);
    for k in 0..100u32 {
        tree.insert(k, u64::from(k)).unwrap();
    }

    tree.clear().unwrap();
    assert!(tree.is_empty());
    assert_eq!(tree.find(&5).unwrap(), None);
    assert_eq!(tree.scan().unwrap().count(), 0);

    // The tree stays usable after a clear.
    tree.insert(5, 55).unwrap();
    assert_eq!(tree.find(&5).unwrap(), Some(55));
}

#[test]
fn string_keys_order_lexicographically() {
    let dir = tempdir().unwrap();
    let config = TreeConfig::builder()
        .path(dir.path().join("users.idx"))
        .order(4)
        .build();
    let mut tree: BPlusTree<FixedStr<21>, u32> = BPlusTree::open(config).unwrap();

    let names = ["walter", "alice", "dave", "bob", "charlie", "erin"];
    for (i, name) in names.iter().enumerate() {
        tree.insert(FixedStr::new(name), i as u32).unwrap();
    }

    assert_eq!(tree.find(&FixedStr::new("charlie")).unwrap(), Some(4));
    assert_eq!(tree.find(&FixedStr::new("mallory")).unwrap(), None);

    let scanned: Vec<String> = tree
        .scan()
        .unwrap()
        .map(|r| r.unwrap().0.as_str().to_string())
        .collect();
    assert_eq!(
        scanned,
        vec!["alice", "bob", "charlie", "dave", "erin", "walter"]
    );
}

#[test]
fn composite_keys_group_by_first_field() {
    let dir = tempdir().unwrap();
    let config = TreeConfig::builder()
        .path(dir.path().join("orders.idx"))
        .order(4)
        .build();
    let mut tree: BPlusTree<(FixedStr<21>, u32), u64> = BPlusTree::open(config).unwrap();

    for seq in [3u32, 1, 2] {
        tree.insert((FixedStr::new("bob"), seq), u64::from(seq)).unwrap();
    }
    for seq in [2u32, 1] {
        tree.insert((FixedStr::new("alice"), seq), u64::from(seq) + 10)
            .unwrap();
    }

    let keys: Vec<(String, u32)> = tree
        .scan()
        .unwrap()
        .map(|r| {
            let (k, _) = r.unwrap();
            (k.0.as_str().to_string(), k.1)
        })
        .collect();
    assert_eq!(
        keys,
        vec![
            ("alice".into(), 1),
            ("alice".into(), 2),
            ("bob".into(), 1),
            ("bob".into(), 2),
            ("bob".into(), 3),
        ]
    );
}

#[derive(Clone, Debug, PartialEq)]
struct SeatCount {
    train: FixedStr<21>,
    day: u32,
    remaining: u32,
}

impl Record for SeatCount {
    const SIZE: usize = 21 + 4 + 4;

    fn encode(&self, buf: &mut [u8]) {
        self.train.encode(&mut buf[0..21]);
        self.day.encode(&mut buf[21..25]);
        self.remaining.encode(&mut buf[25..29]);
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            train: FixedStr::decode(&buf[0..21]),
            day: u32::decode(&buf[21..25]),
            remaining: u32::decode(&buf[25..29]),
        }
    }
}

#[test]
fn struct_values_round_trip_through_leaves() {
    let dir = tempdir().unwrap();
    let config = TreeConfig::builder()
        .path(dir.path().join("seats.idx"))
        .order(4)
        .build();
    let mut tree: BPlusTree<u32, SeatCount> = BPlusTree::open(config).unwrap();

    for day in 0..20u32 {
        let seat = SeatCount {
            train: FixedStr::new("G1024"),
            day,
            remaining: 500 - day,
        };
        tree.insert(day, seat).unwrap();
    }

    let fetched = tree.find(&7).unwrap().unwrap();
    assert_eq!(fetched.train.as_str(), "G1024");
    assert_eq!(fetched.remaining, 493);
}

proptest! {
    #[test]
    fn scan_yields_exactly_the_inserted_keys_sorted(
        raw in proptest::collection::vec(0u32..10_000, 1..200),
    ) {
        let mut seen = std::collections::HashSet::new();
        let keys: Vec<u32> = raw.into_iter().filter(|k| seen.insert(*k)).collect();

        let (mut tree, _dir) = temp_tree(4);
        for &k in &keys {
            tree.insert(k, u64::from(k) * 2 + 1).unwrap();
        }

        let mut expected = keys.clone();
        expected.sort_unstable();

        let entries: Vec<(u32, u64)> =
            tree.scan().unwrap().collect::<StoreResult<_>>().unwrap();
        let scanned: Vec<u32> = entries.iter().map(|(k, _)| *k).collect();
        prop_assert_eq!(scanned, expected);
        for (k, v) in entries {
            prop_assert_eq!(v, u64::from(k) * 2 + 1);
        }

        for &k in &keys {
            prop_assert_eq!(tree.find(&k).unwrap(), Some(u64::from(k) * 2 + 1));
        }
    }
}
