//! End-to-end behaviour of block graphs over memory and file stores.

use blockfile_store::{CreateMode, MemoryStore, StoreConfig, StoreError};
use tempfile::TempDir;

use crate::{block_layout, BlockAddress, BlockError, BlockManager, BlockRef, HEADER_SIZE};

block_layout! {
    #[derive(Debug, Default)]
    struct TreeNode {
        label: String,
        children: Vec<BlockRef<TreeNode>>,
    }
}

block_layout! {
    #[derive(Debug, Default)]
    struct ListNode {
        value: i64,
        next: BlockRef<ListNode>,
    }
}

fn memory_manager() -> BlockManager {
    let manager = BlockManager::new(MemoryStore::new());
    manager.format().unwrap();
    manager
}

fn labelled(manager: &BlockManager, label: &str, children: Vec<BlockRef<TreeNode>>) -> BlockRef<TreeNode> {
    let mut node = manager.new_ref::<TreeNode>();
    {
        let ptr = node.write().unwrap();
        let mut value = ptr.borrow_mut();
        value.label = label.to_string();
        value.children = children;
    }
    node
}

fn list_values(manager: &BlockManager) -> Vec<i64> {
    let mut values = Vec::new();
    let mut cursor = manager.root::<ListNode>().unwrap();
    while !cursor.is_null() {
        let ptr = cursor.read().unwrap();
        values.push(ptr.borrow().value);
        let next = ptr.borrow().next.clone();
        cursor = next;
    }
    values
}

fn push_front(manager: &BlockManager, value: i64) {
    let head = manager.root::<ListNode>().unwrap();
    let mut node = manager.new_ref::<ListNode>();
    {
        let ptr = node.write().unwrap();
        let mut entry = ptr.borrow_mut();
        entry.value = value;
        entry.next = head;
    }
    node.commit().unwrap();
}

#[test]
fn three_level_tree_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tree.blocks");

    {
        let manager = BlockManager::open(&path, StoreConfig::default()).unwrap();
        manager.format().unwrap();
        let children = (0..5)
            .map(|i| {
                let grandchildren = (0..i)
                    .map(|j| labelled(&manager, &format!("grandchild {i}.{j}"), Vec::new()))
                    .collect();
                labelled(&manager, &format!("child {i}"), grandchildren)
            })
            .collect();
        let mut root = labelled(&manager, "root", children);
        root.commit().unwrap();
        assert_eq!(manager.scan_blocks().unwrap().len(), 1 + 5 + 10);
        let stats = manager.stats().unwrap();
        assert_eq!(stats.live_blocks, 0);
        assert_eq!(stats.saved_blocks, 0);
    }

    let config = StoreConfig::default().with_create_mode(CreateMode::OpenExisting);
    let manager = BlockManager::open(&path, config).unwrap();
    let root = manager.root::<TreeNode>().unwrap().read().unwrap();
    assert_eq!(root.borrow().label, "root");
    assert_eq!(root.borrow().children.len(), 5);
    for (i, child_ref) in root.borrow().children.iter().enumerate() {
        let child = child_ref.read().unwrap();
        assert_eq!(child.borrow().label, format!("child {i}"));
        assert_eq!(child.borrow().children.len(), i);
        for (j, grandchild_ref) in child.borrow().children.iter().enumerate() {
            let grandchild = grandchild_ref.read().unwrap();
            assert_eq!(grandchild.borrow().label, format!("grandchild {i}.{j}"));
            assert!(grandchild.borrow().children.is_empty());
        }
    }
}

#[test]
fn list_grows_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("list.blocks");

    for round in 0..3 {
        let manager = BlockManager::open(&path, StoreConfig::default()).unwrap();
        if !manager.is_formatted() {
            manager.format().unwrap();
        }
        push_front(&manager, round);
        // Older nodes are committed and never rewritten.
        assert_eq!(manager.scan_blocks().unwrap().len(), round as usize + 1);
    }

    let manager = BlockManager::open(&path, StoreConfig::read_only()).unwrap();
    assert_eq!(list_values(&manager), vec![2, 1, 0]);
}

#[test]
fn ring_commits_each_node_once() {
    const N: usize = 7;
    let manager = memory_manager();
    let mut nodes: Vec<BlockRef<ListNode>> = (0..N).map(|_| manager.new_ref()).collect();
    for (i, node) in nodes.iter_mut().enumerate() {
        node.write().unwrap().borrow_mut().value = i as i64;
    }
    for i in 0..N {
        let next = nodes[(i + 1) % N].clone();
        nodes[i].write().unwrap().borrow_mut().next = next;
    }
    let mut root = nodes[0].clone();
    drop(nodes);

    let address = root.commit().unwrap();
    assert_eq!(manager.scan_blocks().unwrap().len(), N);
    let stats = manager.stats().unwrap();
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(stats.saved_blocks, 0);

    let mut cursor = manager.root::<ListNode>().unwrap();
    for i in 0..N {
        let ptr = cursor.read().unwrap();
        assert_eq!(ptr.borrow().value, i as i64);
        let next = ptr.borrow().next.clone();
        cursor = next;
    }
    assert_eq!(cursor.address(), address);
}

#[test]
fn shared_child_is_written_once() {
    let manager = memory_manager();
    let shared = labelled(&manager, "shared", Vec::new());
    let left = labelled(&manager, "left", vec![shared.clone()]);
    let right = labelled(&manager, "right", vec![shared.clone()]);
    drop(shared);
    let mut root = labelled(&manager, "root", vec![left, right]);
    root.commit().unwrap();

    assert_eq!(manager.scan_blocks().unwrap().len(), 4);
    let root = root.read().unwrap();
    let left = root.borrow().children[0].read().unwrap();
    let right = root.borrow().children[1].read().unwrap();
    let from_left = left.borrow().children[0].address();
    let from_right = right.borrow().children[0].address();
    assert!(from_left.is_committed());
    assert_eq!(from_left, from_right);

    let a = left.borrow().children[0].read().unwrap();
    let b = right.borrow().children[0].read().unwrap();
    assert!(a.ptr_eq(&b));
    assert_eq!(a.borrow().label, "shared");
}

#[test]
fn write_copies_instead_of_mutating() {
    let manager = memory_manager();
    push_front(&manager, 1);

    let snapshot = manager.root::<ListNode>().unwrap();
    let reader = snapshot.read().unwrap();

    let mut current = manager.root::<ListNode>().unwrap();
    let writer = current.write().unwrap();
    writer.borrow_mut().value = 2;
    assert!(reader.ptr_eq(&snapshot.read().unwrap()));
    assert_eq!(reader.borrow().value, 1);
    assert!(current.raw_address().is_uncommitted());
    // Nothing reaches the file until commit.
    assert_eq!(list_values(&manager), vec![1]);

    current.commit().unwrap();
    assert_eq!(list_values(&manager), vec![2]);
    // The previous version is still intact at its old offset.
    assert_eq!(snapshot.read().unwrap().borrow().value, 1);
    assert_eq!(reader.borrow().value, 1);
}

#[test]
fn path_copy_updates_tail() {
    let manager = memory_manager();
    for value in [3, 2, 1] {
        push_front(&manager, value);
    }
    let before = manager.scan_blocks().unwrap().len();

    let mut head = manager.root::<ListNode>().unwrap();
    {
        let first = head.write().unwrap();
        let mut first = first.borrow_mut();
        let second = first.next.write().unwrap();
        let mut second = second.borrow_mut();
        second.next.write().unwrap().borrow_mut().value = 30;
    }
    head.commit().unwrap();

    assert_eq!(list_values(&manager), vec![1, 2, 30]);
    assert_eq!(manager.scan_blocks().unwrap().len(), before + 3);
}

#[test]
fn format_discards_everything() {
    let manager = memory_manager();
    push_front(&manager, 5);
    let committed = manager.root::<ListNode>().unwrap();
    let mut pending = manager.new_ref::<ListNode>();
    pending.write().unwrap().borrow_mut().value = 6;

    manager.format().unwrap();

    let meta = manager.meta().unwrap();
    assert_eq!(meta.root, BlockAddress::Invalid);
    assert_eq!(meta.file_size, HEADER_SIZE);
    let stats = manager.stats().unwrap();
    assert_eq!(stats.file_size, HEADER_SIZE);
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(stats.cached_blocks, 0);
    assert!(manager.scan_blocks().unwrap().is_empty());

    assert!(matches!(
        committed.read().unwrap_err(),
        BlockError::InvalidAddress(_)
    ));
    assert!(matches!(
        pending.write().unwrap_err(),
        BlockError::StaleSlot { .. }
    ));
}

#[test]
fn failed_commit_restores_overlay() {
    let manager = memory_manager();
    let child = labelled(&manager, "child", Vec::new());
    let mut root = labelled(&manager, "root", vec![child.clone()]);

    let mut handle = child.clone();
    let guard = handle.write().unwrap();
    let held = guard.borrow_mut();
    assert!(matches!(root.commit().unwrap_err(), BlockError::BlockInUse));
    drop(held);
    drop(guard);

    assert_eq!(manager.meta().unwrap().root, BlockAddress::Invalid);
    assert!(root.raw_address().is_uncommitted());
    let stats = manager.stats().unwrap();
    assert_eq!(stats.live_blocks, 2);
    assert_eq!(stats.saved_blocks, 0);
    assert_eq!(root.read().unwrap().borrow().label, "root");

    let address = root.commit().unwrap();
    // The root block appended by the failed attempt stays behind.
    assert_ne!(address, BlockAddress::Committed(HEADER_SIZE));
    assert_eq!(manager.scan_blocks().unwrap().len(), 3);
    let root = root.read().unwrap();
    assert_eq!(root.borrow().children[0].read().unwrap().borrow().label, "child");
}

#[test]
fn foreign_reference_fails_commit() {
    let manager = memory_manager();
    let other = memory_manager();
    let stranger = labelled(&other, "elsewhere", Vec::new());
    let mut root = labelled(&manager, "root", vec![stranger]);

    assert!(matches!(
        root.commit().unwrap_err(),
        BlockError::ForeignReference
    ));
    assert_eq!(manager.meta().unwrap().root, BlockAddress::Invalid);
    assert_eq!(manager.stats().unwrap().live_blocks, 1);
    assert!(matches!(
        manager.read(&other.new_ref::<TreeNode>()).unwrap_err(),
        BlockError::ForeignReference
    ));
}

#[test]
fn unreachable_overlay_blocks_survive_commit() {
    let manager = memory_manager();
    let mut draft = manager.new_ref::<ListNode>();
    draft.write().unwrap().borrow_mut().value = 9;

    push_front(&manager, 1);
    assert_eq!(manager.scan_blocks().unwrap().len(), 1);
    assert!(draft.raw_address().is_uncommitted());
    assert_eq!(manager.stats().unwrap().live_blocks, 1);
    assert_eq!(draft.read().unwrap().borrow().value, 9);

    draft.commit().unwrap();
    assert_eq!(list_values(&manager), vec![9]);
}

#[test]
fn freed_slots_are_reused() {
    let manager = memory_manager();
    let mut first = manager.new_ref::<ListNode>();
    first.write().unwrap();
    drop(first);
    assert_eq!(manager.stats().unwrap().free_slots, 1);

    let mut second = manager.new_ref::<ListNode>();
    second.write().unwrap();
    let stats = manager.stats().unwrap();
    assert_eq!(stats.free_slots, 0);
    assert_eq!(stats.live_blocks, 1);
}

#[test]
fn type_mismatch_is_detected() {
    let manager = memory_manager();
    let mut root = manager.new_ref::<u32>();
    root.write().unwrap().set(7);
    root.commit().unwrap();

    let held = root.read().unwrap();
    assert_eq!(*held.borrow(), 7);
    match manager.root::<i32>().unwrap().read().unwrap_err() {
        BlockError::TypeMismatch { expected, found } => {
            assert_eq!(expected, "i32");
            assert_eq!(found, "u32");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn read_only_store_rejects_commit() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ro.blocks");
    {
        let manager = BlockManager::open(&path, StoreConfig::default()).unwrap();
        manager.format().unwrap();
        push_front(&manager, 9);
    }

    let manager = BlockManager::open(&path, StoreConfig::read_only()).unwrap();
    assert_eq!(list_values(&manager), vec![9]);
    let mut head = manager.root::<ListNode>().unwrap();
    head.write().unwrap().borrow_mut().value = 10;
    assert!(matches!(
        head.commit().unwrap_err(),
        BlockError::Store(StoreError::ReadOnly)
    ));
    assert_eq!(list_values(&manager), vec![9]);
    assert_eq!(manager.stats().unwrap().live_blocks, 1);
}
