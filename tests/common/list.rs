//! A normalized Harris ordered list, used to exercise the simulator
//! end-to-end. This is test support, not part of the library: node
//! reclamation is deliberately out of scope (nodes that lose races leak).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wfsim::{
    AtomicStatus, CasStatus, Contention, ContentionMeasure, NormalizedLockFree, VersionedAtomic,
    VersionedCas,
};

/// Whether the node owning this link is logically removed.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct MarkMeta {
    pub removed: bool,
}

type Link = VersionedAtomic<*mut Node, MarkMeta>;

pub struct Node {
    value: i64,
    next: Link,
}

impl Node {
    fn new(value: i64, next: *mut Node) -> Self {
        Self {
            value,
            next: VersionedAtomic::new(next, MarkMeta::default()),
        }
    }

    fn next(&self) -> *mut Node {
        self.next.transform(|ptr, _version, _meta| *ptr)
    }

    fn is_removed(&self) -> bool {
        self.next.transform(|_ptr, _version, meta| meta.removed)
    }
}

/// The lock-free ordered list underneath the normalized operations.
pub struct LinkedList {
    head: *mut Node,
    tail: *mut Node,
    deleted: AtomicUsize,
}

// Safety: all node links are versioned cells; the raw pointers are only
// dereferenced while the list is alive, and nodes are never freed before
// the list drops.
unsafe impl Send for LinkedList {}
unsafe impl Sync for LinkedList {}

impl LinkedList {
    pub fn new() -> Self {
        let tail = Box::into_raw(Box::new(Node::new(i64::MAX, core::ptr::null_mut())));
        let head = Box::into_raw(Box::new(Node::new(i64::MIN, tail)));
        Self {
            head,
            tail,
            deleted: AtomicUsize::new(0),
        }
    }

    /// Find the adjacent pair `(left, right)` where `left` is the last live
    /// node below `value` and `right` the first live node not below it,
    /// unlinking runs of removed nodes along the way.
    fn search(&self, value: i64) -> (*mut Node, *mut Node) {
        let mut contention = ContentionMeasure::default();
        loop {
            let mut left = self.head;
            let (mut left_next, mut left_version, mut left_meta) =
                unsafe { &(*left).next }.load();
            let mut current = left_next;
            let mut right = self.tail;

            while current != self.tail {
                let node = unsafe { &*current };
                let (successor, version, meta) = node.next.load();
                if meta.removed {
                    current = successor;
                    continue;
                }
                if node.value >= value {
                    right = current;
                    break;
                }
                left = current;
                left_next = successor;
                left_version = version;
                left_meta = meta;
                current = successor;
            }

            if left_next == right {
                return (left, right);
            }
            // unlink the removed run between left and right
            let left_link = unsafe { &(*left).next };
            if left_link.compare_exchange(
                &left_next,
                Some(left_version),
                right,
                left_meta,
                &mut contention,
            ) {
                self.deleted.fetch_add(1, Ordering::SeqCst);
                return (left, right);
            }
        }
    }

    /// Whether `value` is present (reachable and not logically removed).
    pub fn appears(&self, value: i64) -> bool {
        let mut current = unsafe { &*self.head }.next();
        while current != self.tail {
            let node = unsafe { &*current };
            if !node.is_removed() {
                if node.value > value {
                    break;
                }
                if node.value == value {
                    return true;
                }
            }
            current = node.next();
        }
        false
    }

    /// The number of live (not logically removed) nodes.
    pub fn len(&self) -> usize {
        self.count_if(|node| !node.is_removed())
    }

    pub fn removed_not_deleted(&self) -> usize {
        self.count_if(|node| node.is_removed())
    }

    pub fn removed_and_deleted(&self) -> usize {
        self.deleted.load(Ordering::SeqCst)
    }

    fn count_if<F: Fn(&Node) -> bool>(&self, keep: F) -> usize {
        let mut count = 0;
        let mut current = unsafe { &*self.head }.next();
        while current != self.tail {
            let node = unsafe { &*current };
            if keep(node) {
                count += 1;
            }
            current = node.next();
        }
        count
    }
}

impl Default for LinkedList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LinkedList {
    fn drop(&mut self) {
        // free every node still linked; nodes that lost races leak, which is
        // acceptable for test support
        let mut current = self.head;
        while !current.is_null() {
            let next = unsafe { &*current }.next();
            drop(unsafe { Box::from_raw(current) });
            current = next;
        }
    }
}

/// One recorded CAS against a node link.
#[derive(Clone)]
pub struct ListCas {
    target: *const Link,
    expected: *mut Node,
    expected_version: u64,
    desired: *mut Node,
    desired_meta: MarkMeta,
    status: AtomicStatus,
}

// Safety: the target link lives inside a node owned by the LinkedList, which
// outlives every operation submitted against it.
unsafe impl Send for ListCas {}
unsafe impl Sync for ListCas {}

impl ListCas {
    fn target(&self) -> &Link {
        // Safety: see the Send impl above.
        unsafe { &*self.target }
    }
}

impl VersionedCas for ListCas {
    fn has_modified_bit(&self) -> bool {
        // scope the cell-level bit to this descriptor's transition: the
        // target must sit exactly one version past our guard, holding our
        // desired pointer
        self.target().transform(|value, version, _meta| {
            version == self.expected_version + 1 && *value == self.desired
        }) && self.target().has_modified_bit()
    }

    fn clear_bit(&self) {
        self.target().clear_modified_bit();
    }

    fn state(&self) -> CasStatus {
        self.status.load()
    }

    fn set_state(&self, status: CasStatus) {
        self.status.store(status);
    }

    fn swap_state(&self, expected: CasStatus, desired: CasStatus) -> bool {
        self.status.compare_exchange(expected, desired)
    }

    fn execute(&self, contention: &mut ContentionMeasure) -> Result<bool, Contention> {
        self.target().compare_exchange_weak(
            &self.expected,
            Some(self.expected_version),
            self.desired,
            self.desired_meta,
            contention,
        )
    }
}

/// The operations the normalized list accepts.
#[derive(Debug, Clone, Copy)]
pub enum ListOp {
    Insert(i64),
    Remove(i64),
}

/// The normalized form of the list: `generator` records the CASes an
/// operation needs, `wrap_up` interprets the commit outcome, `fast_path` is
/// the plain Harris rendition.
pub struct NormalizedList {
    pub list: Arc<LinkedList>,
}

impl NormalizedList {
    pub fn new() -> Self {
        Self {
            list: Arc::new(LinkedList::new()),
        }
    }
}

impl Default for NormalizedList {
    fn default() -> Self {
        Self::new()
    }
}

impl NormalizedLockFree for NormalizedList {
    type Input = ListOp;
    type Output = bool;
    type Cas = ListCas;
    type Commit = Vec<ListCas>;

    fn generator(
        &self,
        input: &ListOp,
        _contention: &mut ContentionMeasure,
    ) -> Result<Option<Vec<ListCas>>, Contention> {
        match *input {
            ListOp::Insert(value) => {
                let (left, right) = self.list.search(value);
                let right_ref = unsafe { &*right };
                if right != self.list.tail && right_ref.value == value && !right_ref.is_removed() {
                    return Ok(None);
                }
                let node = Box::into_raw(Box::new(Node::new(value, right)));
                let left_link = unsafe { &(*left).next };
                Ok(Some(vec![ListCas {
                    target: left_link as *const Link,
                    expected: right,
                    expected_version: left_link.version(),
                    desired: node,
                    desired_meta: MarkMeta::default(),
                    status: AtomicStatus::default(),
                }]))
            }
            ListOp::Remove(value) => {
                let (left, right) = self.list.search(value);
                let right_ref = unsafe { &*right };
                if right == self.list.tail || right_ref.value != value || right_ref.is_removed() {
                    return Ok(None);
                }
                let (successor, successor_version, _) = right_ref.next.load();
                let left_link = unsafe { &(*left).next };
                Ok(Some(vec![
                    // logical removal: mark the victim's own link
                    ListCas {
                        target: &right_ref.next as *const Link,
                        expected: successor,
                        expected_version: successor_version,
                        desired: successor,
                        desired_meta: MarkMeta { removed: true },
                        status: AtomicStatus::default(),
                    },
                    // physical unlink
                    ListCas {
                        target: left_link as *const Link,
                        expected: right,
                        expected_version: left_link.version(),
                        desired: successor,
                        desired_meta: left_link.meta(),
                        status: AtomicStatus::default(),
                    },
                ]))
            }
        }
    }

    fn wrap_up(
        &self,
        executed: Result<(), usize>,
        performed: &Vec<ListCas>,
        _contention: &mut ContentionMeasure,
    ) -> Result<Option<bool>, Contention> {
        if performed.is_empty() {
            // insert of a present key / remove of an absent key
            return Ok(Some(false));
        }
        match executed {
            Ok(()) => Ok(Some(true)),
            // a marked remove is logically done; the unlink is finished
            // opportunistically by later searches
            Err(1) if performed.len() == 2 => Ok(Some(true)),
            Err(_) => Ok(None),
        }
    }

    fn fast_path(&self, input: &ListOp, contention: &mut ContentionMeasure) -> Option<bool> {
        match *input {
            ListOp::Insert(value) => {
                let (left, right) = self.list.search(value);
                let right_ref = unsafe { &*right };
                if right != self.list.tail && right_ref.value == value && !right_ref.is_removed() {
                    return Some(false);
                }
                let node = Box::into_raw(Box::new(Node::new(value, right)));
                let left_link = unsafe { &(*left).next };
                let version = left_link.version();
                let meta = left_link.meta();
                match left_link.compare_exchange_weak(&right, Some(version), node, meta, contention)
                {
                    Ok(true) => Some(true),
                    // the lost node leaks; reclamation is out of scope here
                    Ok(false) | Err(Contention) => None,
                }
            }
            ListOp::Remove(value) => {
                let (left, right) = self.list.search(value);
                let right_ref = unsafe { &*right };
                if right == self.list.tail || right_ref.value != value || right_ref.is_removed() {
                    return Some(false);
                }
                let (successor, successor_version, _) = right_ref.next.load();
                match right_ref.next.compare_exchange_weak(
                    &successor,
                    Some(successor_version),
                    successor,
                    MarkMeta { removed: true },
                    contention,
                ) {
                    Ok(true) => {}
                    Ok(false) | Err(Contention) => return None,
                }
                // best-effort unlink; searches clean up if this loses
                let left_link = unsafe { &(*left).next };
                let version = left_link.version();
                let meta = left_link.meta();
                let mut unlink_contention = ContentionMeasure::default();
                let _ = left_link.compare_exchange_weak(
                    &right,
                    Some(version),
                    successor,
                    meta,
                    &mut unlink_contention,
                );
                Some(true)
            }
        }
    }
}
