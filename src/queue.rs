use crate::sync::Ordering;
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A link in the queue. Once linked, a node never changes its `value` or
/// `enqueuer`; only `next` and the global head/tail cells mutate.
struct Node<T> {
    value: Option<T>,
    enqueuer: usize,
    next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    fn new(value: T, enqueuer: usize) -> Self {
        Self {
            value: Some(value),
            enqueuer,
            next: Atomic::null(),
        }
    }

    fn sentinel() -> Self {
        Self {
            value: None,
            enqueuer: usize::MAX,
            next: Atomic::null(),
        }
    }
}

/// The announcement a participant publishes in its state slot.
///
/// Descriptions are immutable; helpers replace the whole slot via CAS to
/// flip `pending`. Only the slot's owner installs a description with a new
/// phase, so at most one node is ever linked per `(slot, phase)`.
struct OperationDescription<T> {
    phase: u64,
    pending: bool,
    enqueue: bool,
    node: *const Node<T>,
}

impl<T> OperationDescription<T> {
    fn empty() -> Self {
        Self {
            phase: 0,
            pending: false,
            enqueue: false,
            node: core::ptr::null(),
        }
    }
}

// Safety: the node pointer inside a description is only dereferenced through
// queue operations that hold an epoch guard, and nodes are retired through
// that same collector.
unsafe impl<T: Send + Sync> Send for OperationDescription<T> {}
unsafe impl<T: Send + Sync> Sync for OperationDescription<T> {}

/// A wait-free FIFO with one announcement slot per participant, derived from
/// the Kogan–Petrank queue.
///
/// An enqueue is announced in the enqueuer's slot; every participant passing
/// through [push_back](Self::push_back) helps all announcements with a phase
/// no newer than its own before finishing, which bounds the number of steps
/// until any announced enqueue is linked and published. The queue supports
/// only the operations the simulator needs: `push_back`, `peek_front` and a
/// conditional `try_pop_front`.
pub struct HelpQueue<T, const N: usize> {
    head: Atomic<Node<T>>,
    tail: Atomic<Node<T>>,
    states: [Atomic<OperationDescription<T>>; N],
}

// Safety: all shared pointers inside the queue are managed through the epoch
// collector; `T` itself is only ever copied out.
unsafe impl<T: Send + Sync, const N: usize> Send for HelpQueue<T, N> {}
unsafe impl<T: Send + Sync, const N: usize> Sync for HelpQueue<T, N> {}

impl<T, const N: usize> HelpQueue<T, N>
where
    T: Copy + PartialEq,
{
    /// An empty queue with `N` announcement slots.
    pub fn new() -> Self {
        let sentinel: *const Node<T> = Box::into_raw(Box::new(Node::sentinel()));
        Self {
            head: Atomic::from(sentinel),
            tail: Atomic::from(sentinel),
            states: core::array::from_fn(|_| Atomic::new(OperationDescription::empty())),
        }
    }

    /// Announce and complete an enqueue of `value` on behalf of participant
    /// `enqueuer`.
    ///
    /// Completion may be performed by any helper; when `push_back` returns,
    /// the node is linked and published and the slot is no longer pending.
    #[cfg_attr(feature = "tracing", instrument(skip(self, value)))]
    pub fn push_back(&self, enqueuer: usize, value: T) {
        debug_assert!(enqueuer < N);
        let guard = epoch::pin();
        let node = Owned::new(Node::new(value, enqueuer)).into_shared(&guard);
        let phase = self.max_phase(&guard) + 1;
        let previous = self.states[enqueuer].swap(
            Owned::new(OperationDescription {
                phase,
                pending: true,
                enqueue: true,
                node: node.as_raw(),
            }),
            Ordering::SeqCst,
            &guard,
        );
        // Safety: the slot no longer points at the previous description.
        unsafe { guard.defer_destroy(previous) };

        self.help_enqueues(phase, &guard);
        self.help_finish_enqueue(&guard);
    }

    /// The value at the front, or `None` when the queue is logically empty.
    pub fn peek_front(&self) -> Option<T> {
        self.peek_front_in(&epoch::pin())
    }

    /// [peek_front](Self::peek_front) under a caller-held guard, so the
    /// returned value stays protected for as long as the caller stays
    /// pinned.
    pub(crate) fn peek_front_in(&self, guard: &Guard) -> Option<T> {
        // Safety: head is never null and nodes reachable from it are only
        // retired after being unlinked.
        let head = unsafe { self.head.load(Ordering::SeqCst, guard).deref() };
        let front = head.next.load(Ordering::SeqCst, guard);
        unsafe { front.as_ref() }.and_then(|node| node.value)
    }

    /// Advance the head iff the current front value equals `expected`.
    ///
    /// On success one [help_finish_enqueue](Self::help_finish_enqueue) pass
    /// drains a linked-but-unpublished tail before returning.
    #[cfg_attr(feature = "tracing", instrument(skip(self, expected)))]
    pub fn try_pop_front(&self, expected: T) -> bool {
        let guard = epoch::pin();
        let head = self.head.load(Ordering::SeqCst, &guard);
        // Safety: see `peek_front_in`.
        let head_ref = unsafe { head.deref() };
        let front = head_ref.next.load(Ordering::SeqCst, &guard);
        let Some(front_ref) = (unsafe { front.as_ref() }) else {
            return false;
        };
        if front_ref.value != Some(expected) {
            return false;
        }
        if head == self.tail.load(Ordering::SeqCst, &guard) {
            // the front is linked but the tail has not caught up; publish it
            // so the tail never trails the head
            self.help_finish_enqueue(&guard);
        }
        if self
            .head
            .compare_exchange(head, front, Ordering::SeqCst, Ordering::SeqCst, &guard)
            .is_ok()
        {
            self.help_finish_enqueue(&guard);
            // Safety: the old head is unreachable from the queue now.
            unsafe { guard.defer_destroy(head) };
            true
        } else {
            false
        }
    }

    /// Whether `value` is still reachable from the head.
    ///
    /// May report `true` for a node that a concurrent pop is removing, but
    /// once a pop of `value` has completed before this call starts, the walk
    /// cannot see it anymore.
    pub(crate) fn contains(&self, value: T) -> bool {
        let guard = epoch::pin();
        // Safety: see `peek_front_in`.
        let head = unsafe { self.head.load(Ordering::SeqCst, &guard).deref() };
        let mut current = head.next.load(Ordering::SeqCst, &guard);
        while let Some(node) = unsafe { current.as_ref() } {
            if node.value == Some(value) {
                return true;
            }
            current = node.next.load(Ordering::SeqCst, &guard);
        }
        false
    }

    fn max_phase(&self, guard: &Guard) -> u64 {
        self.states
            .iter()
            // Safety: state slots always hold a description.
            .map(|slot| unsafe { slot.load(Ordering::SeqCst, guard).deref() }.phase)
            .max()
            .unwrap_or(0)
    }

    fn is_still_pending(&self, slot: usize, helper_phase: u64, guard: &Guard) -> bool {
        // Safety: state slots always hold a description.
        let desc = unsafe { self.states[slot].load(Ordering::SeqCst, guard).deref() };
        desc.pending && desc.phase <= helper_phase
    }

    /// Help every announced enqueue with a phase at most `phase`.
    fn help_enqueues(&self, phase: u64, guard: &Guard) {
        for slot in 0..N {
            // Safety: state slots always hold a description.
            let desc = unsafe { self.states[slot].load(Ordering::SeqCst, guard).deref() };
            if desc.pending && desc.enqueue && desc.phase <= phase {
                self.help_enqueue(slot, desc.phase, guard);
            }
        }
    }

    /// Drive the enqueue announced in `slot` until its node is linked.
    fn help_enqueue(&self, slot: usize, phase: u64, guard: &Guard) {
        while self.is_still_pending(slot, phase, guard) {
            let tail = self.tail.load(Ordering::SeqCst, guard);
            // Safety: tail is never null.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::SeqCst, guard);
            if tail != self.tail.load(Ordering::SeqCst, guard) {
                continue;
            }
            if !next.is_null() {
                // the tail is stale; publish the dangling link and retry
                self.help_finish_enqueue(guard);
                continue;
            }
            // Safety: state slots always hold a description.
            let desc = unsafe { self.states[slot].load(Ordering::SeqCst, guard).deref() };
            if !desc.pending || desc.phase > phase {
                return;
            }
            let node = Shared::from(desc.node);
            if tail_ref
                .next
                .compare_exchange(
                    Shared::null(),
                    node,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                    guard,
                )
                .is_ok()
            {
                self.help_finish_enqueue(guard);
                return;
            }
        }
    }

    /// Publish the node linked behind the current tail: flip its enqueuer's
    /// `pending` and advance the tail. Every CAS here may lose to another
    /// helper; losing just means the state already advanced.
    fn help_finish_enqueue(&self, guard: &Guard) {
        let tail = self.tail.load(Ordering::SeqCst, guard);
        // Safety: tail is never null.
        let tail_ref = unsafe { tail.deref() };
        let next = tail_ref.next.load(Ordering::SeqCst, guard);
        let Some(next_ref) = (unsafe { next.as_ref() }) else {
            return;
        };
        let enqueuer = next_ref.enqueuer;
        let current = self.states[enqueuer].load(Ordering::SeqCst, guard);
        // Safety: state slots always hold a description.
        let desc = unsafe { current.deref() };
        if tail != self.tail.load(Ordering::SeqCst, guard) || desc.node != next.as_raw() {
            return;
        }
        let finished = Owned::new(OperationDescription {
            phase: desc.phase,
            pending: false,
            enqueue: true,
            node: desc.node,
        });
        match self.states[enqueuer].compare_exchange(
            current,
            finished,
            Ordering::SeqCst,
            Ordering::SeqCst,
            guard,
        ) {
            // Safety: the slot no longer points at `current`.
            Ok(_) => unsafe { guard.defer_destroy(current) },
            Err(error) => drop(error.new),
        }
        let _ = self
            .tail
            .compare_exchange(tail, next, Ordering::SeqCst, Ordering::SeqCst, guard);
    }
}

impl<T, const N: usize> core::fmt::Debug for HelpQueue<T, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HelpQueue")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .finish_non_exhaustive()
    }
}

impl<T, const N: usize> Default for HelpQueue<T, N>
where
    T: Copy + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for HelpQueue<T, N> {
    fn drop(&mut self) {
        // Safety: we hold the only reference to the queue; nothing is pinned
        // on it anymore.
        unsafe {
            let guard = epoch::unprotected();
            let mut current = self.head.load(Ordering::Relaxed, guard);
            while !current.is_null() {
                let next = current.deref().next.load(Ordering::Relaxed, guard);
                drop(current.into_owned());
                current = next;
            }
            for slot in &self.states {
                drop(slot.load(Ordering::Relaxed, guard).into_owned());
            }
        }
    }
}
