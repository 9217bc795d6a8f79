use crate::normalized::NormalizedLockFree;
use crate::sync::Ordering;
use crossbeam_epoch::{Atomic, CompareExchangeError, Guard, Owned, Shared};

/// The tagged phase of one submitted operation.
///
/// Exactly one variant holds at any time; `Completed` is terminal. A record
/// never changes in place: each transition allocates a fresh
/// [OperationRecord] with the new state and swings the owning
/// [OperationRecordBox] pointer onto it.
pub(crate) enum OperationState<LF: NormalizedLockFree> {
    /// The CAS list has not been generated yet.
    PreCas,
    /// The CAS list is being committed.
    ExecutingCas(LF::Commit),
    /// The commit finished; `Ok(())` when every descriptor linearized,
    /// `Err(i)` when it stopped at descriptor index `i`.
    PostCas(LF::Commit, Result<(), usize>),
    /// The operation produced its caller-visible output.
    Completed(LF::Output),
}

/// One submitted operation: owner, input and current phase.
pub(crate) struct OperationRecord<LF: NormalizedLockFree> {
    pub(crate) owner: usize,
    pub(crate) input: LF::Input,
    pub(crate) state: OperationState<LF>,
}

impl<LF: NormalizedLockFree> OperationRecord<LF> {
    pub(crate) fn new(owner: usize, input: LF::Input) -> Self {
        Self {
            owner,
            input,
            state: OperationState::PreCas,
        }
    }

    /// A successor record carrying the same owner and input.
    pub(crate) fn with_state(&self, state: OperationState<LF>) -> Self {
        Self {
            owner: self.owner,
            input: self.input.clone(),
            state,
        }
    }
}

/// The single-pointer cell whose target is the operation's current record.
///
/// The box is what travels on the help queue; helpers reach the record only
/// through it. Records that lose a transition race are dropped unshared;
/// records that are replaced are retired through the epoch collector.
pub(crate) struct OperationRecordBox<LF: NormalizedLockFree> {
    record: Atomic<OperationRecord<LF>>,
}

impl<LF: NormalizedLockFree> OperationRecordBox<LF> {
    pub(crate) fn new(owner: usize, input: LF::Input) -> Self {
        Self {
            record: Atomic::new(OperationRecord::new(owner, input)),
        }
    }

    pub(crate) fn load<'g>(&self, guard: &'g Guard) -> Shared<'g, OperationRecord<LF>> {
        self.record.load(Ordering::SeqCst, guard)
    }

    /// Install `next` as the successor of `current`.
    ///
    /// On success the displaced record is retired; on failure (another
    /// helper advanced the operation first) `next` is dropped unshared and
    /// the caller re-reads.
    pub(crate) fn transition<'g>(
        &self,
        current: Shared<'g, OperationRecord<LF>>,
        next: OperationRecord<LF>,
        guard: &'g Guard,
    ) -> bool {
        match self.record.compare_exchange(
            current,
            Owned::new(next),
            Ordering::SeqCst,
            Ordering::SeqCst,
            guard,
        ) {
            Ok(_) => {
                // Safety: `current` was unlinked by the exchange and can only
                // still be held by helpers pinned before it.
                unsafe { guard.defer_destroy(current) };
                true
            }
            Err(CompareExchangeError { new, .. }) => {
                drop(new);
                false
            }
        }
    }
}

impl<LF: NormalizedLockFree> Drop for OperationRecordBox<LF> {
    fn drop(&mut self) {
        let record = core::mem::replace(&mut self.record, Atomic::null());
        // Safety: the box is dropped only after it has been drained from the
        // help queue and a grace period has passed, so nobody can reach the
        // final record anymore.
        drop(unsafe { record.into_owned() });
    }
}
