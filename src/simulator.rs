use crate::contention::{ContentionMeasure, FAST_PATH_RETRY_THRESHOLD};
use crate::err::Contention;
use crate::normalized::{CasStatus, NormalizedLockFree, VersionedCas};
use crate::queue::HelpQueue;
use crate::record::{OperationRecordBox, OperationState};
use crossbeam_epoch::{self as epoch, Guard, Shared};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// The address of an operation box, as it travels on the help queue.
///
/// Compared by identity; the box behind it is kept alive by the slow-path
/// owner until the queue has drained it and a grace period has passed.
pub(crate) struct OpBoxPtr<LF: NormalizedLockFree>(*const OperationRecordBox<LF>);

impl<LF: NormalizedLockFree> Clone for OpBoxPtr<LF> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<LF: NormalizedLockFree> Copy for OpBoxPtr<LF> {}

impl<LF: NormalizedLockFree> PartialEq for OpBoxPtr<LF> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.0, other.0)
    }
}

// Safety: the pointee is shared only through the help queue, whose epoch
// collector keeps it alive for any pinned reader.
unsafe impl<LF: NormalizedLockFree> Send for OpBoxPtr<LF> where
    OperationRecordBox<LF>: Send + Sync
{
}
unsafe impl<LF: NormalizedLockFree> Sync for OpBoxPtr<LF> where
    OperationRecordBox<LF>: Send + Sync
{
}

/// How a commit walk ended when it did not linearize every descriptor.
enum CommitFailure {
    /// The walk stopped at this descriptor index.
    Failed(usize),
    /// The walk should be retried by a later help iteration.
    Contention,
}

impl From<Contention> for CommitFailure {
    fn from(_: Contention) -> Self {
        Self::Contention
    }
}

/// The engine driving submitted operations to completion.
///
/// One instance is shared by all participant handles. Every data-path
/// operation is a CAS loop; wait-freedom comes from the help queue: a
/// stalled operation publishes itself there and every participant passing
/// through [run](Self::run) or [help_others](Self::help_others) finishes the
/// front operation before attending to its own.
pub(crate) struct Simulator<LF: NormalizedLockFree, const N: usize> {
    algorithm: LF,
    queue: HelpQueue<OpBoxPtr<LF>, N>,
}

impl<LF: NormalizedLockFree, const N: usize> Simulator<LF, N> {
    pub(crate) fn new(algorithm: LF) -> Self {
        Self {
            algorithm,
            queue: HelpQueue::new(),
        }
    }

    /// Execute one operation on behalf of participant `id`.
    ///
    /// The operation is first attempted as if it were lock-free (the fast
    /// path). After [FAST_PATH_RETRY_THRESHOLD] failures or once the
    /// contention counter trips, it is published on the help queue and
    /// finished cooperatively. `force_slow` skips the fast path entirely.
    #[cfg_attr(feature = "tracing", instrument(skip_all, fields(id = id)))]
    pub(crate) fn run(&self, id: usize, input: LF::Input, force_slow: bool) -> LF::Output {
        self.help_others(id);

        if !force_slow {
            let mut contention = ContentionMeasure::default();
            for _ in 0..FAST_PATH_RETRY_THRESHOLD {
                if let Some(output) = self.algorithm.fast_path(&input, &mut contention) {
                    return output;
                }
                if contention.detect() {
                    break;
                }
            }
        }

        self.slow_path(id, input)
    }

    /// Check whether another participant needs help and lend a hand.
    pub(crate) fn help_others(&self, _id: usize) {
        let guard = epoch::pin();
        if let Some(front) = self.queue.peek_front_in(&guard) {
            // Safety: `front` came off the queue under `guard`, so the box
            // cannot be retired before the guard drops.
            let orb = unsafe { &*front.0 };
            self.help(front, orb, &guard);
        }
    }

    /// Publish the operation on the help queue and help until it completes.
    #[cfg_attr(feature = "tracing", instrument(skip_all, fields(id = id)))]
    fn slow_path(&self, id: usize, input: LF::Input) -> LF::Output {
        let orb = Box::new(OperationRecordBox::new(id, input));
        let orb_ptr = OpBoxPtr(&*orb as *const OperationRecordBox<LF>);
        self.queue.push_back(id, orb_ptr);

        let output: LF::Output = loop {
            {
                let guard = epoch::pin();
                // Safety: we own the box; it is retired only below.
                let record = unsafe { orb.load(&guard).deref() };
                debug_assert_eq!(record.owner, id);
                if let OperationState::Completed(output) = &record.state {
                    // the box must leave the queue before it can be retired;
                    // helpers pop it once it reaches the front
                    if !self.queue.contains(orb_ptr) {
                        break Clone::clone(output);
                    }
                }
            }
            self.help_others(id);
        };

        // Retire the box. Any helper still holding it was pinned before the
        // pop that drained it, so the grace period covers them.
        let guard = epoch::pin();
        let raw: *const OperationRecordBox<LF> = Box::into_raw(orb);
        unsafe { guard.defer_destroy(Shared::from(raw)) };
        output
    }

    /// Drive a foreign operation through its state machine.
    ///
    /// Every transition allocates the successor record and CASes the box
    /// pointer; losing the race just means another helper advanced the same
    /// operation, and the loop re-reads. When the operation is observed
    /// `Completed` it is conditionally popped off the queue and the loop
    /// exits.
    fn help(&self, orb_ptr: OpBoxPtr<LF>, orb: &OperationRecordBox<LF>, guard: &Guard) {
        loop {
            let current = orb.load(guard);
            // Safety: records reachable from a live box are not yet retired.
            let record = unsafe { current.deref() };
            let next_state = match &record.state {
                OperationState::Completed(_) => {
                    let _ = self.queue.try_pop_front(orb_ptr);
                    return;
                }
                OperationState::PreCas => {
                    let mut contention = ContentionMeasure::default();
                    match self.algorithm.generator(&record.input, &mut contention) {
                        Ok(Some(commit)) => OperationState::ExecutingCas(commit),
                        Ok(None) => {
                            // already satisfied; the empty commit makes
                            // wrap_up produce the sentinel output
                            let mut contention = ContentionMeasure::default();
                            match self.algorithm.wrap_up(
                                Ok(()),
                                &LF::Commit::default(),
                                &mut contention,
                            ) {
                                Ok(Some(output)) => OperationState::Completed(output),
                                Ok(None) => continue,
                                Err(Contention) => continue,
                            }
                        }
                        Err(Contention) => continue,
                    }
                }
                OperationState::ExecutingCas(commit) => {
                    let mut contention = ContentionMeasure::default();
                    let executed = match self.commit(commit, &mut contention) {
                        Ok(()) => Ok(()),
                        Err(CommitFailure::Failed(index)) => Err(index),
                        Err(CommitFailure::Contention) => continue,
                    };
                    OperationState::PostCas(commit.clone(), executed)
                }
                OperationState::PostCas(commit, executed) => {
                    let mut contention = ContentionMeasure::default();
                    match self.algorithm.wrap_up(*executed, commit, &mut contention) {
                        Ok(Some(output)) => OperationState::Completed(output),
                        // restart from the generator stage
                        Ok(None) => OperationState::PreCas,
                        Err(Contention) => continue,
                    }
                }
            };
            let _ = orb.transition(current, record.with_state(next_state), guard);
        }
    }

    /// Advance every descriptor of `commit`, in order.
    ///
    /// Between our `execute` and our lifecycle CAS another helper may have
    /// performed the same intended replace through a copy of the same
    /// descriptor. The cell's modified bit is the shared witness that the
    /// underlying change happened: either our execute installed it or
    /// whoever did left the bit for us to observe. Both paths drive the
    /// descriptor to `Success` exactly once.
    fn commit(
        &self,
        commit: &LF::Commit,
        contention: &mut ContentionMeasure,
    ) -> Result<(), CommitFailure> {
        for (index, cas) in commit.as_ref().iter().enumerate() {
            match cas.state() {
                CasStatus::Failure => return Err(CommitFailure::Failed(index)),
                CasStatus::Success => cas.clear_bit(),
                CasStatus::Pending => {
                    let installed = cas.execute(contention)?;
                    if installed || cas.has_modified_bit() {
                        cas.swap_state(CasStatus::Pending, CasStatus::Success);
                        if cas.state() == CasStatus::Success {
                            cas.clear_bit();
                        }
                    }
                    if cas.state() != CasStatus::Success {
                        cas.set_state(CasStatus::Failure);
                        return Err(CommitFailure::Failed(index));
                    }
                }
            }
        }
        Ok(())
    }
}
