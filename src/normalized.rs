use crate::contention::ContentionMeasure;
use crate::err::Contention;
use crate::sync::{AtomicU8, Ordering};

/// The lifecycle of a single recorded compare-and-set intention.
///
/// `Pending` can transition to `Success` or to `Failure`; both of those are
/// terminal. A helper thread drives the transition through
/// [VersionedCas::swap_state] (or stamps `Failure` through
/// [VersionedCas::set_state]); once a descriptor is terminal no later
/// transition may change it.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum CasStatus {
    /// The compare-and-set has not been observed to have happened yet.
    Pending = 0,
    /// The underlying cell replace is known to have taken effect.
    Success = 1,
    /// The underlying cell replace is known to be impossible.
    Failure = 2,
}

/// Atomic storage for a [CasStatus], for use inside client descriptors.
///
/// Cloning re-reads the current status, so a copied descriptor starts from
/// the lifecycle its original had reached at the time of the copy.
#[derive(Debug)]
pub struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    /// Atomic storage initialized to `status`.
    pub fn new(status: CasStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    /// The current status.
    pub fn load(&self) -> CasStatus {
        match self.0.load(Ordering::SeqCst) {
            0 => CasStatus::Pending,
            1 => CasStatus::Success,
            _ => CasStatus::Failure,
        }
    }

    /// Unconditionally overwrite the status.
    pub fn store(&self, status: CasStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }

    /// CAS on the lifecycle. Terminal states are sticky: an exchange whose
    /// `expected` is not the current status fails and changes nothing.
    pub fn compare_exchange(&self, expected: CasStatus, desired: CasStatus) -> bool {
        self.0
            .compare_exchange(
                expected as u8,
                desired as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

impl Clone for AtomicStatus {
    fn clone(&self) -> Self {
        Self::new(self.load())
    }
}

impl Default for AtomicStatus {
    fn default() -> Self {
        Self::new(CasStatus::Pending)
    }
}

/// The contract every client CAS descriptor implements.
///
/// A descriptor pairs one target [VersionedAtomic](crate::VersionedAtomic)
/// with an `(expected, desired)` intention and a [CasStatus] lifecycle. Any
/// helper may call these methods concurrently on the same descriptor; the
/// implementation must keep the lifecycle in atomic storage (see
/// [AtomicStatus]).
pub trait VersionedCas {
    /// Whether the target cell currently carries the modified bit.
    fn has_modified_bit(&self) -> bool;

    /// Clear the target cell's modified bit.
    fn clear_bit(&self);

    /// The current lifecycle of this descriptor.
    fn state(&self) -> CasStatus;

    /// Unconditionally overwrite the lifecycle. The simulator only uses this
    /// to stamp a terminal [CasStatus::Failure].
    fn set_state(&self, status: CasStatus);

    /// CAS on the lifecycle; `true` iff the transition was installed.
    fn swap_state(&self, expected: CasStatus, desired: CasStatus) -> bool;

    /// Perform the underlying versioned cell replace.
    ///
    /// `Ok(true)` means this call installed the replace, `Ok(false)` that the
    /// cell no longer matched the recorded expectation, and
    /// `Err(Contention)` that the attempt should be retried later. Callers
    /// are expected to consult [has_modified_bit](Self::has_modified_bit)
    /// rather than the returned boolean to decide whether the replace took
    /// effect, since another helper may have executed a copy of the same
    /// descriptor in the meantime.
    fn execute(&self, contention: &mut ContentionMeasure) -> Result<bool, Contention>;
}

/// A lock-free algorithm rewritten into the normalized form the simulator
/// can drive.
///
/// The three operations correspond to the three stages of a normalized
/// operation: `generator` produces the CAS list, the simulator commits it,
/// and `wrap_up` turns the commit outcome into a caller-visible output or a
/// restart. `fast_path` is the optimistic single-thread rendition executed
/// before the operation is published for help.
///
/// All three receive a stack-local [ContentionMeasure] and must be safe to
/// call concurrently from any thread (they operate on shared cell state
/// only).
pub trait NormalizedLockFree {
    /// The caller-supplied description of one operation.
    type Input: Clone;
    /// The caller-visible result of one operation.
    type Output: Clone;
    /// One CAS intention within a commit.
    type Cas: VersionedCas + Clone;
    /// An ordered descriptor list describing the atomic effect of one
    /// operation. Dependencies must point left to right: the simulator
    /// commits index 0 first. `Default` is the empty list, used when
    /// `generator` reports the operation already satisfied.
    type Commit: AsRef<[Self::Cas]> + Clone + Default;

    /// Produce the CAS list for `input`, or `Ok(None)` when the current
    /// structure already satisfies the operation (e.g. inserting a key that
    /// is present).
    fn generator(
        &self,
        input: &Self::Input,
        contention: &mut ContentionMeasure,
    ) -> Result<Option<Self::Commit>, Contention>;

    /// Convert the outcome of committing `performed` into the final output.
    ///
    /// `executed` is `Ok(())` when every descriptor linearized and
    /// `Err(i)` when the commit stopped at descriptor index `i`.
    /// `Ok(None)` asks the simulator to restart the operation from the
    /// generator stage.
    fn wrap_up(
        &self,
        executed: Result<(), usize>,
        performed: &Self::Commit,
        contention: &mut ContentionMeasure,
    ) -> Result<Option<Self::Output>, Contention>;

    /// Optimistic single-thread attempt. `None` abandons the fast path and
    /// switches the operation to help-queue cooperation.
    fn fast_path(
        &self,
        input: &Self::Input,
        contention: &mut ContentionMeasure,
    ) -> Option<Self::Output>;
}
