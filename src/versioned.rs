use crate::contention::ContentionMeasure;
use crate::err::Contention;
use crate::sync::Ordering;
use crossbeam_epoch::{self as epoch, Atomic, CompareExchangeError, Owned};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// The tag bit on the back-store pointer that records "this cell was
/// replaced by a successful compare-and-set".
const MODIFIED_BIT: usize = 1;

/// The immutable back-store of a [VersionedAtomic].
///
/// A fresh `Versioned` is allocated for every replace; the previous one is
/// retired through the epoch collector once no reader can still hold it.
#[derive(Debug)]
struct Versioned<T, M> {
    value: T,
    version: u64,
    meta: M,
}

/// An atomic cell carrying a value, a monotonically increasing version and
/// optional user metadata.
///
/// The version defeats the ABA hazard of executing recorded CAS intentions:
/// a descriptor that guards on `(expected value, expected version)` cannot
/// succeed against a cell that was changed away and back, because every
/// successful replace bumps the version.
///
/// The modified bit lives in the low tag bit of the back-store pointer, so
/// it is installed atomically with the replace itself. It is set only by a
/// successful [compare_exchange_weak](Self::compare_exchange_weak) and
/// cleared with [clear_modified_bit](Self::clear_modified_bit).
#[derive(Debug)]
pub struct VersionedAtomic<T, M = ()> {
    inner: Atomic<Versioned<T, M>>,
}

impl<T, M> VersionedAtomic<T, M>
where
    T: Clone + PartialEq,
    M: Clone + PartialEq,
{
    /// A cell holding `(value, 0, meta)` with the modified bit clear.
    pub fn new(value: T, meta: M) -> Self {
        Self {
            inner: Atomic::new(Versioned {
                value,
                version: 0,
                meta,
            }),
        }
    }

    /// A snapshot of `(value, version, metadata)`, linearized at a single
    /// atomic pointer read.
    pub fn load(&self) -> (T, u64, M) {
        self.transform(|value, version, meta| (value.clone(), version, meta.clone()))
    }

    /// Apply `f` to the current `(value, version, metadata)`.
    ///
    /// `f` must be pure: it runs against one consistent snapshot and may be
    /// evaluated while other threads replace the cell.
    pub fn transform<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T, u64, &M) -> R,
    {
        let guard = epoch::pin();
        // Safety: the back-store is reachable from `inner` under `guard` and
        // is only retired after it becomes unreachable.
        let this = unsafe { self.inner.load(Ordering::SeqCst, &guard).deref() };
        f(&this.value, this.version, &this.meta)
    }

    /// The current version.
    pub fn version(&self) -> u64 {
        self.transform(|_value, version, _meta| version)
    }

    /// The current metadata.
    pub fn meta(&self) -> M {
        self.transform(|_value, _version, meta| meta.clone())
    }

    /// Unconditional replace.
    ///
    /// Publishes `(value, version + 1, meta)`; the bump is elided when both
    /// `value` and `meta` equal the current contents, in which case the cell
    /// is left untouched. Never lowers the version and never sets the
    /// modified bit.
    pub fn store(&self, value: T, meta: M) {
        let guard = epoch::pin();
        let current = self.inner.load(Ordering::SeqCst, &guard);
        // Safety: see `transform`.
        let this = unsafe { current.deref() };
        if this.value == value && this.meta == meta {
            return;
        }
        self.inner.store(
            Owned::new(Versioned {
                value,
                version: this.version + 1,
                meta,
            }),
            Ordering::SeqCst,
        );
        // Safety: `current` was unlinked by the store above.
        unsafe { guard.defer_destroy(current) };
    }

    /// Conditional replace with version check.
    ///
    /// Succeeds only if the current value equals `expected` and, when
    /// `expected_version` is given, the current version equals it. On
    /// success publishes `(desired, version + 1, desired_meta)` and sets the
    /// modified bit. `Ok(false)` reports a guard mismatch; `Err(Contention)`
    /// reports that repeated mismatches crossed the contention threshold and
    /// the caller should back off. Spurious `Err(Contention)` is allowed;
    /// see [compare_exchange](Self::compare_exchange) for the looping form.
    pub fn compare_exchange_weak(
        &self,
        expected: &T,
        expected_version: Option<u64>,
        desired: T,
        desired_meta: M,
        contention: &mut ContentionMeasure,
    ) -> Result<bool, Contention> {
        let guard = epoch::pin();
        let current = self.inner.load(Ordering::SeqCst, &guard);
        // Safety: see `transform`.
        let this = unsafe { current.deref() };

        if &this.value != expected {
            return Ok(false);
        }
        if let Some(version) = expected_version {
            if version != this.version {
                contention.detected()?;
                return Ok(false);
            }
        }
        if expected == &desired && this.meta == desired_meta {
            return Ok(true);
        }

        let new = Owned::new(Versioned {
            value: desired,
            version: this.version + 1,
            meta: desired_meta,
        })
        .with_tag(MODIFIED_BIT);
        match self
            .inner
            .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst, &guard)
        {
            Ok(_) => {
                // Safety: `current` was unlinked by the exchange.
                unsafe { guard.defer_destroy(current) };
                Ok(true)
            }
            Err(CompareExchangeError { new, .. }) => {
                // The replacement never got shared.
                drop(new);
                contention.detected()?;
                Ok(false)
            }
        }
    }

    /// Strong form of [compare_exchange_weak](Self::compare_exchange_weak):
    /// loops on `Contention` until a boolean outcome is produced.
    pub fn compare_exchange(
        &self,
        expected: &T,
        expected_version: Option<u64>,
        desired: T,
        desired_meta: M,
        contention: &mut ContentionMeasure,
    ) -> bool {
        loop {
            match self.compare_exchange_weak(
                expected,
                expected_version,
                desired.clone(),
                desired_meta.clone(),
                contention,
            ) {
                Ok(outcome) => return outcome,
                Err(Contention) => continue,
            }
        }
    }

    /// Whether the cell currently carries the modified bit.
    pub fn has_modified_bit(&self) -> bool {
        let guard = epoch::pin();
        self.inner.load(Ordering::SeqCst, &guard).tag() == MODIFIED_BIT
    }

    /// Clear the modified bit.
    ///
    /// A single CAS attempt; losing the race means another thread either
    /// cleared the bit already or replaced the cell, and both make this
    /// clear obsolete.
    #[cfg_attr(feature = "tracing", instrument(skip(self)))]
    pub fn clear_modified_bit(&self) {
        let guard = epoch::pin();
        let current = self.inner.load(Ordering::SeqCst, &guard);
        if current.tag() != MODIFIED_BIT {
            return;
        }
        let _ = self.inner.compare_exchange(
            current,
            current.with_tag(0),
            Ordering::SeqCst,
            Ordering::SeqCst,
            &guard,
        );
    }
}

impl<T, M> Drop for VersionedAtomic<T, M> {
    fn drop(&mut self) {
        let inner = core::mem::replace(&mut self.inner, Atomic::null());
        // Safety: we hold the only reference to the cell, so the current
        // back-store can no longer be loaded by anyone else.
        drop(unsafe { inner.into_owned() });
    }
}
