use crate::normalized::NormalizedLockFree;
use crate::simulator::Simulator;
use crate::sync::{Arc, Mutex};

#[cfg(feature = "tracing")]
use tracing::instrument;

struct SharedState<LF: NormalizedLockFree, const N: usize> {
    simulator: Simulator<LF, N>,
    /// Participant ids not currently owned by a handle. Seeded with
    /// `1..N`; id 0 belongs to the origin handle.
    free_ids: Mutex<Vec<usize>>,
}

/// A participant's front end to the simulator.
///
/// Each live handle owns exactly one participant id out of the capacity `N`
/// fixed at compile time. Handles are created with [new](Self::new) (the
/// origin, id 0) and [fork](Self::fork); the id travels back into the pool
/// when the handle is dropped or explicitly [retire](Self::retire)d.
///
/// A handle is intended to be driven by one thread at a time; clones of the
/// underlying simulator state are shared, so forked handles can run on other
/// threads freely.
pub struct SimulatorHandle<LF: NormalizedLockFree, const N: usize> {
    shared: Arc<SharedState<LF, N>>,
    id: usize,
}

impl<LF: NormalizedLockFree, const N: usize> SimulatorHandle<LF, N> {
    /// Construct the origin handle around `algorithm`.
    ///
    /// The algorithm instance is shared read-only between all participants;
    /// its methods must be safe to call concurrently.
    ///
    /// # Panics
    ///
    /// Panics if the participant capacity `N` is zero.
    pub fn new(algorithm: LF) -> Self {
        assert!(N > 0, "participant capacity must be positive");
        Self {
            shared: Arc::new(SharedState {
                simulator: Simulator::new(algorithm),
                // this handle owns id 0 already
                free_ids: Mutex::new((1..N).collect()),
            }),
            id: 0,
        }
    }

    /// Allocate a new participant handle sharing this simulator, or `None`
    /// when all `N` participant ids are in use.
    pub fn fork(&self) -> Option<Self> {
        let id = self.shared.free_ids.lock().unwrap().pop()?;
        Some(Self {
            shared: Arc::clone(&self.shared),
            id,
        })
    }

    /// Return this handle's participant id to the pool.
    ///
    /// Equivalent to dropping the handle; the explicit form exists so the
    /// hand-back reads at the call site. Consuming `self` makes calling
    /// operations after retirement impossible.
    pub fn retire(self) {}

    /// The participant id this handle owns.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Execute one operation and return its output.
    ///
    /// Returns only on completion: either the optimistic fast path succeeds
    /// within its retry budget, or the operation is published on the help
    /// queue and finished cooperatively within a bounded number of this
    /// thread's own steps.
    #[cfg_attr(feature = "tracing", instrument(skip_all, fields(id = self.id)))]
    pub fn submit(&self, input: LF::Input) -> LF::Output {
        self.shared.simulator.run(self.id, input, false)
    }

    /// [submit](Self::submit), with `use_slow_path` forcing immediate
    /// help-queue publication, bypassing the fast-path retries. Primarily
    /// for tests that need to exercise the cooperative path.
    pub fn submit_with(&self, input: LF::Input, use_slow_path: bool) -> LF::Output {
        self.shared.simulator.run(self.id, input, use_slow_path)
    }

    /// Check whether another participant has published an operation on the
    /// help queue and drive it to completion if so.
    pub fn help(&self) {
        self.shared.simulator.help_others(self.id);
    }
}

impl<LF: NormalizedLockFree, const N: usize> core::fmt::Debug for SimulatorHandle<LF, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimulatorHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<LF: NormalizedLockFree, const N: usize> Drop for SimulatorHandle<LF, N> {
    fn drop(&mut self) {
        self.shared.free_ids.lock().unwrap().push(self.id);
    }
}
