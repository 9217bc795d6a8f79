//! # wfsim
//!
//! A wait-free simulator: a generic runtime that takes a lock-free algorithm
//! in *normalized* form and executes its operations with a wait-free
//! progress guarantee. An operation first runs as if it were lock-free (the
//! fast path); once it fails often enough or observes too much contention,
//! it publishes itself on a wait-free help queue and every participant
//! passing through the simulator helps finish it, which bounds the number of
//! steps before any submitted operation completes.
//!
//! # Usage
//! ## Example
//! A minimal client: a board of write-once flags where `submit(i)` raises
//! flag `i` through a single recorded CAS.
//! ```edition2021
//! use std::sync::Arc;
//! use wfsim::{
//!     AtomicStatus, CasStatus, Contention, ContentionMeasure, NormalizedLockFree,
//!     SimulatorHandle, VersionedAtomic, VersionedCas,
//! };
//!
//! struct FlagBoard {
//!     flags: Arc<Vec<VersionedAtomic<bool>>>,
//! }
//!
//! #[derive(Clone)]
//! struct RaiseCas {
//!     flags: Arc<Vec<VersionedAtomic<bool>>>,
//!     flag: usize,
//!     expected_version: u64,
//!     status: AtomicStatus,
//! }
//!
//! impl VersionedCas for RaiseCas {
//!     fn has_modified_bit(&self) -> bool {
//!         self.flags[self.flag].has_modified_bit()
//!     }
//!     fn clear_bit(&self) {
//!         self.flags[self.flag].clear_modified_bit()
//!     }
//!     fn state(&self) -> CasStatus {
//!         self.status.load()
//!     }
//!     fn set_state(&self, status: CasStatus) {
//!         self.status.store(status)
//!     }
//!     fn swap_state(&self, expected: CasStatus, desired: CasStatus) -> bool {
//!         self.status.compare_exchange(expected, desired)
//!     }
//!     fn execute(&self, contention: &mut ContentionMeasure) -> Result<bool, Contention> {
//!         self.flags[self.flag].compare_exchange_weak(
//!             &false,
//!             Some(self.expected_version),
//!             true,
//!             (),
//!             contention,
//!         )
//!     }
//! }
//!
//! impl NormalizedLockFree for FlagBoard {
//!     type Input = usize;
//!     type Output = bool;
//!     type Cas = RaiseCas;
//!     type Commit = Vec<RaiseCas>;
//!
//!     fn generator(
//!         &self,
//!         input: &usize,
//!         _contention: &mut ContentionMeasure,
//!     ) -> Result<Option<Vec<RaiseCas>>, Contention> {
//!         let (raised, version, ()) = self.flags[*input].load();
//!         if raised {
//!             // nothing to do; wrap_up reports "already satisfied"
//!             return Ok(None);
//!         }
//!         Ok(Some(vec![RaiseCas {
//!             flags: Arc::clone(&self.flags),
//!             flag: *input,
//!             expected_version: version,
//!             status: AtomicStatus::default(),
//!         }]))
//!     }
//!
//!     fn wrap_up(
//!         &self,
//!         executed: Result<(), usize>,
//!         performed: &Vec<RaiseCas>,
//!         _contention: &mut ContentionMeasure,
//!     ) -> Result<Option<bool>, Contention> {
//!         if performed.is_empty() {
//!             return Ok(Some(false));
//!         }
//!         match executed {
//!             Ok(()) => Ok(Some(true)),
//!             // the recorded CAS lost its race; restart from the generator
//!             Err(_) => Ok(None),
//!         }
//!     }
//!
//!     fn fast_path(
//!         &self,
//!         input: &usize,
//!         contention: &mut ContentionMeasure,
//!     ) -> Option<bool> {
//!         let (raised, version, ()) = self.flags[*input].load();
//!         if raised {
//!             return Some(false);
//!         }
//!         match self.flags[*input].compare_exchange_weak(
//!             &false,
//!             Some(version),
//!             true,
//!             (),
//!             contention,
//!         ) {
//!             Ok(true) => Some(true),
//!             Ok(false) | Err(Contention) => None,
//!         }
//!     }
//! }
//!
//! let board = FlagBoard {
//!     flags: Arc::new((0..8).map(|_| VersionedAtomic::new(false, ())).collect()),
//! };
//! let handle: SimulatorHandle<FlagBoard, 4> = SimulatorHandle::new(board);
//!
//! // the origin handle raises a flag on the fast path
//! assert!(handle.submit(3));
//! assert!(!handle.submit(3));
//!
//! // a forked participant works through the cooperative slow path
//! let worker = handle.fork().expect("capacity left");
//! let raised = std::thread::spawn(move || {
//!     let raised = worker.submit_with(5, true);
//!     worker.retire();
//!     raised
//! });
//! assert!(raised.join().unwrap());
//! assert!(!handle.submit(5));
//! ```
//!
//! ## Details
//! The client supplies three pieces:
//! - an algorithm in normalized form ([NormalizedLockFree]): `generator`
//!   turns an input into an ordered list of CAS descriptors, the simulator
//!   commits the list, and `wrap_up` turns the commit outcome into the
//!   caller-visible output (or asks for a restart). `fast_path` is the
//!   optimistic lock-free rendition of the whole operation.
//! - CAS descriptors implementing [VersionedCas], each wrapping one
//!   [VersionedAtomic] target. The cell's version defeats the ABA problem of
//!   executing recorded intentions, and its modified bit lets helpers agree
//!   on whether a recorded CAS already took effect.
//! - a participant capacity `N`: every live [SimulatorHandle] owns one of
//!   `N` ids, fixed at compile time. Handles are created with
//!   [SimulatorHandle::new] and [SimulatorHandle::fork] and return their id
//!   when dropped or retired.
//!
//! Memory reclamation for records, queue nodes and cell back-stores runs
//! through `crossbeam-epoch`; no reader ever dereferences freed memory, and
//! retired objects are freed after a grace period.
#![warn(missing_debug_implementations, missing_docs)]

mod contention;
mod err;
mod handle;
mod normalized;
mod queue;
mod record;
mod simulator;
mod sync;
mod versioned;

pub use contention::{ContentionMeasure, CONTENTION_THRESHOLD, FAST_PATH_RETRY_THRESHOLD};
pub use err::Contention;
pub use handle::SimulatorHandle;
pub use normalized::{AtomicStatus, CasStatus, NormalizedLockFree, VersionedCas};
pub use queue::HelpQueue;
pub use versioned::VersionedAtomic;
