use displaydoc::Display;

/// An attempt observed too many conflicting concurrent modifications
///
/// `Contention` is an internal control-flow signal: the simulator reacts to
/// it by abandoning the fast path or by retrying a help-loop iteration. It
/// is never returned from [crate::SimulatorHandle::submit].
#[derive(Debug, Display, Eq, PartialEq)]
#[ignore_extra_doc_attributes]
pub struct Contention;
