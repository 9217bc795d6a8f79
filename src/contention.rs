use crate::err::Contention;

/// The number of contention events a single attempt tolerates before it is
/// told to back off.
pub const CONTENTION_THRESHOLD: usize = 2;

/// The number of fast-path attempts before an operation switches to the
/// cooperative slow path.
pub const FAST_PATH_RETRY_THRESHOLD: usize = 3;

/// Counts conflicting concurrent modifications observed by one attempt.
///
/// A `ContentionMeasure` lives on the stack of a single fast-path attempt or
/// help-loop iteration and is never shared between threads. Once the counter
/// passes [CONTENTION_THRESHOLD], every further [detect](Self::detect)
/// reports `true` and every further [detected](Self::detected) returns
/// [Contention].
#[derive(Debug, Default)]
pub struct ContentionMeasure(usize);

impl ContentionMeasure {
    /// Record one contention event and report whether the threshold has been
    /// crossed.
    pub fn detect(&mut self) -> bool {
        self.0 += 1;
        self.0 > CONTENTION_THRESHOLD
    }

    /// Record one contention event; `Err(Contention)` once over threshold.
    ///
    /// This is the `?`-friendly form of [detect](Self::detect).
    pub fn detected(&mut self) -> Result<(), Contention> {
        if self.detect() {
            Err(Contention)
        } else {
            Ok(())
        }
    }

    /// The number of contention events recorded so far.
    pub fn get(&self) -> usize {
        self.0
    }
}
