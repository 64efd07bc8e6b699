//! Shared error and cancellation plumbing for the writer and reader
//! pipelines: a write-once error cell plus a cancellation flag that every
//! worker and the serializing thread check at their task boundaries and
//! queue waits.

use crate::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// The first error of a pipeline run. Storing an error cancels the run;
/// subsequent errors are discarded.
#[derive(Debug, Default)]
pub(crate) struct ErrorCell {
    error: Mutex<Option<Error>>,
    cancelled: AtomicBool,
}

impl ErrorCell {
    /// A fresh cell for one pipeline run.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the first error and cancel the run.
    /// `Cancelled` is never recorded, it only ever reports a halt.
    pub fn fail(&self, error: Error) {
        if !matches!(error, Error::Cancelled) {
            let mut cell = self.error.lock().expect("error cell poisoned");
            if cell.is_none() {
                *cell = Some(error);
            }
        }

        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the run was halted.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// The recorded first error, if any. Consumes the cell
    /// after all pipeline threads have been joined.
    pub fn into_error(self) -> Option<Error> {
        self.error.into_inner().expect("error cell poisoned")
    }
}
