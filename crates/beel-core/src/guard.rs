use std::sync::atomic::{AtomicBool, Ordering};

/// Releases a single-flight flag when the guarded operation ends,
/// whichever path it exits through.
pub(crate) struct FlightGuard<'a>(pub(crate) &'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
