use crossbeam_epoch::Owned;

/// Pushes enough garbage through the epoch collector that retirements queued
/// by earlier operations on this thread get run.
pub(crate) fn run_deferred() {
    for _ in 0..65536 {
        let guard = crossbeam_epoch::pin();

        unsafe { guard.defer_destroy(Owned::new(0).into_shared(&guard)) };

        guard.flush();
    }
}

mod tests;
