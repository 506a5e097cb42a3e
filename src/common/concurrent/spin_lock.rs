use super::constants::SPIN_SLEEP_MICROS;

use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use crossbeam_utils::Backoff;

/// A one-byte mutual exclusion primitive embedded in every bucket.
///
/// Contended waiters spin with exponential backoff and, once the backoff is
/// exhausted, sleep for a few microseconds before trying again so that a
/// descheduled owner can make progress.
#[derive(Debug, Default)]
pub(crate) struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub(crate) const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    pub(crate) fn lock(&self) -> SpinLockGuard<'_> {
        let backoff = Backoff::new();

        loop {
            if !self.locked.load(Ordering::Relaxed)
                && self
                    .locked
                    .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return SpinLockGuard { lock: self };
            }

            if backoff.is_completed() {
                thread::sleep(Duration::from_micros(SPIN_SLEEP_MICROS));
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinLockGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
