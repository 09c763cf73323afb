//! Semaphore whose capacity can change while permits are held.
//!
//! Pool sizes come from the live configuration and the degrade table, so the
//! bulkhead and worker pool need to grow or shrink between calls. Shrinking
//! below the number of permits currently out is recorded as debt and paid
//! back by forgetting permits as they are returned.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
pub(crate) struct ResizablePermits {
    semaphore: Arc<Semaphore>,
    capacity: Mutex<usize>,
    debt: AtomicUsize,
    in_use: AtomicUsize,
    high_water: AtomicUsize,
}

/// RAII guard returned by [`ResizablePermits`]. Dropping it frees the slot.
#[derive(Debug)]
pub struct Permit {
    permit: Option<OwnedSemaphorePermit>,
    owner: Arc<ResizablePermits>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.owner.in_use.fetch_sub(1, Ordering::AcqRel);
        if let Some(permit) = self.permit.take() {
            if self.owner.take_debt() {
                permit.forget();
            }
        }
    }
}

impl ResizablePermits {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity: Mutex::new(capacity),
            debt: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        *self.capacity.lock()
    }

    pub(crate) fn resize(&self, new_capacity: usize) {
        let mut capacity = self.capacity.lock();
        let old = *capacity;
        if new_capacity > old {
            let grow = new_capacity - old;
            let repaid = self.repay_debt(grow);
            self.semaphore.add_permits(grow - repaid);
        } else if new_capacity < old {
            let shrink = old - new_capacity;
            let forgotten = self.semaphore.forget_permits(shrink);
            self.debt.fetch_add(shrink - forgotten, Ordering::AcqRel);
        }
        *capacity = new_capacity;
    }

    pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(self.wrap(permit))
    }

    /// Wait up to `max_wait` for a permit. `None` waits indefinitely.
    pub(crate) async fn acquire(self: &Arc<Self>, max_wait: Option<Duration>) -> Option<Permit> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        let permit = match max_wait {
            Some(wait) => tokio::time::timeout(wait, acquire).await.ok()?.ok()?,
            None => acquire.await.ok()?,
        };
        Some(self.wrap(permit))
    }

    pub(crate) fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub(crate) fn available(&self) -> usize {
        self.capacity().saturating_sub(self.in_use())
    }

    /// Highest concurrent usage since the previous call, then restart the
    /// rolling window from the current usage.
    pub(crate) fn take_high_water(&self) -> usize {
        self.high_water.swap(self.in_use(), Ordering::AcqRel)
    }

    fn wrap(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> Permit {
        let now = self.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.high_water.fetch_max(now, Ordering::AcqRel);
        Permit { permit: Some(permit), owner: Arc::clone(self) }
    }

    fn take_debt(&self) -> bool {
        self.debt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1))
            .is_ok()
    }

    fn repay_debt(&self, up_to: usize) -> usize {
        let mut repaid = 0;
        let _ = self.debt.fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
            repaid = d.min(up_to);
            Some(d - repaid)
        });
        repaid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shrink_below_in_use_is_paid_back_on_release() {
        let permits = ResizablePermits::new(3);
        let a = permits.try_acquire().unwrap();
        let b = permits.try_acquire().unwrap();
        let c = permits.try_acquire().unwrap();

        permits.resize(1);
        assert!(permits.try_acquire().is_none());

        drop(a);
        drop(b);
        assert!(permits.try_acquire().is_none(), "debt consumed two releases");

        drop(c);
        let d = permits.try_acquire();
        assert!(d.is_some());
        assert!(permits.try_acquire().is_none());
    }

    #[test]
    fn grow_repays_debt_before_adding_permits() {
        let permits = ResizablePermits::new(2);
        let a = permits.try_acquire().unwrap();
        let _b = permits.try_acquire().unwrap();

        permits.resize(0);
        permits.resize(3);
        // Capacity 3 with 2 held: one free slot.
        let c = permits.try_acquire();
        assert!(c.is_some());
        assert!(permits.try_acquire().is_none());

        drop(a);
        assert_eq!(permits.available(), 1);
        assert!(permits.try_acquire().is_some());
    }

    #[test]
    fn high_water_tracks_peak_and_rolls() {
        let permits = ResizablePermits::new(4);
        let a = permits.try_acquire().unwrap();
        let b = permits.try_acquire().unwrap();
        drop(a);
        drop(b);

        assert_eq!(permits.take_high_water(), 2);
        assert_eq!(permits.take_high_water(), 0);
    }
}
