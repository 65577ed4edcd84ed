//! In-flight request accounting for a shared connection.
//!
//! Each admitted request holds an [`InFlightGuard`]; dropping the guard
//! releases the slot, so cancelled or timed-out calls never leak a count.

use metrics::gauge;
use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::reliability::metrics::names;

struct ThrottleInner {
    capacity: usize,
    permits: Arc<Semaphore>,
    in_flight: watch::Sender<usize>,
}

/// Tracks and bounds the requests outstanding on one connection.
#[derive(Clone)]
pub struct RequestThrottle {
    inner: Arc<ThrottleInner>,
}

impl RequestThrottle {
    /// Allow at most `capacity` concurrent requests (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (in_flight, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(ThrottleInner {
                capacity,
                permits: Arc::new(Semaphore::new(capacity)),
                in_flight,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Current number of admitted, unreleased requests.
    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    /// Wait for a free slot and count the request as in flight.
    ///
    /// Fails once the throttle has been closed.
    pub async fn admit(&self) -> Result<InFlightGuard> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::ShuttingDown)?;

        let mut now = 0;
        self.inner.in_flight.send_modify(|n| {
            *n += 1;
            now = *n;
        });
        gauge!(names::REQUESTS_IN_FLIGHT).set(now as f64);

        Ok(InFlightGuard {
            inner: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Resolve once no request is in flight.
    pub async fn await_quiescence(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        // The sender lives as long as `self`, so this only returns at zero.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Refuse further admissions. Requests already admitted are unaffected.
    pub fn close(&self) {
        if !self.inner.permits.is_closed() {
            debug!("Closing request throttle with {} in flight", self.in_flight());
            self.inner.permits.close();
        }
    }
}

/// An admitted request. Released on drop.
pub struct InFlightGuard {
    inner: Arc<ThrottleInner>,
    _permit: OwnedSemaphorePermit,
}

impl InFlightGuard {
    /// Release explicitly; same as dropping the guard.
    pub fn release(self) {}
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut now = 0;
        self.inner.in_flight.send_modify(|n| {
            debug_assert!(*n > 0, "in-flight count underflow");
            *n = n.saturating_sub(1);
            now = *n;
        });
        gauge!(names::REQUESTS_IN_FLIGHT).set(now as f64);
    }
}
