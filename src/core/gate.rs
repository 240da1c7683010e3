//! Admission control for concurrent fetches
//!
//! A counting gate over `tokio::sync::Semaphore`. Waiters are served in FIFO
//! order, and a permit is handed back when its guard drops, so every exit path
//! of a fetch releases exactly once, unwinding included.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::core::error::{Error, Result};

/// Shared permit pool. Clones refer to the same pool.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    semaphore: Semaphore,
    capacity: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Held while one fetch is admitted
#[derive(Debug)]
pub struct GatePermit<'a> {
    _permit: SemaphorePermit<'a>,
    gate: &'a GateInner,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidInput(
                "Concurrency gate needs at least one permit".to_string(),
            ));
        }
        Ok(Self {
            inner: Arc::new(GateInner {
                semaphore: Semaphore::new(capacity),
                capacity,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        })
    }

    /// Wait for a free permit
    pub async fn acquire(&self) -> GatePermit<'_> {
        let permit = match self.inner.semaphore.acquire().await {
            Ok(permit) => permit,
            // The semaphore is owned by the gate and never closed.
            Err(_) => unreachable!("concurrency gate semaphore closed"),
        };
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
        GatePermit {
            _permit: permit,
            gate: &self.inner,
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Permits currently handed out
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits ever held at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
