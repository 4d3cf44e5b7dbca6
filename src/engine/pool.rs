//! Bounded pool of reusable execution resources
//!
//! The pool is the sole mechanism bounding concurrency: a fixed set of
//! resource slots behind a semaphore whose waiters are served in FIFO
//! order. Released slots have their counters zeroed before re-queueing.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::EngineError;
use crate::Result;

/// A reusable execution slot with per-lease usage counters.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResource {
    pub id: usize,
    pub nodes_executed: u64,
    pub busy_ms: u64,
}

impl ExecutionResource {
    fn reset(&mut self) {
        self.nodes_executed = 0;
        self.busy_ms = 0;
    }
}

/// Fixed-size resource pool with a FIFO wait queue.
pub struct ResourcePool {
    semaphore: Arc<Semaphore>,
    slots: Arc<Mutex<VecDeque<ExecutionResource>>>,
    capacity: usize,
}

impl ResourcePool {
    /// Create a pool of `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|id| ExecutionResource {
                id,
                ..ExecutionResource::default()
            })
            .collect();
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            slots: Arc::new(Mutex::new(slots)),
            capacity,
        }
    }

    /// Acquire a slot, suspending until one is released. Fails with
    /// `RESOURCE_EXCEEDED` once the pool is closed.
    pub async fn acquire(&self) -> Result<PooledResource> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::resource_exceeded("resource pool is closed"))?;
        Ok(self.lease(permit))
    }

    /// Acquire a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<PooledResource> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.lease(permit))
    }

    fn lease(&self, permit: OwnedSemaphorePermit) -> PooledResource {
        let resource = self
            .slots
            .lock()
            .pop_front()
            .expect("permit guarantees a free slot");
        PooledResource {
            resource: Some(resource),
            slots: Arc::clone(&self.slots),
            _permit: permit,
        }
    }

    /// Total slot count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently leased.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Close the pool: pending and future `acquire` calls fail. Leased
    /// slots still return on drop.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// RAII lease of one pool slot. Dropping resets the slot's counters and
/// returns it to the pool.
#[derive(Debug)]
pub struct PooledResource {
    resource: Option<ExecutionResource>,
    slots: Arc<Mutex<VecDeque<ExecutionResource>>>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for PooledResource {
    fn drop(&mut self) {
        if let Some(mut resource) = self.resource.take() {
            resource.reset();
            self.slots.lock().push_back(resource);
        }
        // The permit drops afterwards, waking the oldest waiter.
    }
}

impl Deref for PooledResource {
    type Target = ExecutionResource;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref().expect("resource present until drop")
    }
}

impl DerefMut for PooledResource {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("resource present until drop")
    }
}
