//! Bounded pool of expensive, non-shareable objects.
//!
//! The pool never keeps more than `max_size` objects alive. Each [`Object`] is handed to a
//! single caller and goes back to the idle set when dropped. Closing the pool waits until every
//! object has been returned, destroys them, and makes all further [`Pool::get`] calls fail.

use std::fmt::{Debug, Formatter};
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use crate::backend::BackendError;

/// Upper limit for [`PoolBuilder::max_size`].
pub const MAX_POOL_SIZE: usize = 1 << 16;

/// Creates and destroys the objects managed by a [`Pool`].
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    /// Type of the pooled objects.
    type Object: Send + 'static;

    /// Creates a new object. A failure is reported to the caller that needed the object.
    async fn create(&self) -> Result<Self::Object, BackendError>;

    /// Disposes of an object when the pool is closed. Must not fail.
    fn destroy(&self, object: Self::Object) {
        drop(object);
    }
}

/// Errors returned by [`Pool::get`].
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    /// The manager failed to create a new object.
    #[error("Unable to create pooled object: {0}")]
    Create(#[source] BackendError),

    /// The pool is closed or being drained.
    #[error("Pool is closed")]
    Closed,
}

/// Snapshot of the pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Maximum number of live objects
    pub max_size: usize,
    /// Objects currently alive, idle or in use
    pub size: usize,
    /// Idle objects ready to be handed out
    pub available: usize,
    /// Objects currently handed out
    pub in_use: usize,
}

/// Builder for [`Pool`].
#[derive(Debug)]
pub struct PoolBuilder<M: Manager> {
    manager: M,
    max_size: usize,
}

impl<M: Manager> PoolBuilder<M> {
    /// Maximum number of simultaneously alive objects, clamped to `1..=MAX_POOL_SIZE`.
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Creates the pool. No objects are created until the first [`Pool::get`].
    #[must_use]
    pub fn build(self) -> Pool<M> {
        let max_size = self.max_size.clamp(1, MAX_POOL_SIZE);
        Pool {
            inner: Arc::new(PoolInner {
                manager: self.manager,
                max_size,
                semaphore: Arc::new(Semaphore::new(max_size)),
                idle: Mutex::new(Vec::with_capacity(max_size)),
                closed: AtomicBool::new(false),
                drained: OnceCell::new(),
                size: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
            }),
        }
    }
}

/// A bounded pool of objects created by a [`Manager`].
pub struct Pool<M: Manager> {
    inner: Arc<PoolInner<M>>,
}

struct PoolInner<M: Manager> {
    manager: M,
    max_size: usize,
    /// One permit per object that may be alive and handed out at the same time.
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<M::Object>>,
    closed: AtomicBool,
    drained: OnceCell<()>,
    size: AtomicUsize,
    in_use: AtomicUsize,
}

impl<M: Manager> PoolInner<M> {
    fn idle(&self) -> MutexGuard<'_, Vec<M::Object>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn destroy(&self, object: M::Object) {
        self.manager.destroy(object);
        self.size.fetch_sub(1, Ordering::AcqRel);
    }

    fn release(&self, object: M::Object) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        if self.drained.initialized() {
            self.destroy(object);
        } else {
            self.idle().push(object);
        }
    }
}

impl<M: Manager> Pool<M> {
    /// Starts building a pool around `manager`, sized to the number of CPUs by default.
    pub fn builder(manager: M) -> PoolBuilder<M> {
        PoolBuilder {
            manager,
            max_size: num_cpus::get(),
        }
    }

    /// Acquires an object, waiting until one is idle or a new one may be created.
    ///
    /// A failed creation is returned to this caller only and frees its slot,
    /// so later calls attempt a fresh creation.
    pub async fn get(&self) -> Result<Object<M>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let recycled = self.inner.idle().pop();
        let object = if let Some(object) = recycled {
            object
        } else {
            let object = self.inner.manager.create().await.map_err(PoolError::Create)?;
            let size = self.inner.size.fetch_add(1, Ordering::AcqRel) + 1;
            trace!("Created pooled object {size} of {}", self.inner.max_size);
            object
        };
        self.inner.in_use.fetch_add(1, Ordering::AcqRel);

        Ok(Object {
            object: Some(object),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Stops handing out objects and waits until all outstanding objects are returned.
    ///
    /// Pending and future [`get`](Self::get) calls fail with [`PoolError::Closed`].
    /// Concurrent calls all wait for the same drain.
    pub async fn drain(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner
            .drained
            .get_or_init(|| async {
                let permits = u32::try_from(self.inner.max_size).unwrap_or(u32::MAX);
                debug!("Draining pool, waiting for {} objects", self.status().in_use);
                if let Ok(all) = self.inner.semaphore.acquire_many(permits).await {
                    all.forget();
                }
                self.inner.semaphore.close();
            })
            .await;
    }

    /// Destroys every idle object immediately.
    pub fn destroy_all_now(&self) {
        let idle = mem::take(&mut *self.inner.idle());
        let count = idle.len();
        for object in idle {
            self.inner.destroy(object);
        }
        if count > 0 {
            debug!("Destroyed {count} pooled objects");
        }
    }

    /// Drains the pool and destroys all of its objects.
    pub async fn close(&self) {
        self.drain().await;
        self.destroy_all_now();
    }

    /// Whether [`drain`](Self::drain) or [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Current bookkeeping counters.
    #[must_use]
    pub fn status(&self) -> Status {
        Status {
            max_size: self.inner.max_size,
            size: self.inner.size.load(Ordering::Acquire),
            available: self.inner.idle().len(),
            in_use: self.inner.in_use.load(Ordering::Acquire),
        }
    }
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Manager> Debug for Pool<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// An object borrowed from a [`Pool`], returned to it on drop.
pub struct Object<M: Manager> {
    /// Only `None` while being dropped.
    object: Option<M::Object>,
    pool: Arc<PoolInner<M>>,
    /// Released after the object is back in the idle set.
    _permit: OwnedSemaphorePermit,
}

impl<M: Manager> Deref for Object<M> {
    type Target = M::Object;

    fn deref(&self) -> &M::Object {
        self.object.as_ref().expect("pooled object is present until dropped")
    }
}

impl<M: Manager> DerefMut for Object<M> {
    fn deref_mut(&mut self) -> &mut M::Object {
        self.object.as_mut().expect("pooled object is present until dropped")
    }
}

impl<M: Manager> Drop for Object<M> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            self.pool.release(object);
        }
    }
}

impl<M: Manager> Debug for Object<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        created: AtomicUsize,
        destroyed: Mutex<Vec<usize>>,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl Manager for Arc<Counter> {
        type Object = usize;

        async fn create(&self) -> Result<usize, BackendError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err("broken definition".into());
            }
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        fn destroy(&self, object: usize) {
            self.destroyed.lock().unwrap().push(object);
        }
    }

    fn pool(max_size: usize) -> (Arc<Counter>, Pool<Arc<Counter>>) {
        let counter = Arc::new(Counter::default());
        let pool = Pool::builder(Arc::clone(&counter)).max_size(max_size).build();
        (counter, pool)
    }

    #[tokio::test]
    async fn reuses_released_objects() {
        let (counter, pool) = pool(2);
        let first = *pool.get().await.unwrap();
        let second = *pool.get().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(counter.created.load(Ordering::SeqCst), 1);
        assert_eq!(
            pool.status(),
            Status {
                max_size: 2,
                size: 1,
                available: 1,
                in_use: 0
            }
        );
    }

    #[tokio::test]
    async fn concurrent_objects_are_distinct() {
        let (_, pool) = pool(3);
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        let c = pool.get().await.unwrap();
        assert_ne!(*a, *b);
        assert_ne!(*b, *c);
        assert_ne!(*a, *c);
        assert_eq!(pool.status().in_use, 3);
    }

    #[tokio::test]
    async fn waits_for_release_when_full() {
        let (counter, pool) = pool(2);
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();

        assert!(
            timeout(Duration::from_millis(50), pool.get()).await.is_err(),
            "third get must wait while both objects are in use"
        );

        let released = *a;
        drop(a);
        let c = timeout(Duration::from_secs(5), pool.get())
            .await
            .expect("released object is handed out")
            .unwrap();
        assert_eq!(*c, released);
        assert_ne!(*c, *b);
        assert_eq!(counter.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn create_failure_reaches_only_its_caller() {
        let (counter, pool) = pool(1);
        counter.fail_next.store(true, Ordering::SeqCst);

        let err = pool.get().await.unwrap_err();
        assert!(matches!(err, PoolError::Create(_)));
        assert_eq!(err.to_string(), "Unable to create pooled object: broken definition");
        assert_eq!(pool.status().size, 0);

        // the failed creation released its slot
        let object = timeout(Duration::from_secs(5), pool.get())
            .await
            .expect("slot is free again")
            .unwrap();
        assert_eq!(*object, 0);
    }

    #[tokio::test]
    async fn close_destroys_every_object_once() {
        let (counter, pool) = pool(3);
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        drop(a);
        drop(b);
        let reused = pool.get().await.unwrap();
        drop(reused);

        pool.close().await;

        let mut destroyed = counter.destroyed.lock().unwrap().clone();
        destroyed.sort_unstable();
        assert_eq!(destroyed, vec![0, 1]);
        assert_eq!(pool.status().size, 0);
        assert!(matches!(pool.get().await, Err(PoolError::Closed)));

        // closing again is a no-op
        pool.close().await;
        assert_eq!(counter.destroyed.lock().unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drain_waits_for_outstanding_objects() {
        let (counter, pool) = pool(2);
        let held = pool.get().await.unwrap();

        let closing = tokio::spawn({
            let pool = pool.clone();
            async move { pool.close().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!closing.is_finished(), "drain must wait for the held object");
        assert!(pool.is_closed());
        assert!(matches!(pool.get().await, Err(PoolError::Closed)));

        drop(held);
        timeout(Duration::from_secs(5), closing)
            .await
            .expect("drain finishes once the object is returned")
            .unwrap();
        assert_eq!(*counter.destroyed.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn waiting_get_fails_when_closed() {
        let (_, pool) = pool(1);
        let held = pool.get().await.unwrap();

        let waiting = tokio::spawn({
            let pool = pool.clone();
            async move { pool.get().await.map(|o| *o) }
        });
        tokio::task::yield_now().await;

        let closing = tokio::spawn({
            let pool = pool.clone();
            async move { pool.close().await }
        });
        tokio::task::yield_now().await;
        drop(held);

        assert!(matches!(waiting.await.unwrap(), Err(PoolError::Closed)));
        closing.await.unwrap();
    }

    #[test]
    fn size_is_clamped() {
        let (_, pool) = pool(0);
        assert_eq!(pool.status().max_size, 1);
    }
}
