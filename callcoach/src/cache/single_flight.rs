use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type SharedFuture<T> = Shared<BoxFuture<'static, T>>;

struct Slot<T: Clone> {
    id: u64,
    handle: WeakShared<BoxFuture<'static, T>>,
}

struct Inner<T: Clone> {
    slots: Mutex<HashMap<String, Slot<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, key: &str, id: u64) {
        let mut slots = self.lock();
        if slots.get(key).is_some_and(|slot| slot.id == id) {
            slots.remove(key);
        }
    }
}

/// Result of joining a flight.
#[derive(Debug, Clone)]
pub struct Flight<T> {
    pub value: T,
    /// True for the caller that started the computation.
    pub leader: bool,
}

/// Per-key de-duplication of concurrent computations.
///
/// The table only holds weak handles: the computation lives as long as at
/// least one caller is still awaiting it. A caller that goes away leaves the
/// others untouched; when the last one goes away the computation is dropped.
pub struct SingleFlight<T: Clone> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Await the computation for `key`, starting it with `compute` when no
    /// live one exists.
    pub async fn run<F, Fut>(&self, key: &str, compute: F) -> Flight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (shared, leader) = self.join_or_start(key, compute);
        Flight {
            value: shared.await,
            leader,
        }
    }

    fn join_or_start<F, Fut>(&self, key: &str, compute: F) -> (SharedFuture<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut slots = self.inner.lock();

        if let Some(existing) = slots.get(key).and_then(|slot| slot.handle.upgrade()) {
            return (existing, false);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let table: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        let owned_key = key.to_string();
        let work = compute();

        let shared = async move {
            let value = work.await;
            if let Some(table) = table.upgrade() {
                table.release(&owned_key, id);
            }
            value
        }
        .boxed()
        .shared();

        if let Some(handle) = shared.downgrade() {
            slots.insert(key.to_string(), Slot { id, handle });
        }

        (shared, true)
    }

    /// Number of keys with a live computation.
    pub fn in_flight(&self) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|slot| slot.handle.upgrade().is_some())
            .count()
    }
}
