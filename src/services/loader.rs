//! Single-flight loading of shared, lazily created resources.
//!
//! The first request for an id starts the load on a worker thread; requests
//! arriving while it runs are parked as waiters and all receive the same
//! outcome exactly once. Successes are memoized, failures are not.

use crate::error::{Error, Result};
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread;

pub type LoadResult<T> = std::result::Result<Arc<T>, String>;

enum Slot<T: ?Sized> {
    Loading(Vec<Sender<LoadResult<T>>>),
    Ready(Arc<T>),
}

pub struct SingleFlight<T: ?Sized> {
    slots: Arc<Mutex<HashMap<String, Slot<T>>>>,
}

impl<T: ?Sized> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T: ?Sized>(m: &Mutex<HashMap<String, Slot<T>>>) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T: ?Sized + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Ask for `id`. `load` runs only when nothing is cached or in flight.
    /// The receiver yields exactly one message.
    pub fn request<F>(&self, id: &str, load: F) -> Receiver<LoadResult<T>>
    where
        F: FnOnce() -> LoadResult<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let mut slots = lock(&self.slots);
        match slots.get_mut(id) {
            Some(Slot::Ready(v)) => {
                let _ = tx.send(Ok(Arc::clone(v)));
            }
            Some(Slot::Loading(waiters)) => {
                tracing::debug!(id, waiters = waiters.len() + 1, "joined in-flight load");
                waiters.push(tx);
            }
            None => {
                slots.insert(id.to_string(), Slot::Loading(vec![tx]));
                drop(slots);
                self.spawn(id.to_string(), load);
            }
        }
        rx
    }

    fn spawn<F>(&self, id: String, load: F)
    where
        F: FnOnce() -> LoadResult<T> + Send + 'static,
    {
        let slots = Arc::clone(&self.slots);
        thread::spawn(move || {
            tracing::debug!(id = %id, "load started");
            let outcome = panic::catch_unwind(AssertUnwindSafe(load))
                .unwrap_or_else(|_| Err("loader panicked".to_string()));
            let waiters = {
                let mut slots = lock(&slots);
                let waiters = match slots.remove(&id) {
                    Some(Slot::Loading(w)) => w,
                    _ => Vec::new(),
                };
                if let Ok(v) = &outcome {
                    slots.insert(id.clone(), Slot::Ready(Arc::clone(v)));
                }
                waiters
            };
            match &outcome {
                Ok(_) => tracing::debug!(id = %id, waiters = waiters.len(), "load finished"),
                Err(e) => tracing::warn!(id = %id, "load failed: {e}"),
            }
            for w in waiters {
                let _ = w.send(outcome.clone());
            }
        });
    }

    /// Request and block until the outcome arrives.
    pub fn load_blocking<F>(&self, id: &str, load: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> LoadResult<T> + Send + 'static,
    {
        self.request(id, load)
            .recv()
            .map_err(|_| Error::load(id, "loader went away"))?
            .map_err(|m| Error::load(id, m))
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        match lock(&self.slots).get(id) {
            Some(Slot::Ready(v)) => Some(Arc::clone(v)),
            _ => None,
        }
    }

    pub fn is_loading(&self, id: &str) -> bool {
        matches!(lock(&self.slots).get(id), Some(Slot::Loading(_)))
    }

    /// Forget a memoized value; an in-flight load is left alone.
    pub fn invalidate(&self, id: &str) {
        let mut slots = lock(&self.slots);
        if matches!(slots.get(id), Some(Slot::Ready(_))) {
            slots.remove(id);
        }
    }
}

type AnyResource = dyn Any + Send + Sync;

static SHARED: OnceLock<SingleFlight<AnyResource>> = OnceLock::new();

fn shared() -> &'static SingleFlight<AnyResource> {
    SHARED.get_or_init(SingleFlight::new)
}

/// Handle for a process-wide load started with [`load_shared`].
pub struct Pending<T> {
    id: String,
    rx: Receiver<LoadResult<AnyResource>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Pending<T> {
    /// Non-blocking poll. `None` until the load completes, and again after
    /// the outcome has been taken.
    pub fn try_take(&self) -> Option<Result<Arc<T>>> {
        match self.rx.try_recv() {
            Ok(r) => Some(self.cast(r)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn wait(self) -> Result<Arc<T>> {
        let r = self
            .rx
            .recv()
            .map_err(|_| Error::load(&self.id, "loader went away"))?;
        self.cast(r)
    }

    fn cast(&self, r: LoadResult<AnyResource>) -> Result<Arc<T>> {
        r.map_err(|m| Error::load(&self.id, m))?
            .downcast::<T>()
            .map_err(|_| Error::load(&self.id, "resource was registered with a different type"))
    }
}

/// Load a resource through the process-wide registry, keyed by `id`.
pub fn load_shared<T, F>(id: &str, load: F) -> Pending<T>
where
    T: Any + Send + Sync,
    F: FnOnce() -> std::result::Result<T, String> + Send + 'static,
{
    let rx = shared().request(id, move || load().map(|v| Arc::new(v) as Arc<AnyResource>));
    Pending {
        id: id.to_string(),
        rx,
        _marker: PhantomData,
    }
}

#[cfg(test)]
mod loader_tests;
