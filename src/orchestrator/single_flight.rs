//! Per-key request coalescing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

/// Runs at most one computation per key at a time. Callers that arrive while
/// a computation for their key is running wait for it and share its result.
#[derive(Debug)]
pub struct SingleFlight<T> {
    cells: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> SingleFlight<T> {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the computation for `key`, starting it with `f` if none is running.
    pub async fn run<F, Fut>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = {
            let mut cells = self.cells.lock();
            Arc::clone(cells.entry(key.to_string()).or_default())
        };

        let value = cell.get_or_init(f).await.clone();

        let mut cells = self.cells.lock();
        if cells.get(key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            cells.remove(key);
        }
        value
    }

    /// Number of keys with a computation in flight.
    pub fn in_flight(&self) -> usize {
        self.cells.lock().len()
    }
}
