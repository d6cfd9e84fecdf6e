//! Keyed single-flight registry.
//!
//! Concurrent callers for the same key share one in-flight computation and all
//! receive its result. A key is in flight only while its computation is still
//! running: once the value is ready, later callers start a fresh run, and when
//! every caller has finished or been dropped the key is released.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;

struct Flight<T> {
    cell: Arc<OnceCell<T>>,
    /// Callers currently awaiting `cell`, leader included.
    participants: usize,
}

pub struct SingleFlight<T> {
    calls: Mutex<HashMap<String, Flight<T>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> SingleFlight<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Flight<T>>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` unless a call for `key` is already in flight, in which case
    /// this waits for that call and returns its result.
    ///
    /// If the leading caller is dropped before finishing, one of the waiting
    /// callers takes over with its own `work`.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.enter(key);
        let value = guard.cell.get_or_init(work).await.clone();
        value
    }

    /// Like [`SingleFlight::run`] but returns `None` instead of waiting when a
    /// call for `key` is already in flight.
    pub async fn try_run<F, Fut>(&self, key: &str, work: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.try_enter(key)?;
        let value = guard.cell.get_or_init(work).await.clone();
        Some(value)
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|flight| !flight.cell.initialized())
    }

    fn enter(&self, key: &str) -> FlightGuard<'_, T> {
        let mut calls = self.lock();
        if let Some(flight) = calls
            .get_mut(key)
            .filter(|flight| !flight.cell.initialized())
        {
            flight.participants += 1;
            let cell = flight.cell.clone();
            return self.guard(key, cell);
        }
        self.lead(&mut calls, key)
    }

    fn try_enter(&self, key: &str) -> Option<FlightGuard<'_, T>> {
        let mut calls = self.lock();
        if calls
            .get(key)
            .is_some_and(|flight| !flight.cell.initialized())
        {
            return None;
        }
        Some(self.lead(&mut calls, key))
    }

    /// Registers a new flight for `key`, replacing one whose value already settled.
    fn lead(&self, calls: &mut HashMap<String, Flight<T>>, key: &str) -> FlightGuard<'_, T> {
        let cell = Arc::new(OnceCell::new());
        calls.insert(
            key.to_string(),
            Flight {
                cell: cell.clone(),
                participants: 1,
            },
        );
        self.guard(key, cell)
    }

    fn guard(&self, key: &str, cell: Arc<OnceCell<T>>) -> FlightGuard<'_, T> {
        FlightGuard {
            registry: self,
            key: key.to_string(),
            cell,
        }
    }
}

/// Leaves the flight when the caller finishes or its future is dropped.
struct FlightGuard<'a, T> {
    registry: &'a SingleFlight<T>,
    key: String,
    cell: Arc<OnceCell<T>>,
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        let mut calls = self.registry.lock();
        let finished = match calls.get_mut(&self.key) {
            Some(flight) if Arc::ptr_eq(&flight.cell, &self.cell) => {
                flight.participants = flight.participants.saturating_sub(1);
                flight.participants == 0
            }
            _ => false,
        };
        if finished {
            calls.remove(&self.key);
        }
    }
}
