//! Observer Interface
//!
//! Every request exposes three observer channels: transfer progress, the
//! raw response, and a typed decoded object. Registration returns a token
//! usable for removal; callbacks run in insertion order except priority
//! entries (used internally by the alternate-request machinery), which run
//! first. Observer failures never propagate into the pipeline.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::Error;
use crate::response::Response;

/// Token identifying a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverToken(Uuid);

/// Direction of a transfer progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    Upload,
    Download,
}

/// A transfer progress event.
#[derive(Debug, Clone)]
pub struct Progress {
    pub kind: ProgressKind,
    pub current: u64,
    pub total: Option<u64>,
}

impl Progress {
    /// Completed fraction in `[0, 1]`, when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        self.total.filter(|t| *t > 0).map(|t| {
            (self.current as f64 / t as f64).min(1.0)
        })
    }
}

type ProgressFn = dyn Fn(&Progress) + Send + Sync;
type ResponseFn = dyn Fn(&Response) + Send + Sync;

struct Slot<T: ?Sized> {
    token: ObserverToken,
    priority: bool,
    callback: Arc<T>,
}

/// The observer registry owned by a request.
#[derive(Default)]
pub struct ObserverSet {
    progress: Mutex<Vec<Slot<ProgressFn>>>,
    response: Mutex<Vec<Slot<ResponseFn>>>,
    decoded: Mutex<Vec<Slot<ResponseFn>>>,
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("progress", &self.progress.lock().map(|v| v.len()).unwrap_or(0))
            .field("response", &self.response.lock().map(|v| v.len()).unwrap_or(0))
            .field("decoded", &self.decoded.lock().map(|v| v.len()).unwrap_or(0))
            .finish()
    }
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(
        &self,
        callback: impl Fn(&Progress) + Send + Sync + 'static,
    ) -> ObserverToken {
        let token = ObserverToken(Uuid::new_v4());
        self.progress.lock().expect("observer lock poisoned").push(Slot {
            token,
            priority: false,
            callback: Arc::new(callback),
        });
        token
    }

    pub fn on_response(
        &self,
        callback: impl Fn(&Response) + Send + Sync + 'static,
    ) -> ObserverToken {
        self.push_response(callback, false)
    }

    /// Register a response observer that runs ahead of ordinary ones.
    /// The alternate-request machinery installs its bookkeeping here so
    /// state (tokens, session material) is in place before user observers
    /// fire.
    pub fn on_response_priority(
        &self,
        callback: impl Fn(&Response) + Send + Sync + 'static,
    ) -> ObserverToken {
        self.push_response(callback, true)
    }

    fn push_response(
        &self,
        callback: impl Fn(&Response) + Send + Sync + 'static,
        priority: bool,
    ) -> ObserverToken {
        let token = ObserverToken(Uuid::new_v4());
        self.response.lock().expect("observer lock poisoned").push(Slot {
            token,
            priority,
            callback: Arc::new(callback),
        });
        token
    }

    /// Register a typed observer; the decode step runs per delivery and
    /// hands the callback either the value or the decode error.
    pub fn on_decoded<T: DeserializeOwned + 'static>(
        &self,
        callback: impl Fn(Result<T, Error>) + Send + Sync + 'static,
    ) -> ObserverToken {
        let token = ObserverToken(Uuid::new_v4());
        let decoding = move |response: &Response| {
            callback(response.decode::<T>());
        };
        self.decoded.lock().expect("observer lock poisoned").push(Slot {
            token,
            priority: false,
            callback: Arc::new(decoding),
        });
        token
    }

    /// Remove an observer from whichever channel holds it.
    pub fn remove(&self, token: ObserverToken) -> bool {
        let mut removed = false;
        for list in [&self.response, &self.decoded] {
            let mut list = list.lock().expect("observer lock poisoned");
            let before = list.len();
            list.retain(|slot| slot.token != token);
            removed |= list.len() != before;
        }
        let mut list = self.progress.lock().expect("observer lock poisoned");
        let before = list.len();
        list.retain(|slot| slot.token != token);
        removed | (list.len() != before)
    }

    pub(crate) fn notify_progress(&self, progress: &Progress) {
        let callbacks = snapshot(&self.progress);
        for callback in callbacks {
            let _ = catch_unwind(AssertUnwindSafe(|| callback(progress)));
        }
    }

    pub(crate) fn notify_response(&self, response: &Response) {
        let callbacks = snapshot(&self.response);
        for callback in callbacks {
            let _ = catch_unwind(AssertUnwindSafe(|| callback(response)));
        }
    }

    pub(crate) fn notify_decoded(&self, response: &Response) {
        let callbacks = snapshot(&self.decoded);
        for callback in callbacks {
            let _ = catch_unwind(AssertUnwindSafe(|| callback(response)));
        }
    }
}

/// Priority entries first, then insertion order; cloned out of the lock so
/// callbacks can re-enter the registry.
fn snapshot<T: ?Sized>(list: &Mutex<Vec<Slot<T>>>) -> Vec<Arc<T>> {
    let list = list.lock().expect("observer lock poisoned");
    let mut ordered: Vec<&Slot<T>> = list.iter().filter(|s| s.priority).collect();
    ordered.extend(list.iter().filter(|s| !s.priority));
    ordered.into_iter().map(|s| Arc::clone(&s.callback)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn priority_observers_run_first() {
        let set = ObserverSet::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        set.on_response(move |_| o1.lock().unwrap().push("plain"));
        let o2 = order.clone();
        set.on_response_priority(move |_| o2.lock().unwrap().push("priority"));

        set.notify_response(&Response::default());
        assert_eq!(*order.lock().unwrap(), vec!["priority", "plain"]);
    }

    #[test]
    fn removal_by_token() {
        let set = ObserverSet::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let token = set.on_response(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(set.remove(token));
        assert!(!set.remove(token));
        set.notify_response(&Response::default());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_observer_does_not_poison_delivery() {
        let set = ObserverSet::new();
        set.on_response(|_| panic!("observer bug"));
        let delivered = Arc::new(AtomicUsize::new(0));
        let d = delivered.clone();
        set.on_response(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });
        set.notify_response(&Response::default());
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn decoded_channel_reports_decode_outcome() {
        let set = ObserverSet::new();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        set.on_decoded::<serde_json::Value>(move |outcome| {
            *s.lock().unwrap() = Some(outcome.is_ok());
        });
        let response = Response {
            body: crate::response::BodyLocation::InMemory(bytes::Bytes::from_static(b"{\"ok\":1}")),
            ..Default::default()
        };
        set.notify_decoded(&response);
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }

    #[test]
    fn progress_fraction_clamps() {
        let progress = Progress {
            kind: ProgressKind::Download,
            current: 150,
            total: Some(100),
        };
        assert_eq!(progress.fraction(), Some(1.0));
        let unknown = Progress {
            kind: ProgressKind::Download,
            current: 10,
            total: None,
        };
        assert_eq!(unknown.fraction(), None);
    }
}
