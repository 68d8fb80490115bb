//! Registry of GET requests currently on the wire.
//!
//! Each key maps to one shared future covering the whole attempt sequence
//! (retries included). The attempt sequence runs on a spawned task, so
//! callers that stop waiting do not cancel it, and the entry is removed
//! before the result is handed out.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

use reqwest::header::{HeaderValue, AUTHORIZATION};

use crate::{config::normalize_path, ApiError, ApiRequest, ApiResponse, Method, Result};

pub(crate) type SharedResult = Shared<BoxFuture<'static, Result<ApiResponse>>>;

/// Identity of a request for deduplication purposes.
///
/// A caller-supplied `Authorization` header is part of the identity, so
/// requests made on behalf of different principals never share a response.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) struct DedupKey {
    method: Method,
    path: String,
    params: Vec<(String, String)>,
    authorization: Option<HeaderValue>,
}

impl DedupKey {
    pub(crate) fn for_request(request: &ApiRequest) -> Self {
        Self {
            method: request.method,
            path: normalize_path(&request.path).to_owned(),
            params: request.params.normalized(),
            authorization: request.headers.get(AUTHORIZATION).cloned(),
        }
    }
}

struct Entry {
    id: u64,
    future: SharedResult,
}

#[derive(Default)]
struct Registry {
    entries: Mutex<HashMap<DedupKey, Entry>>,
    next_id: AtomicU64,
}

/// Outcome of [`InFlight::join_or_start`].
pub(crate) enum Join {
    /// An identical request was already running.
    Joined(SharedResult),
    /// This call started the request.
    Started(SharedResult),
}

impl Join {
    pub(crate) fn into_future(self) -> SharedResult {
        match self {
            Self::Joined(future) | Self::Started(future) => future,
        }
    }
}

/// Pending-request map owned by one client and shared by its clones.
#[derive(Clone, Default)]
pub(crate) struct InFlight {
    registry: Arc<Registry>,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashMap<DedupKey, Entry>> {
        self.registry
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns the running future for `key`, or starts `attempt` on a new
    /// task and registers it.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn join_or_start<F>(&self, key: DedupKey, attempt: F) -> Join
    where
        F: Future<Output = Result<ApiResponse>> + Send + 'static,
    {
        let (id, sender, future) = {
            let mut entries = self.lock();
            if let Some(entry) = entries.get(&key) {
                return Join::Joined(entry.future.clone());
            }

            let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
            let (sender, receiver) = oneshot::channel();
            let future = async move { receiver.await.unwrap_or(Err(ApiError::Interrupted)) }
                .boxed()
                .shared();
            entries.insert(
                key.clone(),
                Entry {
                    id,
                    future: future.clone(),
                },
            );
            (id, sender, future)
        };

        // Built outside the lock: dropping the task unpolled runs the guard.
        let guard = EntryGuard {
            registry: self.clone(),
            key,
            id,
        };
        tokio::spawn(async move {
            let result = attempt.await;
            drop(guard);
            let _ = sender.send(result);
        });

        Join::Started(future)
    }

    fn remove(&self, key: &DedupKey, id: u64) {
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|entry| entry.id == id) {
            entries.remove(key);
        }
    }
}

/// Removes its entry when the attempt task ends, however it ends.
struct EntryGuard {
    registry: InFlight,
    key: DedupKey,
    id: u64,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.key, self.id);

        #[cfg(feature = "tracing")]
        tracing::trace!(method = self.key.method.as_str(), path = %self.key.path, "in-flight entry cleared");
    }
}
