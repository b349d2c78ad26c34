//! Per-owner request queue.
//!
//! Operations for one owner run in arrival order, in batches of at most
//! `max_concurrent` that execute concurrently; the next batch starts once
//! the whole previous batch has settled.  Owners never wait on each other.
//! A lane is dropped as soon as it drains.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::SessionError;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
type Lanes = Arc<Mutex<HashMap<String, VecDeque<Job>>>>;

#[derive(Clone)]
pub struct OwnerQueue {
    max_concurrent: usize,
    lanes: Lanes,
}

impl OwnerQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            lanes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue `op` behind earlier work for `owner_id`.
    ///
    /// The operation is queued when this is called, not when the returned
    /// future is first polled.  Must be called inside a Tokio runtime.
    pub fn enqueue<F, T>(
        &self,
        owner_id: &str,
        op: F,
    ) -> impl Future<Output = Result<T, SessionError>> + Send + 'static
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            async move {
                let _ = tx.send(op.await);
            }
            .boxed()
        });

        let start_lane = {
            let mut lanes = self.lanes.lock();
            match lanes.get_mut(owner_id) {
                Some(lane) => {
                    lane.push_back(job);
                    false
                }
                None => {
                    lanes.insert(owner_id.to_owned(), VecDeque::from([job]));
                    true
                }
            }
        };

        if start_lane {
            tokio::spawn(drain_lane(
                self.lanes.clone(),
                owner_id.to_owned(),
                self.max_concurrent,
            ));
        }

        let owner = owner_id.to_owned();
        async move { rx.await.map_err(|_| SessionError::QueueDropped(owner)) }
    }

    /// Owners with queued or running work.
    pub fn active_owners(&self) -> usize {
        self.lanes.lock().len()
    }

    /// Operations for `owner_id` not yet started.
    pub fn pending(&self, owner_id: &str) -> usize {
        self.lanes.lock().get(owner_id).map_or(0, VecDeque::len)
    }
}

async fn drain_lane(lanes: Lanes, owner_id: String, max_concurrent: usize) {
    loop {
        let batch: Vec<Job> = {
            let mut guard = lanes.lock();
            let Some(lane) = guard.get_mut(&owner_id) else {
                return;
            };
            if lane.is_empty() {
                guard.remove(&owner_id);
                return;
            }
            let n = lane.len().min(max_concurrent);
            lane.drain(..n).collect()
        };

        tracing::trace!(owner_id = %owner_id, size = batch.len(), "running owner batch");
        let results = join_all(
            batch
                .into_iter()
                .map(|job| AssertUnwindSafe(job()).catch_unwind()),
        )
        .await;
        let panicked = results.iter().filter(|r| r.is_err()).count();
        if panicked > 0 {
            tracing::error!(owner_id = %owner_id, panicked, "queued operation panicked");
        }
    }
}
