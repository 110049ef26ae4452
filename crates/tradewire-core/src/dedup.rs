//! In-flight request deduplication.
//!
//! Identical reads issued while one is outstanding share a single underlying
//! call. The call runs on its own task so that any one waiter can walk away
//! without disturbing the rest; it is aborted only when the last waiter leaves.
//! An entry is removed before its outcome is published, so a caller arriving
//! after settlement always starts a fresh call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::envelope::Payload;
use crate::error::{ClassifiedError, ErrorKind};

type Outcome = Result<Payload, ClassifiedError>;
type Settlement = watch::Receiver<Option<Outcome>>;
type Entries = Arc<Mutex<HashMap<String, InFlight>>>;

struct InFlight {
    id: u64,
    settlement: Settlement,
    waiters: usize,
    task: AbortHandle,
}

#[derive(Default)]
pub struct DedupRegistry {
    entries: Entries,
    next_id: AtomicU64,
}

impl std::fmt::Debug for DedupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupRegistry")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct calls currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.entries
            .lock()
            .expect("dedup registry should not be poisoned")
            .len()
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.entries
            .lock()
            .expect("dedup registry should not be poisoned")
            .contains_key(fingerprint)
    }

    /// Joins the call registered under `fingerprint`, or starts one with `start`.
    ///
    /// `start` is invoked only when no call is outstanding. `cancel` detaches
    /// this waiter alone; the shared call keeps running for the others.
    pub async fn run<F, Fut>(
        &self,
        fingerprint: &str,
        cancel: Option<&CancelSignal>,
        start: F,
    ) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let (id, settlement) = self.join(fingerprint, start);
        let _waiter = Waiter {
            entries: Arc::clone(&self.entries),
            fingerprint: fingerprint.to_owned(),
            id,
        };

        let settled = match cancel {
            Some(signal) => tokio::select! {
                biased;
                () = signal.cancelled() => return Err(ClassifiedError::cancelled()),
                settled = wait_settled(settlement) => settled,
            },
            None => wait_settled(settlement).await,
        };

        settled.unwrap_or_else(|| {
            Err(ClassifiedError::new(
                ErrorKind::Unknown,
                "shared request ended without a result",
            )
            .with_code("aborted"))
        })
    }

    fn join<F, Fut>(&self, fingerprint: &str, start: F) -> (u64, Settlement)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let mut entries = self
            .entries
            .lock()
            .expect("dedup registry should not be poisoned");

        if let Some(entry) = entries.get_mut(fingerprint) {
            entry.waiters += 1;
            debug!(fingerprint, waiters = entry.waiters, "joined in-flight request");
            return (entry.id, entry.settlement.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, settlement) = watch::channel(None);
        let registry = Arc::clone(&self.entries);
        let key = fingerprint.to_owned();
        let call = start();

        // The task cannot remove its entry before it is inserted: removal takes
        // the lock held here.
        let task = tokio::spawn(async move {
            let outcome = call.await;
            remove_entry(&registry, &key, id);
            sender.send_replace(Some(outcome));
        })
        .abort_handle();

        entries.insert(
            fingerprint.to_owned(),
            InFlight {
                id,
                settlement: settlement.clone(),
                waiters: 1,
                task,
            },
        );
        (id, settlement)
    }
}

/// Registration of one caller against an in-flight entry.
struct Waiter {
    entries: Entries,
    fingerprint: String,
    id: u64,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut entries = self
            .entries
            .lock()
            .expect("dedup registry should not be poisoned");

        let Some(entry) = entries.get_mut(&self.fingerprint) else {
            return;
        };
        if entry.id != self.id {
            return;
        }

        entry.waiters = entry.waiters.saturating_sub(1);
        if entry.waiters == 0 {
            if let Some(entry) = entries.remove(&self.fingerprint) {
                entry.task.abort();
                debug!(fingerprint = %self.fingerprint, "last waiter left; shared request aborted");
            }
        }
    }
}

fn remove_entry(entries: &Mutex<HashMap<String, InFlight>>, fingerprint: &str, id: u64) {
    let mut entries = entries
        .lock()
        .expect("dedup registry should not be poisoned");
    if entries.get(fingerprint).is_some_and(|entry| entry.id == id) {
        entries.remove(fingerprint);
    }
}

async fn wait_settled(mut settlement: Settlement) -> Option<Outcome> {
    match settlement.wait_for(Option::is_some).await {
        Ok(settled) => (*settled).clone(),
        Err(_) => None,
    }
}
