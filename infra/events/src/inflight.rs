use crate::registry::SubscriptionId;
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

#[derive(Debug)]
struct Invocation {
    subscription: SubscriptionId,
    namespace: Arc<str>,
}

/// Set of handler invocations that have started and not yet completed.
///
/// The count is mirrored into a `watch` channel so a drain can await the set
/// becoming empty instead of polling it.
#[derive(Debug)]
pub(crate) struct InFlight {
    entries: Mutex<FxHashMap<u64, Invocation>>,
    count: watch::Sender<usize>,
    next_id: AtomicU64,
}

impl InFlight {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(FxHashMap::default()),
            count: watch::Sender::new(0),
            next_id: AtomicU64::new(0),
        })
    }

    /// Records a new invocation. It stays in flight until the guard is dropped.
    pub(crate) fn begin(
        self: &Arc<Self>,
        subscription: SubscriptionId,
        namespace: Arc<str>,
    ) -> InvocationGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock();
        entries.insert(id, Invocation { subscription, namespace });
        self.count.send_replace(entries.len());

        InvocationGuard { tracker: Arc::clone(self), id }
    }

    fn finish(&self, id: u64) {
        let mut entries = self.entries.lock();
        if entries.remove(&id).is_some() {
            self.count.send_replace(entries.len());
        }
    }

    pub(crate) fn len(&self) -> usize {
        *self.count.borrow()
    }

    /// Namespaces of everything still running, with the owning subscription.
    pub(crate) fn pending(&self) -> Vec<(SubscriptionId, Arc<str>)> {
        let mut pending: Vec<_> = self
            .entries
            .lock()
            .values()
            .map(|inv| (inv.subscription, Arc::clone(&inv.namespace)))
            .collect();
        pending.sort_by_key(|(subscription, _)| *subscription);
        pending
    }

    /// Resolves once no invocation is in flight.
    pub(crate) async fn drained(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives as long as `self`, so this only returns on an empty set.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

/// Keeps one invocation in the in-flight set for as long as it is alive.
#[derive(Debug)]
pub(crate) struct InvocationGuard {
    tracker: Arc<InFlight>,
    id: u64,
}

impl Drop for InvocationGuard {
    fn drop(&mut self) {
        self.tracker.finish(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ns(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn test_guards_track_membership() {
        let tracker = InFlight::new();
        let sub = SubscriptionId::from_raw(3);

        let a = tracker.begin(sub, ns("a"));
        let b = tracker.begin(sub, ns("b"));
        assert_eq!(tracker.len(), 2);

        drop(a);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.pending(), vec![(sub, ns("b"))]);

        drop(b);
        assert_eq!(tracker.len(), 0);
        assert!(tracker.pending().is_empty());
    }

    #[tokio::test]
    async fn test_drained_resolves_immediately_when_empty() {
        let tracker = InFlight::new();
        tokio::time::timeout(Duration::from_millis(50), tracker.drained())
            .await
            .expect("empty tracker should be drained");
    }

    #[tokio::test]
    async fn test_drained_waits_for_last_guard() {
        let tracker = InFlight::new();
        let guard = tracker.begin(SubscriptionId::from_raw(0), ns("slow"));

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.drained().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "drain must wait for the in-flight guard");

        drop(guard);
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("drain should resolve after the guard is dropped")
            .unwrap();
    }
}
