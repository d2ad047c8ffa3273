//! Event tracer for the SUT harness
//!
//! The tracer subscribes to attribute-change events on remote targets and
//! accumulates them in a sequence-ordered log. Conditions are verified by
//! querying the log, never by re-subscribing: a query asks "has an event
//! matching this predicate been recorded after marker M", optionally waiting
//! up to a deadline with event-driven wake-up.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sut_core::{DeviceName, ReceivedEvent, SharedTarget, TargetError};
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

/// Ordered log of received events with change notification
struct TracerLog {
    events: RwLock<Vec<ReceivedEvent>>,
    next_seq: AtomicU64,
    advanced: Notify,
}

impl TracerLog {
    async fn record(&self, mut event: ReceivedEvent) {
        let mut events = self.events.write().await;
        // Sequence numbers are assigned under the write lock so that log
        // order and sequence order always agree.
        event.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        trace!(event = %event, seq = event.seq, "Recording event");
        events.push(event);
        drop(events);
        self.advanced.notify_waiters();
    }
}

/// Accumulates attribute-change events from subscribed targets
///
/// A tracer owns one background forwarding task per (device, attribute)
/// subscription. Subscribing records the attribute's current value as a
/// synthetic initial event, so the first live transition has a reference
/// point for previous-value matching. Per-run hygiene is the caller's
/// responsibility: `unsubscribe_all` plus `clear_events` before each run,
/// then a fresh `marker` to fence off anything recorded earlier.
pub struct EventTracer {
    inner: Arc<TracerLog>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscribed: Mutex<HashSet<(DeviceName, String)>>,
}

impl EventTracer {
    /// Create a new tracer with an empty log and no subscriptions
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TracerLog {
                events: RwLock::new(Vec::new()),
                next_seq: AtomicU64::new(0),
                advanced: Notify::new(),
            }),
            tasks: Mutex::new(Vec::new()),
            subscribed: Mutex::new(HashSet::new()),
        }
    }

    /// Subscribe to change events for an attribute of a target
    ///
    /// Records the current attribute value as a synthetic initial event
    /// (skipped if the attribute has no value yet), then forwards every
    /// subsequent change into the log in arrival order. Subscribing twice
    /// to the same (device, attribute) pair is a no-op.
    #[instrument(skip(self, target), fields(device = %target.name()))]
    pub async fn subscribe(
        &self,
        target: &SharedTarget,
        attribute: &str,
    ) -> Result<(), TargetError> {
        let key = (target.name().clone(), attribute.to_string());
        {
            let mut subscribed = self.subscribed.lock().await;
            if !subscribed.insert(key) {
                return Ok(());
            }
        }

        // Subscribe before reading so no change can slip between the
        // snapshot and the live stream. A change landing in both shows up
        // as a duplicate, which matching tolerates.
        let mut rx = target.subscribe(attribute)?;

        match target.read_attribute(attribute).await {
            Ok(value) => {
                self.inner
                    .record(ReceivedEvent::new(target.name().clone(), attribute, value))
                    .await;
            }
            Err(TargetError::UnknownAttribute { .. }) => {
                trace!("No current value to snapshot");
            }
            Err(err) => return Err(err),
        }

        debug!("Subscribed");
        let log = Arc::clone(&self.inner);
        let device = target.name().clone();
        let attr = attribute.to_string();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => log.record(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(device = %device, attribute = %attr, missed, "Receiver lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.lock().await.push(handle);
        Ok(())
    }

    /// Current marker: events recorded from now on have `seq >= marker()`
    pub fn marker(&self) -> u64 {
        self.inner.next_seq.load(Ordering::SeqCst)
    }

    /// Snapshot of every recorded event, in arrival order
    pub async fn events(&self) -> Vec<ReceivedEvent> {
        self.inner.events.read().await.clone()
    }

    /// Snapshot of events recorded at or after the given marker
    pub async fn events_since(&self, marker: u64) -> Vec<ReceivedEvent> {
        self.inner
            .events
            .read()
            .await
            .iter()
            .filter(|event| event.seq >= marker)
            .cloned()
            .collect()
    }

    /// Empty the log
    ///
    /// Sequence numbers keep increasing across clears, so markers taken
    /// before a clear stay valid.
    pub async fn clear_events(&self) {
        let mut events = self.inner.events.write().await;
        debug!(cleared = events.len(), "Clearing event log");
        events.clear();
    }

    /// Cancel every forwarding task and forget all subscriptions
    pub async fn unsubscribe_all(&self) {
        let mut tasks = self.tasks.lock().await;
        debug!(count = tasks.len(), "Unsubscribing from all attributes");
        for task in tasks.drain(..) {
            task.abort();
        }
        self.subscribed.lock().await.clear();
    }

    /// Wait until `check` finds a match in the log or the deadline passes
    ///
    /// `check` receives the full log in arrival order and is re-run every
    /// time the log advances. Returns the first match, or the result of a
    /// final re-check at the deadline (None when nothing matched). The
    /// wake-up is registered before each check, so an event recorded
    /// between checking and waiting cannot be missed.
    pub async fn wait_for<T, F>(&self, deadline: Instant, mut check: F) -> Option<T>
    where
        F: FnMut(&[ReceivedEvent]) -> Option<T>,
    {
        loop {
            let notified = self.inner.advanced.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let events = self.inner.events.read().await;
                if let Some(found) = check(&events) {
                    return Some(found);
                }
            }

            tokio::select! {
                _ = notified.as_mut() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    let events = self.inner.events.read().await;
                    return check(&events);
                }
            }
        }
    }
}

impl Default for EventTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventTracer {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.try_lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

/// Thread-safe wrapper for EventTracer
pub type SharedTracer = Arc<EventTracer>;
