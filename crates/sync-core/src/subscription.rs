//! Lifecycle of one live query: a cancelable pump task that forwards full
//! snapshots and recovers from transport failures with backoff.

use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::SyncError,
    retry::RetryPolicy,
    store::Store,
    types::{FullSnapshot, SubscriptionQuery},
};

/// Which session subscription produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionTag {
    /// The ordered, limited live-window query.
    Primary,
    /// The unordered total-count query.
    Counter,
}

/// Delivery from a subscription pump.
#[derive(Debug)]
pub enum SubscriptionUpdate {
    /// Full current result set for the query.
    Snapshot(FullSnapshot),
    /// The store could not be reached; the pump keeps retrying.
    TransportError(SyncError),
}

/// Pump delivery tagged with the session generation that opened it.
///
/// The receiving session drops events whose epoch has been superseded, which
/// makes results arriving after a cancel or retarget irrelevant.
#[derive(Debug)]
pub struct SubscriptionEvent {
    pub epoch: u64,
    pub tag: SubscriptionTag,
    pub update: SubscriptionUpdate,
}

/// Owns one live query's lifecycle, independent of what consumes its events.
#[derive(Debug)]
pub struct SubscriptionHandle {
    query: SubscriptionQuery,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Validate the query and start its pump task.
    ///
    /// Fails with `invalid_query` when any filter value is empty; the caller
    /// treats that as "no results" rather than an error.
    pub fn open(
        store: Arc<dyn Store>,
        query: SubscriptionQuery,
        epoch: u64,
        tag: SubscriptionTag,
        events_tx: mpsc::Sender<SubscriptionEvent>,
        retry: RetryPolicy,
    ) -> Result<Self, SyncError> {
        validate_query(&query)?;

        let cancel = CancellationToken::new();
        let pump_cancel = cancel.child_token();
        let pump_query = query.clone();
        let task = tokio::spawn(async move {
            pump(store, pump_query, epoch, tag, events_tx, retry, pump_cancel).await;
        });

        Ok(Self {
            query,
            cancel,
            task,
        })
    }

    /// The query this handle is listening to.
    pub fn query(&self) -> &SubscriptionQuery {
        &self.query
    }

    /// Stop delivery and wait for the pump to exit.
    pub async fn cancel(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

fn validate_query(query: &SubscriptionQuery) -> Result<(), SyncError> {
    for filter in &query.filters {
        if filter.value.trim().is_empty() {
            return Err(SyncError::invalid_query(format!(
                "filter on '{}' has no value",
                filter.field
            )));
        }
    }
    Ok(())
}

enum PumpExit {
    Cancelled,
    ReceiverGone,
    Failed(SyncError),
}

async fn pump(
    store: Arc<dyn Store>,
    query: SubscriptionQuery,
    epoch: u64,
    tag: SubscriptionTag,
    events_tx: mpsc::Sender<SubscriptionEvent>,
    retry: RetryPolicy,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    loop {
        let error = match subscribe_and_forward(
            &store,
            &query,
            epoch,
            tag,
            &events_tx,
            &cancel,
            &mut attempt,
        )
        .await
        {
            PumpExit::Cancelled | PumpExit::ReceiverGone => return,
            PumpExit::Failed(error) => error,
        };

        warn!(
            collection = %query.collection,
            code = %error.code,
            "subscription transport failure"
        );
        let hint = error.retry_hint();
        let forwarded = events_tx
            .send(SubscriptionEvent {
                epoch,
                tag,
                update: SubscriptionUpdate::TransportError(error),
            })
            .await;
        if forwarded.is_err() {
            return;
        }

        let delay = retry.delay_for_attempt(attempt, hint);
        attempt = attempt.saturating_add(1);
        debug!(
            collection = %query.collection,
            delay_ms = delay.as_millis() as u64,
            "retrying subscription"
        );
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn subscribe_and_forward(
    store: &Arc<dyn Store>,
    query: &SubscriptionQuery,
    epoch: u64,
    tag: SubscriptionTag,
    events_tx: &mpsc::Sender<SubscriptionEvent>,
    cancel: &CancellationToken,
    attempt: &mut u32,
) -> PumpExit {
    let subscribed = tokio::select! {
        _ = cancel.cancelled() => return PumpExit::Cancelled,
        result = store.subscribe(query) => result,
    };

    let mut stream = match subscribed {
        Ok(stream) => stream,
        Err(error) => return PumpExit::Failed(error),
    };
    *attempt = 0;

    loop {
        let snapshot = tokio::select! {
            _ = cancel.cancelled() => return PumpExit::Cancelled,
            snapshot = stream.recv() => snapshot,
        };

        let Some(snapshot) = snapshot else {
            return PumpExit::Failed(SyncError::subscription_closed(&query.collection));
        };

        let forwarded = events_tx
            .send(SubscriptionEvent {
                epoch,
                tag,
                update: SubscriptionUpdate::Snapshot(snapshot),
            })
            .await;
        if forwarded.is_err() {
            return PumpExit::ReceiverGone;
        }
    }
}
