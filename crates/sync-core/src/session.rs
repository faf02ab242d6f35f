//! Sync session runtime: one spawned task per "screen" that wires the
//! subscription handle, page merger, reference resolver, counter ledger, and
//! debounced query controller together and republishes consolidated state.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tracing::{debug, info, warn};

use crate::{
    channel::{SessionChannelError, SessionChannels, StateStream},
    debounce::DebouncedInput,
    error::SyncError,
    ledger::CounterLedger,
    lens::RecordLens,
    merger::PageMerger,
    resolver::{ProfileResolver, resolve_page},
    retry::RetryPolicy,
    state_machine::SessionStateMachine,
    store::Store,
    subscription::{
        SubscriptionEvent, SubscriptionHandle, SubscriptionTag, SubscriptionUpdate,
    },
    types::{
        Cursor, FieldFilter, FullSnapshot, Page, Patch, Record, ResolvedRecord, SessionCommand,
        SessionPhase, SessionState, SessionTarget, SubscriptionQuery,
    },
};

const DEFAULT_DEBOUNCE_WINDOW_MS: u64 = 500;
const DEFAULT_COMMAND_BUFFER: usize = 64;
const DEFAULT_STATE_BUFFER: usize = 256;
const UPDATE_BUFFER: usize = 64;

/// Tuning for one spawned sync session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Quiet window before a search input becomes an effective query.
    pub debounce_window_ms: u64,
    /// Command channel capacity.
    pub command_buffer: usize,
    /// State broadcast capacity.
    pub state_buffer: usize,
    /// Backoff for subscription recovery.
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            state_buffer: DEFAULT_STATE_BUFFER,
            retry: RetryPolicy::default(),
        }
    }
}

/// Caller-facing handle for one sync session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    channels: SessionChannels,
}

impl SessionHandle {
    /// Send one command to the session runtime.
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionChannelError> {
        self.channels.send_command(command).await
    }

    /// Subscribe to published session states.
    pub fn subscribe(&self) -> StateStream {
        self.channels.subscribe()
    }
}

/// Spawn a session runtime task and return its handle.
///
/// The runtime exits once every handle is dropped or a `Close` command is
/// processed; either way its subscriptions are canceled on the way out.
pub fn spawn_session(
    store: Arc<dyn Store>,
    resolver: Arc<dyn ProfileResolver>,
    config: SessionConfig,
) -> SessionHandle {
    let (channels, command_rx) = SessionChannels::new(config.command_buffer, config.state_buffer);
    let session = SyncSession::new(store, resolver, config, channels.clone(), command_rx);
    tokio::spawn(session.run());
    SessionHandle { channels }
}

#[derive(Debug)]
struct LoadedPage {
    resolved: Vec<ResolvedRecord>,
    cursor: Option<Cursor>,
    raw_len: usize,
}

#[derive(Debug)]
struct PageEvent {
    epoch: u64,
    outcome: Result<LoadedPage, SyncError>,
}

enum Wake {
    Command(Option<SessionCommand>),
    Subscription(Option<SubscriptionEvent>),
    Page(Option<PageEvent>),
    Debounce,
}

struct SyncSession {
    store: Arc<dyn Store>,
    resolver: Arc<dyn ProfileResolver>,
    config: SessionConfig,
    channels: SessionChannels,
    command_rx: mpsc::Receiver<SessionCommand>,
    sub_events_tx: mpsc::Sender<SubscriptionEvent>,
    sub_events_rx: mpsc::Receiver<SubscriptionEvent>,
    page_events_tx: mpsc::Sender<PageEvent>,
    page_events_rx: mpsc::Receiver<PageEvent>,
    machine: SessionStateMachine,
    target: Option<SessionTarget>,
    active_query: Option<SubscriptionQuery>,
    primary: Option<SubscriptionHandle>,
    counter: Option<SubscriptionHandle>,
    counter_epoch: Option<u64>,
    merger: Option<PageMerger>,
    ledger: CounterLedger,
    debounce: DebouncedInput,
    search_text: String,
    epoch: u64,
    busy: bool,
    sticky_error: Option<SyncError>,
    started: Instant,
}

impl SyncSession {
    fn new(
        store: Arc<dyn Store>,
        resolver: Arc<dyn ProfileResolver>,
        config: SessionConfig,
        channels: SessionChannels,
        command_rx: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        let (sub_events_tx, sub_events_rx) = mpsc::channel(UPDATE_BUFFER);
        let (page_events_tx, page_events_rx) = mpsc::channel(UPDATE_BUFFER);
        let debounce = DebouncedInput::new(config.debounce_window_ms);

        Self {
            store,
            resolver,
            config,
            channels,
            command_rx,
            sub_events_tx,
            sub_events_rx,
            page_events_tx,
            page_events_rx,
            machine: SessionStateMachine::default(),
            target: None,
            active_query: None,
            primary: None,
            counter: None,
            counter_epoch: None,
            merger: None,
            ledger: CounterLedger::new(),
            debounce,
            search_text: String::new(),
            epoch: 0,
            busy: false,
            sticky_error: None,
            started: Instant::now(),
        }
    }

    async fn run(mut self) {
        debug!("sync session runtime started");
        loop {
            let debounce_due = self.debounce.deadline_ms();
            let debounce_at = self.started + Duration::from_millis(debounce_due.unwrap_or(0));

            let wake = tokio::select! {
                command = self.command_rx.recv() => Wake::Command(command),
                event = self.sub_events_rx.recv() => Wake::Subscription(event),
                event = self.page_events_rx.recv() => Wake::Page(event),
                _ = sleep_until(debounce_at), if debounce_due.is_some() => Wake::Debounce,
            };

            match wake {
                Wake::Command(None) => break,
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Subscription(Some(event)) => self.handle_subscription_event(event).await,
                Wake::Page(Some(event)) => self.handle_page_event(event),
                Wake::Subscription(None) | Wake::Page(None) => {}
                Wake::Debounce => self.handle_debounce_fire().await,
            }

            if self.machine.phase() == SessionPhase::Closed {
                break;
            }
        }
        self.teardown().await;
        debug!("sync session runtime exiting");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        debug!(command = command_kind(&command), "session command");
        if let Err(err) = self.machine.apply(&command) {
            // Out-of-phase commands are absorbed as no-ops, not surfaced.
            debug!(code = %err.code, message = %err.message, "command ignored in current phase");
            return;
        }

        match command {
            SessionCommand::Open { target } | SessionCommand::Retarget { target } => {
                self.begin_target(target).await;
            }
            SessionCommand::Close => self.handle_close().await,
            SessionCommand::LoadMore => self.handle_load_more(),
            SessionCommand::MarkRead { id } => self.handle_mark_read(&id),
            SessionCommand::Remove { id } => self.handle_remove(&id),
            SessionCommand::RemoveAll => self.handle_remove_all(),
            SessionCommand::Input { text } => self.handle_input(text),
        }
    }

    async fn begin_target(&mut self, target: SessionTarget) {
        self.bump_epoch();
        self.cancel_subscriptions().await;
        self.merger = Some(PageMerger::new(target.order.direction, target.page_size));
        self.ledger = CounterLedger::new();
        self.sticky_error = None;
        self.busy = false;
        self.search_text.clear();
        self.debounce = DebouncedInput::new(self.config.debounce_window_ms);

        if target.filter.value.trim().is_empty() {
            // Missing required filter value means "nothing to show", not an
            // error surfaced to the caller.
            info!(
                collection = %target.collection,
                "target filter has no value; settling into empty ready state"
            );
            self.target = Some(target);
            self.machine.on_snapshot_ready();
            self.publish();
            return;
        }

        let query = build_query(&target, "");
        self.open_primary(query);
        if target.track_total {
            self.open_counter(build_count_query(&target));
        }
        self.target = Some(target);
        self.publish();
    }

    async fn handle_close(&mut self) {
        self.bump_epoch();
        self.cancel_subscriptions().await;
        self.target = None;
        self.merger = None;
        self.ledger = CounterLedger::new();
        self.sticky_error = None;
        self.busy = false;
        self.publish();
    }

    fn handle_load_more(&mut self) {
        if self.busy {
            debug!("load more skipped; a page fetch is already in flight");
            return;
        }
        let Some(target) = self.target.as_ref() else {
            return;
        };
        let Some(merger) = self.merger.as_ref() else {
            return;
        };
        if !merger.has_more() {
            debug!("load more skipped; no further pages");
            return;
        }
        let (Some(cursor), Some(query)) = (merger.cursor().cloned(), self.active_query.clone())
        else {
            return;
        };

        let store = Arc::clone(&self.store);
        let resolver = Arc::clone(&self.resolver);
        let lens = target.lens.clone();
        let page_size = target.page_size;
        let epoch = self.epoch;
        let events_tx = self.page_events_tx.clone();

        self.busy = true;
        tokio::spawn(async move {
            let outcome =
                fetch_older_page(store, resolver, lens, query, cursor, page_size).await;
            let _ = events_tx.send(PageEvent { epoch, outcome }).await;
        });
        self.publish();
    }

    fn handle_mark_read(&mut self, id: &str) {
        let Some(target) = self.target.as_ref() else {
            return;
        };
        let collection = target.collection.clone();
        let patch = target.lens.mark_read_patch();

        if !self.ledger.mark_read(id) {
            debug!(%id, "mark read ignored; item unknown or already read");
            return;
        }
        if let Some(merger) = &mut self.merger {
            merger.mark_read(id);
        }
        self.publish();

        if let Some(patch) = patch {
            self.dispatch_mutation("mark_read", collection, id.to_owned(), patch);
        }
    }

    fn handle_remove(&mut self, id: &str) {
        let Some(target) = self.target.as_ref() else {
            return;
        };
        let collection = target.collection.clone();

        let in_view = self
            .merger
            .as_mut()
            .is_some_and(|merger| merger.remove(id));
        let in_ledger = self.ledger.remove(id);
        if !in_view && !in_ledger {
            debug!(%id, "remove ignored; item unknown");
            return;
        }
        self.publish();
        self.dispatch_mutation("remove", collection, id.to_owned(), Patch::Delete);
    }

    fn handle_remove_all(&mut self) {
        let Some(target) = self.target.as_ref() else {
            return;
        };
        let collection = target.collection.clone();

        let ids = self
            .merger
            .as_ref()
            .map(PageMerger::ids)
            .unwrap_or_default();
        if let Some(merger) = &mut self.merger {
            merger.reset();
        }
        self.ledger.remove_all();
        self.publish();

        for id in ids {
            self.dispatch_mutation("remove_all", collection.clone(), id, Patch::Delete);
        }
    }

    fn handle_input(&mut self, text: String) {
        let now = self.elapsed_ms();
        self.search_text = text.clone();
        self.debounce.on_input(text, now);
        self.publish();
    }

    async fn handle_debounce_fire(&mut self) {
        let now = self.elapsed_ms();
        let Some(text) = self.debounce.fire(now) else {
            return;
        };
        let Some(target) = self.target.clone() else {
            return;
        };
        if target.filter.value.trim().is_empty() {
            return;
        }

        let candidate = build_query(&target, text.trim());
        if self
            .active_query
            .as_ref()
            .is_some_and(|active| active.is_equivalent(&candidate))
        {
            debug!("debounced query equivalent to active query; keeping listener");
            return;
        }

        info!(
            collection = %target.collection,
            "debounced input changed the effective query; rebuilding subscription"
        );
        self.bump_epoch();
        if let Some(primary) = self.primary.take() {
            primary.cancel().await;
        }
        if let Some(merger) = &mut self.merger {
            // A filter change is not a "load more": pagination restarts.
            merger.reset();
        }
        self.busy = true;
        self.open_primary(candidate);
        self.publish();
    }

    async fn handle_subscription_event(&mut self, event: SubscriptionEvent) {
        match event.tag {
            SubscriptionTag::Primary => {
                if event.epoch != self.epoch {
                    debug!("dropping stale primary update from a superseded target");
                    return;
                }
                match event.update {
                    SubscriptionUpdate::Snapshot(snapshot) => {
                        self.apply_primary_snapshot(snapshot).await;
                    }
                    SubscriptionUpdate::TransportError(error) => {
                        warn!(
                            code = %error.code,
                            "transport failure; keeping last known good view"
                        );
                        self.sticky_error = Some(error);
                        self.machine.on_snapshot_ready();
                        self.publish();
                    }
                }
            }
            SubscriptionTag::Counter => {
                if Some(event.epoch) != self.counter_epoch {
                    debug!("dropping stale counter update");
                    return;
                }
                match event.update {
                    SubscriptionUpdate::Snapshot(snapshot) => {
                        self.ledger.reconcile_total(snapshot.docs.len() as u64);
                        self.publish();
                    }
                    SubscriptionUpdate::TransportError(error) => {
                        debug!(code = %error.code, "counter subscription transport failure");
                    }
                }
            }
        }
    }

    async fn apply_primary_snapshot(&mut self, snapshot: FullSnapshot) {
        let Some(target) = self.target.clone() else {
            return;
        };
        let FullSnapshot { docs, cursor } = snapshot;
        let raw_len = docs.len();
        let now = now_ms();
        let records: Vec<Record> = docs
            .into_iter()
            .map(|doc| target.lens.project(doc, now))
            .collect();
        let resolved = resolve_page(&self.resolver, records).await;

        let Some(merger) = &mut self.merger else {
            return;
        };
        merger.apply_initial_snapshot(resolved, cursor, raw_len);
        let items = merger.items();
        self.ledger.sync_from_records(&items);
        self.sticky_error = None;
        self.busy = false;
        self.machine.on_snapshot_ready();
        self.publish();

        if target.auto_mark_read {
            let unread_ids: Vec<String> = items
                .iter()
                .filter(|item| item.record.unread)
                .map(|item| item.record.id.clone())
                .collect();
            for id in unread_ids {
                self.handle_mark_read(&id);
            }
        }
    }

    fn handle_page_event(&mut self, event: PageEvent) {
        if event.epoch != self.epoch {
            debug!("dropping stale page result from a superseded target");
            return;
        }
        self.busy = false;
        match event.outcome {
            Ok(page) => {
                if let Some(merger) = &mut self.merger {
                    merger.apply_older_page(page.resolved, page.cursor, page.raw_len);
                    let items = merger.items();
                    self.ledger.sync_from_records(&items);
                }
            }
            Err(error) => {
                warn!(code = %error.code, "older page fetch failed; keeping current view");
                self.sticky_error = Some(error);
            }
        }
        self.publish();
    }

    fn open_primary(&mut self, query: SubscriptionQuery) {
        match SubscriptionHandle::open(
            Arc::clone(&self.store),
            query.clone(),
            self.epoch,
            SubscriptionTag::Primary,
            self.sub_events_tx.clone(),
            self.config.retry,
        ) {
            Ok(handle) => {
                self.primary = Some(handle);
                self.active_query = Some(query);
            }
            Err(err) => {
                debug!(code = %err.code, "subscription rejected; treating as empty result");
                self.active_query = None;
                self.machine.on_snapshot_ready();
            }
        }
    }

    fn open_counter(&mut self, query: SubscriptionQuery) {
        match SubscriptionHandle::open(
            Arc::clone(&self.store),
            query,
            self.epoch,
            SubscriptionTag::Counter,
            self.sub_events_tx.clone(),
            self.config.retry,
        ) {
            Ok(handle) => {
                self.counter = Some(handle);
                self.counter_epoch = Some(self.epoch);
            }
            Err(err) => {
                warn!(code = %err.code, "counter subscription rejected");
            }
        }
    }

    async fn cancel_subscriptions(&mut self) {
        if let Some(primary) = self.primary.take() {
            primary.cancel().await;
        }
        if let Some(counter) = self.counter.take() {
            counter.cancel().await;
        }
        self.counter_epoch = None;
        self.active_query = None;
    }

    async fn teardown(&mut self) {
        self.bump_epoch();
        self.cancel_subscriptions().await;
        if self.machine.close().is_some() {
            self.merger = None;
            self.ledger = CounterLedger::new();
            self.publish();
        }
    }

    fn dispatch_mutation(&self, op: &'static str, collection: String, id: String, patch: Patch) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            // Optimistic policy: local state is already updated and is not
            // rolled back when the remote write fails.
            match store.mutate(&collection, &id, patch).await {
                Ok(()) => debug!(%collection, %id, op, "mutation applied"),
                Err(err) => warn!(
                    %collection,
                    %id,
                    op,
                    code = %err.code,
                    "mutation failed after optimistic local update"
                ),
            }
        });
    }

    fn publish(&self) {
        self.channels.publish(self.current_state());
    }

    fn current_state(&self) -> SessionState {
        SessionState {
            items: self
                .merger
                .as_ref()
                .map(PageMerger::items)
                .unwrap_or_default(),
            counters: self.ledger.counters(),
            has_more: self
                .merger
                .as_ref()
                .map(PageMerger::has_more)
                .unwrap_or(false),
            phase: self.machine.phase(),
            busy: self.busy,
            search_text: self.search_text.clone(),
            error: self.sticky_error.clone(),
        }
    }

    fn bump_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

async fn fetch_older_page(
    store: Arc<dyn Store>,
    resolver: Arc<dyn ProfileResolver>,
    lens: RecordLens,
    query: SubscriptionQuery,
    cursor: Cursor,
    page_size: usize,
) -> Result<LoadedPage, SyncError> {
    let page = store.fetch_page(&query, Some(&cursor), page_size).await?;
    let Page { docs, cursor } = page;
    let raw_len = docs.len();
    let now = now_ms();
    let records: Vec<Record> = docs.into_iter().map(|doc| lens.project(doc, now)).collect();
    let resolved = resolve_page(&resolver, records).await;
    Ok(LoadedPage {
        resolved,
        cursor,
        raw_len,
    })
}

fn build_query(target: &SessionTarget, search_text: &str) -> SubscriptionQuery {
    let mut filters = vec![target.filter.clone()];
    if let Some(field) = &target.search_field
        && !search_text.is_empty()
    {
        filters.push(FieldFilter::array_contains(field.clone(), search_text));
    }
    SubscriptionQuery {
        collection: target.collection.clone(),
        filters,
        order: Some(target.order.clone()),
        limit: Some(target.page_size),
    }
}

fn build_count_query(target: &SessionTarget) -> SubscriptionQuery {
    SubscriptionQuery {
        collection: target.collection.clone(),
        filters: vec![target.filter.clone()],
        order: None,
        limit: None,
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

fn command_kind(command: &SessionCommand) -> &'static str {
    match command {
        SessionCommand::Open { .. } => "Open",
        SessionCommand::Retarget { .. } => "Retarget",
        SessionCommand::Close => "Close",
        SessionCommand::LoadMore => "LoadMore",
        SessionCommand::MarkRead { .. } => "MarkRead",
        SessionCommand::Remove { .. } => "Remove",
        SessionCommand::RemoveAll => "RemoveAll",
        SessionCommand::Input { .. } => "Input",
    }
}
