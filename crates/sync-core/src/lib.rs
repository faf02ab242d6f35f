//! Real-time paginated synchronization engine.
//!
//! Keeps a client-side working set consistent with a remote push-based
//! document store: full-snapshot subscriptions feed a live window, cursor
//! pagination appends older pages, foreign keys are resolved through a shared
//! memo cache, and unread counters reconcile optimistic local transitions
//! against authoritative pushes. One [`session::SyncSession`] task owns the
//! state for one screen and republishes a consolidated
//! [`types::SessionState`] to its caller.

/// Async command/state channel primitives.
pub mod channel;
/// Quiet-window controller for search input.
pub mod debounce;
/// Stable error types and categories.
pub mod error;
/// Unread/total counter bookkeeping.
pub mod ledger;
/// Projection from raw documents to engine records.
pub mod lens;
/// Live-window and older-page merge algorithm.
pub mod merger;
/// Foreign-key resolution with a shared memo cache.
pub mod resolver;
/// Backoff policy for subscription recovery.
pub mod retry;
/// Session lifecycle state machine.
pub mod session;
/// Session phase transitions.
pub mod state_machine;
/// Abstract push-store contract.
pub mod store;
/// Live-query lifecycle and pump task.
pub mod subscription;
/// Protocol types (queries, records, commands, states).
pub mod types;

pub use channel::{SessionChannelError, SessionChannels, StateStream};
pub use debounce::DebouncedInput;
pub use error::{SyncError, SyncErrorCategory};
pub use ledger::CounterLedger;
pub use lens::{ForeignRefRule, RecordLens, UnreadRule};
pub use merger::PageMerger;
pub use resolver::{ProfileCache, ProfileResolver, SharedProfileCache, StoreResolver, resolve_page};
pub use retry::RetryPolicy;
pub use session::{SessionConfig, SessionHandle, spawn_session};
pub use state_machine::SessionStateMachine;
pub use store::{SnapshotStream, Store};
pub use subscription::{
    SubscriptionEvent, SubscriptionHandle, SubscriptionTag, SubscriptionUpdate,
};
pub use types::{
    CounterState, Cursor, Document, FieldFilter, Fields, FilterOp, ForeignRef, FullSnapshot,
    OrderBy, Page, Patch, Record, ResolvedRecord, SessionCommand, SessionPhase, SessionState,
    SessionTarget, SortDirection, SubscriptionQuery, UpdatePatch,
};
