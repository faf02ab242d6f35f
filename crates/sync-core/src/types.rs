use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::SyncError, lens::RecordLens};

/// Field map of a remote document, keyed by field name.
pub type Fields = serde_json::Map<String, Value>;

/// Raw store-level entity: remote-assigned id plus its field map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Remote-assigned id, unique within its collection.
    pub id: String,
    /// Domain fields as stored remotely.
    pub fields: Fields,
}

/// Sort direction declared by a query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortDirection {
    /// Oldest first.
    Ascending,
    /// Newest first.
    Descending,
}

/// Ordering clause of a query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderBy {
    /// Field holding the epoch-millisecond sort key.
    pub field: String,
    /// Declared direction.
    pub direction: SortDirection,
}

/// Filter operator supported by the store contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FilterOp {
    /// Field equals the given string value.
    Eq,
    /// Field is an array containing the given string value.
    ArrayContains,
}

/// One filter clause of a query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldFilter {
    /// Field the filter applies to.
    pub field: String,
    /// Filter operator.
    pub op: FilterOp,
    /// Compared value. An empty value makes the whole query invalid.
    pub value: String,
}

impl FieldFilter {
    /// Build an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    /// Build an array-containment filter.
    pub fn array_contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::ArrayContains,
            value: value.into(),
        }
    }
}

/// Immutable description of one live query.
///
/// Structural equality is the subscription reuse key: two equivalent queries
/// never hold more than one live listener per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionQuery {
    /// Target collection name.
    pub collection: String,
    /// Filter clauses, all of which must match.
    pub filters: Vec<FieldFilter>,
    /// Ordering clause; `None` for unordered count-style queries.
    pub order: Option<OrderBy>,
    /// Result-size limit; `None` for the full matching set.
    pub limit: Option<usize>,
}

impl SubscriptionQuery {
    /// Two queries are equivalent iff every field matches.
    pub fn is_equivalent(&self, other: &SubscriptionQuery) -> bool {
        self == other
    }
}

/// Opaque position marker for "continue after here" pagination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One-shot page fetched after a cursor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    /// Raw documents in query order.
    pub docs: Vec<Document>,
    /// Position of the last raw element, when any.
    pub cursor: Option<Cursor>,
}

/// Complete current result set delivered by a push subscription.
///
/// The push model re-delivers the whole live window on every change; deltas
/// are never sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FullSnapshot {
    /// Raw documents in query order.
    pub docs: Vec<Document>,
    /// Position of the last raw element, when any.
    pub cursor: Option<Cursor>,
}

/// Field-level update applied by [`Patch::Update`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UpdatePatch {
    /// Fields replaced with the given values.
    pub sets: Fields,
    /// Fields incremented by the given deltas (missing fields start at zero).
    pub increments: Vec<(String, i64)>,
    /// Fields set to a server-assigned timestamp.
    pub touches: Vec<String>,
}

impl UpdatePatch {
    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.sets.insert(field.into(), value);
        self
    }

    pub fn increment(mut self, field: impl Into<String>, delta: i64) -> Self {
        self.increments.push((field.into(), delta));
        self
    }

    pub fn touch(mut self, field: impl Into<String>) -> Self {
        self.touches.push(field.into());
        self
    }
}

/// Mutation applied to one remote document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Patch {
    /// Merge field updates into the document.
    Update(UpdatePatch),
    /// Delete the document.
    Delete,
}

/// Foreign-key reference attached to a record by its lens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignRef {
    /// Collection holding the referenced profile.
    pub collection: String,
    /// Referenced document id.
    pub id: String,
}

/// Engine-facing entity projected from a raw document by a [`RecordLens`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Remote-assigned id.
    pub id: String,
    /// Normalized epoch-millisecond sort key (clamped to "now" when the
    /// source field is absent or malformed).
    pub sort_key_ms: i64,
    /// Whether the item counts toward the unread badge for the lens viewer.
    pub unread: bool,
    /// At most one related profile to resolve.
    pub foreign_ref: Option<ForeignRef>,
    /// Raw domain fields.
    pub fields: Fields,
}

/// Record plus its resolved profile.
///
/// The join is a read-only denormalization and is never persisted back;
/// `profile == None` covers both "no reference" and a degraded (failed or
/// missing) resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedRecord {
    pub record: Record,
    pub profile: Option<Document>,
}

/// Per-target counters; never negative.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CounterState {
    pub total: u64,
    pub unread: u64,
}

/// Session lifecycle phase reported to the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionPhase {
    /// No target.
    Idle,
    /// Subscription opening, first page not yet resolved.
    Loading,
    /// Materialized view available; may still be resolving "load more".
    Ready,
    /// Canceled; terminal.
    Closed,
}

/// Description of one "screen" a sync session keeps consistent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionTarget {
    /// Target collection name.
    pub collection: String,
    /// Required filter. An empty value settles the session into an empty
    /// ready state instead of opening a listener.
    pub filter: FieldFilter,
    /// Ordering of the live window and of loaded pages.
    pub order: OrderBy,
    /// Live-window size and load-more page size.
    pub page_size: usize,
    /// Projection from raw documents to engine records.
    pub lens: RecordLens,
    /// Field receiving the debounced search text as an array-containment
    /// filter; `None` disables search for this target.
    pub search_field: Option<String>,
    /// Open a secondary unordered subscription on the same filter and
    /// reconcile `counters.total` from its snapshot sizes.
    pub track_total: bool,
    /// Issue the lens mark-read mutation for every unread item after each
    /// applied snapshot.
    pub auto_mark_read: bool,
}

/// Command accepted by a sync session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SessionCommand {
    /// Idle -> Loading; start syncing the given target.
    Open { target: SessionTarget },
    /// Cancel the current target and rebuild for a new one.
    Retarget { target: SessionTarget },
    /// Cancel everything; terminal and idempotent.
    Close,
    /// Fetch the next older page. No-op outside `Ready` with more pages.
    LoadMore,
    /// Optimistically transition one item to read.
    MarkRead { id: String },
    /// Remove one item locally and remotely.
    Remove { id: String },
    /// Remove every item locally and remotely.
    RemoveAll,
    /// Record the latest search text; a query rebuild fires only after the
    /// debounce window has been quiet.
    Input { text: String },
}

/// Consolidated state republished to the caller after every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    /// Deduplicated, ordered accumulation of live window plus loaded pages.
    pub items: Vec<ResolvedRecord>,
    /// Counter ledger output.
    pub counters: CounterState,
    /// Whether older pages remain.
    pub has_more: bool,
    /// Lifecycle phase.
    pub phase: SessionPhase,
    /// A load-more or query rebuild is in flight.
    pub busy: bool,
    /// Latest search input, echoed immediately.
    pub search_text: String,
    /// Sticky transport error; the items above are last-known-good.
    pub error: Option<SyncError>,
}

impl SessionState {
    /// State published before any target is opened.
    pub fn idle() -> Self {
        Self {
            items: Vec::new(),
            counters: CounterState::default(),
            has_more: false,
            phase: SessionPhase::Idle,
            busy: false,
            search_text: String::new(),
            error: None,
        }
    }
}
