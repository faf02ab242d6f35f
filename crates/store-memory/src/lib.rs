//! In-memory push store used by tests and the console demo.
//!
//! Implements the engine's [`Store`] contract with push-store semantics:
//! every change re-delivers the complete current result set to each matching
//! watcher, pages are walked with an opaque cursor, and `create` assigns ids
//! and server timestamps.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use serde_json::{Value, json};
use sync_core::{
    error::SyncError,
    store::{SnapshotStream, Store},
    types::{
        Cursor, Document, FieldFilter, Fields, FilterOp, FullSnapshot, OrderBy, Page, Patch,
        SortDirection, SubscriptionQuery,
    },
};
use tokio::sync::mpsc;
use tracing::debug;

const SNAPSHOT_BUFFER: usize = 32;

struct Watcher {
    query: SubscriptionQuery,
    tx: mpsc::Sender<FullSnapshot>,
}

/// Reference in-memory document store with push-on-change snapshots.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Fields>>>,
    watchers: Mutex<Vec<Watcher>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current wall-clock time in epoch milliseconds.
    pub fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as i64)
            .unwrap_or(0)
    }

    /// Insert or replace a document verbatim and notify matching watchers.
    pub async fn seed(&self, collection: &str, id: &str, fields: Fields) {
        {
            let mut collections = self.collections.lock().expect("collections lock poisoned");
            collections
                .entry(collection.to_owned())
                .or_default()
                .insert(id.to_owned(), fields);
        }
        self.notify(collection).await;
    }

    fn evaluate(&self, query: &SubscriptionQuery) -> Vec<Document> {
        let collections = self.collections.lock().expect("collections lock poisoned");
        let Some(docs) = collections.get(&query.collection) else {
            return Vec::new();
        };

        let mut matched: Vec<Document> = docs
            .iter()
            .filter(|(_, fields)| query.filters.iter().all(|f| filter_matches(f, fields)))
            .map(|(id, fields)| Document {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect();

        if let Some(order) = &query.order {
            sort_docs(&mut matched, order);
            if let Some(limit) = query.limit {
                matched.truncate(limit);
            }
        }
        matched
    }

    fn snapshot_for(&self, query: &SubscriptionQuery) -> FullSnapshot {
        let docs = self.evaluate(query);
        let cursor = query
            .order
            .as_ref()
            .and_then(|order| docs.last().map(|doc| encode_cursor(doc, &order.field)));
        FullSnapshot { docs, cursor }
    }

    async fn notify(&self, collection: &str) {
        let deliveries: Vec<(mpsc::Sender<FullSnapshot>, FullSnapshot)> = {
            let watchers = self.watchers.lock().expect("watchers lock poisoned");
            watchers
                .iter()
                .filter(|watcher| watcher.query.collection == collection)
                .map(|watcher| (watcher.tx.clone(), self.snapshot_for(&watcher.query)))
                .collect()
        };

        for (tx, snapshot) in deliveries {
            let _ = tx.send(snapshot).await;
        }

        self.watchers
            .lock()
            .expect("watchers lock poisoned")
            .retain(|watcher| !watcher.tx.is_closed());
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn subscribe(&self, query: &SubscriptionQuery) -> Result<SnapshotStream, SyncError> {
        let (tx, stream) = SnapshotStream::channel(SNAPSHOT_BUFFER);
        let initial = self.snapshot_for(query);
        debug!(
            collection = %query.collection,
            docs = initial.docs.len(),
            "new watcher; delivering initial snapshot"
        );
        let _ = tx.send(initial).await;
        self.watchers
            .lock()
            .expect("watchers lock poisoned")
            .push(Watcher {
                query: query.clone(),
                tx,
            });
        Ok(stream)
    }

    async fn fetch_page(
        &self,
        query: &SubscriptionQuery,
        after: Option<&Cursor>,
        limit: usize,
    ) -> Result<Page, SyncError> {
        let Some(order) = &query.order else {
            return Err(SyncError::invalid_query(
                "page fetch requires an ordered query",
            ));
        };

        let mut unlimited = query.clone();
        unlimited.limit = None;
        let matched = self.evaluate(&unlimited);

        let start = match after {
            None => 0,
            Some(cursor) => {
                let decoded = decode_cursor(cursor)?;
                matched
                    .iter()
                    .position(|doc| {
                        let key = (sort_value(&doc.fields, &order.field), doc.id.as_str());
                        let cursor_key = (decoded.0, decoded.1.as_str());
                        match order.direction {
                            SortDirection::Ascending => key > cursor_key,
                            SortDirection::Descending => key < cursor_key,
                        }
                    })
                    .unwrap_or(matched.len())
            }
        };

        let docs: Vec<Document> = matched
            .into_iter()
            .skip(start)
            .take(limit.max(1))
            .collect();
        let cursor = docs.last().map(|doc| encode_cursor(doc, &order.field));
        Ok(Page { docs, cursor })
    }

    async fn get_by_id(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, SyncError> {
        let collections = self.collections.lock().expect("collections lock poisoned");
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document {
                id: id.to_owned(),
                fields: fields.clone(),
            }))
    }

    async fn mutate(&self, collection: &str, id: &str, patch: Patch) -> Result<(), SyncError> {
        {
            let mut collections = self.collections.lock().expect("collections lock poisoned");
            let docs = collections.entry(collection.to_owned()).or_default();
            match patch {
                Patch::Delete => {
                    if docs.remove(id).is_none() {
                        return Err(SyncError::document_not_found(collection, id));
                    }
                }
                Patch::Update(update) => {
                    let Some(fields) = docs.get_mut(id) else {
                        return Err(SyncError::document_not_found(collection, id));
                    };
                    for (field, value) in update.sets {
                        fields.insert(field, value);
                    }
                    for (field, delta) in update.increments {
                        let current = fields.get(&field).and_then(Value::as_i64).unwrap_or(0);
                        fields.insert(field, json!(current + delta));
                    }
                    let now = Self::now_ms();
                    for field in update.touches {
                        fields.insert(field, json!(now));
                    }
                }
            }
        }
        self.notify(collection).await;
        Ok(())
    }

    async fn create(&self, collection: &str, mut fields: Fields) -> Result<Document, SyncError> {
        let id = format!("doc-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let now = json!(Self::now_ms());
        fields.insert("createdAt".to_owned(), now.clone());
        fields.insert("updatedAt".to_owned(), now);
        {
            let mut collections = self.collections.lock().expect("collections lock poisoned");
            collections
                .entry(collection.to_owned())
                .or_default()
                .insert(id.clone(), fields.clone());
        }
        self.notify(collection).await;
        Ok(Document { id, fields })
    }
}

fn filter_matches(filter: &FieldFilter, fields: &Fields) -> bool {
    match filter.op {
        FilterOp::Eq => {
            fields.get(&filter.field).and_then(Value::as_str) == Some(filter.value.as_str())
        }
        FilterOp::ArrayContains => fields
            .get(&filter.field)
            .and_then(Value::as_array)
            .is_some_and(|values| {
                values
                    .iter()
                    .any(|value| value.as_str() == Some(filter.value.as_str()))
            }),
    }
}

fn sort_docs(docs: &mut [Document], order: &OrderBy) {
    docs.sort_by(|a, b| {
        let ka = (sort_value(&a.fields, &order.field), a.id.as_str());
        let kb = (sort_value(&b.fields, &order.field), b.id.as_str());
        match order.direction {
            SortDirection::Ascending => ka.cmp(&kb),
            SortDirection::Descending => kb.cmp(&ka),
        }
    });
}

fn sort_value(fields: &Fields, field: &str) -> i64 {
    fields.get(field).and_then(Value::as_i64).unwrap_or(0)
}

fn encode_cursor(doc: &Document, sort_field: &str) -> Cursor {
    Cursor::new(format!(
        "{}|{}",
        sort_value(&doc.fields, sort_field),
        doc.id
    ))
}

fn decode_cursor(cursor: &Cursor) -> Result<(i64, String), SyncError> {
    let (ms, id) = cursor
        .as_str()
        .split_once('|')
        .ok_or_else(|| SyncError::invalid_query("malformed cursor"))?;
    let ms = ms
        .parse::<i64>()
        .map_err(|_| SyncError::invalid_query("malformed cursor position"))?;
    Ok((ms, id.to_owned()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use sync_core::{
        lens::{ForeignRefRule, RecordLens, UnreadRule},
        resolver::{ProfileCache, ProfileResolver, StoreResolver},
        session::{SessionConfig, SessionHandle, spawn_session},
        types::{
            OrderBy, SessionCommand, SessionPhase, SessionState, SessionTarget, SortDirection,
            UpdatePatch,
        },
    };
    use tokio::time::timeout;

    use super::*;

    fn fields(value: Value) -> Fields {
        value.as_object().expect("fields must be a map").clone()
    }

    fn message_query(room: &str, limit: Option<usize>) -> SubscriptionQuery {
        SubscriptionQuery {
            collection: "messages".to_owned(),
            filters: vec![FieldFilter::eq("roomId", room)],
            order: Some(OrderBy {
                field: "createdAt".to_owned(),
                direction: SortDirection::Descending,
            }),
            limit,
        }
    }

    async fn seed_messages(store: &MemoryStore, room: &str, count: usize) {
        for index in 0..count {
            store
                .seed(
                    "messages",
                    &format!("m-{index}"),
                    fields(json!({
                        "roomId": room,
                        "text": format!("message {index}"),
                        "createdAt": 1_000 + index as i64,
                    })),
                )
                .await;
        }
    }

    async fn next_state_where(
        states: &mut sync_core::StateStream,
        predicate: impl Fn(&SessionState) -> bool,
    ) -> SessionState {
        loop {
            let state = timeout(Duration::from_secs(2), states.recv())
                .await
                .expect("state timeout")
                .expect("state receive");
            if predicate(&state) {
                return state;
            }
        }
    }

    fn session_over(store: &Arc<MemoryStore>, config: SessionConfig) -> SessionHandle {
        let store_dyn: Arc<dyn Store> = Arc::clone(store) as Arc<dyn Store>;
        let resolver: Arc<dyn ProfileResolver> = Arc::new(StoreResolver::new(
            Arc::clone(&store_dyn),
            Arc::new(ProfileCache::default()),
        ));
        spawn_session(store_dyn, resolver, config)
    }

    fn room_target(viewer: &str) -> SessionTarget {
        SessionTarget {
            collection: "chatRooms".to_owned(),
            filter: FieldFilter::array_contains("members", viewer),
            order: OrderBy {
                field: "updatedAt".to_owned(),
                direction: SortDirection::Descending,
            },
            page_size: 20,
            lens: RecordLens::new("updatedAt")
                .with_viewer(viewer)
                .with_unread(UnreadRule::RecipientCounter {
                    recipient_field: "recipientId".to_owned(),
                    count_field: "unreadCount".to_owned(),
                })
                .with_foreign_ref(ForeignRefRule::Partner {
                    first_field: "userId1".to_owned(),
                    second_field: "userId2".to_owned(),
                    collection: "accounts".to_owned(),
                }),
            search_field: Some("keywords".to_owned()),
            track_total: false,
            auto_mark_read: false,
        }
    }

    fn message_target(room: &str) -> SessionTarget {
        SessionTarget {
            collection: "messages".to_owned(),
            filter: FieldFilter::eq("roomId", room),
            order: OrderBy {
                field: "createdAt".to_owned(),
                direction: SortDirection::Descending,
            },
            page_size: 2,
            lens: RecordLens::new("createdAt"),
            search_field: None,
            track_total: true,
            auto_mark_read: false,
        }
    }

    async fn seed_room(store: &MemoryStore) {
        store
            .seed(
                "accounts",
                "employer-9",
                fields(json!({ "name": "Acme Recruiting", "email": "hr@acme.example" })),
            )
            .await;
        store
            .seed(
                "chatRooms",
                "room-1",
                fields(json!({
                    "members": ["seeker-1", "employer-9"],
                    "userId1": "seeker-1",
                    "userId2": "employer-9",
                    "recipientId": "employer-9",
                    "unreadCount": 0,
                    "updatedAt": 1_000,
                    "keywords": ["acme", "recruiting"],
                })),
            )
            .await;
    }

    #[tokio::test]
    async fn subscribe_delivers_initial_snapshot_then_redeliveries() {
        let store = MemoryStore::new();
        seed_messages(&store, "room-1", 2).await;

        let mut stream = store
            .subscribe(&message_query("room-1", Some(10)))
            .await
            .expect("subscribe should work");

        let initial = stream.recv().await.expect("initial snapshot");
        assert_eq!(initial.docs.len(), 2);
        assert_eq!(initial.docs[0].id, "m-1", "descending order, newest first");

        store
            .seed(
                "messages",
                "m-9",
                fields(json!({ "roomId": "room-1", "createdAt": 5_000 })),
            )
            .await;

        let redelivered = stream.recv().await.expect("redelivered snapshot");
        assert_eq!(redelivered.docs.len(), 3, "full set again, not a delta");
        assert_eq!(redelivered.docs[0].id, "m-9");
    }

    #[tokio::test]
    async fn changes_in_other_collections_do_not_wake_watchers() {
        let store = MemoryStore::new();
        seed_messages(&store, "room-1", 1).await;

        let mut stream = store
            .subscribe(&message_query("room-1", None))
            .await
            .expect("subscribe should work");
        let _ = stream.recv().await.expect("initial snapshot");

        store
            .seed("accounts", "acc-1", fields(json!({ "name": "A" })))
            .await;
        let no_delivery = timeout(Duration::from_millis(100), stream.recv()).await;
        assert!(no_delivery.is_err());
    }

    #[tokio::test]
    async fn fetch_page_walks_cursor_until_short_page() {
        let store = MemoryStore::new();
        seed_messages(&store, "room-1", 5).await;
        let query = message_query("room-1", Some(2));

        let first = store
            .fetch_page(&query, None, 2)
            .await
            .expect("first page");
        assert_eq!(first.docs.len(), 2);
        assert_eq!(first.docs[0].id, "m-4");

        let second = store
            .fetch_page(&query, first.cursor.as_ref(), 2)
            .await
            .expect("second page");
        assert_eq!(second.docs.len(), 2);
        assert_eq!(second.docs[0].id, "m-2");

        let third = store
            .fetch_page(&query, second.cursor.as_ref(), 2)
            .await
            .expect("third page");
        assert_eq!(third.docs.len(), 1, "short page ends the walk");
        assert_eq!(third.docs[0].id, "m-0");
    }

    #[tokio::test]
    async fn create_assigns_id_and_server_timestamps() {
        let store = MemoryStore::new();
        let created = store
            .create("messages", fields(json!({ "roomId": "room-1", "text": "hi" })))
            .await
            .expect("create should work");

        assert!(created.id.starts_with("doc-"));
        assert!(created.fields.get("createdAt").is_some());
        assert!(created.fields.get("updatedAt").is_some());

        let loaded = store
            .get_by_id("messages", &created.id)
            .await
            .expect("lookup should work")
            .expect("document should exist");
        assert_eq!(loaded.fields.get("text"), Some(&json!("hi")));
    }

    #[tokio::test]
    async fn mutate_applies_sets_increments_touches_and_delete() {
        let store = MemoryStore::new();
        store
            .seed(
                "chatRooms",
                "room-1",
                fields(json!({ "unreadCount": 1, "updatedAt": 10 })),
            )
            .await;

        store
            .mutate(
                "chatRooms",
                "room-1",
                Patch::Update(
                    UpdatePatch::default()
                        .set("recipientId", json!("seeker-1"))
                        .increment("unreadCount", 1)
                        .touch("updatedAt"),
                ),
            )
            .await
            .expect("update should work");

        let updated = store
            .get_by_id("chatRooms", "room-1")
            .await
            .expect("lookup")
            .expect("exists");
        assert_eq!(updated.fields.get("unreadCount"), Some(&json!(2)));
        assert_eq!(updated.fields.get("recipientId"), Some(&json!("seeker-1")));
        assert!(updated.fields.get("updatedAt").and_then(Value::as_i64) > Some(10));

        store
            .mutate("chatRooms", "room-1", Patch::Delete)
            .await
            .expect("delete should work");
        let err = store
            .mutate("chatRooms", "room-1", Patch::Delete)
            .await
            .expect_err("second delete must fail");
        assert_eq!(err.code, "document_not_found");
    }

    #[tokio::test]
    async fn room_session_resolves_partner_profiles() {
        let store = MemoryStore::new();
        seed_room(&store).await;

        let handle = session_over(&store, SessionConfig::default());
        let mut states = handle.subscribe();
        handle
            .send(SessionCommand::Open {
                target: room_target("seeker-1"),
            })
            .await
            .expect("open should enqueue");

        let ready = next_state_where(&mut states, |state| {
            state.phase == SessionPhase::Ready && !state.items.is_empty()
        })
        .await;

        let room = &ready.items[0];
        assert_eq!(room.record.id, "room-1");
        let profile = room.profile.as_ref().expect("partner profile resolved");
        assert_eq!(profile.fields.get("name"), Some(&json!("Acme Recruiting")));
        assert_eq!(ready.counters.unread, 0);
    }

    #[tokio::test]
    async fn incoming_message_flow_raises_then_clears_the_unread_badge() {
        let store = MemoryStore::new();
        seed_room(&store).await;

        let handle = session_over(&store, SessionConfig::default());
        let mut states = handle.subscribe();
        handle
            .send(SessionCommand::Open {
                target: room_target("seeker-1"),
            })
            .await
            .expect("open should enqueue");
        next_state_where(&mut states, |state| state.phase == SessionPhase::Ready).await;

        // The partner sends a message: a new document plus the room counter
        // bump, exactly as the chat window does it.
        store
            .create(
                "messages",
                fields(json!({ "roomId": "room-1", "userId": "employer-9", "text": "hello" })),
            )
            .await
            .expect("message create");
        store
            .mutate(
                "chatRooms",
                "room-1",
                Patch::Update(
                    UpdatePatch::default()
                        .set("recipientId", json!("seeker-1"))
                        .increment("unreadCount", 1)
                        .touch("updatedAt"),
                ),
            )
            .await
            .expect("room bump");

        let unread = next_state_where(&mut states, |state| state.counters.unread == 1).await;
        assert!(unread.items[0].record.unread);

        handle
            .send(SessionCommand::MarkRead {
                id: "room-1".to_owned(),
            })
            .await
            .expect("mark read should enqueue");
        next_state_where(&mut states, |state| state.counters.unread == 0).await;

        // The optimistic local transition is followed by the remote patch.
        let mut cleared = false;
        for _ in 0..20 {
            let room = store
                .get_by_id("chatRooms", "room-1")
                .await
                .expect("lookup")
                .expect("exists");
            if room.fields.get("unreadCount") == Some(&json!(0)) {
                cleared = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(cleared, "mark read must patch the remote counter");
    }

    #[tokio::test]
    async fn message_session_tracks_total_and_loads_older_pages() {
        let store = MemoryStore::new();
        seed_messages(&store, "room-1", 3).await;

        let handle = session_over(&store, SessionConfig::default());
        let mut states = handle.subscribe();
        handle
            .send(SessionCommand::Open {
                target: message_target("room-1"),
            })
            .await
            .expect("open should enqueue");

        let ready = next_state_where(&mut states, |state| {
            state.phase == SessionPhase::Ready
                && state.items.len() == 2
                && state.counters.total == 3
        })
        .await;
        assert!(ready.has_more, "full live window implies more pages");

        handle
            .send(SessionCommand::LoadMore)
            .await
            .expect("load more should enqueue");
        let merged = next_state_where(&mut states, |state| state.items.len() == 3).await;
        assert!(!merged.has_more, "short page ends pagination");

        let ids: Vec<&str> = merged
            .items
            .iter()
            .map(|item| item.record.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m-2", "m-1", "m-0"]);
    }

    #[tokio::test]
    async fn debounced_search_narrows_the_room_list() {
        let store = MemoryStore::new();
        seed_room(&store).await;
        store
            .seed(
                "accounts",
                "employer-7",
                fields(json!({ "name": "Other Corp" })),
            )
            .await;
        store
            .seed(
                "chatRooms",
                "room-2",
                fields(json!({
                    "members": ["seeker-1", "employer-7"],
                    "userId1": "seeker-1",
                    "userId2": "employer-7",
                    "recipientId": "employer-7",
                    "unreadCount": 0,
                    "updatedAt": 2_000,
                    "keywords": ["other", "corp"],
                })),
            )
            .await;

        let config = SessionConfig {
            debounce_window_ms: 50,
            ..SessionConfig::default()
        };
        let handle = session_over(&store, config);
        let mut states = handle.subscribe();
        handle
            .send(SessionCommand::Open {
                target: room_target("seeker-1"),
            })
            .await
            .expect("open should enqueue");
        next_state_where(&mut states, |state| {
            state.phase == SessionPhase::Ready && state.items.len() == 2
        })
        .await;

        handle
            .send(SessionCommand::Input {
                text: "acme".to_owned(),
            })
            .await
            .expect("input should enqueue");

        let narrowed = next_state_where(&mut states, |state| {
            state.items.len() == 1 && !state.busy
        })
        .await;
        assert_eq!(narrowed.items[0].record.id, "room-1");
        assert_eq!(narrowed.search_text, "acme");
    }
}
