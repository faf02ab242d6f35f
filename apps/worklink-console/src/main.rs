//! Console demonstration of the sync engine against the in-memory store.
//!
//! Seeds a small recruitment-portal data set, opens sync sessions for the
//! chat room list and the notification feed, and drives the command surface
//! while printing every published session state.

mod config;
mod logging;

use std::{sync::Arc, time::Duration};

use serde_json::json;
use store_memory::MemoryStore;
use sync_core::{
    FieldFilter, Fields, ForeignRefRule, OrderBy, Patch, ProfileCache, ProfileResolver,
    RecordLens, SessionCommand, SessionConfig, SessionPhase, SessionState, SortDirection,
    StateStream, Store, StoreResolver, SessionTarget, UnreadRule, UpdatePatch, spawn_session,
};
use tokio::{sync::broadcast::error::RecvError, time::timeout};
use tracing::info;

use crate::config::ConsoleConfig;

const STATE_WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    logging::init();
    let config = match ConsoleConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };
    info!(viewer = %config.viewer_id, "starting worklink console demo");

    let store = MemoryStore::new();
    seed_demo_data(&store, &config.viewer_id).await;

    let store_dyn: Arc<dyn Store> = store.clone();
    let resolver: Arc<dyn ProfileResolver> = Arc::new(StoreResolver::new(
        Arc::clone(&store_dyn),
        Arc::new(ProfileCache::default()),
    ));
    let session_config = SessionConfig {
        debounce_window_ms: config.debounce_window_ms,
        ..SessionConfig::default()
    };

    // Chat room list: live window, partner joins, unread badges, search.
    let rooms = spawn_session(
        Arc::clone(&store_dyn),
        Arc::clone(&resolver),
        session_config.clone(),
    );
    let mut room_states = rooms.subscribe();
    if rooms
        .send(SessionCommand::Open {
            target: room_target(&config),
        })
        .await
        .is_err()
    {
        eprintln!("room session terminated early");
        return;
    }
    await_state(&mut room_states, "rooms ready", |state| {
        state.phase == SessionPhase::Ready && !state.items.is_empty()
    })
    .await;

    // A partner sends a message: the message document plus the room counter
    // bump, the same two writes the chat window performs.
    println!("\n-- partner sends a message --");
    let message = store
        .create(
            "messages",
            fields(json!({
                "roomId": "room-1",
                "userId": "employer-9",
                "text": "We would like to schedule an interview.",
            })),
        )
        .await;
    if let Err(err) = message {
        eprintln!("message create failed: {err}");
        return;
    }
    if let Err(err) = store
        .mutate(
            "chatRooms",
            "room-1",
            Patch::Update(
                UpdatePatch::default()
                    .set("recipientId", json!(config.viewer_id.clone()))
                    .increment("unreadCount", 1)
                    .touch("updatedAt"),
            ),
        )
        .await
    {
        eprintln!("room bump failed: {err}");
        return;
    }
    await_state(&mut room_states, "rooms unread", |state| {
        state.counters.unread == 1
    })
    .await;

    println!("\n-- viewer opens the room; unread clears optimistically --");
    let _ = rooms
        .send(SessionCommand::MarkRead {
            id: "room-1".to_owned(),
        })
        .await;
    await_state(&mut room_states, "rooms read", |state| {
        state.counters.unread == 0
    })
    .await;

    println!("\n-- debounced search narrows the list --");
    let _ = rooms
        .send(SessionCommand::Input {
            text: "acme".to_owned(),
        })
        .await;
    await_state(&mut room_states, "rooms filtered", |state| {
        state.items.len() == 1 && !state.busy
    })
    .await;

    // Notification feed: flag-based unread, remove and remove-all.
    println!("\n-- notification feed --");
    let notifications = spawn_session(
        Arc::clone(&store_dyn),
        Arc::clone(&resolver),
        session_config,
    );
    let mut notification_states = notifications.subscribe();
    if notifications
        .send(SessionCommand::Open {
            target: notification_target(&config),
        })
        .await
        .is_err()
    {
        eprintln!("notification session terminated early");
        return;
    }
    await_state(&mut notification_states, "notifications ready", |state| {
        state.phase == SessionPhase::Ready && !state.items.is_empty()
    })
    .await;

    let _ = notifications
        .send(SessionCommand::MarkRead {
            id: "n-1".to_owned(),
        })
        .await;
    await_state(&mut notification_states, "notification read", |state| {
        state.counters.unread == 1
    })
    .await;

    let _ = notifications.send(SessionCommand::RemoveAll).await;
    await_state(&mut notification_states, "notifications cleared", |state| {
        state.counters.total == 0 && state.items.is_empty()
    })
    .await;

    let _ = rooms.send(SessionCommand::Close).await;
    let _ = notifications.send(SessionCommand::Close).await;
    info!("demo finished");
}

fn room_target(config: &ConsoleConfig) -> SessionTarget {
    SessionTarget {
        collection: "chatRooms".to_owned(),
        filter: FieldFilter::array_contains("members", config.viewer_id.clone()),
        order: OrderBy {
            field: "updatedAt".to_owned(),
            direction: SortDirection::Descending,
        },
        page_size: config.page_size,
        lens: RecordLens::new("updatedAt")
            .with_viewer(config.viewer_id.clone())
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

fn notification_target(config: &ConsoleConfig) -> SessionTarget {
    SessionTarget {
        collection: "notifications".to_owned(),
        filter: FieldFilter::eq("userId", config.viewer_id.clone()),
        order: OrderBy {
            field: "date".to_owned(),
            direction: SortDirection::Descending,
        },
        page_size: config.page_size,
        lens: RecordLens::new("date").with_unread(UnreadRule::Flag {
            field: "read".to_owned(),
        }),
        search_field: None,
        track_total: true,
        auto_mark_read: false,
    }
}

async fn seed_demo_data(store: &MemoryStore, viewer: &str) {
    store
        .seed(
            "accounts",
            "employer-9",
            fields(json!({ "name": "Acme Recruiting", "email": "hr@acme.example" })),
        )
        .await;
    store
        .seed(
            "accounts",
            "employer-7",
            fields(json!({ "name": "Northwind Talent", "email": "jobs@northwind.example" })),
        )
        .await;
    store
        .seed(
            "chatRooms",
            "room-1",
            fields(json!({
                "members": [viewer, "employer-9"],
                "userId1": viewer,
                "userId2": "employer-9",
                "recipientId": "employer-9",
                "unreadCount": 0,
                "updatedAt": MemoryStore::now_ms(),
                "keywords": ["acme", "recruiting"],
            })),
        )
        .await;
    store
        .seed(
            "chatRooms",
            "room-2",
            fields(json!({
                "members": [viewer, "employer-7"],
                "userId1": viewer,
                "userId2": "employer-7",
                "recipientId": "employer-7",
                "unreadCount": 0,
                "updatedAt": MemoryStore::now_ms(),
                "keywords": ["northwind", "talent"],
            })),
        )
        .await;
    for (id, title, read, offset) in [
        ("n-1", "Your application was viewed", false, 2_000),
        ("n-2", "New job recommendation", false, 1_000),
        ("n-3", "Welcome to the portal", true, 0),
    ] {
        store
            .seed(
                "notifications",
                id,
                fields(json!({
                    "userId": viewer,
                    "title": title,
                    "read": read,
                    "date": MemoryStore::now_ms() - offset,
                })),
            )
            .await;
    }
}

async fn await_state(
    states: &mut StateStream,
    label: &str,
    predicate: impl Fn(&SessionState) -> bool,
) -> Option<SessionState> {
    loop {
        match timeout(STATE_WAIT, states.recv()).await {
            Ok(Ok(state)) => {
                if predicate(&state) {
                    print_state(label, &state);
                    return Some(state);
                }
            }
            Ok(Err(RecvError::Lagged(skipped))) => {
                eprintln!("lagged behind session states; skipped {skipped}");
            }
            Ok(Err(RecvError::Closed)) => {
                eprintln!("session state stream closed while waiting for '{label}'");
                return None;
            }
            Err(_) => {
                eprintln!("timed out waiting for '{label}'");
                return None;
            }
        }
    }
}

fn print_state(label: &str, state: &SessionState) {
    println!(
        "[{label}] phase={:?} items={} total={} unread={} has_more={}{}",
        state.phase,
        state.items.len(),
        state.counters.total,
        state.counters.unread,
        state.has_more,
        state
            .error
            .as_ref()
            .map(|err| format!(" error={}", err.code))
            .unwrap_or_default(),
    );
    for item in &state.items {
        let partner = item
            .profile
            .as_ref()
            .and_then(|profile| profile.fields.get("name"))
            .and_then(|name| name.as_str())
            .unwrap_or("-");
        let title = item
            .record
            .fields
            .get("title")
            .or_else(|| item.record.fields.get("text"))
            .and_then(|value| value.as_str())
            .unwrap_or("-");
        println!(
            "    {} unread={} partner={} {}",
            item.record.id, item.record.unread, partner, title
        );
    }
}

fn fields(value: serde_json::Value) -> Fields {
    value
        .as_object()
        .cloned()
        .unwrap_or_default()
}
