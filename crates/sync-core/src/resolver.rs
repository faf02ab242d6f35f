//! Foreign-key resolution with a process-wide memo cache.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::warn;

use crate::{
    error::SyncError,
    store::Store,
    types::{Document, Record, ResolvedRecord},
};

/// Capability interface for resolving a foreign id to its profile, so that
/// alternate backends (batched multi-get, joined queries) can be substituted
/// without touching the page merger.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    /// Point lookup; `Ok(None)` when the profile does not exist.
    async fn resolve(&self, collection: &str, id: &str) -> Result<Option<Document>, SyncError>;
}

/// Memo cache keyed by `(collection, id)`, shared across every sync session
/// in the process. Entries are never proactively invalidated; a stale profile
/// is an accepted trade-off.
#[derive(Debug, Default)]
pub struct ProfileCache {
    entries: RwLock<HashMap<(String, String), Option<Document>>>,
}

/// Cache handle shared across sessions.
pub type SharedProfileCache = Arc<ProfileCache>;

impl ProfileCache {
    pub fn get(&self, collection: &str, id: &str) -> Option<Option<Document>> {
        let entries = self.entries.read().ok()?;
        entries
            .get(&(collection.to_owned(), id.to_owned()))
            .cloned()
    }

    pub fn insert(&self, collection: &str, id: &str, profile: Option<Document>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert((collection.to_owned(), id.to_owned()), profile);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolver backed by store point lookups and the shared memo cache.
#[derive(Clone)]
pub struct StoreResolver {
    store: Arc<dyn Store>,
    cache: SharedProfileCache,
}

impl StoreResolver {
    pub fn new(store: Arc<dyn Store>, cache: SharedProfileCache) -> Self {
        Self { store, cache }
    }
}

#[async_trait]
impl ProfileResolver for StoreResolver {
    async fn resolve(&self, collection: &str, id: &str) -> Result<Option<Document>, SyncError> {
        if let Some(hit) = self.cache.get(collection, id) {
            return Ok(hit);
        }

        let fetched = self
            .store
            .get_by_id(collection, id)
            .await
            .map_err(|err| SyncError::resolution_failed(err.message))?;
        self.cache.insert(collection, id, fetched.clone());
        Ok(fetched)
    }
}

/// Resolve every foreign reference of a page concurrently.
///
/// The page is ready only once every lookup has completed or failed; a single
/// failure degrades that one record to an unresolved placeholder instead of
/// failing the page.
pub async fn resolve_page(
    resolver: &Arc<dyn ProfileResolver>,
    records: Vec<Record>,
) -> Vec<ResolvedRecord> {
    let mut lookups = JoinSet::new();
    for (index, record) in records.iter().enumerate() {
        let Some(foreign_ref) = record.foreign_ref.clone() else {
            continue;
        };
        let resolver = Arc::clone(resolver);
        lookups.spawn(async move {
            let resolved = resolver.resolve(&foreign_ref.collection, &foreign_ref.id).await;
            (index, foreign_ref, resolved)
        });
    }

    let mut profiles: HashMap<usize, Option<Document>> = HashMap::new();
    while let Some(joined) = lookups.join_next().await {
        match joined {
            Ok((index, _, Ok(profile))) => {
                profiles.insert(index, profile);
            }
            Ok((index, foreign_ref, Err(err))) => {
                warn!(
                    collection = %foreign_ref.collection,
                    id = %foreign_ref.id,
                    code = %err.code,
                    "profile resolution failed; rendering record without profile"
                );
                profiles.insert(index, None);
            }
            Err(join_err) => {
                warn!(error = %join_err, "profile resolution task failed to join");
            }
        }
    }

    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| ResolvedRecord {
            record,
            profile: profiles.remove(&index).flatten(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::{
        store::SnapshotStream,
        types::{Cursor, Fields, ForeignRef, Page, Patch, SubscriptionQuery},
    };

    struct CountingStore {
        lookups: AtomicUsize,
        fail_ids: Vec<String>,
    }

    impl CountingStore {
        fn new(fail_ids: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                lookups: AtomicUsize::new(0),
                fail_ids: fail_ids.iter().map(|id| (*id).to_owned()).collect(),
            })
        }
    }

    #[async_trait]
    impl Store for CountingStore {
        async fn subscribe(
            &self,
            _query: &SubscriptionQuery,
        ) -> Result<SnapshotStream, SyncError> {
            unimplemented!("not used by resolver tests")
        }

        async fn fetch_page(
            &self,
            _query: &SubscriptionQuery,
            _after: Option<&Cursor>,
            _limit: usize,
        ) -> Result<Page, SyncError> {
            unimplemented!("not used by resolver tests")
        }

        async fn get_by_id(
            &self,
            _collection: &str,
            id: &str,
        ) -> Result<Option<Document>, SyncError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail_ids.iter().any(|fail| fail == id) {
                return Err(SyncError::store_unreachable("lookup refused"));
            }
            if id == "ghost" {
                return Ok(None);
            }
            let mut fields = Fields::new();
            fields.insert("name".to_owned(), json!(format!("profile {id}")));
            Ok(Some(Document {
                id: id.to_owned(),
                fields,
            }))
        }

        async fn mutate(
            &self,
            _collection: &str,
            _id: &str,
            _patch: Patch,
        ) -> Result<(), SyncError> {
            unimplemented!("not used by resolver tests")
        }

        async fn create(&self, _collection: &str, _fields: Fields) -> Result<Document, SyncError> {
            unimplemented!("not used by resolver tests")
        }
    }

    fn record(id: &str, foreign_id: Option<&str>) -> Record {
        Record {
            id: id.to_owned(),
            sort_key_ms: 0,
            unread: false,
            foreign_ref: foreign_id.map(|foreign| ForeignRef {
                collection: "accounts".to_owned(),
                id: foreign.to_owned(),
            }),
            fields: Fields::new(),
        }
    }

    #[tokio::test]
    async fn resolves_profiles_and_memoizes_by_key() {
        let store = CountingStore::new(&[]);
        let resolver: Arc<dyn ProfileResolver> = Arc::new(StoreResolver::new(
            store.clone(),
            Arc::new(ProfileCache::default()),
        ));

        let first = resolve_page(
            &resolver,
            vec![record("r-1", Some("acc-1")), record("r-2", Some("acc-1"))],
        )
        .await;
        assert!(first.iter().all(|item| item.profile.is_some()));

        let second = resolve_page(&resolver, vec![record("r-3", Some("acc-1"))]).await;
        assert!(second[0].profile.is_some());

        // Two concurrent lookups may race past the empty cache; the repeat
        // page must be served from the memo.
        assert!(store.lookups.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn missing_profile_is_cached_as_none_not_error() {
        let store = CountingStore::new(&[]);
        let cache = Arc::new(ProfileCache::default());
        let resolver: Arc<dyn ProfileResolver> =
            Arc::new(StoreResolver::new(store.clone(), cache.clone()));

        let resolved = resolve_page(&resolver, vec![record("r-1", Some("ghost"))]).await;
        assert_eq!(resolved[0].profile, None);
        assert_eq!(cache.get("accounts", "ghost"), Some(None));

        resolve_page(&resolver, vec![record("r-2", Some("ghost"))]).await;
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_lookup_degrades_one_record_and_page_still_completes() {
        let store = CountingStore::new(&["acc-broken"]);
        let resolver: Arc<dyn ProfileResolver> = Arc::new(StoreResolver::new(
            store,
            Arc::new(ProfileCache::default()),
        ));

        let resolved = resolve_page(
            &resolver,
            vec![
                record("r-1", Some("acc-broken")),
                record("r-2", Some("acc-2")),
                record("r-3", None),
            ],
        )
        .await;

        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[0].profile, None);
        assert!(resolved[1].profile.is_some());
        assert_eq!(resolved[2].profile, None);
    }
}
