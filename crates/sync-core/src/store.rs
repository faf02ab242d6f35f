use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    error::SyncError,
    types::{Cursor, Document, Fields, FullSnapshot, Page, Patch, SubscriptionQuery},
};

/// Stream of full-snapshot deliveries for one live query.
///
/// The store sends the complete current result set whenever it changes and
/// terminates the stream only when the receiver is dropped.
#[derive(Debug)]
pub struct SnapshotStream {
    receiver: mpsc::Receiver<FullSnapshot>,
}

impl SnapshotStream {
    pub fn new(receiver: mpsc::Receiver<FullSnapshot>) -> Self {
        Self { receiver }
    }

    /// Create a sender/stream pair with the given delivery buffer.
    pub fn channel(buffer: usize) -> (mpsc::Sender<FullSnapshot>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self::new(rx))
    }

    /// Next snapshot, or `None` once the store side has gone away.
    pub async fn recv(&mut self) -> Option<FullSnapshot> {
        self.receiver.recv().await
    }
}

/// Abstract push-based document store the engine synchronizes against.
///
/// Mutations are fire-and-forget from the engine's perspective: local state is
/// updated optimistically and never rolled back when a write fails.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Subscribe to a query; delivers the complete current result set for the
    /// query whenever it changes, starting with the current one.
    async fn subscribe(&self, query: &SubscriptionQuery) -> Result<SnapshotStream, SyncError>;

    /// One-shot cursor-based page fetch. Returns fewer than `limit` documents
    /// iff no further pages exist.
    async fn fetch_page(
        &self,
        query: &SubscriptionQuery,
        after: Option<&Cursor>,
        limit: usize,
    ) -> Result<Page, SyncError>;

    /// Point lookup; `Ok(None)` when the document does not exist.
    async fn get_by_id(&self, collection: &str, id: &str)
    -> Result<Option<Document>, SyncError>;

    /// Apply a patch to one document.
    async fn mutate(&self, collection: &str, id: &str, patch: Patch) -> Result<(), SyncError>;

    /// Create a document with a store-assigned id and server timestamps.
    async fn create(&self, collection: &str, fields: Fields) -> Result<Document, SyncError>;
}
