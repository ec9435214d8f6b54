use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::messages::{Message, Participant};

pub type DocId = Uuid;

/// Predicate evaluated against a stored document.
pub type Filter<'a, T> = &'a (dyn Fn(&Stored<T>) -> bool + Send + Sync);

/// In-place mutation applied to a matched document. The id is never exposed to it.
pub type Patch<'a, T> = &'a (dyn Fn(&mut T) + Send + Sync);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("store operation timed out")]
    Timeout,
}

/// A document together with the id the store assigned when it was inserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stored<T> {
    pub id: DocId,
    #[serde(flatten)]
    pub doc: T,
}

/// Document collection. Every call is applied completely or not at all.
#[async_trait]
pub trait Collection<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    async fn insert(&self, doc: T) -> Result<DocId, StoreError>;

    /// Inserts `doc` unless some stored document matches `conflict`.
    /// Returns `None` when a conflicting document was found.
    async fn insert_unique(
        &self,
        doc: T,
        conflict: Filter<'_, T>,
    ) -> Result<Option<DocId>, StoreError>;

    async fn find_one(&self, filter: Filter<'_, T>) -> Result<Option<Stored<T>>, StoreError>;

    /// Matching documents in insertion order.
    async fn find_many(&self, filter: Filter<'_, T>) -> Result<Vec<Stored<T>>, StoreError>;

    async fn update_one(&self, filter: Filter<'_, T>, patch: Patch<'_, T>)
        -> Result<bool, StoreError>;

    async fn delete_one(&self, filter: Filter<'_, T>) -> Result<Option<Stored<T>>, StoreError>;

    async fn delete_many(&self, filter: Filter<'_, T>) -> Result<usize, StoreError>;
}

pub struct MemoryCollection<T> {
    docs: RwLock<Vec<Stored<T>>>,
}

impl<T> MemoryCollection<T> {
    pub fn new() -> Self {
        MemoryCollection {
            docs: RwLock::new(Vec::new()),
        }
    }
}

impl<T> Default for MemoryCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Collection<T> for MemoryCollection<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn insert(&self, doc: T) -> Result<DocId, StoreError> {
        let id = Uuid::new_v4();
        self.docs.write().await.push(Stored { id, doc });
        Ok(id)
    }

    async fn insert_unique(
        &self,
        doc: T,
        conflict: Filter<'_, T>,
    ) -> Result<Option<DocId>, StoreError> {
        let mut docs = self.docs.write().await;
        if docs.iter().any(|stored| conflict(stored)) {
            return Ok(None);
        }
        let id = Uuid::new_v4();
        docs.push(Stored { id, doc });
        Ok(Some(id))
    }

    async fn find_one(&self, filter: Filter<'_, T>) -> Result<Option<Stored<T>>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs.iter().find(|stored| filter(stored)).cloned())
    }

    async fn find_many(&self, filter: Filter<'_, T>) -> Result<Vec<Stored<T>>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs.iter().filter(|stored| filter(stored)).cloned().collect())
    }

    async fn update_one(
        &self,
        filter: Filter<'_, T>,
        patch: Patch<'_, T>,
    ) -> Result<bool, StoreError> {
        let mut docs = self.docs.write().await;
        match docs.iter_mut().find(|stored| filter(stored)) {
            Some(stored) => {
                patch(&mut stored.doc);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_one(&self, filter: Filter<'_, T>) -> Result<Option<Stored<T>>, StoreError> {
        let mut docs = self.docs.write().await;
        let position = docs.iter().position(|stored| filter(stored));
        Ok(position.map(|index| docs.remove(index)))
    }

    async fn delete_many(&self, filter: Filter<'_, T>) -> Result<usize, StoreError> {
        let mut docs = self.docs.write().await;
        let before = docs.len();
        docs.retain(|stored| !filter(stored));
        Ok(before - docs.len())
    }
}

/// The process-wide store client: one collection per document kind.
pub struct Store {
    pub participants: Box<dyn Collection<Participant>>,
    pub messages: Box<dyn Collection<Message>>,
}

impl Store {
    pub fn new(
        participants: impl Collection<Participant> + 'static,
        messages: impl Collection<Message> + 'static,
    ) -> Self {
        Store {
            participants: Box::new(participants),
            messages: Box::new(messages),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(
            MemoryCollection::<Participant>::new(),
            MemoryCollection::<Message>::new(),
        )
    }
}
