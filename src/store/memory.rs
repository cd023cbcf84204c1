use std::collections::BTreeMap;
use std::future::{Future, ready};
use std::path::Path;

use parking_lot::Mutex;
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::watch;
use tracing::debug;

use super::{
    Document, DocumentStore, FieldFilter, Fields, OrderBy, Query, StoreError, Subscription,
};
use crate::error::Error;

const GENERATED_ID_LEN: usize = 20;

type Collection = BTreeMap<String, Fields>;

struct Subscriber {
    query: Query,
    tx: watch::Sender<Vec<Document>>,
}

#[derive(Default)]
struct Inner {
    collections: BTreeMap<String, Collection>,
    subscribers: Vec<Subscriber>,
}

impl Inner {
    fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    fn run(&self, query: &Query) -> Vec<Document> {
        match self.collection(&query.collection) {
            Some(docs) => query.apply(docs),
            None => Vec::new(),
        }
    }

    // Push a fresh snapshot to every live subscriber of `collection` and
    // forget the ones whose receiver is gone.
    fn publish(&mut self, collection: &str) {
        self.subscribers.retain(|s| !s.tx.is_closed());
        for sub in &self.subscribers {
            if sub.query.collection == collection {
                let snapshot = match self.collections.get(collection) {
                    Some(docs) => sub.query.apply(docs),
                    None => Vec::new(),
                };
                sub.tx.send_replace(snapshot);
            }
        }
    }
}

/// Process-local [`DocumentStore`]. Collections are created on first write
/// and read back in id order unless a sort key is given.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(seed: BTreeMap<String, BTreeMap<String, Fields>>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                collections: seed,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Seed from YAML shaped as `collection -> id -> fields`.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let s = std::fs::read_to_string(path)?;
        let seed: BTreeMap<String, BTreeMap<String, Fields>> = serde_yaml::from_str(&s)?;
        for (collection, docs) in &seed {
            check_segment(collection)?;
            for id in docs.keys() {
                check_segment(id)?;
            }
        }
        Ok(Self::with_documents(seed))
    }

    pub fn len(&self, collection: &str) -> usize {
        self.inner.lock().collection(collection).map_or(0, |c| c.len())
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        check_segment(collection)?;
        check_segment(id)?;
        let inner = self.inner.lock();
        Ok(inner
            .collection(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    fn read(&self, query: Query) -> Result<Vec<Document>, StoreError> {
        check_segment(&query.collection)?;
        Ok(self.inner.lock().run(&query))
    }

    fn add(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        check_segment(collection)?;
        let mut inner = self.inner.lock();
        let docs = inner.collections.entry(collection.to_string()).or_default();
        let id = loop {
            let candidate = generate_id();
            if !docs.contains_key(&candidate) {
                break candidate;
            }
        };
        docs.insert(id.clone(), fields);
        debug!(collection, id, "document added");
        inner.publish(collection);
        Ok(id)
    }

    fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        check_segment(collection)?;
        check_segment(id)?;
        let mut inner = self.inner.lock();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        debug!(collection, id, "document set");
        inner.publish(collection);
        Ok(())
    }

    fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        check_segment(collection)?;
        check_segment(id)?;
        let mut inner = self.inner.lock();
        let existing = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        existing.extend(fields);
        debug!(collection, id, "document updated");
        inner.publish(collection);
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        check_segment(collection)?;
        check_segment(id)?;
        let mut inner = self.inner.lock();
        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            debug!(collection, id, "document deleted");
            inner.publish(collection);
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Document>, StoreError>> + Send {
        ready(self.get(collection, id))
    }

    fn get_all_documents(
        &self,
        collection: &str,
        order_by: Option<OrderBy>,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send {
        let mut query = Query::collection(collection);
        query.order_by = order_by;
        ready(self.read(query))
    }

    fn query_documents(
        &self,
        collection: &str,
        filter: FieldFilter,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send {
        ready(self.read(Query::collection(collection).filter(filter)))
    }

    fn add_document(
        &self,
        collection: &str,
        fields: Fields,
    ) -> impl Future<Output = Result<String, StoreError>> + Send {
        ready(self.add(collection, fields))
    }

    fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        ready(self.set(collection, id, fields))
    }

    fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        ready(self.update(collection, id, fields))
    }

    fn delete_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        ready(self.delete(collection, id))
    }

    fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        check_segment(&query.collection)?;
        let mut inner = self.inner.lock();
        let (tx, rx) = watch::channel(inner.run(&query));
        inner.subscribers.push(Subscriber { query, tx });
        Ok(Subscription::new(rx))
    }
}

fn check_segment(segment: &str) -> Result<(), StoreError> {
    if segment.trim().is_empty() || segment.contains('/') {
        return Err(StoreError::InvalidPath(segment.to_string()));
    }
    Ok(())
}

fn generate_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_ID_LEN)
        .map(char::from)
        .collect()
}
