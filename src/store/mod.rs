//! Document store contract used by the listing, booking and admin pages.
//!
//! Documents are flat JSON objects addressed by `(collection, id)`. The
//! in-memory [`MemoryStore`] backs tests and the demo binary.

mod memory;

use std::cmp::Ordering;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

pub use memory::MemoryStore;

pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String entries of an array field, e.g. a listing's image sources.
    /// Non-string entries are skipped; a missing field yields an empty list.
    pub fn string_list(&self, field: &str) -> Vec<String> {
        match self.fields.get(field) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        fields.get(&self.field) == Some(&self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Sort key for collection reads. Documents lacking the field are left out.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Descending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filter: Option<FieldFilter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filter: None,
            order_by: None,
        }
    }

    pub fn filter(mut self, filter: FieldFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by = Some(order);
        self
    }

    /// Apply filter and ordering to the documents of one collection.
    pub fn apply<'a>(
        &self,
        docs: impl IntoIterator<Item = (&'a String, &'a Fields)>,
    ) -> Vec<Document> {
        let mut out: Vec<Document> = docs
            .into_iter()
            .filter(|(_, fields)| self.filter.as_ref().is_none_or(|f| f.matches(fields)))
            .filter(|(_, fields)| {
                self.order_by
                    .as_ref()
                    .is_none_or(|o| fields.contains_key(&o.field))
            })
            .map(|(id, fields)| Document {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect();
        if let Some(order) = &self.order_by {
            out.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.field), b.get(&order.field));
                match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        out
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

// Values of different types order by type; numbers compare numerically.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => type_rank(x).cmp(&type_rank(y)),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("invalid document path segment {0:?}")]
    InvalidPath(String),

    #[error("subscription closed")]
    Closed,
}

/// Live query results. Each change to the watched collection publishes a
/// fresh snapshot; dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: watch::Receiver<Vec<Document>>,
}

impl Subscription {
    pub(crate) fn new(rx: watch::Receiver<Vec<Document>>) -> Self {
        Self { rx }
    }

    /// Most recent snapshot without waiting.
    pub fn snapshot(&self) -> Vec<Document> {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot.
    pub async fn changed(&mut self) -> Result<Vec<Document>, StoreError> {
        self.rx.changed().await.map_err(|_| StoreError::Closed)?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

pub trait DocumentStore: Send + Sync {
    fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Document>, StoreError>> + Send;

    fn get_all_documents(
        &self,
        collection: &str,
        order_by: Option<OrderBy>,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send;

    fn query_documents(
        &self,
        collection: &str,
        filter: FieldFilter,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send;

    /// Insert with a store-generated id, which is returned.
    fn add_document(
        &self,
        collection: &str,
        fields: Fields,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Create or replace the document at a caller-chosen id.
    fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Merge `fields` into an existing document.
    fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn subscribe(&self, query: Query) -> Result<Subscription, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Fields {
        match v {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn string_list_skips_non_strings() {
        let doc = Document {
            id: "x".into(),
            fields: fields(json!({"images": ["a.jpg", 3, "b.jpg", null], "cover": "c.jpg"})),
        };
        assert_eq!(doc.string_list("images"), vec!["a.jpg", "b.jpg"]);
        assert_eq!(doc.string_list("cover"), vec!["c.jpg"]);
        assert!(doc.string_list("missing").is_empty());
    }

    #[test]
    fn query_orders_and_drops_docs_without_key() {
        let a = fields(json!({"price": 30000, "make": "audi"}));
        let b = fields(json!({"price": 12000.5, "make": "bmw"}));
        let c = fields(json!({"make": "citroen"}));
        let (ia, ib, ic) = ("a".to_string(), "b".to_string(), "c".to_string());
        let docs = vec![(&ia, &a), (&ib, &b), (&ic, &c)];

        let asc = Query::collection("cars").order_by(OrderBy::asc("price"));
        let ids: Vec<_> = asc.apply(docs.clone()).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let desc = Query::collection("cars").order_by(OrderBy::desc("price"));
        let ids: Vec<_> = desc.apply(docs.clone()).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let bmw = Query::collection("cars").filter(FieldFilter::equals("make", "bmw"));
        let ids: Vec<_> = bmw.apply(docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["b"]);
    }
}
